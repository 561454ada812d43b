use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Pipeline tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound (milliseconds) for a single terminology lookup.
    pub terminology_timeout_ms: u64,
    /// Lifetime (seconds) of enhanced sections in the session store.
    pub session_ttl_secs: u64,
    /// Turn terminology resolution off entirely (raw displays are kept).
    pub resolve_terminology: bool,
    /// Language requested from the terminology service.
    pub display_language: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            terminology_timeout_ms: 2_000,
            session_ttl_secs: 3_600,
            resolve_terminology: true,
            display_language: "en".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn terminology_timeout(&self) -> Duration {
        Duration::from_millis(self.terminology_timeout_ms)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}
