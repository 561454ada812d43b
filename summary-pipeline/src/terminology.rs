//! Terminology lookups for raw codes.
//!
//! The service itself lives outside this workspace; it is reached through
//! [`TerminologyResolver`]. [`TerminologyGateway`] bounds every call with a
//! timeout and remembers answers, misses included, for its own lifetime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use summary_core::codesystems::oid_for_system;
use summary_core::PipelineConfig;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum TerminologyError {
    #[error("terminology service unavailable: {0}")]
    Unavailable(String),
    #[error("terminology lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// Display text for a `(system, code)` pair. `Ok(None)` means the service
/// answered but knows no display for the code.
#[async_trait]
pub trait TerminologyResolver: Send + Sync {
    async fn resolve(&self, system: &str, code: &str) -> Result<Option<String>, TerminologyError>;

    /// Display in `language` (a BCP 47 tag such as `pt-PT`). Resolvers without
    /// translations answer in their default language.
    async fn resolve_in(
        &self,
        system: &str,
        code: &str,
        _language: &str,
    ) -> Result<Option<String>, TerminologyError> {
        self.resolve(system, code).await
    }
}

/// Fixed display table, keyed by code-system OID and code. Systems may be given
/// as OID, `urn:oid:` or FHIR URI.
#[derive(Debug, Clone, Default)]
pub struct StaticTerminology {
    displays: HashMap<(String, String), String>,
    translations: HashMap<(String, String, String), String>,
}

impl StaticTerminology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, system: &str, code: &str, display: impl Into<String>) {
        self.displays
            .insert((oid_for_system(system), code.trim().to_string()), display.into());
    }

    pub fn with(mut self, system: &str, code: &str, display: impl Into<String>) -> Self {
        self.insert(system, code, display);
        self
    }

    /// Display for `language` only. Other languages get the plain entry.
    pub fn insert_translation(
        &mut self,
        language: &str,
        system: &str,
        code: &str,
        display: impl Into<String>,
    ) {
        self.translations.insert(
            (
                language.trim().to_ascii_lowercase(),
                oid_for_system(system),
                code.trim().to_string(),
            ),
            display.into(),
        );
    }

    pub fn with_translation(
        mut self,
        language: &str,
        system: &str,
        code: &str,
        display: impl Into<String>,
    ) -> Self {
        self.insert_translation(language, system, code, display);
        self
    }

    /// Build from `{ system: { code: display } }`.
    pub fn from_nested(map: HashMap<String, HashMap<String, String>>) -> Self {
        let mut terminology = Self::new();
        for (system, codes) in map {
            for (code, display) in codes {
                terminology.insert(&system, &code, display);
            }
        }
        terminology
    }

    pub fn len(&self) -> usize {
        self.displays.len() + self.translations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.displays.is_empty() && self.translations.is_empty()
    }
}

#[async_trait]
impl TerminologyResolver for StaticTerminology {
    async fn resolve(&self, system: &str, code: &str) -> Result<Option<String>, TerminologyError> {
        Ok(self
            .displays
            .get(&(oid_for_system(system), code.trim().to_string()))
            .cloned())
    }

    async fn resolve_in(
        &self,
        system: &str,
        code: &str,
        language: &str,
    ) -> Result<Option<String>, TerminologyError> {
        let key = (
            language.trim().to_ascii_lowercase(),
            oid_for_system(system),
            code.trim().to_string(),
        );
        match self.translations.get(&key) {
            Some(display) => Ok(Some(display.clone())),
            None => self.resolve(system, code).await,
        }
    }
}

/// Timeout and cache in front of a resolver, asking for one display language.
/// Failures are not cached, so a later request may still succeed; answers and
/// misses are.
pub struct TerminologyGateway {
    resolver: Arc<dyn TerminologyResolver>,
    timeout: Duration,
    language: String,
    cache: DashMap<(String, String), Option<String>>,
}

impl TerminologyGateway {
    pub fn new(resolver: Arc<dyn TerminologyResolver>, timeout: Duration) -> Self {
        Self {
            resolver,
            timeout,
            language: PipelineConfig::default().display_language,
            cache: DashMap::new(),
        }
    }

    pub fn from_config(resolver: Arc<dyn TerminologyResolver>, config: &PipelineConfig) -> Self {
        Self::new(resolver, config.terminology_timeout()).with_language(&config.display_language)
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self.cache.clear();
        self
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Display for one code, or `None` on a miss, an error or a timeout.
    pub async fn display_for(&self, system: &str, code: &str) -> Option<String> {
        let key = (oid_for_system(system), code.trim().to_string());
        if let Some(cached) = self.cache.get(&key) {
            return cached.value().clone();
        }

        let lookup = self.resolver.resolve_in(system, code, &self.language);
        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(display)) => {
                let display = display.filter(|text| !text.trim().is_empty());
                if display.is_none() {
                    debug!(system, code, language = %self.language, "terminology miss");
                }
                self.cache.insert(key, display.clone());
                display
            }
            Ok(Err(err)) => {
                warn!(system, code, error = %err, "terminology lookup failed, keeping raw display");
                None
            }
            Err(_) => {
                let err = TerminologyError::Timeout(self.timeout);
                warn!(system, code, error = %err, "terminology lookup failed, keeping raw display");
                None
            }
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

impl std::fmt::Debug for TerminologyGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminologyGateway")
            .field("timeout", &self.timeout)
            .field("language", &self.language)
            .field("cached", &self.cache.len())
            .finish()
    }
}
