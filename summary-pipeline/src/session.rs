//! Per-session storage for enhanced sections.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use summary_core::SummaryResult;
use tokio::time::Instant;
use tracing::debug;

/// Key/value storage scoped to one user session. Values are serialized JSON so
/// that out-of-process stores can implement the trait unchanged.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str, key: &str) -> SummaryResult<Option<Value>>;

    async fn set(
        &self,
        session_id: &str,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> SummaryResult<()>;

    /// Drop everything stored for the session.
    async fn clear(&self, session_id: &str) -> SummaryResult<()>;
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: Value,
    expires_at: Instant,
}

/// In-process store. Expired values are dropped lazily on read.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, DashMap<String, StoredValue>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys held for a session.
    pub fn key_count(&self, session_id: &str) -> usize {
        let now = Instant::now();
        self.sessions
            .get(session_id)
            .map(|values| values.iter().filter(|stored| stored.expires_at > now).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: &str, key: &str) -> SummaryResult<Option<Value>> {
        let Some(values) = self.sessions.get(session_id) else {
            return Ok(None);
        };
        let expired = match values.get(key) {
            Some(stored) if stored.expires_at > Instant::now() => {
                return Ok(Some(stored.value.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            values.remove(key);
            debug!(session_id, key, "session value expired");
        }
        Ok(None)
    }

    async fn set(
        &self,
        session_id: &str,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> SummaryResult<()> {
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .insert(
                key.to_string(),
                StoredValue {
                    value,
                    expires_at: Instant::now() + ttl,
                },
            );
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> SummaryResult<()> {
        if let Some((_, values)) = self.sessions.remove(session_id) {
            debug!(session_id, keys = values.len(), "session cleared");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn values_expire_after_their_ttl() {
        let store = MemorySessionStore::new();
        store
            .set("s1", "k", json!({"n": 1}), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("s1", "k").await.unwrap(), Some(json!({"n": 1})));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.get("s1", "k").await.unwrap(), None);
        assert_eq!(store.key_count("s1"), 0);
    }

    #[tokio::test]
    async fn clear_only_touches_one_session() {
        let store = MemorySessionStore::new();
        let ttl = Duration::from_secs(60);
        store.set("s1", "k", json!(1), ttl).await.unwrap();
        store.set("s2", "k", json!(2), ttl).await.unwrap();

        store.clear("s1").await.unwrap();
        assert_eq!(store.get("s1", "k").await.unwrap(), None);
        assert_eq!(store.get("s2", "k").await.unwrap(), Some(json!(2)));
    }
}
