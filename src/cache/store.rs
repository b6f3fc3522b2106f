//! The external key-value cache store boundary.

use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;
    async fn clear(&self) -> Result<(), StoreError>;
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Optional bulk-delete by glob-style pattern; the default
    /// implementation falls back to `keys` + per-key `delete`.
    async fn delete_pattern(&self, pattern: &str) -> Result<usize, StoreError> {
        let keys = self.keys(pattern).await?;
        let mut deleted = 0;
        for key in keys {
            if self.delete(&key).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("cache store backend error: {0}")]
pub struct StoreError(pub String);

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::time::Instant;
    use tokio::sync::Mutex;

    struct Entry {
        value: Vec<u8>,
        expires_at: Option<Instant>,
        ttl: Option<Duration>,
    }

    /// A deterministic in-memory `CacheStore`, glob-matching `keys`/
    /// `delete_pattern` with `*` as the only wildcard (matching the
    /// fingerprint/tag key shapes this crate generates).
    #[derive(Default)]
    pub struct InMemoryCacheStore {
        entries: Mutex<HashMap<String, Entry>>,
    }

    fn glob_match(pattern: &str, key: &str) -> bool {
        if !pattern.contains('*') {
            return pattern == key;
        }
        let parts: Vec<&str> = pattern.split('*').collect();
        let mut rest = key;
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() {
                continue;
            }
            if i == 0 {
                if !rest.starts_with(part) {
                    return false;
                }
                rest = &rest[part.len()..];
            } else if i == parts.len() - 1 {
                if !rest.ends_with(part) {
                    return false;
                }
            } else if let Some(pos) = rest.find(part) {
                rest = &rest[pos + part.len()..];
            } else {
                return false;
            }
        }
        true
    }

    #[async_trait]
    impl CacheStore for InMemoryCacheStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.get(key) {
                if let Some(expires_at) = entry.expires_at {
                    if Instant::now() >= expires_at {
                        entries.remove(key);
                        return Ok(None);
                    }
                }
                return Ok(Some(entry.value.clone()));
            }
            Ok(None)
        }

        async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError> {
            let expires_at = ttl.map(|d| Instant::now() + d);
            self.entries.lock().await.insert(
                key.to_string(),
                Entry {
                    value,
                    expires_at,
                    ttl,
                },
            );
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<bool, StoreError> {
            Ok(self.entries.lock().await.remove(key).is_some())
        }

        async fn exists(&self, key: &str) -> Result<bool, StoreError> {
            Ok(self.entries.lock().await.contains_key(key))
        }

        async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
            Ok(self
                .entries
                .lock()
                .await
                .keys()
                .filter(|k| glob_match(pattern, k))
                .cloned()
                .collect())
        }

        async fn clear(&self) -> Result<(), StoreError> {
            self.entries.lock().await.clear();
            Ok(())
        }

        async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
            Ok(self.entries.lock().await.get(key).and_then(|e| e.ttl))
        }

        async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.get_mut(key) {
                entry.ttl = Some(ttl);
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            } else {
                Ok(false)
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn glob_match_handles_prefix_suffix_and_middle() {
            assert!(glob_match("table:users", "table:users"));
            assert!(glob_match("table:*", "table:users"));
            assert!(glob_match("*users*", "qb:table:users:abc"));
            assert!(!glob_match("table:users", "table:accounts"));
        }
    }
}
