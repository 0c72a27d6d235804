use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    expire_at_ms: Option<i64>,
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

/// Keyed store with per-entry TTL and lazy expiry on read (spec.md §3, §4.4).
/// Shared across all connection handlers; every operation here is atomic
/// from the caller's point of view thanks to the single `RwLock`.
#[derive(Clone)]
pub struct Store {
    inner: Arc<RwLock<HashMap<Bytes, Entry>>>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// `expire_after_ms > 0` installs a relative expiry; otherwise the key
    /// never expires (spec.md §4.4, and the `PX 0` boundary case in §8).
    pub async fn set(&self, key: Bytes, value: Bytes, expire_after_ms: Option<u64>) {
        let expire_at_ms = match expire_after_ms {
            Some(ms) if ms > 0 => Some(now_ms() + ms as i64),
            _ => None,
        };

        self.inner.write().await.insert(key, Entry { value, expire_at_ms });
    }

    /// Absolute-expiry variant used by the RDB reader (spec.md §4.4).
    pub async fn set_expire_at(&self, key: Bytes, value: Bytes, expire_at_ms: Option<i64>) {
        let expire_at_ms = match expire_at_ms {
            Some(0) | None => None,
            Some(ms) => Some(ms),
        };

        self.inner.write().await.insert(key, Entry { value, expire_at_ms });
    }

    pub async fn get(&self, key: &[u8]) -> Option<Bytes> {
        {
            let guard = self.inner.read().await;
            match guard.get(key) {
                Some(entry) => {
                    if let Some(expire_at) = entry.expire_at_ms {
                        if now_ms() >= expire_at {
                            drop(guard);
                            self.inner.write().await.remove(key);
                            return None;
                        }
                    }
                    return Some(entry.value.clone());
                }
                None => return None,
            }
        }
    }

    pub async fn keys(&self) -> Vec<Bytes> {
        self.inner.read().await.keys().cloned().collect()
    }

    pub async fn key_type(&self, key: &[u8]) -> &'static str {
        if self.get(key).await.is_some() {
            "string"
        } else {
            "none"
        }
    }

    pub async fn reset(&self) {
        self.inner.write().await.clear();
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_returns_value() {
        let store = Store::new();
        store.set(Bytes::from_static(b"k"), Bytes::from_static(b"v"), None).await;
        assert_eq!(store.get(b"k").await, Some(Bytes::from_static(b"v")));
    }

    #[tokio::test]
    async fn get_missing_key_returns_none() {
        let store = Store::new();
        assert_eq!(store.get(b"missing").await, None);
    }

    #[tokio::test]
    async fn px_zero_means_no_expiry() {
        let store = Store::new();
        store.set(Bytes::from_static(b"k"), Bytes::from_static(b"v"), Some(0)).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(store.get(b"k").await, Some(Bytes::from_static(b"v")));
    }

    #[tokio::test]
    async fn expired_key_is_removed_and_returns_none() {
        let store = Store::new();
        store.set(Bytes::from_static(b"k"), Bytes::from_static(b"v"), Some(10)).await;
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert_eq!(store.get(b"k").await, None);
        assert_eq!(store.get(b"k").await, None);
        assert!(store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn overwrite_replaces_prior_entry() {
        let store = Store::new();
        store.set(Bytes::from_static(b"k"), Bytes::from_static(b"v1"), None).await;
        store.set(Bytes::from_static(b"k"), Bytes::from_static(b"v2"), None).await;
        assert_eq!(store.get(b"k").await, Some(Bytes::from_static(b"v2")));
    }
}
