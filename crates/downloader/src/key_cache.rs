use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::Mutex;

/// Memo table for decryption keys, keyed by the key's absolute URL.
///
/// Keys are immutable on the server side, so a key fetched once is reused for
/// the rest of the run. Concurrent fetch tasks may race a miss for the same
/// URL; the duplicate fetch is harmless and the last insert wins.
#[derive(Default)]
pub struct KeyCache {
    inner: Mutex<HashMap<String, Bytes>>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, url: &str) -> Option<Bytes> {
        self.inner.lock().await.get(url).cloned()
    }

    pub async fn put(&self, url: &str, bytes: Bytes) {
        self.inner.lock().await.insert(url.to_string(), bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_key_cache_memoizes() {
        let cache = KeyCache::new();
        assert!(cache.get("https://example.com/key").await.is_none());

        cache
            .put("https://example.com/key", Bytes::from_static(b"0123456789abcdef"))
            .await;
        assert_eq!(
            cache.get("https://example.com/key").await,
            Some(Bytes::from_static(b"0123456789abcdef"))
        );
        assert!(cache.get("https://example.com/other").await.is_none());
    }
}
