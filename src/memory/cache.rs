//! An in-memory [`ProjectionCache`], backed by a `HashMap` guarded by a
//! `Mutex`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::cache::ProjectionCache;

/// Stores snapshots in a plain in-process `HashMap`. Idempotent under
/// concurrent writers by construction: the last `save` call for a given key
/// wins.
#[derive(Debug, Default)]
pub struct MemoryCache {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectionCache for MemoryCache {
    async fn load(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().unwrap().get(name).cloned())
    }

    async fn save(&self, name: &str, blob: Vec<u8>) -> anyhow::Result<()> {
        self.blobs.lock().unwrap().insert(name.to_owned(), blob);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_blob() {
        let cache = MemoryCache::new();
        assert!(cache.load("order-summary-1").await.unwrap().is_none());

        cache
            .save("order-summary-1", vec![1, 2, 3])
            .await
            .unwrap();

        assert_eq!(
            cache.load("order-summary-1").await.unwrap(),
            Some(vec![1, 2, 3])
        );
    }

    #[tokio::test]
    async fn last_writer_wins() {
        let cache = MemoryCache::new();
        cache.save("k", vec![1]).await.unwrap();
        cache.save("k", vec![2]).await.unwrap();
        assert_eq!(cache.load("k").await.unwrap(), Some(vec![2]));
    }
}
