//! The projection snapshot cache collaborator contract.

use async_trait::async_trait;

/// Loads and stores opaque projection snapshots, keyed by a projection's
/// [`full_name`](crate::projection::Projection::full_name).
///
/// Implementations must be idempotent under concurrent writers: a
/// last-writer-wins `save` is acceptable. Snapshot identity (including the
/// version suffix baked into the key by convention) is entirely the caller's
/// concern -- the cache itself is a dumb key/blob store.
#[async_trait]
pub trait ProjectionCache: Send + Sync {
    /// Reads the snapshot stored under `name`, or `Ok(None)` if absent.
    async fn load(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Stores `blob` under `name`, overwriting any previous snapshot.
    async fn save(&self, name: &str, blob: Vec<u8>) -> anyhow::Result<()>;
}
