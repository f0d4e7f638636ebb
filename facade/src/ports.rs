#![deny(clippy::all)]

use crate::domain::ClusterStats;
use async_trait::async_trait;
use shared::{BoxError, TtlSecs};

// Ports are the pluggable seams between the adapter and the outside world

pub type StoreResult<T> = std::result::Result<T, BoxError>;

/// Port for the remote, cluster-distributed key-value store
/// Implementations own storage, expiry and eviction and must be safe for concurrent use
#[async_trait]
pub trait RemoteStore<V>: Send + Sync + 'static {
    /// Read the value stored under `key`, `None` when absent or expired
    async fn fetch(&self, key: &str) -> StoreResult<Option<V>>;
    /// Write `value` under `key`, replacing any existing entry
    async fn store(&self, key: &str, ttl: TtlSecs, value: &V) -> StoreResult<()>;
    /// Remove `key`; removing a missing key succeeds
    async fn delete(&self, key: &str) -> StoreResult<()>;
    /// Per-node counters, keyed by node identity
    async fn cluster_stats(&self) -> StoreResult<ClusterStats>;
}

/// Port for computing a value on a cache miss
#[async_trait]
pub trait CacheLoader<K, V>: Send + Sync {
    async fn load(&self, key: &K) -> Result<V, BoxError>;
}

/// Port for turning a typed key into the store's key representation
///
/// Equal keys must encode to equal strings. Distinct keys that encode to the same string
/// share one remote entry.
pub trait KeyEncoder<K: ?Sized>: Send + Sync + 'static {
    fn encode(&self, key: &K) -> String;
}
