//! Loading-cache facade over a remote, cluster-distributed key-value store.
//!
//! [`CacheAdapter`] presents get-with-load, put, invalidate, refresh, size and stats while the
//! remote store behind [`RemoteStore`] owns storage, expiry and eviction.

pub mod adapter;
pub mod domain;
pub mod events;
pub mod keys;
pub mod loader;
pub mod ports;
pub mod stats;

pub use adapter::CacheAdapter;
pub use domain::{CacheStats, ClusterStats, NodeStats};
pub use events::CacheEvent;
pub use keys::{DisplayKeyEncoder, FnKeyEncoder, PrefixedKeyEncoder};
pub use loader::{FnLoader, loader_fn};
pub use ports::{CacheLoader, KeyEncoder, RemoteStore, StoreResult};
