use crate::domain::{CacheStats, ClusterStats};
use crate::events::{
    CacheEvent, ItemInvalidatedEvent, ItemWrittenEvent, RefreshFailedEvent, now_timestamp,
};
use crate::keys::DisplayKeyEncoder;
use crate::ports::{CacheLoader, KeyEncoder, RemoteStore};
use crate::stats::{cluster_cache_stats, cluster_size};
use shared::{BoxError, Error, Result, TtlSecs};
use std::collections::HashMap;
use std::fmt::{self, Debug, Display};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, trace};

/// Loading cache backed entirely by a remote store
///
/// Holds no entries locally. Every call is one request/response cycle against the store, plus a
/// loader run on a miss. Concurrent misses on the same key are not coalesced: each caller runs
/// its loader and writes, and the last write wins.
pub struct CacheAdapter<K, V> {
    store: Arc<dyn RemoteStore<V>>,
    ttl: TtlSecs,
    default_loader: Arc<dyn CacheLoader<K, V>>,
    key_encoder: Arc<dyn KeyEncoder<K>>,
    event_broadcaster: Option<broadcast::Sender<CacheEvent>>,
}

impl<K, V> CacheAdapter<K, V>
where
    K: Display + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Adapter whose store keys are the keys' `Display` form
    pub fn new(
        store: Arc<dyn RemoteStore<V>>,
        ttl: TtlSecs,
        default_loader: Arc<dyn CacheLoader<K, V>>,
    ) -> Self {
        Self::with_key_encoder(store, ttl, default_loader, Arc::new(DisplayKeyEncoder))
    }
}

impl<K, V> CacheAdapter<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn with_key_encoder(
        store: Arc<dyn RemoteStore<V>>,
        ttl: TtlSecs,
        default_loader: Arc<dyn CacheLoader<K, V>>,
        key_encoder: Arc<dyn KeyEncoder<K>>,
    ) -> Self {
        Self {
            store,
            ttl,
            default_loader,
            key_encoder,
            event_broadcaster: None,
        }
    }

    pub fn with_event_broadcaster(mut self, broadcaster: broadcast::Sender<CacheEvent>) -> Self {
        self.event_broadcaster = Some(broadcaster);
        self
    }

    pub fn ttl(&self) -> TtlSecs {
        self.ttl
    }

    /// Subscribe to cache events, if a broadcaster is attached
    pub fn subscribe(&self) -> Option<broadcast::Receiver<CacheEvent>> {
        self.event_broadcaster.as_ref().map(|b| b.subscribe())
    }

    /// Value stored for `key`, without loading on a miss
    pub async fn get_if_present(&self, key: &K) -> Result<Option<V>> {
        let encoded = self.key_encoder.encode(key);
        self.fetch(&encoded).await
    }

    /// Value for `key`, loading it with the default loader on a miss
    pub async fn get(&self, key: &K) -> Result<V> {
        self.get_with(key, self.default_loader.as_ref()).await
    }

    /// Value for `key`, loading it with `loader` instead of the default loader on a miss
    pub async fn get_with(&self, key: &K, loader: &dyn CacheLoader<K, V>) -> Result<V> {
        self.get_or_load(key, || loader.load(key)).await
    }

    /// Value for `key`, computing it with `compute` on a miss
    pub async fn get_or_compute<F, Fut, E>(&self, key: &K, compute: F) -> Result<V>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<V, E>> + Send,
        E: Into<BoxError>,
    {
        self.get_or_load(key, || async move {
            compute().await.map_err(Into::<BoxError>::into)
        })
        .await
    }

    /// Hits are returned as-is and never rewritten, so they do not reset the remote TTL
    async fn get_or_load<F, Fut>(&self, key: &K, load: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, BoxError>>,
    {
        let encoded = self.key_encoder.encode(key);
        if let Some(value) = self.fetch(&encoded).await? {
            return Ok(value);
        }

        let value = load().await.map_err(|source| {
            error!(key = %encoded, error = %source, "Something went wrong loading value");
            Error::Load {
                key: encoded.clone(),
                source,
            }
        })?;

        self.write(&encoded, &value).await?;
        self.publish(CacheEvent::Loaded(self.written(encoded)));
        Ok(value)
    }

    /// Store `value` for `key`, replacing any existing entry
    pub async fn put(&self, key: &K, value: V) -> Result<()> {
        let encoded = self.key_encoder.encode(key);
        self.write(&encoded, &value).await?;
        self.publish(CacheEvent::Put(self.written(encoded)));
        Ok(())
    }

    /// Remove `key` from the store; a missing key is not an error
    pub async fn invalidate(&self, key: &K) -> Result<()> {
        let encoded = self.key_encoder.encode(key);
        self.store
            .delete(&encoded)
            .await
            .map_err(|source| Error::RemoteDelete {
                key: encoded.clone(),
                source,
            })?;
        debug!(key = %encoded, "invalidated");
        self.publish(CacheEvent::Invalidated(ItemInvalidatedEvent {
            key: encoded,
            timestamp: now_timestamp(),
        }));
        Ok(())
    }

    /// Reload `key` with the default loader and overwrite the stored value.
    ///
    /// Failures are logged and published as [`CacheEvent::RefreshFailed`], never returned. The
    /// stored value is left untouched when loading fails.
    pub async fn refresh(&self, key: &K) {
        let encoded = self.key_encoder.encode(key);
        let outcome = match self.default_loader.load(key).await {
            Ok(value) => self.write(&encoded, &value).await,
            Err(source) => Err(Error::Load {
                key: encoded.clone(),
                source,
            }),
        };

        match outcome {
            Ok(()) => {
                debug!(key = %encoded, "refreshed");
                self.publish(CacheEvent::Refreshed(self.written(encoded)));
            }
            Err(err) => {
                error!(key = %encoded, error = %err, "Something went wrong refreshing value");
                self.publish(CacheEvent::RefreshFailed(RefreshFailedEvent {
                    key: encoded,
                    reason: err.to_string(),
                    timestamp: now_timestamp(),
                }));
            }
        }
    }

    /// Number of items held across every node of the cluster
    pub async fn size(&self) -> Result<u64> {
        let snapshot = self.cluster_snapshot().await?;
        cluster_size(&snapshot)
    }

    /// Hits, misses and evictions summed across every node of the cluster
    pub async fn stats(&self) -> Result<CacheStats> {
        let snapshot = self.cluster_snapshot().await?;
        cluster_cache_stats(&snapshot)
    }

    pub async fn get_all_present(&self, keys: &[K]) -> Result<HashMap<K, V>>
    where
        K: Eq + Hash + Clone,
    {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get_if_present(key).await? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    /// `get` for every key; the first failure aborts the batch
    pub async fn get_all(&self, keys: &[K]) -> Result<HashMap<K, V>>
    where
        K: Eq + Hash + Clone,
    {
        let mut values = HashMap::with_capacity(keys.len());
        for key in keys {
            if values.contains_key(key) {
                continue;
            }
            let value = self.get(key).await?;
            values.insert(key.clone(), value);
        }
        Ok(values)
    }

    pub async fn put_all<I>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        I::IntoIter: Send,
    {
        for (key, value) in entries {
            self.put(&key, value).await?;
        }
        Ok(())
    }

    pub async fn invalidate_all(&self, keys: &[K]) -> Result<()> {
        for key in keys {
            self.invalidate(key).await?;
        }
        Ok(())
    }

    async fn fetch(&self, encoded: &str) -> Result<Option<V>> {
        let found = self
            .store
            .fetch(encoded)
            .await
            .map_err(|source| Error::RemoteRead {
                key: encoded.to_string(),
                source,
            })?;
        trace!(key = %encoded, hit = found.is_some(), "remote fetch");
        Ok(found)
    }

    async fn write(&self, encoded: &str, value: &V) -> Result<()> {
        self.store
            .store(encoded, self.ttl, value)
            .await
            .map_err(|source| Error::RemoteWrite {
                key: encoded.to_string(),
                source,
            })?;
        debug!(key = %encoded, ttl_secs = self.ttl.0, "stored");
        Ok(())
    }

    async fn cluster_snapshot(&self) -> Result<ClusterStats> {
        self.store.cluster_stats().await.map_err(Error::RemoteStats)
    }

    fn written(&self, key: String) -> ItemWrittenEvent {
        ItemWrittenEvent {
            key,
            ttl_secs: self.ttl.0,
            timestamp: now_timestamp(),
        }
    }

    fn publish(&self, event: CacheEvent) {
        if let Some(ref broadcaster) = self.event_broadcaster {
            let kind = event.kind();
            let key = event.key().to_string();
            match broadcaster.send(event) {
                Ok(subscriber_count) => {
                    trace!(
                        "Broadcasted {} event for key '{}' to {} subscriber(s)",
                        kind, key, subscriber_count
                    );
                }
                Err(_) => {
                    trace!("No subscribers for {} event on key '{}'", kind, key);
                }
            }
        }
    }
}

impl<K, V> Clone for CacheAdapter<K, V> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            ttl: self.ttl,
            default_loader: Arc::clone(&self.default_loader),
            key_encoder: Arc::clone(&self.key_encoder),
            event_broadcaster: self.event_broadcaster.clone(),
        }
    }
}

impl<K, V> Debug for CacheAdapter<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheAdapter")
            .field("ttl", &self.ttl)
            .field("events", &self.event_broadcaster.is_some())
            .finish_non_exhaustive()
    }
}
