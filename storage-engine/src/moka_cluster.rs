use async_trait::async_trait;
use facade::domain::stat_names::{CURR_ITEMS, EVICTIONS, GET_HITS, GET_MISSES};
use facade::{ClusterStats, NodeStats, RemoteStore, StoreResult};
use moka::Expiry;
use moka::future::Cache;
use moka::notification::RemovalCause;
use shared::TtlSecs;
use shared::routing::node_index;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::trace;

/// Expiry values above this many seconds are absolute UNIX timestamps, as in memcached
const RELATIVE_EXPIRY_LIMIT_SECS: u32 = 60 * 60 * 24 * 30;

#[derive(Clone)]
struct StoredEntry<V> {
    value: V,
    ttl: Option<Duration>,
}

/// Applies each entry's own TTL on create and on overwrite
struct PerEntryExpiry;

impl<V> Expiry<String, StoredEntry<V>> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredEntry<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredEntry<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

#[derive(Default)]
struct NodeCounters {
    get_hits: AtomicU64,
    get_misses: AtomicU64,
    evictions: AtomicU64,
    total_items: AtomicU64,
}

struct MokaNode<V> {
    name: String,
    cache: Cache<String, StoredEntry<V>>,
    counters: Arc<NodeCounters>,
}

impl<V> MokaNode<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn new(name: String, max_entries: Option<u64>) -> Self {
        let counters = Arc::new(NodeCounters::default());
        let listener_counters = Arc::clone(&counters);

        let mut builder = Cache::builder()
            .name(&name)
            .expire_after(PerEntryExpiry)
            .eviction_listener(move |_key, _value, cause| {
                // Expired entries are not evictions; only capacity pressure counts
                if cause == RemovalCause::Size {
                    listener_counters.evictions.fetch_add(1, Ordering::Relaxed);
                }
            });

        if let Some(capacity) = max_entries {
            builder = builder.max_capacity(capacity);
        }

        Self {
            name,
            cache: builder.build(),
            counters,
        }
    }

    async fn stats(&self) -> NodeStats {
        // Flush pending writes and expirations so the item count is exact
        self.cache.run_pending_tasks().await;

        let counter = |c: &AtomicU64| c.load(Ordering::Relaxed).to_string();
        NodeStats::from([
            (CURR_ITEMS.to_string(), self.cache.entry_count().to_string()),
            (GET_HITS.to_string(), counter(&self.counters.get_hits)),
            (GET_MISSES.to_string(), counter(&self.counters.get_misses)),
            (EVICTIONS.to_string(), counter(&self.counters.evictions)),
            (
                "total_items".to_string(),
                counter(&self.counters.total_items),
            ),
        ])
    }
}

/// In-process stand-in for a memcached cluster
///
/// Each node is a moka cache with per-entry expiry and memcached-style counters. Keys are
/// routed to nodes with the same hash the TCP client uses.
pub struct MokaCluster<V> {
    nodes: Vec<MokaNode<V>>,
}

impl<V> MokaCluster<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Cluster of `node_count` unbounded nodes (at least one)
    pub fn new(node_count: usize) -> Self {
        Self::build(node_count, None)
    }

    /// Cluster of `node_count` nodes holding at most `max_entries_per_node` items each
    pub fn bounded(node_count: usize, max_entries_per_node: u64) -> Self {
        Self::build(node_count, Some(max_entries_per_node))
    }

    fn build(node_count: usize, max_entries: Option<u64>) -> Self {
        let nodes = (0..node_count.max(1))
            .map(|i| MokaNode::new(format!("moka-node-{i}"), max_entries))
            .collect();
        Self { nodes }
    }

    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    /// Name of the node owning `key`
    pub fn node_for(&self, key: &str) -> &str {
        &self.node(key).name
    }

    fn node(&self, key: &str) -> &MokaNode<V> {
        &self.nodes[node_index(key, self.nodes.len())]
    }
}

/// Memcached expiry semantics: 0 never expires, up to 30 days is relative, beyond is absolute
fn expiry_duration(ttl: TtlSecs) -> Option<Duration> {
    if ttl.0 <= RELATIVE_EXPIRY_LIMIT_SECS {
        return ttl.as_duration();
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    Some(Duration::from_secs(u64::from(ttl.0).saturating_sub(now)))
}

#[async_trait]
impl<V> RemoteStore<V> for MokaCluster<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn fetch(&self, key: &str) -> StoreResult<Option<V>> {
        let node = self.node(key);
        let found = node.cache.get(key).await.map(|entry| entry.value);
        let counter = match found {
            Some(_) => &node.counters.get_hits,
            None => &node.counters.get_misses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        trace!(node = %node.name, key, hit = found.is_some(), "get");
        Ok(found)
    }

    async fn store(&self, key: &str, ttl: TtlSecs, value: &V) -> StoreResult<()> {
        let node = self.node(key);
        let entry = StoredEntry {
            value: value.clone(),
            ttl: expiry_duration(ttl),
        };
        node.cache.insert(key.to_string(), entry).await;
        node.counters.total_items.fetch_add(1, Ordering::Relaxed);
        trace!(node = %node.name, key, ttl_secs = ttl.0, "set");
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let node = self.node(key);
        node.cache.invalidate(key).await;
        trace!(node = %node.name, key, "delete");
        Ok(())
    }

    async fn cluster_stats(&self) -> StoreResult<ClusterStats> {
        let mut snapshot = ClusterStats::with_capacity(self.nodes.len());
        for node in &self.nodes {
            snapshot.insert(node.name.clone(), node.stats().await);
        }
        Ok(snapshot)
    }
}

impl<V> Debug for MokaCluster<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaCluster")
            .field(
                "nodes",
                &self.nodes.iter().map(|n| &n.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}
