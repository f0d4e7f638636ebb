//! Reduction of per-node counters into cluster-wide totals.

use crate::domain::stat_names::{CURR_ITEMS, EVICTIONS, GET_HITS, GET_MISSES};
use crate::domain::{CacheStats, ClusterStats};
use shared::{Error, Result};

/// Sum the counter `name` over every node of the snapshot.
///
/// Fails on the first node whose counter is missing, is not a base-10 integer, or pushes the
/// total past `u64::MAX`.
pub fn sum_counter(snapshot: &ClusterStats, name: &str) -> Result<u64> {
    snapshot.iter().try_fold(0u64, |total, (node, stats)| {
        let raw = stats.get(name).ok_or_else(|| Error::MalformedStats {
            node: node.clone(),
            reason: format!("missing counter '{name}'"),
        })?;
        let value = raw.parse::<u64>().map_err(|e| Error::MalformedStats {
            node: node.clone(),
            reason: format!("counter '{name}' is not an integer ({raw:?}): {e}"),
        })?;
        total.checked_add(value).ok_or_else(|| Error::MalformedStats {
            node: node.clone(),
            reason: format!("counter '{name}' overflows the cluster total"),
        })
    })
}

/// Total number of items currently held by the cluster
pub fn cluster_size(snapshot: &ClusterStats) -> Result<u64> {
    sum_counter(snapshot, CURR_ITEMS)
}

/// Cluster-wide hits, misses and evictions; load fields are not observable remotely
pub fn cluster_cache_stats(snapshot: &ClusterStats) -> Result<CacheStats> {
    Ok(CacheStats {
        hit_count: sum_counter(snapshot, GET_HITS)?,
        miss_count: sum_counter(snapshot, GET_MISSES)?,
        eviction_count: sum_counter(snapshot, EVICTIONS)?,
        ..CacheStats::default()
    })
}
