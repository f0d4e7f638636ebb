use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Counters reported by a single store node, by stat name
pub type NodeStats = HashMap<String, String>;

/// Snapshot of every node's counters, keyed by node identity
pub type ClusterStats = HashMap<String, NodeStats>;

/// Stat names every node must report
pub mod stat_names {
    pub const CURR_ITEMS: &str = "curr_items";
    pub const GET_HITS: &str = "get_hits";
    pub const GET_MISSES: &str = "get_misses";
    pub const EVICTIONS: &str = "evictions";
}

/// Cache statistics in the conventional loading-cache shape.
///
/// Only hits, misses and evictions are derivable from the remote store; the load fields stay
/// zero when produced by [`crate::CacheAdapter::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hit_count: u64,
    pub miss_count: u64,
    pub load_success_count: u64,
    pub load_exception_count: u64,
    /// Nanoseconds spent loading.
    pub total_load_time: u64,
    pub eviction_count: u64,
}

impl CacheStats {
    pub fn new(
        hit_count: u64,
        miss_count: u64,
        load_success_count: u64,
        load_exception_count: u64,
        total_load_time: u64,
        eviction_count: u64,
    ) -> Self {
        Self {
            hit_count,
            miss_count,
            load_success_count,
            load_exception_count,
            total_load_time,
            eviction_count,
        }
    }

    pub fn request_count(&self) -> u64 {
        self.hit_count.saturating_add(self.miss_count)
    }

    /// Ratio of hits to requests, 1.0 when there were no requests
    pub fn hit_rate(&self) -> f64 {
        match self.request_count() {
            0 => 1.0,
            requests => self.hit_count as f64 / requests as f64,
        }
    }

    /// Ratio of misses to requests, 0.0 when there were no requests
    pub fn miss_rate(&self) -> f64 {
        match self.request_count() {
            0 => 0.0,
            requests => self.miss_count as f64 / requests as f64,
        }
    }

    pub fn load_count(&self) -> u64 {
        self.load_success_count
            .saturating_add(self.load_exception_count)
    }

    /// Average nanoseconds per load, 0.0 when nothing was loaded
    pub fn average_load_penalty(&self) -> f64 {
        match self.load_count() {
            0 => 0.0,
            loads => self.total_load_time as f64 / loads as f64,
        }
    }

    /// Component-wise difference, floored at zero
    pub fn minus(&self, other: &CacheStats) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count.saturating_sub(other.hit_count),
            miss_count: self.miss_count.saturating_sub(other.miss_count),
            load_success_count: self
                .load_success_count
                .saturating_sub(other.load_success_count),
            load_exception_count: self
                .load_exception_count
                .saturating_sub(other.load_exception_count),
            total_load_time: self.total_load_time.saturating_sub(other.total_load_time),
            eviction_count: self.eviction_count.saturating_sub(other.eviction_count),
        }
    }

    pub fn plus(&self, other: &CacheStats) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count.saturating_add(other.hit_count),
            miss_count: self.miss_count.saturating_add(other.miss_count),
            load_success_count: self
                .load_success_count
                .saturating_add(other.load_success_count),
            load_exception_count: self
                .load_exception_count
                .saturating_add(other.load_exception_count),
            total_load_time: self.total_load_time.saturating_add(other.total_load_time),
            eviction_count: self.eviction_count.saturating_add(other.eviction_count),
        }
    }
}
