use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    /// A miss was filled by a loader and written to the store
    Loaded(ItemWrittenEvent),
    Put(ItemWrittenEvent),
    Invalidated(ItemInvalidatedEvent),
    Refreshed(ItemWrittenEvent),
    RefreshFailed(RefreshFailedEvent),
}

impl CacheEvent {
    pub fn key(&self) -> &str {
        match self {
            CacheEvent::Loaded(e) | CacheEvent::Put(e) | CacheEvent::Refreshed(e) => &e.key,
            CacheEvent::Invalidated(e) => &e.key,
            CacheEvent::RefreshFailed(e) => &e.key,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CacheEvent::Loaded(_) => "loaded",
            CacheEvent::Put(_) => "put",
            CacheEvent::Invalidated(_) => "invalidated",
            CacheEvent::Refreshed(_) => "refreshed",
            CacheEvent::RefreshFailed(_) => "refresh_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemWrittenEvent {
    pub key: String,
    pub ttl_secs: u32,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemInvalidatedEvent {
    pub key: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshFailedEvent {
    pub key: String,
    pub reason: String,
    pub timestamp: u64,
}

/// Helper to get current timestamp in seconds since UNIX epoch
pub fn now_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
