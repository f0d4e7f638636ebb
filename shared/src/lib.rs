// shared/src/lib.rs

/// Boxed cause carried across the store and loader seams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("remote read failed for key '{key}': {source}")]
    RemoteRead {
        key: String,
        #[source]
        source: BoxError,
    },
    #[error("remote write failed for key '{key}': {source}")]
    RemoteWrite {
        key: String,
        #[source]
        source: BoxError,
    },
    #[error("remote delete failed for key '{key}': {source}")]
    RemoteDelete {
        key: String,
        #[source]
        source: BoxError,
    },
    #[error("cluster stats unavailable: {0}")]
    RemoteStats(#[source] BoxError),
    #[error("failed to load value for key '{key}': {source}")]
    Load {
        key: String,
        #[source]
        source: BoxError,
    },
    #[error("malformed stats from node {node}: {reason}")]
    MalformedStats { node: String, reason: String },
    #[error("config: {0}")]
    Config(String),
}

impl Error {
    /// True for failures raised by a loader rather than by the remote store.
    pub fn is_load_failure(&self) -> bool {
        matches!(self, Error::Load { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Expiry applied to every write, in seconds. Zero is passed through to the store as-is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TtlSecs(pub u32);

impl TtlSecs {
    pub fn as_duration(&self) -> Option<std::time::Duration> {
        match self.0 {
            0 => None,
            secs => Some(std::time::Duration::from_secs(u64::from(secs))),
        }
    }
}

pub mod config;
pub mod routing;
