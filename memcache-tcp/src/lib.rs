pub mod client;
pub mod protocol;

pub use client::{ClientError, MemcachedClient};
pub use protocol::{MemcacheCodec, ProtocolError, Request, Response};

// Re-export Bytes for convenience
pub use bytes::Bytes;
