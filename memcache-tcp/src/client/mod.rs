use crate::protocol::{MemcacheCodec, ProtocolError, Request, Response};
use async_trait::async_trait;
use bytes::Bytes;
use facade::{ClusterStats, NodeStats, RemoteStore, StoreResult};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::TtlSecs;
use shared::config::Config;
use shared::routing::node_index;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

type Connection = Framed<TcpStream, MemcacheCodec>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("no memcached servers configured")]
    NoServers,

    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} on {addr} timed out after {after:?}")]
    Timeout {
        addr: String,
        command: &'static str,
        after: Duration,
    },

    #[error("connection to {0} was closed by the server")]
    ConnectionClosed(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("{addr} rejected {command}: {message}")]
    Server {
        addr: String,
        command: &'static str,
        message: String,
    },

    #[error("unexpected reply to {command} from {addr}: {response}")]
    UnexpectedResponse {
        addr: String,
        command: &'static str,
        response: String,
    },

    #[error("value encoding failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One server of the cluster and its lazily opened connection
///
/// Requests to a node are serialized over a single connection. A transport failure drops the
/// connection so the next request reconnects.
struct Node {
    addr: String,
    connect_timeout: Duration,
    conn: Mutex<Option<Connection>>,
}

impl Node {
    fn new(addr: String, connect_timeout: Duration) -> Self {
        Self {
            addr,
            connect_timeout,
            conn: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<Connection, ClientError> {
        let stream = match timeout(self.connect_timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ClientError::Connect {
                    addr: self.addr.clone(),
                    source,
                });
            }
            Err(_) => {
                return Err(ClientError::Timeout {
                    addr: self.addr.clone(),
                    command: "connect",
                    after: self.connect_timeout,
                });
            }
        };
        stream.set_nodelay(true).ok();
        info!("Connected to memcached node {}", self.addr);
        Ok(Framed::new(stream, MemcacheCodec))
    }

    /// One request/response, bounded by `op_timeout` including the wait for the connection lock
    async fn exchange(&self, request: Request, op_timeout: Duration) -> Result<Response, ClientError> {
        let command = request.name();

        let result = match timeout(op_timeout, self.checked_out_exchange(request)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout {
                addr: self.addr.clone(),
                command,
                after: op_timeout,
            }),
        };

        if let Err(e) = &result {
            warn!("{command} on {} failed, connection discarded: {e}", self.addr);
        }
        result
    }

    /// The connection leaves its slot for the duration of the exchange and only goes back after
    /// a well-formed reply. A failed, cancelled or out-of-step exchange leaves the slot empty,
    /// so the next request reconnects.
    async fn checked_out_exchange(&self, request: Request) -> Result<Response, ClientError> {
        let command = request.name();
        let expected_key = request.key().map(str::to_string);

        let mut slot = self.conn.lock().await;
        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => self.connect().await?,
        };
        let response = self.round_trip(&mut conn, request).await?;

        if let (Response::Value { key, .. }, Some(expected)) = (&response, &expected_key) {
            if key != expected {
                return Err(ClientError::UnexpectedResponse {
                    addr: self.addr.clone(),
                    command,
                    response: format!("VALUE for {key:?} while waiting for {expected:?}"),
                });
            }
        }

        *slot = Some(conn);
        Ok(response)
    }

    async fn round_trip(
        &self,
        conn: &mut Connection,
        request: Request,
    ) -> Result<Response, ClientError> {
        conn.send(request).await?;
        match conn.next().await {
            Some(response) => Ok(response?),
            None => Err(ClientError::ConnectionClosed(self.addr.clone())),
        }
    }

    fn reject(&self, command: &'static str, response: Response) -> ClientError {
        match response {
            Response::ServerError(message) | Response::ClientError(message) => ClientError::Server {
                addr: self.addr.clone(),
                command,
                message,
            },
            Response::Error => ClientError::Server {
                addr: self.addr.clone(),
                command,
                message: "ERROR".to_string(),
            },
            other => ClientError::UnexpectedResponse {
                addr: self.addr.clone(),
                command,
                response: format!("{other:?}"),
            },
        }
    }
}

/// Client for a cluster of memcached servers speaking the ASCII protocol
///
/// Keys are routed to a server with CRC-32 over the server list, so every client configured
/// with the same list in the same order agrees on placement. Values stored through the
/// [`RemoteStore`] implementation are JSON with flags `0`.
pub struct MemcachedClient {
    nodes: Vec<Node>,
    op_timeout: Duration,
}

impl MemcachedClient {
    pub fn new<I, S>(
        servers: I,
        connect_timeout: Duration,
        op_timeout: Duration,
    ) -> Result<Self, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let nodes: Vec<Node> = servers
            .into_iter()
            .map(|addr| Node::new(addr.into(), connect_timeout))
            .collect();
        if nodes.is_empty() {
            return Err(ClientError::NoServers);
        }
        Ok(Self { nodes, op_timeout })
    }

    pub fn from_config(config: &Config) -> Result<Self, ClientError> {
        Self::new(
            config.servers.iter().cloned(),
            config.connect_timeout,
            config.op_timeout,
        )
    }

    pub fn servers(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.addr.as_str()).collect()
    }

    /// Address of the server owning `key`
    pub fn server_for(&self, key: &str) -> &str {
        &self.node_for(key).addr
    }

    fn node_for(&self, key: &str) -> &Node {
        &self.nodes[node_index(key, self.nodes.len())]
    }

    pub async fn get_raw(&self, key: &str) -> Result<Option<(u32, Bytes)>, ClientError> {
        let request = Request::Get {
            key: key.to_string(),
        };
        request.validate()?;
        let node = self.node_for(key);

        match node.exchange(request, self.op_timeout).await? {
            Response::Value { flags, data, .. } => Ok(Some((flags, data))),
            Response::End => Ok(None),
            other => Err(node.reject("get", other)),
        }
    }

    pub async fn set_raw(
        &self,
        key: &str,
        flags: u32,
        exptime: u32,
        data: Bytes,
    ) -> Result<(), ClientError> {
        let request = Request::Set {
            key: key.to_string(),
            flags,
            exptime,
            data,
        };
        request.validate()?;
        let node = self.node_for(key);

        match node.exchange(request, self.op_timeout).await? {
            Response::Stored => Ok(()),
            other => Err(node.reject("set", other)),
        }
    }

    /// Remove `key`, returning whether it was present
    pub async fn remove(&self, key: &str) -> Result<bool, ClientError> {
        let request = Request::Delete {
            key: key.to_string(),
        };
        request.validate()?;
        let node = self.node_for(key);

        match node.exchange(request, self.op_timeout).await? {
            Response::Deleted => Ok(true),
            Response::NotFound => Ok(false),
            other => Err(node.reject("delete", other)),
        }
    }

    /// `stats` from every server, keyed by server address
    ///
    /// Any unreachable server fails the whole call: a partial snapshot would undercount.
    pub async fn stats(&self) -> Result<ClusterStats, ClientError> {
        let replies = futures::future::join_all(
            self.nodes
                .iter()
                .map(|node| node.exchange(Request::Stats, self.op_timeout)),
        )
        .await;

        let mut snapshot = ClusterStats::with_capacity(self.nodes.len());
        for (node, reply) in self.nodes.iter().zip(replies) {
            let stats: NodeStats = match reply? {
                Response::Stats(pairs) => pairs.into_iter().collect(),
                Response::End => NodeStats::new(),
                other => return Err(node.reject("stats", other)),
            };
            snapshot.insert(node.addr.clone(), stats);
        }
        debug!("Collected stats from {} nodes", snapshot.len());
        Ok(snapshot)
    }

    /// Server version of every node, in configuration order
    pub async fn versions(&self) -> Result<Vec<(String, String)>, ClientError> {
        let mut versions = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            match node.exchange(Request::Version, self.op_timeout).await? {
                Response::Version(v) => versions.push((node.addr.clone(), v)),
                other => return Err(node.reject("version", other)),
            }
        }
        Ok(versions)
    }
}

impl std::fmt::Debug for MemcachedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemcachedClient")
            .field("servers", &self.servers())
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

#[async_trait]
impl<V> RemoteStore<V> for MemcachedClient
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn fetch(&self, key: &str) -> StoreResult<Option<V>> {
        match self.get_raw(key).await? {
            Some((_flags, data)) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    async fn store(&self, key: &str, ttl: TtlSecs, value: &V) -> StoreResult<()> {
        let data = serde_json::to_vec(value)?;
        self.set_raw(key, 0, ttl.0, Bytes::from(data)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.remove(key).await?;
        Ok(())
    }

    async fn cluster_stats(&self) -> StoreResult<ClusterStats> {
        Ok(self.stats().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_server_list_is_rejected() {
        let err = MemcachedClient::new(
            Vec::<String>::new(),
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, ClientError::NoServers));
    }

    #[test]
    fn test_routing_is_stable_and_covers_servers() {
        let client = MemcachedClient::new(
            ["10.0.0.1:11211", "10.0.0.2:11211", "10.0.0.3:11211"],
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap();

        let mut seen = std::collections::HashSet::new();
        for i in 0..200 {
            let key = format!("user:{i}");
            let server = client.server_for(&key);
            assert_eq!(server, client.server_for(&key));
            seen.insert(server.to_string());
        }
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_key_fails_without_connecting() {
        // Nothing listens on port 9 of the TEST-NET range, so any connect attempt would time out
        let client = MemcachedClient::new(
            ["192.0.2.1:9"],
            Duration::from_secs(30),
            Duration::from_secs(30),
        )
        .unwrap();

        let err = client.get_raw("has space").await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::InvalidKey { .. })
        ));
    }
}
