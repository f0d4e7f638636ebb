use async_trait::async_trait;
use bytes::Bytes;
use facade::{CacheAdapter, CacheLoader, RemoteStore};
use memcache_tcp::{ClientError, MemcachedClient};
use serde::{Deserialize, Serialize};
use shared::{BoxError, Error, TtlSecs};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

/// Just enough of a memcached server to exercise the client: get, set, delete, stats, version
#[derive(Default)]
struct FakeMemcached {
    entries: Mutex<HashMap<String, (u32, u32, Vec<u8>)>>,
    hits: AtomicU64,
    misses: AtomicU64,
    connections: AtomicUsize,
}

impl FakeMemcached {
    async fn spawn() -> (SocketAddr, Arc<Self>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(Self::default());

        let state = server.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                state.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(state.clone().serve(socket));
            }
        });
        (addr, server)
    }

    fn exptime_of(&self, key: &str) -> Option<u32> {
        self.entries.lock().unwrap().get(key).map(|(_, exptime, _)| *exptime)
    }

    async fn serve(self: Arc<Self>, socket: TcpStream) -> std::io::Result<()> {
        let (read, mut write) = socket.into_split();
        let mut reader = BufReader::new(read);
        let mut line = String::new();

        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }
            let parts: Vec<&str> = line.trim_end().split(' ').collect();

            let reply = if let ["set", key, flags, exptime, len] = parts.as_slice() {
                let len: usize = len.parse().unwrap();
                let mut data = vec![0u8; len + 2];
                reader.read_exact(&mut data).await?;
                data.truncate(len);
                self.set(key, flags.parse().unwrap(), exptime.parse().unwrap(), data)
            } else {
                self.respond(&parts)
            };
            write.write_all(&reply).await?;
        }
    }

    fn set(&self, key: &str, flags: u32, exptime: u32, data: Vec<u8>) -> Vec<u8> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (flags, exptime, data));
        b"STORED\r\n".to_vec()
    }

    fn respond(&self, parts: &[&str]) -> Vec<u8> {
        let mut entries = self.entries.lock().unwrap();
        match parts {
            ["get", key] => match entries.get(*key) {
                Some((flags, _, data)) => {
                    self.hits.fetch_add(1, Ordering::SeqCst);
                    let mut reply = format!("VALUE {key} {flags} {}\r\n", data.len()).into_bytes();
                    reply.extend_from_slice(data);
                    reply.extend_from_slice(b"\r\nEND\r\n");
                    reply
                }
                None => {
                    self.misses.fetch_add(1, Ordering::SeqCst);
                    b"END\r\n".to_vec()
                }
            },
            ["delete", key] => match entries.remove(*key) {
                Some(_) => b"DELETED\r\n".to_vec(),
                None => b"NOT_FOUND\r\n".to_vec(),
            },
            ["stats"] => format!(
                "STAT pid 1\r\nSTAT curr_items {}\r\nSTAT get_hits {}\r\nSTAT get_misses {}\r\nSTAT evictions 0\r\nEND\r\n",
                entries.len(),
                self.hits.load(Ordering::SeqCst),
                self.misses.load(Ordering::SeqCst),
            )
            .into_bytes(),
            ["version"] => b"VERSION 1.6.21\r\n".to_vec(),
            _ => b"ERROR\r\n".to_vec(),
        }
    }
}

fn client_for(addrs: &[SocketAddr]) -> MemcachedClient {
    MemcachedClient::new(
        addrs.iter().map(|a| a.to_string()),
        Duration::from_secs(2),
        Duration::from_secs(2),
    )
    .unwrap()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    id: Uuid,
    name: String,
    logins: u32,
}

struct ProfileLoader {
    calls: AtomicUsize,
}

#[async_trait]
impl CacheLoader<Uuid, Profile> for ProfileLoader {
    async fn load(&self, key: &Uuid) -> Result<Profile, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Profile {
            id: *key,
            name: "ada".to_string(),
            logins: 1,
        })
    }
}

#[tokio::test]
async fn test_raw_set_get_delete() {
    let (addr, server) = FakeMemcached::spawn().await;
    let client = client_for(&[addr]);

    assert_eq!(client.get_raw("greeting").await.unwrap(), None);

    client
        .set_raw("greeting", 7, 60, Bytes::from_static(b"hello\r\nworld"))
        .await
        .unwrap();
    assert_eq!(
        client.get_raw("greeting").await.unwrap(),
        Some((7, Bytes::from_static(b"hello\r\nworld")))
    );
    assert_eq!(server.exptime_of("greeting"), Some(60));

    assert!(client.remove("greeting").await.unwrap());
    assert!(!client.remove("greeting").await.unwrap());
    assert_eq!(client.get_raw("greeting").await.unwrap(), None);

    // All of the above went over one lazily opened connection
    assert_eq!(server.connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_remote_store_round_trips_json() {
    let (addr, _server) = FakeMemcached::spawn().await;
    let client = client_for(&[addr]);
    let profile = Profile {
        id: Uuid::new_v4(),
        name: "grace".to_string(),
        logins: 3,
    };
    let key = profile.id.to_string();

    RemoteStore::<Profile>::store(&client, &key, TtlSecs(30), &profile)
        .await
        .unwrap();
    let fetched: Option<Profile> = client.fetch(&key).await.unwrap();
    assert_eq!(fetched, Some(profile));

    let (_, raw) = client.get_raw(&key).await.unwrap().unwrap();
    assert!(serde_json::from_slice::<serde_json::Value>(&raw).is_ok());

    RemoteStore::<Profile>::delete(&client, &key).await.unwrap();
    // Deleting a missing key is not an error
    RemoteStore::<Profile>::delete(&client, &key).await.unwrap();
    let fetched: Option<Profile> = client.fetch(&key).await.unwrap();
    assert_eq!(fetched, None);
}

#[tokio::test]
async fn test_adapter_over_two_nodes() {
    let (addr_a, server_a) = FakeMemcached::spawn().await;
    let (addr_b, server_b) = FakeMemcached::spawn().await;
    let client = Arc::new(client_for(&[addr_a, addr_b]));
    let loader = Arc::new(ProfileLoader {
        calls: AtomicUsize::new(0),
    });
    let cache: CacheAdapter<Uuid, Profile> =
        CacheAdapter::new(client.clone(), TtlSecs(120), loader.clone());

    let keys: Vec<Uuid> = (0..20).map(|_| Uuid::new_v4()).collect();
    for key in &keys {
        assert_eq!(cache.get(key).await.unwrap().id, *key); // miss, load, store
        assert_eq!(cache.get(key).await.unwrap().id, *key); // hit
    }
    assert_eq!(loader.calls.load(Ordering::SeqCst), 20);

    let held_a = server_a.entries.lock().unwrap().len() as u64;
    let held_b = server_b.entries.lock().unwrap().len() as u64;
    assert_eq!(held_a + held_b, 20);
    assert_eq!(cache.size().await.unwrap(), 20);

    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.hit_count, 20);
    assert_eq!(stats.miss_count, 20);
    assert_eq!(stats.eviction_count, 0);

    let snapshot = client.stats().await.unwrap();
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.contains_key(&addr_a.to_string()));
    assert_eq!(snapshot[&addr_b.to_string()]["curr_items"], held_b.to_string());

    cache.invalidate(&keys[0]).await.unwrap();
    assert_eq!(cache.get_if_present(&keys[0]).await.unwrap(), None);
    assert_eq!(cache.size().await.unwrap(), 19);

    let key = keys[1].to_string();
    let owner = if client.server_for(&key) == addr_a.to_string() {
        &server_a
    } else {
        &server_b
    };
    assert_eq!(owner.exptime_of(&key), Some(120));
}

#[tokio::test]
async fn test_versions_lists_every_node() {
    let (addr_a, _a) = FakeMemcached::spawn().await;
    let (addr_b, _b) = FakeMemcached::spawn().await;
    let client = client_for(&[addr_a, addr_b]);

    let versions = client.versions().await.unwrap();
    assert_eq!(
        versions,
        vec![
            (addr_a.to_string(), "1.6.21".to_string()),
            (addr_b.to_string(), "1.6.21".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_unreachable_node_surfaces_as_remote_errors() {
    // Bind then drop a listener to get a port nobody is listening on
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let client = Arc::new(client_for(&[addr]));

    let err = client.get_raw("anything").await.unwrap_err();
    assert!(matches!(err, ClientError::Connect { .. }));

    let loader = Arc::new(ProfileLoader {
        calls: AtomicUsize::new(0),
    });
    let cache: CacheAdapter<Uuid, Profile> =
        CacheAdapter::new(client.clone(), TtlSecs(60), loader.clone());
    let key = Uuid::new_v4();

    assert!(matches!(
        cache.get(&key).await,
        Err(Error::RemoteRead { .. })
    ));
    // The read failed before any load was attempted
    assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
    assert!(matches!(cache.size().await, Err(Error::RemoteStats(_))));
    assert!(matches!(
        cache.invalidate(&key).await,
        Err(Error::RemoteDelete { .. })
    ));
}

/// Server answering every request line with `reply`, or never answering when `reply` is `None`.
/// Returns the address and a count of accepted connections.
async fn spawn_scripted(reply: Option<&'static [u8]>) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let (read, mut write) = socket.into_split();
                let mut lines = BufReader::new(read).lines();
                while let Ok(Some(_)) = lines.next_line().await {
                    if let Some(reply) = reply {
                        if write.write_all(reply).await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    });
    (addr, accepted)
}

fn client_with_op_timeout(addr: SocketAddr, op_timeout: Duration) -> MemcachedClient {
    MemcachedClient::new([addr.to_string()], Duration::from_secs(2), op_timeout).unwrap()
}

#[tokio::test]
async fn test_silent_server_times_out_and_connection_is_replaced() {
    let (addr, accepted) = spawn_scripted(None).await;
    let client = client_with_op_timeout(addr, Duration::from_millis(200));

    for _ in 0..2 {
        let err = client.get_raw("slow").await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout { command: "get", .. }));
    }
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_callers_queued_behind_a_stuck_node_share_one_timeout_window() {
    let (addr, _accepted) = spawn_scripted(None).await;
    let op_timeout = Duration::from_millis(500);
    let client = client_with_op_timeout(addr, op_timeout);

    let started = Instant::now();
    let (first, second, third) = tokio::join!(
        client.get_raw("a"),
        client.get_raw("b"),
        client.get_raw("c"),
    );
    let elapsed = started.elapsed();

    for result in [first, second, third] {
        assert!(matches!(result, Err(ClientError::Timeout { .. })));
    }
    // Each caller waits at most one op timeout, lock wait included
    assert!(elapsed < op_timeout * 2, "took {elapsed:?}");
}

#[tokio::test]
async fn test_value_for_another_key_is_rejected_and_connection_discarded() {
    let (addr, accepted) = spawn_scripted(Some(&b"VALUE other 0 1\r\nx\r\nEND\r\n"[..])).await;
    let client = client_with_op_timeout(addr, Duration::from_secs(2));

    for _ in 0..2 {
        let err = client.get_raw("wanted").await.unwrap_err();
        match err {
            ClientError::UnexpectedResponse {
                command, response, ..
            } => {
                assert_eq!(command, "get");
                assert!(response.contains("other"), "{response}");
            }
            other => panic!("expected UnexpectedResponse, got {other:?}"),
        }
    }
    // The out-of-step connection is never reused
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
}
