use facade::{CacheAdapter, DisplayKeyEncoder, KeyEncoder, PrefixedKeyEncoder, loader_fn};
use memcache_tcp::MemcachedClient;
use serde_json::{Value, json};
use shared::BoxError;
use shared::config::Config;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: cache-probe <command>

commands:
  size                  number of items held by the cluster
  stats                 cluster-wide hit, miss and eviction counters
  versions              server version of every node
  get <key>             read a key without loading it
  put <key> <json>      store a JSON value under a key
  invalidate <key>      remove a key";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    // Load environment variables from .env file (if exists)
    match dotenvy::dotenv() {
        Ok(_) => info!("Loaded environment variables from .env file"),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    let config = Config::from_env()?;
    info!(
        "Probing {} memcached node(s): {}",
        config.servers.len(),
        config.servers.join(", ")
    );

    let client = Arc::new(MemcachedClient::from_config(&config)?);
    let key_encoder: Arc<dyn KeyEncoder<String>> = match &config.key_prefix {
        Some(prefix) => Arc::new(PrefixedKeyEncoder::new(prefix.clone(), DisplayKeyEncoder)),
        None => Arc::new(DisplayKeyEncoder),
    };
    // The probe only inspects the cluster; there is no source of truth to load from
    let loader = loader_fn(|key: String| async move {
        Err::<Value, BoxError>(format!("cache-probe cannot load '{key}'").into())
    });
    let cache: CacheAdapter<String, Value> =
        CacheAdapter::with_key_encoder(client.clone(), config.ttl, Arc::new(loader), key_encoder);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    let output = match args.as_slice() {
        ["size"] => json!({ "size": cache.size().await? }),
        ["stats"] => {
            let stats = cache.stats().await?;
            json!({
                "stats": stats,
                "hit_rate": stats.hit_rate(),
                "miss_rate": stats.miss_rate(),
            })
        }
        ["versions"] => {
            let versions: serde_json::Map<String, Value> = client
                .versions()
                .await?
                .into_iter()
                .map(|(addr, version)| (addr, Value::String(version)))
                .collect();
            Value::Object(versions)
        }
        ["get", key] => {
            let value = cache.get_if_present(&key.to_string()).await?;
            json!({ "key": key, "found": value.is_some(), "value": value })
        }
        ["put", key, raw] => {
            let value: Value = serde_json::from_str(raw)?;
            cache.put(&key.to_string(), value).await?;
            json!({ "key": key, "stored": true, "ttl_secs": cache.ttl().0 })
        }
        ["invalidate", key] => {
            cache.invalidate(&key.to_string()).await?;
            json!({ "key": key, "invalidated": true })
        }
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
