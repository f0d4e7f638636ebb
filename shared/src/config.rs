use crate::{Error, Result, TtlSecs};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub struct Config {
    pub servers: Vec<String>,
    pub ttl: TtlSecs,
    pub key_prefix: Option<String>,
    pub connect_timeout: Duration,
    pub op_timeout: Duration,
}

impl Config {
    const DEFAULT_SERVERS: &str = "127.0.0.1:11211";
    const DEFAULT_TTL_SECS: u32 = 300;
    const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1000;
    const DEFAULT_OP_TIMEOUT_MS: u64 = 2500;

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let servers: Vec<String> = lookup("FACADE_SERVERS")
            .unwrap_or_else(|| Self::DEFAULT_SERVERS.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if servers.is_empty() {
            return Err(Error::Config("FACADE_SERVERS lists no servers".to_string()));
        }

        let ttl = parse_or_default(&lookup, "FACADE_TTL_SECS", Self::DEFAULT_TTL_SECS);
        let connect_timeout_ms = parse_or_default(
            &lookup,
            "FACADE_CONNECT_TIMEOUT_MS",
            Self::DEFAULT_CONNECT_TIMEOUT_MS,
        );
        let op_timeout_ms =
            parse_or_default(&lookup, "FACADE_OP_TIMEOUT_MS", Self::DEFAULT_OP_TIMEOUT_MS);

        Ok(Self {
            servers,
            ttl: TtlSecs(ttl),
            key_prefix: lookup("FACADE_KEY_PREFIX")
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            op_timeout: Duration::from_millis(op_timeout_ms),
        })
    }
}

fn parse_or_default<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + std::fmt::Display + Copy,
{
    match lookup(name) {
        None => default,
        Some(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            warn!("{name}={raw:?} is not a valid number, using default {default}");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.servers, vec!["127.0.0.1:11211".to_string()]);
        assert_eq!(config.ttl, TtlSecs(300));
        assert_eq!(config.key_prefix, None);
        assert_eq!(config.connect_timeout, Duration::from_millis(1000));
        assert_eq!(config.op_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn test_reads_all_variables() {
        let config = Config::from_lookup(lookup_from(&[
            ("FACADE_SERVERS", "10.0.0.1:11211, 10.0.0.2:11211"),
            ("FACADE_TTL_SECS", "60"),
            ("FACADE_KEY_PREFIX", "users"),
            ("FACADE_CONNECT_TIMEOUT_MS", "250"),
            ("FACADE_OP_TIMEOUT_MS", "750"),
        ]))
        .unwrap();
        assert_eq!(config.servers, vec!["10.0.0.1:11211", "10.0.0.2:11211"]);
        assert_eq!(config.ttl, TtlSecs(60));
        assert_eq!(config.key_prefix.as_deref(), Some("users"));
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.op_timeout, Duration::from_millis(750));
    }

    #[test]
    fn test_invalid_number_falls_back_to_default() {
        let config = Config::from_lookup(lookup_from(&[("FACADE_TTL_SECS", "five")])).unwrap();
        assert_eq!(config.ttl, TtlSecs(300));
    }

    #[test]
    fn test_empty_server_list_is_rejected() {
        let result = Config::from_lookup(lookup_from(&[("FACADE_SERVERS", " , ")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
