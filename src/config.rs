//! Configuration for the topic service
//!
//! Configuration is loaded in order of precedence:
//! 1. CLI flags (highest priority)
//! 2. Environment variables (`TOPICD_*`)
//! 3. Config file (~/.config/topicd/config.toml, or --config)
//! 4. Built-in defaults (lowest priority)

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the RPC server to
    pub bind_addr: SocketAddr,

    /// Path to the authoritative SQLite store
    pub store_path: PathBuf,

    /// Store connection pool size
    pub store_pool_size: u32,

    /// Cache cluster node addresses (redis://host:port)
    pub cache_nodes: Vec<String>,

    /// Cache cluster password (empty = no auth)
    pub cache_password: String,

    /// Prefix for every cache key this service owns
    pub cache_prefix: String,

    /// Distributed lock TTL in seconds (the safety net for lost unlocks)
    pub lock_ttl_secs: u64,

    /// Whether to run the scheduled reconciler jobs in this instance
    pub enable_cron: bool,

    /// Whether the follow RPC is live (reserved; store paths work either way)
    pub enable_follow: bool,

    /// Kafka broker addresses for the search-index event stream
    pub kafka_brokers: Vec<String>,

    /// Kafka topic the change events are published to
    pub event_topic: String,

    /// Base URL of the analytics service
    pub analytics_url: String,

    /// Debug logging
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5000".parse().unwrap(),
            store_path: PathBuf::from("./data/topicd.db"),
            store_pool_size: 4,
            cache_nodes: vec![
                "redis://127.0.0.1:7000".to_string(),
                "redis://127.0.0.1:7001".to_string(),
                "redis://127.0.0.1:7002".to_string(),
            ],
            cache_password: String::new(),
            cache_prefix: "topicSvc".to_string(),
            lock_ttl_secs: 120,
            enable_cron: true,
            enable_follow: false,
            kafka_brokers: vec!["127.0.0.1:9092".to_string()],
            event_topic: "dm-topic-events".to_string(),
            analytics_url: "http://127.0.0.1:8116".to_string(),
            debug: false,
        }
    }
}

/// Config file structure (every field optional; missing = keep default)
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileConfig {
    pub bind_addr: Option<String>,
    pub store_path: Option<String>,
    pub store_pool_size: Option<u32>,
    pub cache_nodes: Option<Vec<String>>,
    pub cache_password: Option<String>,
    pub cache_prefix: Option<String>,
    pub lock_ttl_secs: Option<u64>,
    pub enable_cron: Option<bool>,
    pub enable_follow: Option<bool>,
    pub kafka_brokers: Option<Vec<String>>,
    pub event_topic: Option<String>,
    pub analytics_url: Option<String>,
    pub debug: Option<bool>,
}

impl Config {
    /// Default config file location.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("topicd").join("config.toml"))
    }

    /// Load configuration: defaults, then file, then environment.
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = Config::default();

        let path = file.map(Path::to_path_buf).or_else(Self::config_path);
        if let Some(path) = path {
            if path.exists() {
                let raw = std::fs::read_to_string(&path)?;
                let parsed: FileConfig = toml::from_str(&raw)?;
                config.apply_file(parsed)?;
            }
        }

        config.apply_env()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) -> anyhow::Result<()> {
        if let Some(v) = file.bind_addr {
            self.bind_addr = v.parse()?;
        }
        if let Some(v) = file.store_path {
            self.store_path = PathBuf::from(v);
        }
        if let Some(v) = file.store_pool_size {
            self.store_pool_size = v;
        }
        if let Some(v) = file.cache_nodes {
            self.cache_nodes = v;
        }
        if let Some(v) = file.cache_password {
            self.cache_password = v;
        }
        if let Some(v) = file.cache_prefix {
            self.cache_prefix = v;
        }
        if let Some(v) = file.lock_ttl_secs {
            self.lock_ttl_secs = v;
        }
        if let Some(v) = file.enable_cron {
            self.enable_cron = v;
        }
        if let Some(v) = file.enable_follow {
            self.enable_follow = v;
        }
        if let Some(v) = file.kafka_brokers {
            self.kafka_brokers = v;
        }
        if let Some(v) = file.event_topic {
            self.event_topic = v;
        }
        if let Some(v) = file.analytics_url {
            self.analytics_url = v;
        }
        if let Some(v) = file.debug {
            self.debug = v;
        }
        Ok(())
    }

    /// Environment overrides. List-valued options are comma-separated.
    fn apply_env(&mut self) -> anyhow::Result<()> {
        if let Ok(v) = std::env::var("TOPICD_BIND_ADDR") {
            self.bind_addr = v.parse()?;
        }
        if let Ok(v) = std::env::var("TOPICD_STORE_PATH") {
            self.store_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("TOPICD_STORE_POOL_SIZE") {
            self.store_pool_size = v.parse()?;
        }
        if let Ok(v) = std::env::var("TOPICD_CACHE_NODES") {
            self.cache_nodes = split_list(&v);
        }
        if let Ok(v) = std::env::var("TOPICD_CACHE_PASSWORD") {
            self.cache_password = v;
        }
        if let Ok(v) = std::env::var("TOPICD_CACHE_PREFIX") {
            self.cache_prefix = v;
        }
        if let Ok(v) = std::env::var("TOPICD_LOCK_TTL_SECS") {
            self.lock_ttl_secs = v.parse()?;
        }
        if let Ok(v) = std::env::var("TOPICD_ENABLE_CRON") {
            self.enable_cron = v.parse()?;
        }
        if let Ok(v) = std::env::var("TOPICD_ENABLE_FOLLOW") {
            self.enable_follow = v.parse()?;
        }
        if let Ok(v) = std::env::var("TOPICD_KAFKA_BROKERS") {
            self.kafka_brokers = split_list(&v);
        }
        if let Ok(v) = std::env::var("TOPICD_EVENT_TOPIC") {
            self.event_topic = v;
        }
        if let Ok(v) = std::env::var("TOPICD_ANALYTICS_URL") {
            self.analytics_url = v;
        }
        if let Ok(v) = std::env::var("TOPICD_DEBUG") {
            self.debug = v.parse()?;
        }
        Ok(())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.lock_ttl_secs, 120);
        assert_eq!(config.cache_prefix, "topicSvc");
        assert!(config.enable_cron);
    }

    #[test]
    fn file_overrides_defaults() {
        let raw = r#"
bind_addr = "0.0.0.0:6000"
cache_prefix = "topicStaging"
lock_ttl_secs = 30
cache_nodes = ["redis://10.0.0.1:7000"]
"#;
        let parsed: FileConfig = toml::from_str(raw).unwrap();
        let mut config = Config::default();
        config.apply_file(parsed).unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:6000".parse().unwrap());
        assert_eq!(config.cache_prefix, "topicStaging");
        assert_eq!(config.lock_ttl_secs, 30);
        assert_eq!(config.cache_nodes, vec!["redis://10.0.0.1:7000"]);
        // untouched fields keep defaults
        assert_eq!(config.store_pool_size, 4);
    }

    #[test]
    fn list_splitting_trims_and_drops_empties() {
        assert_eq!(
            split_list("a:9092, b:9092,,c:9092 "),
            vec!["a:9092", "b:9092", "c:9092"]
        );
    }
}
