use std::time::Duration;

use serde::Deserialize;

use crate::pool::PoolConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    /// Write master, and the default reader when no slaves are configured
    pub backend: BackendConfig,
    /// Settings shared by every backend pool
    #[serde(default)]
    pub pool: PoolSettings,
}

// ============================================================================
// Listener
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address (host:port)
    pub addr: String,
    /// Shared password every client must authenticate with
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_pidfile")]
    pub pidfile: String,
    /// Version string sent in the initial handshake
    #[serde(default = "default_server_version")]
    pub server_version: String,
    /// Upper bound on concurrently served client connections
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Per source address connection cap; 0 disables it
    #[serde(default = "default_max_conns_per_ip")]
    pub max_conns_per_ip: usize,
    /// Seconds a parked worker may idle before it is retired
    #[serde(default = "default_worker_idle_secs")]
    pub worker_idle_secs: u64,
    /// Address of the HTTP `/metrics` endpoint; unset disables it
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

fn default_pidfile() -> String {
    "aegis.pid".to_string()
}

fn default_server_version() -> String {
    "5.6.20-aegis".to_string()
}

fn default_max_workers() -> usize {
    1024
}

fn default_max_conns_per_ip() -> usize {
    64
}

fn default_worker_idle_secs() -> u64 {
    10
}

impl ServerConfig {
    pub fn worker_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_idle_secs)
    }
}

// ============================================================================
// Backends
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Master address (host:port)
    pub addr: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Default database; also used when a client connects with an empty one
    #[serde(default)]
    pub database: String,
    /// Reader weight of the master when it is the only reader
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Weighted read replicas
    #[serde(default)]
    pub slaves: Vec<SlaveConfig>,
}

/// A read replica; credentials and database are shared with the master
#[derive(Debug, Clone, Deserialize)]
pub struct SlaveConfig {
    pub addr: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    20
}

impl BackendConfig {
    /// Reader addresses with their weights
    pub fn readers(&self) -> Vec<(String, u32)> {
        if self.slaves.is_empty() {
            vec![(self.addr.clone(), self.weight)]
        } else {
            self.slaves
                .iter()
                .map(|s| (s.addr.clone(), s.weight))
                .collect()
        }
    }

    /// Comma separated reader addresses, as reported by `SHOW PROXY STATUS`
    pub fn readers_display(&self) -> String {
        self.readers()
            .into_iter()
            .map(|(addr, _)| addr)
            .collect::<Vec<_>>()
            .join(",")
    }
}

// ============================================================================
// Pool
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,
    /// 0 = unbounded
    #[serde(default)]
    pub max_active: usize,
    /// 0 = never evict
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default)]
    pub wait: bool,
}

fn default_max_idle() -> usize {
    10
}

fn default_idle_timeout_secs() -> u64 {
    240
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_idle: default_max_idle(),
            max_active: 0,
            idle_timeout_secs: default_idle_timeout_secs(),
            wait: false,
        }
    }
}

impl From<&PoolSettings> for PoolConfig {
    fn from(settings: &PoolSettings) -> Self {
        Self {
            max_idle: settings.max_idle,
            max_active: settings.max_active,
            idle_timeout: Duration::from_secs(settings.idle_timeout_secs),
            wait: settings.wait,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
[server]
addr = "0.0.0.0:4000"
password = "secret"

[backend]
addr = "mysql.local:3306"
user = "app"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.addr, "0.0.0.0:4000");
        assert_eq!(config.server.pidfile, "aegis.pid");
        assert_eq!(config.server.max_workers, 1024);
        assert_eq!(config.server.max_conns_per_ip, 64);
        assert_eq!(config.server.worker_idle_timeout(), Duration::from_secs(10));
        assert_eq!(config.server.metrics_addr, None);
        assert_eq!(config.backend.weight, 20);
        assert_eq!(config.backend.database, "");
        assert_eq!(config.pool.max_idle, 10);
        assert_eq!(config.pool.idle_timeout_secs, 240);
        assert_eq!(
            config.backend.readers(),
            vec![("mysql.local:3306".to_string(), 20)]
        );
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[server]
addr = "127.0.0.1:4000"
password = "pw"
pidfile = "/tmp/aegis.pid"
max_workers = 8
max_conns_per_ip = 2
worker_idle_secs = 30
metrics_addr = "127.0.0.1:9104"

[backend]
addr = "10.0.0.1:3306"
user = "root"
password = "rootpw"
database = "app"

[[backend.slaves]]
addr = "10.0.0.2:3306"
weight = 10

[[backend.slaves]]
addr = "10.0.0.3:3306"

[pool]
max_idle = 4
max_active = 16
idle_timeout_secs = 0
wait = true
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.max_workers, 8);
        assert_eq!(config.server.max_conns_per_ip, 2);
        assert_eq!(config.server.metrics_addr.as_deref(), Some("127.0.0.1:9104"));
        assert_eq!(config.backend.database, "app");
        assert_eq!(
            config.backend.readers(),
            vec![
                ("10.0.0.2:3306".to_string(), 10),
                ("10.0.0.3:3306".to_string(), 20)
            ]
        );
        assert_eq!(config.backend.readers_display(), "10.0.0.2:3306,10.0.0.3:3306");

        let pool = PoolConfig::from(&config.pool);
        assert_eq!(pool.max_idle, 4);
        assert_eq!(pool.max_active, 16);
        assert!(pool.idle_timeout.is_zero());
        assert!(pool.wait);
    }

    #[test]
    fn test_missing_backend_is_error() {
        let toml = r#"
[server]
addr = "127.0.0.1:4000"
"#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }
}
