use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for a spsflow node.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Upstream feed connection configuration.
    #[serde(default)]
    pub feed: FeedConfig,

    /// Event-time window configuration.
    #[serde(default)]
    pub window: WindowConfig,

    /// Deserialization worker pool configuration.
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Deployment topology and node endpoints.
    #[serde(default)]
    pub topology: TopologyConfig,

    /// Aggregator behavior.
    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Prometheus health metrics server configuration.
    #[serde(default)]
    pub health: HealthConfig,

    /// How often pipeline counters are summarised in the log. Default: 60s.
    #[serde(default = "default_stats_interval", with = "humantime_serde")]
    pub stats_interval: Duration,
}

/// Upstream feed connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Feed endpoint returning a push-style line stream.
    #[serde(default = "default_feed_url")]
    pub url: String,

    /// Number of framing bytes preceding the JSON payload on each line. Default: 6.
    #[serde(default = "default_prefix_len")]
    pub prefix_len: usize,

    /// Timeout for establishing the connection. Default: 10s.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Reconnect delay policy.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Reconnect delay policy for the feed.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first reconnect attempt. Default: 1s.
    #[serde(default = "default_retry_delay", with = "humantime_serde")]
    pub delay: Duration,

    /// Multiplicative growth per consecutive failure. Default: 1.0 (fixed delay).
    #[serde(default = "default_retry_factor")]
    pub factor: f64,

    /// Upper bound for the reconnect delay. Default: 30s.
    #[serde(default = "default_retry_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
}

/// Event-time window configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    /// Window length in whole seconds. Default: 5.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

/// Deserialization worker pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkersConfig {
    /// Number of concurrent deserialization workers. Default: 2.
    #[serde(default = "default_worker_count")]
    pub count: usize,

    /// Capacity of each in-process queue. Senders block when full. Default: 1024.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Receive buffer for one datagram in bytes; larger datagrams are truncated.
    /// Default: 1024.
    #[serde(default = "default_recv_buffer")]
    pub recv_buffer: usize,
}

/// How the pipeline is split across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyMode {
    /// Every component in one process, connected by in-process queues.
    Local,
    /// Workers and aggregator on separate nodes, connected by UDP datagrams.
    Distributed,
}

impl Default for TopologyMode {
    fn default() -> Self {
        Self::Local
    }
}

impl std::str::FromStr for TopologyMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(Self::Local),
            "distributed" => Ok(Self::Distributed),
            other => bail!("unknown topology mode: {other} (expected local or distributed)"),
        }
    }
}

/// The part of the pipeline this node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Source, dispatcher, workers and aggregator in one process.
    Standalone,
    /// Source, dispatcher and aggregator; workers live elsewhere.
    Aggregator,
    /// Deserialization workers only.
    Worker,
}

impl Role {
    /// Returns the canonical log label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standalone => "standalone",
            Self::Aggregator => "aggregator",
            Self::Worker => "worker",
        }
    }
}

/// Deployment topology and node endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct TopologyConfig {
    /// Topology mode. Default: local.
    #[serde(default)]
    pub mode: TopologyMode,

    /// This node's endpoint (host:port). Default: "127.0.0.1:4444".
    #[serde(default = "default_my_host")]
    pub my_host: String,

    /// Endpoint the worker node listens on for payloads. Default: "127.0.0.1:5555".
    #[serde(default = "default_worker_host")]
    pub worker_host: String,

    /// Endpoint the aggregator listens on for group events. Default: "127.0.0.1:6666".
    #[serde(default = "default_aggregator_host")]
    pub aggregator_host: String,
}

impl TopologyConfig {
    /// Decides this node's role. In distributed mode a node whose endpoint
    /// equals the worker endpoint is a worker; every other node aggregates.
    pub fn role(&self) -> Role {
        match self.mode {
            TopologyMode::Local => Role::Standalone,
            TopologyMode::Distributed if self.my_host.trim() == self.worker_host.trim() => {
                Role::Worker
            }
            TopologyMode::Distributed => Role::Aggregator,
        }
    }
}

/// Aggregator behavior.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct AggregatorConfig {
    /// Emit the live window when the node shuts down. Default: false.
    #[serde(default)]
    pub flush_on_shutdown: bool,
}

/// Prometheus health metrics server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Serve /metrics and /healthz. Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// Listen address. Default: ":9090".
    #[serde(default = "default_health_addr")]
    pub addr: String,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stats_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_feed_url() -> String {
    "https://tweet-service.herokuapp.com/sps".to_string()
}

fn default_prefix_len() -> usize {
    6 // "data: "
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_retry_factor() -> f64 {
    1.0
}

fn default_retry_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_interval_secs() -> u64 {
    5
}

fn default_worker_count() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_recv_buffer() -> usize {
    1024
}

fn default_my_host() -> String {
    "127.0.0.1:4444".to_string()
}

fn default_worker_host() -> String {
    "127.0.0.1:5555".to_string()
}

fn default_aggregator_host() -> String {
    "127.0.0.1:6666".to_string()
}

fn default_health_addr() -> String {
    ":9090".to_string()
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            feed: FeedConfig::default(),
            window: WindowConfig::default(),
            workers: WorkersConfig::default(),
            topology: TopologyConfig::default(),
            aggregator: AggregatorConfig::default(),
            health: HealthConfig::default(),
            stats_interval: default_stats_interval(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            prefix_len: default_prefix_len(),
            connect_timeout: default_connect_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay: default_retry_delay(),
            factor: default_retry_factor(),
            max_delay: default_retry_max_delay(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            recv_buffer: default_recv_buffer(),
        }
    }
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            mode: TopologyMode::default(),
            my_host: default_my_host(),
            worker_host: default_worker_host(),
            aggregator_host: default_aggregator_host(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_health_addr(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        Self::from_yaml(&data).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Parse configuration from YAML text without validating it.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(data)?;
        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.feed.url.is_empty() {
            bail!("feed.url is required");
        }

        if self.feed.prefix_len == 0 {
            bail!("feed.prefix_len must be positive");
        }

        if self.feed.retry.factor.is_nan() || self.feed.retry.factor < 1.0 {
            bail!("feed.retry.factor must be >= 1.0");
        }

        if self.feed.retry.max_delay < self.feed.retry.delay {
            bail!("feed.retry.max_delay must be >= feed.retry.delay");
        }

        if self.window.interval_secs == 0 {
            bail!("window.interval_secs must be positive");
        }

        if self.workers.count == 0 {
            bail!("workers.count must be positive");
        }

        if self.workers.queue_capacity == 0 {
            bail!("workers.queue_capacity must be positive");
        }

        if self.workers.recv_buffer == 0 {
            bail!("workers.recv_buffer must be positive");
        }

        if self.stats_interval.is_zero() {
            bail!("stats_interval must be positive");
        }

        if self.topology.mode == TopologyMode::Distributed {
            for (name, value) in [
                ("topology.my_host", &self.topology.my_host),
                ("topology.worker_host", &self.topology.worker_host),
                ("topology.aggregator_host", &self.topology.aggregator_host),
            ] {
                if !value.contains(':') {
                    bail!("{name} must be host:port, got {value:?}");
                }
            }

            if self.topology.worker_host.trim() == self.topology.aggregator_host.trim() {
                bail!("topology.worker_host and topology.aggregator_host must differ");
            }
        }

        if self.health.enabled && self.health.addr.is_empty() {
            bail!("health.addr is required when enabled");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn distributed(my_host: &str) -> TopologyConfig {
        TopologyConfig {
            mode: TopologyMode::Distributed,
            my_host: my_host.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.window.interval_secs, 5);
        assert_eq!(cfg.workers.count, 2);
        assert_eq!(cfg.workers.recv_buffer, 1024);
        assert_eq!(cfg.feed.prefix_len, 6);
        assert_eq!(cfg.feed.retry.delay, Duration::from_secs(1));
        assert_eq!(cfg.topology.mode, TopologyMode::Local);
        assert_eq!(cfg.topology.my_host, "127.0.0.1:4444");
        assert_eq!(cfg.topology.worker_host, "127.0.0.1:5555");
        assert_eq!(cfg.topology.aggregator_host, "127.0.0.1:6666");
        assert!(!cfg.aggregator.flush_on_shutdown);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_partial_overrides_keep_defaults() {
        let yaml = r#"
window:
  interval_secs: 10
workers:
  count: 8
feed:
  retry:
    delay: 250ms
topology:
  mode: distributed
  my_host: "10.0.0.2:5555"
  worker_host: "10.0.0.2:5555"
"#;
        let cfg = Config::from_yaml(yaml).expect("valid yaml");
        assert_eq!(cfg.window.interval_secs, 10);
        assert_eq!(cfg.workers.count, 8);
        assert_eq!(cfg.workers.queue_capacity, 1024);
        assert_eq!(cfg.feed.retry.delay, Duration::from_millis(250));
        assert_eq!(cfg.feed.retry.max_delay, Duration::from_secs(30));
        assert_eq!(cfg.topology.aggregator_host, "127.0.0.1:6666");
        assert_eq!(cfg.topology.role(), Role::Worker);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_role_selection_by_address_equality() {
        assert_eq!(TopologyConfig::default().role(), Role::Standalone);
        assert_eq!(distributed("127.0.0.1:5555").role(), Role::Worker);
        assert_eq!(distributed("127.0.0.1:4444").role(), Role::Aggregator);
        assert_eq!(distributed(" 127.0.0.1:5555 ").role(), Role::Worker);
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut cfg = Config::default();
        cfg.window.interval_secs = 0;
        let err = cfg.validate().expect_err("should fail");
        assert!(err.to_string().contains("interval_secs"));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut cfg = Config::default();
        cfg.workers.count = 0;
        let err = cfg.validate().expect_err("should fail");
        assert!(err.to_string().contains("workers.count"));
    }

    #[test]
    fn test_validate_rejects_shrinking_retry() {
        let mut cfg = Config::default();
        cfg.feed.retry.factor = 0.5;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.feed.retry.max_delay = Duration::from_millis(10);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_distributed_endpoints() {
        let mut cfg = Config {
            topology: distributed("127.0.0.1:4444"),
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());

        cfg.topology.aggregator_host = cfg.topology.worker_host.clone();
        let err = cfg.validate().expect_err("should fail");
        assert!(err.to_string().contains("must differ"));

        cfg.topology.aggregator_host = "no-port".to_string();
        let err = cfg.validate().expect_err("should fail");
        assert!(err.to_string().contains("host:port"));
    }

    #[test]
    fn test_topology_mode_from_str() {
        assert_eq!(
            "local".parse::<TopologyMode>().expect("valid"),
            TopologyMode::Local
        );
        assert_eq!(
            "distributed".parse::<TopologyMode>().expect("valid"),
            TopologyMode::Distributed
        );
        assert!("mesh".parse::<TopologyMode>().is_err());
    }
}
