//! Configuration types for the grid node daemon.

use grid_overlay::coordinates::DIMENSIONS;
use grid_overlay::{
    AlgorithmConfig, Coordinates, DEFAULT_PORT, FaultConfig, FloodConfig, FloodMetric,
    OverlayConfig,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading or writing configuration file.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error parsing TOML configuration file.
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration validation failed.
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main configuration for the grid node daemon.
///
/// Configuration is loaded from a TOML file and can be overridden by environment variables.
/// See individual field documentation for environment variable names.
///
/// Configuration precedence (highest to lowest):
/// 1. Environment variables
/// 2. Config file values
/// 3. Default values
///
/// # Example
///
/// ```
/// use grid_node::config::NodeConfig;
///
/// let config = NodeConfig::default();
/// assert_eq!(config.node.listen_addr, "127.0.0.1:7400");
/// assert_eq!(config.gossip.algorithms.len(), 2);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node identity and socket settings.
    #[serde(default)]
    pub node: NodeSettings,
    /// Gossip timing and algorithm instances.
    #[serde(default)]
    pub gossip: GossipSettings,
    /// Flood dissemination settings.
    #[serde(default)]
    pub flood: FloodSettings,
    /// Simulated faults for experiments.
    #[serde(default)]
    pub fault: FaultSettings,
}

impl NodeConfig {
    /// Load configuration from environment variables only.
    ///
    /// Starts with default values and applies environment variable overrides.
    pub fn from_env() -> Result<Self> {
        tracing::debug!("Loading configuration from environment variables");
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate().map_err(|e| {
            tracing::error!(error = %e, "Configuration validation failed");
            e
        })?;
        tracing::info!("Successfully loaded configuration from environment");
        Ok(config)
    }

    /// Load configuration from a TOML file, creating it with defaults if it doesn't exist.
    ///
    /// Environment overrides are applied after loading but are not written
    /// back into a newly created file.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading or creating configuration");

        let exists = path.exists();
        let file_config = if exists {
            Self::load(path)?
        } else {
            tracing::info!(path = %path.display(), "Configuration file doesn't exist, creating with defaults");
            let defaults = Self::default();
            defaults.save(path)?;
            defaults
        };

        let mut config = file_config;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading configuration from file");

        let contents = std::fs::read_to_string(path).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to read configuration file");
            ConfigError::IoError(e)
        })?;

        let config: Self = toml::from_str(&contents).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to parse TOML configuration");
            ConfigError::ParseError(e)
        })?;

        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to serialize configuration to TOML");
            ConfigError::ValidationError(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path, &contents).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to write configuration file");
            ConfigError::IoError(e)
        })?;

        tracing::info!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    /// Validate configuration values.
    ///
    /// Checks the socket addresses and bootstrap peers parse, and that the
    /// gossip, flood and fault sections form a valid [`OverlayConfig`].
    pub fn validate(&self) -> Result<()> {
        tracing::debug!("Validating configuration");

        let listen_addr = self.listen_addr()?;
        match self.advertise_addr()? {
            None if listen_addr.ip().is_unspecified() => {
                return Err(ConfigError::ValidationError(format!(
                    "node.advertise_addr is required when listening on wildcard address {listen_addr}"
                )));
            }
            Some(addr) if addr.ip().is_unspecified() => {
                return Err(ConfigError::ValidationError(format!(
                    "node.advertise_addr {addr} is not routable"
                )));
            }
            _ => {}
        }
        self.bootstrap_peers()?;

        if self.node.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Node name must not be empty".to_string(),
            ));
        }
        if self.gossip.stats_log_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "gossip.stats_log_interval_secs must be at least 1".to_string(),
            ));
        }

        self.to_overlay_config()?;

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Data directory with a leading `~` expanded to the home directory.
    pub fn data_dir(&self) -> PathBuf {
        match self.node.data_dir.strip_prefix("~/") {
            Some(rest) => match dirs::home_dir() {
                Some(home) => home.join(rest),
                None => PathBuf::from(&self.node.data_dir),
            },
            None => PathBuf::from(&self.node.data_dir),
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.node.listen_addr.parse().map_err(|e| {
            ConfigError::ValidationError(format!(
                "Invalid listen address '{}': {}",
                self.node.listen_addr, e
            ))
        })
    }

    pub fn advertise_addr(&self) -> Result<Option<SocketAddr>> {
        self.node
            .advertise_addr
            .as_deref()
            .map(parse_peer)
            .transpose()
    }

    /// Bootstrap peers as socket addresses. A bare IP gets [`DEFAULT_PORT`].
    pub fn bootstrap_peers(&self) -> Result<Vec<SocketAddr>> {
        self.node.bootstrap.iter().map(|peer| parse_peer(peer)).collect()
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.node.position, self.node.height)
    }

    /// Build the overlay core configuration from the gossip, flood and
    /// fault sections.
    pub fn to_overlay_config(&self) -> Result<OverlayConfig> {
        let gossip = &self.gossip;
        OverlayConfig::builder()
            .gossip_period(Duration::from_millis(gossip.period_ms))
            .safety_margin(Duration::from_millis(gossip.safety_margin_ms))
            .tcp_timeout(Duration::from_millis(gossip.tcp_timeout_ms))
            .udp_timeout(Duration::from_millis(gossip.udp_timeout_ms))
            .stats_interval(Duration::from_secs(gossip.stats_interval_secs))
            .algorithms(gossip.algorithms.iter().cloned())
            .flood(self.flood.to_flood_config())
            .fault(self.fault.to_fault_config())
            .build()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Apply environment variable overrides to configuration.
    ///
    /// Supported environment variables:
    /// - `GRID_DATA_DIR` - Overrides node.data_dir
    /// - `GRID_LISTEN_ADDR` - Overrides node.listen_addr
    /// - `GRID_CLUSTER` - Overrides node.cluster
    /// - `GRID_BOOTSTRAP` - Comma-separated list, replaces node.bootstrap
    ///
    /// Values are checked by [`validate`](Self::validate) afterwards.
    fn apply_env_overrides(&mut self) {
        if let Ok(data_dir) = std::env::var("GRID_DATA_DIR") {
            tracing::debug!(env_var = "GRID_DATA_DIR", value = %data_dir, "Applying environment override");
            self.node.data_dir = data_dir;
        }

        if let Ok(listen_addr) = std::env::var("GRID_LISTEN_ADDR") {
            tracing::debug!(env_var = "GRID_LISTEN_ADDR", value = %listen_addr, "Applying environment override");
            self.node.listen_addr = listen_addr;
        }

        if let Ok(cluster) = std::env::var("GRID_CLUSTER") {
            tracing::debug!(env_var = "GRID_CLUSTER", value = %cluster, "Applying environment override");
            self.node.cluster = cluster;
        }

        if let Ok(bootstrap) = std::env::var("GRID_BOOTSTRAP") {
            let peers: Vec<String> = bootstrap
                .split(',')
                .map(str::trim)
                .filter(|peer| !peer.is_empty())
                .map(str::to_string)
                .collect();
            if peers.is_empty() {
                tracing::warn!(
                    env_var = "GRID_BOOTSTRAP",
                    value = %bootstrap,
                    "No bootstrap peers in environment variable, keeping configured list"
                );
            } else {
                tracing::debug!(env_var = "GRID_BOOTSTRAP", peers = peers.len(), "Applying environment override");
                self.node.bootstrap = peers;
            }
        }
    }
}

fn parse_peer(peer: &str) -> Result<SocketAddr> {
    if let Ok(addr) = peer.parse::<SocketAddr>() {
        return Ok(addr);
    }
    peer.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DEFAULT_PORT))
        .map_err(|e| ConfigError::ValidationError(format!("Invalid peer address '{}': {}", peer, e)))
}

/// Node identity and socket settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    /// Directory for node data (identity file).
    ///
    /// Environment variable: `GRID_DATA_DIR`
    pub data_dir: String,
    /// Address the TCP listener and UDP socket bind to.
    ///
    /// Environment variable: `GRID_LISTEN_ADDR`
    pub listen_addr: String,
    /// Address announced to peers when it differs from `listen_addr`.
    /// Required when `listen_addr` is a wildcard such as `0.0.0.0`.
    pub advertise_addr: Option<String>,
    /// Cluster (site) this node belongs to.
    ///
    /// Environment variable: `GRID_CLUSTER`
    pub cluster: String,
    pub name: String,
    /// Position in latency space.
    pub position: [f64; DIMENSIONS],
    pub height: f64,
    /// Peers contacted while the caches are nearly empty.
    ///
    /// Environment variable: `GRID_BOOTSTRAP` (comma-separated)
    pub bootstrap: Vec<String>,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.grid".to_string(),
            listen_addr: format!("127.0.0.1:{DEFAULT_PORT}"),
            advertise_addr: None,
            cluster: "default".to_string(),
            name: "grid-node".to_string(),
            position: [0.0; DIMENSIONS],
            height: 0.0,
            bootstrap: Vec::new(),
        }
    }
}

/// Gossip timing and algorithm instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipSettings {
    pub period_ms: u64,
    /// Part of each period left unused by the exchange timeout.
    pub safety_margin_ms: u64,
    pub tcp_timeout_ms: u64,
    pub udp_timeout_ms: u64,
    /// Interval between recorded stats snapshots.
    pub stats_interval_secs: u64,
    /// Interval between stats log lines.
    pub stats_log_interval_secs: u64,
    pub algorithms: Vec<AlgorithmConfig>,
}

impl Default for GossipSettings {
    fn default() -> Self {
        let devnet = OverlayConfig::devnet();
        Self {
            period_ms: duration_ms(devnet.gossip_period()),
            safety_margin_ms: duration_ms(devnet.safety_margin()),
            tcp_timeout_ms: duration_ms(devnet.tcp_timeout()),
            udp_timeout_ms: duration_ms(devnet.udp_timeout()),
            stats_interval_secs: devnet.stats_interval().as_secs(),
            stats_log_interval_secs: 60,
            algorithms: devnet.algorithms().to_vec(),
        }
    }
}

/// Flood dissemination settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodSettings {
    pub request_timeout_ms: u64,
    /// Hop budget of a network-kill flood.
    pub kill_radius: u32,
    /// Delay between a received kill flood and shutdown.
    pub kill_grace_secs: u64,
    pub default_metric: FloodMetric,
    pub seen_ttl_secs: u64,
}

impl Default for FloodSettings {
    fn default() -> Self {
        let defaults = FloodConfig::default();
        Self {
            request_timeout_ms: duration_ms(defaults.request_timeout),
            kill_radius: defaults.kill_radius,
            kill_grace_secs: defaults.kill_grace_period.as_secs(),
            default_metric: defaults.default_metric,
            seen_ttl_secs: defaults.seen_ttl.as_secs(),
        }
    }
}

impl FloodSettings {
    fn to_flood_config(&self) -> FloodConfig {
        FloodConfig {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            kill_radius: self.kill_radius,
            kill_grace_period: Duration::from_secs(self.kill_grace_secs),
            default_metric: self.default_metric,
            seen_ttl: Duration::from_secs(self.seen_ttl_secs),
        }
    }
}

/// Simulated faults. Off by default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultSettings {
    /// Probability that an outgoing request is dropped.
    pub loss_probability: f64,
    /// Seconds after start at which the node partitions itself.
    pub disconnect_after_secs: Option<u64>,
    /// Seconds after start at which the partition heals.
    pub reconnect_after_secs: Option<u64>,
    /// Only cut links to other clusters.
    pub wan_only: bool,
}

impl FaultSettings {
    fn to_fault_config(&self) -> FaultConfig {
        FaultConfig {
            loss_probability: self.loss_probability,
            disconnect_after: self.disconnect_after_secs.map(Duration::from_secs),
            reconnect_after: self.reconnect_after_secs.map(Duration::from_secs),
            wan_only: self.wan_only,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
