//! Overlay configuration.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::flood::FloodMetric;
use crate::gossip::Strategy;
use crate::wire::MAX_DATAGRAM_SIZE;

/// Encoded size allowed per entry when sizing a datagram exchange.
const UDP_ENTRY_BUDGET: usize = 512;

/// Largest `send_size` a UDP algorithm may use. The sender and receiver
/// records of the message take two more entry budgets.
pub const MAX_UDP_SEND_SIZE: usize = MAX_DATAGRAM_SIZE / UDP_ENTRY_BUDGET - 2;

/// Transport used for one algorithm's gossip exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// One TCP connection per exchange. Reliable, higher overhead.
    Tcp,
    /// One datagram each way. Lossy, must fit a single datagram.
    Udp,
}

/// Parameters of one gossip algorithm instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    /// Dispatch key; unique per node.
    pub name: String,
    pub strategy: Strategy,
    /// Target number of entries in the primary cache.
    pub cache_size: usize,
    /// Entries per exchange, the sender's own entry included.
    pub send_size: usize,
    /// Pull a bootstrap candidate while the cache holds fewer entries.
    pub min_cache_size: usize,
    /// Size of the fallback cache. `0` disables it.
    pub fallback_size: usize,
    /// Retry a failed exchange once per round with another peer.
    pub retry: bool,
    pub transport: TransportKind,
}

impl AlgorithmConfig {
    /// Cyclon: oldest-first peer selection with age-ordered eviction.
    pub fn cyclon() -> Self {
        Self {
            name: "cyclon".to_string(),
            strategy: Strategy::Cyclon,
            cache_size: 20,
            send_size: 8,
            min_cache_size: 1,
            fallback_size: 0,
            retry: false,
            transport: TransportKind::Tcp,
        }
    }

    /// Uniform random peer selection and eviction.
    pub fn random() -> Self {
        Self {
            name: "random".to_string(),
            strategy: Strategy::Random,
            cache_size: 20,
            send_size: 10,
            min_cache_size: 1,
            fallback_size: 0,
            retry: false,
            transport: TransportKind::Tcp,
        }
    }

    /// Random gossip hardened for lossy links: datagram transport, a
    /// fallback cache of recently reached peers and one retry per round.
    pub fn arrg() -> Self {
        Self {
            name: "arrg".to_string(),
            strategy: Strategy::Random,
            cache_size: 30,
            send_size: 10,
            min_cache_size: 1,
            fallback_size: 10,
            retry: true,
            transport: TransportKind::Udp,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    pub fn with_send_size(mut self, size: usize) -> Self {
        self.send_size = size;
        self
    }

    pub fn with_fallback_size(mut self, size: usize) -> Self {
        self.fallback_size = size;
        self
    }

    pub fn with_retry(mut self, retry: bool) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Check the values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "algorithm.name",
                reason: "must not be empty".to_string(),
            });
        }
        if self.cache_size < 1 {
            return Err(ConfigError::BelowMinimum {
                field: "algorithm.cache_size",
                minimum: 1,
                provided: self.cache_size,
            });
        }
        // One slot is always taken by the sender's own entry.
        if self.send_size < 2 {
            return Err(ConfigError::BelowMinimum {
                field: "algorithm.send_size",
                minimum: 2,
                provided: self.send_size,
            });
        }
        if self.transport == TransportKind::Udp && self.send_size > MAX_UDP_SEND_SIZE {
            return Err(ConfigError::InvalidValue {
                field: "algorithm.send_size",
                reason: format!(
                    "{} entries may not fit one datagram, use at most {MAX_UDP_SEND_SIZE} or tcp",
                    self.send_size
                ),
            });
        }
        Ok(())
    }
}

/// Synthetic fault injection for controlled experiments.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Probability of silently dropping an outgoing request or reply.
    pub loss_probability: f64,
    /// Start of the partition window, measured from node start.
    pub disconnect_after: Option<Duration>,
    /// End of the partition window, measured from node start.
    pub reconnect_after: Option<Duration>,
    /// During the window, keep same-cluster links up.
    pub wan_only: bool,
}

impl FaultConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.loss_probability) {
            return Err(ConfigError::OutOfRange {
                field: "fault.loss_probability",
                min: 0.0,
                max: 1.0,
                provided: self.loss_probability,
            });
        }
        match (self.disconnect_after, self.reconnect_after) {
            (Some(disconnect), Some(reconnect)) if reconnect <= disconnect => {
                Err(ConfigError::InvalidRelation {
                    field: "fault.reconnect_after",
                    field_value: reconnect,
                    other_field: "fault.disconnect_after",
                    other_value: disconnect,
                })
            }
            (None, Some(_)) => Err(ConfigError::InvalidValue {
                field: "fault.reconnect_after",
                reason: "set without fault.disconnect_after".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Flood dissemination parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloodConfig {
    /// Connect + I/O budget for forwarding to one neighbour.
    pub request_timeout: Duration,
    /// Hop budget of a network-kill flood.
    pub kill_radius: u32,
    /// Delay between receiving a kill flood and shutting down.
    pub kill_grace_period: Duration,
    /// Metric of adverts started with
    /// [`FloodService::advertise_default`](crate::FloodService::advertise_default).
    pub default_metric: FloodMetric,
    /// How long a flood id is remembered for duplicate suppression.
    pub seen_ttl: Duration,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            kill_radius: 1_000,
            kill_grace_period: Duration::from_secs(5),
            default_metric: FloodMetric::Neighbours,
            seen_ttl: Duration::from_secs(600),
        }
    }
}

impl FloodConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kill_radius < 1 {
            return Err(ConfigError::BelowMinimum {
                field: "flood.kill_radius",
                minimum: 1,
                provided: self.kill_radius as usize,
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "flood.request_timeout",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration of the whole overlay core.
///
/// Use [`OverlayConfig::builder()`] to construct with validation, or
/// [`OverlayConfig::devnet()`] for development defaults.
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    gossip_period: Duration,
    safety_margin: Duration,
    tcp_timeout: Duration,
    udp_timeout: Duration,
    algorithms: Vec<AlgorithmConfig>,
    fault: FaultConfig,
    flood: FloodConfig,
    stats_interval: Duration,
}

impl OverlayConfig {
    /// Create a new configuration builder.
    pub fn builder() -> OverlayConfigBuilder {
        OverlayConfigBuilder::new()
    }

    /// Development defaults: one Cyclon instance over TCP and one
    /// ARRG-style instance over UDP.
    pub fn devnet() -> Self {
        Self {
            gossip_period: Duration::from_secs(1),
            safety_margin: Duration::from_millis(200),
            tcp_timeout: Duration::from_secs(5),
            udp_timeout: Duration::from_secs(2),
            algorithms: vec![AlgorithmConfig::cyclon(), AlgorithmConfig::arrg()],
            fault: FaultConfig::default(),
            flood: FloodConfig::default(),
            stats_interval: Duration::from_secs(60),
        }
    }

    // --- Getters ---

    /// Mean time between two rounds of one algorithm.
    pub fn gossip_period(&self) -> Duration {
        self.gossip_period
    }

    /// Subtracted from the period to get the round timeout.
    pub fn safety_margin(&self) -> Duration {
        self.safety_margin
    }

    pub fn tcp_timeout(&self) -> Duration {
        self.tcp_timeout
    }

    pub fn udp_timeout(&self) -> Duration {
        self.udp_timeout
    }

    /// Upper bound for one exchange over `kind`.
    pub fn transport_timeout(&self, kind: TransportKind) -> Duration {
        match kind {
            TransportKind::Tcp => self.tcp_timeout,
            TransportKind::Udp => self.udp_timeout,
        }
    }

    pub fn algorithms(&self) -> &[AlgorithmConfig] {
        &self.algorithms
    }

    pub fn fault(&self) -> &FaultConfig {
        &self.fault
    }

    pub fn flood(&self) -> &FloodConfig {
        &self.flood
    }

    /// Interval between two stats snapshots.
    pub fn stats_interval(&self) -> Duration {
        self.stats_interval
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self::devnet()
    }
}

/// Builder for [`OverlayConfig`] with validation.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use grid_overlay::{AlgorithmConfig, OverlayConfig};
///
/// let config = OverlayConfig::builder()
///     .gossip_period(Duration::from_millis(500))
///     .safety_margin(Duration::from_millis(100))
///     .algorithm(AlgorithmConfig::cyclon())
///     .build()
///     .unwrap();
/// assert_eq!(config.algorithms().len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct OverlayConfigBuilder {
    gossip_period: Duration,
    safety_margin: Duration,
    tcp_timeout: Duration,
    udp_timeout: Duration,
    algorithms: Vec<AlgorithmConfig>,
    fault: FaultConfig,
    flood: FloodConfig,
    stats_interval: Duration,
}

impl OverlayConfigBuilder {
    /// Builder with devnet timings and no algorithms.
    pub fn new() -> Self {
        let devnet = OverlayConfig::devnet();
        Self {
            gossip_period: devnet.gossip_period,
            safety_margin: devnet.safety_margin,
            tcp_timeout: devnet.tcp_timeout,
            udp_timeout: devnet.udp_timeout,
            algorithms: Vec::new(),
            fault: devnet.fault,
            flood: devnet.flood,
            stats_interval: devnet.stats_interval,
        }
    }

    pub fn gossip_period(mut self, period: Duration) -> Self {
        self.gossip_period = period;
        self
    }

    pub fn safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    pub fn tcp_timeout(mut self, timeout: Duration) -> Self {
        self.tcp_timeout = timeout;
        self
    }

    pub fn udp_timeout(mut self, timeout: Duration) -> Self {
        self.udp_timeout = timeout;
        self
    }

    /// Add an algorithm instance.
    pub fn algorithm(mut self, algorithm: AlgorithmConfig) -> Self {
        self.algorithms.push(algorithm);
        self
    }

    /// Add multiple algorithm instances.
    pub fn algorithms(mut self, algorithms: impl IntoIterator<Item = AlgorithmConfig>) -> Self {
        self.algorithms.extend(algorithms);
        self
    }

    pub fn fault(mut self, fault: FaultConfig) -> Self {
        self.fault = fault;
        self
    }

    pub fn flood(mut self, flood: FloodConfig) -> Self {
        self.flood = flood;
        self
    }

    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    /// Build the configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if:
    /// - the gossip period is zero or not longer than the safety margin
    /// - a transport timeout is zero
    /// - no algorithm is configured, or two share a name
    /// - an algorithm, fault or flood section is invalid
    pub fn build(self) -> Result<OverlayConfig, ConfigError> {
        if self.gossip_period <= self.safety_margin {
            return Err(ConfigError::InvalidRelation {
                field: "gossip_period",
                field_value: self.gossip_period,
                other_field: "safety_margin",
                other_value: self.safety_margin,
            });
        }

        for (field, timeout) in [
            ("tcp_timeout", self.tcp_timeout),
            ("udp_timeout", self.udp_timeout),
        ] {
            if timeout.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be non-zero".to_string(),
                });
            }
        }

        if self.algorithms.is_empty() {
            return Err(ConfigError::BelowMinimum {
                field: "algorithms",
                minimum: 1,
                provided: 0,
            });
        }

        let mut names = HashSet::new();
        for algorithm in &self.algorithms {
            algorithm.validate()?;
            if !names.insert(algorithm.name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "algorithm.name",
                    reason: format!("duplicate name '{}'", algorithm.name),
                });
            }
        }

        self.fault.validate()?;
        self.flood.validate()?;

        Ok(OverlayConfig {
            gossip_period: self.gossip_period,
            safety_margin: self.safety_margin,
            tcp_timeout: self.tcp_timeout,
            udp_timeout: self.udp_timeout,
            algorithms: self.algorithms,
            fault: self.fault,
            flood: self.flood,
            stats_interval: self.stats_interval,
        })
    }
}

impl Default for OverlayConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> OverlayConfigBuilder {
        OverlayConfig::builder().algorithm(AlgorithmConfig::cyclon())
    }

    #[test]
    fn devnet_config_is_valid() {
        let devnet = OverlayConfig::devnet();
        let rebuilt = OverlayConfig::builder()
            .algorithms(devnet.algorithms().to_vec())
            .build();
        assert!(rebuilt.is_ok());
        assert!(devnet.gossip_period() > devnet.safety_margin());
    }

    #[test]
    fn builder_requires_an_algorithm() {
        let result = OverlayConfig::builder().build();
        assert!(matches!(
            result,
            Err(ConfigError::BelowMinimum {
                field: "algorithms",
                ..
            })
        ));
    }

    #[test]
    fn builder_rejects_duplicate_names() {
        let result = valid().algorithm(AlgorithmConfig::cyclon()).build();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn builder_rejects_margin_above_period() {
        let result = valid()
            .gossip_period(Duration::from_millis(100))
            .safety_margin(Duration::from_millis(100))
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidRelation {
                field: "gossip_period",
                ..
            })
        ));
    }

    #[test]
    fn builder_rejects_reconnect_before_disconnect() {
        let fault = FaultConfig {
            disconnect_after: Some(Duration::from_secs(60)),
            reconnect_after: Some(Duration::from_secs(30)),
            ..FaultConfig::default()
        };
        let result = valid().fault(fault).build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidRelation {
                field: "fault.reconnect_after",
                ..
            })
        ));
    }

    #[test]
    fn builder_rejects_loss_probability_out_of_range() {
        let fault = FaultConfig {
            loss_probability: 1.5,
            ..FaultConfig::default()
        };
        assert!(matches!(
            valid().fault(fault).build(),
            Err(ConfigError::OutOfRange { .. })
        ));
    }

    #[test]
    fn builder_rejects_tiny_send_size() {
        let result = OverlayConfig::builder()
            .algorithm(AlgorithmConfig::random().with_send_size(1))
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::BelowMinimum {
                field: "algorithm.send_size",
                ..
            })
        ));
    }

    #[test]
    fn udp_send_size_must_fit_a_datagram() {
        let oversized = AlgorithmConfig::random()
            .with_cache_size(500)
            .with_send_size(MAX_UDP_SEND_SIZE + 1);

        assert!(matches!(
            oversized.clone().with_transport(TransportKind::Udp).validate(),
            Err(ConfigError::InvalidValue {
                field: "algorithm.send_size",
                ..
            })
        ));
        assert!(oversized.with_transport(TransportKind::Tcp).validate().is_ok());
        assert!(AlgorithmConfig::arrg()
            .with_send_size(MAX_UDP_SEND_SIZE)
            .validate()
            .is_ok());
    }

    #[test]
    fn transport_timeout_follows_kind() {
        let config = valid()
            .tcp_timeout(Duration::from_secs(3))
            .udp_timeout(Duration::from_secs(1))
            .build()
            .expect("valid config should build");
        assert_eq!(config.transport_timeout(TransportKind::Tcp), Duration::from_secs(3));
        assert_eq!(config.transport_timeout(TransportKind::Udp), Duration::from_secs(1));
    }

    #[test]
    fn arrg_preset_has_fallback_and_retry() {
        let arrg = AlgorithmConfig::arrg();
        assert!(arrg.retry);
        assert!(arrg.fallback_size > 0);
        assert_eq!(arrg.transport, TransportKind::Udp);
        assert_eq!(arrg.strategy, Strategy::Random);
    }
}
