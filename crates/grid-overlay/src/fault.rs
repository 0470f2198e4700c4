//! Synthetic loss and partition injection.

use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::FaultConfig;
use crate::node_info::NodeInfo;
use crate::{Error, Result};

/// Applies a [`FaultConfig`] to the traffic of one node.
///
/// The partition window is measured from `started`, normally the node's
/// start instant, and covers `[disconnect_after, reconnect_after)`. A
/// missing `reconnect_after` keeps the partition up forever.
#[derive(Debug, Clone)]
pub struct FaultInjector {
    config: FaultConfig,
    local: NodeInfo,
    started: Instant,
}

impl FaultInjector {
    pub fn new(config: FaultConfig, local: &NodeInfo, started: Instant) -> Self {
        Self {
            config,
            local: local.clone(),
            started,
        }
    }

    /// An injector that never interferes.
    pub fn disabled(local: &NodeInfo) -> Self {
        Self::new(FaultConfig::default(), local, Instant::now())
    }

    pub fn config(&self) -> &FaultConfig {
        &self.config
    }

    /// Whether the next outgoing message should be silently dropped.
    pub fn should_drop(&self) -> bool {
        let p = self.config.loss_probability;
        p > 0.0 && rand::rng().random_bool(p.min(1.0))
    }

    /// Whether the partition window is open at `uptime`.
    pub fn is_partitioned_at(&self, uptime: Duration) -> bool {
        let Some(disconnect) = self.config.disconnect_after else {
            return false;
        };
        uptime >= disconnect && self.config.reconnect_after.is_none_or(|reconnect| uptime < reconnect)
    }

    /// Whether traffic with `peer` is allowed at `uptime`.
    pub fn link_allowed_at(&self, peer: &NodeInfo, uptime: Duration) -> bool {
        if !self.is_partitioned_at(uptime) {
            return true;
        }
        self.config.wan_only && self.local.same_cluster_as(peer)
    }

    /// Refuse traffic with `peer` while the partition is up.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disconnected`] for refused links.
    pub fn check_link(&self, peer: &NodeInfo) -> Result<()> {
        if self.link_allowed_at(peer, self.started.elapsed()) {
            Ok(())
        } else {
            Err(Error::Disconnected(peer.address()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinates::Coordinates;
    use rstest::rstest;
    use uuid::Uuid;

    fn in_cluster(cluster: &str) -> NodeInfo {
        NodeInfo::new(
            Uuid::new_v4(),
            "n",
            cluster,
            Coordinates::origin(),
            "127.0.0.1:1".parse().unwrap(),
        )
    }

    fn injector(fault: FaultConfig) -> FaultInjector {
        FaultInjector::new(fault, &in_cluster("home"), Instant::now())
    }

    fn window(wan_only: bool) -> FaultConfig {
        FaultConfig {
            disconnect_after: Some(Duration::from_secs(10)),
            reconnect_after: Some(Duration::from_secs(20)),
            wan_only,
            ..FaultConfig::default()
        }
    }

    #[rstest]
    #[case(5, true)]
    #[case(10, false)]
    #[case(15, false)]
    #[case(20, true)]
    #[case(25, true)]
    fn partition_window_bounds(#[case] secs: u64, #[case] allowed: bool) {
        let faults = injector(window(false));
        let peer = in_cluster("away");
        assert_eq!(
            faults.link_allowed_at(&peer, Duration::from_secs(secs)),
            allowed
        );
    }

    #[test]
    fn wan_only_keeps_cluster_links() {
        let faults = injector(window(true));
        let during = Duration::from_secs(15);
        assert!(faults.link_allowed_at(&in_cluster("home"), during));
        assert!(!faults.link_allowed_at(&in_cluster("away"), during));
    }

    #[test]
    fn open_ended_partition_never_heals() {
        let faults = injector(FaultConfig {
            disconnect_after: Some(Duration::ZERO),
            ..FaultConfig::default()
        });
        assert!(faults.is_partitioned_at(Duration::from_secs(1_000_000)));
        assert!(matches!(
            faults.check_link(&in_cluster("away")),
            Err(Error::Disconnected(_))
        ));
    }

    #[test]
    fn loss_extremes() {
        let never = injector(FaultConfig::default());
        let always = injector(FaultConfig {
            loss_probability: 1.0,
            ..FaultConfig::default()
        });
        assert!((0..100).all(|_| !never.should_drop()));
        assert!((0..100).all(|_| always.should_drop()));
    }

    #[test]
    fn disabled_injector_allows_everything() {
        let faults = FaultInjector::disabled(&in_cluster("home"));
        assert!(faults.check_link(&in_cluster("away")).is_ok());
        assert!(!faults.should_drop());
    }
}
