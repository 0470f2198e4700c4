//! Periodic driver and inbound router for the gossip algorithms.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::context::NodeContext;
use crate::discovery::BootstrapSource;
use crate::gossip::algorithm::GossipAlgorithm;
use crate::gossip::message::GossipMessage;
use crate::gossip::stats::StatsSummary;
use crate::gossip::GossipTransport;
use crate::node_info::{NodeId, NodeInfo};
use crate::{Error, Result};

/// Runs every configured algorithm on its own jittered schedule.
pub struct GossipService {
    context: Arc<NodeContext>,
    transport: Arc<dyn GossipTransport>,
    algorithms: Vec<Arc<GossipAlgorithm>>,
}

impl GossipService {
    /// One algorithm instance per entry of the node's configuration, all
    /// sharing `bootstrap`.
    pub fn new(
        context: Arc<NodeContext>,
        transport: Arc<dyn GossipTransport>,
        bootstrap: Option<Arc<dyn BootstrapSource>>,
    ) -> Self {
        let algorithms = context
            .config()
            .algorithms()
            .iter()
            .map(|config| {
                Arc::new(GossipAlgorithm::new(
                    config.clone(),
                    Arc::clone(&context),
                    bootstrap.clone(),
                ))
            })
            .collect();
        Self {
            context,
            transport,
            algorithms,
        }
    }

    pub fn algorithms(&self) -> &[Arc<GossipAlgorithm>] {
        &self.algorithms
    }

    pub fn algorithm(&self, name: &str) -> Option<&Arc<GossipAlgorithm>> {
        self.algorithms.iter().find(|algorithm| algorithm.name() == name)
    }

    /// Route an inbound exchange to the algorithm it names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownAlgorithm`] if no local instance carries
    /// that name.
    pub async fn handle_request(&self, request: GossipMessage) -> Result<GossipMessage> {
        let Some(algorithm) = self.algorithm(request.algorithm_name()) else {
            return Err(Error::UnknownAlgorithm(request.algorithm_name().to_string()));
        };
        Ok(algorithm.handle_request(request).await)
    }

    /// Spawn one round loop per algorithm.
    ///
    /// The loops run until their handles are aborted.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        info!(
            algorithms = self.algorithms.len(),
            period = ?self.context.config().gossip_period(),
            "Starting gossip"
        );
        self.algorithms
            .iter()
            .map(|algorithm| {
                let context = Arc::clone(&self.context);
                let algorithm = Arc::clone(algorithm);
                let transport = Arc::clone(&self.transport);
                tokio::spawn(async move { round_loop(context, algorithm, transport).await })
            })
            .collect()
    }

    /// Every peer known to any algorithm, newest record per node.
    pub async fn nodes(&self) -> Vec<NodeInfo> {
        let mut by_id: HashMap<NodeId, NodeInfo> = HashMap::new();
        for algorithm in &self.algorithms {
            for info in algorithm.nodes().await {
                let newest = match by_id.remove(&info.id()) {
                    Some(existing) => existing.newer(&info).clone(),
                    None => info,
                };
                by_id.insert(newest.id(), newest);
            }
        }
        by_id.into_values().collect()
    }

    pub fn summaries(&self) -> Vec<StatsSummary> {
        self.algorithms
            .iter()
            .map(|algorithm| algorithm.stats().summary())
            .collect()
    }
}

impl std::fmt::Debug for GossipService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GossipService")
            .field("algorithms", &self.algorithms)
            .finish_non_exhaustive()
    }
}

/// `mean` scaled by a uniform factor in `[0.9, 1.1]`.
pub(crate) fn jittered(mean: Duration) -> Duration {
    mean.mul_f64(rand::rng().random_range(0.9..=1.1))
}

/// Budget for one round of the given `period`.
///
/// Leaves `margin` of the period unused; falls back to half the period
/// when the margin would eat all of it.
pub(crate) fn round_timeout(period: Duration, margin: Duration) -> Duration {
    match period.checked_sub(margin) {
        Some(timeout) if !timeout.is_zero() => timeout,
        _ => period / 2,
    }
}

async fn round_loop(
    context: Arc<NodeContext>,
    algorithm: Arc<GossipAlgorithm>,
    transport: Arc<dyn GossipTransport>,
) {
    let config = context.config();
    debug!(algorithm = algorithm.name(), "Starting gossip loop");

    loop {
        let period = jittered(config.gossip_period());
        let timeout = round_timeout(period, config.safety_margin());
        let started = Instant::now();

        let outcome = algorithm.do_gossip(transport.as_ref(), timeout).await;
        trace!(algorithm = algorithm.name(), ?outcome, "Gossip round done");

        if let Some(snapshot) = algorithm.stats().snapshot_if_due(config.stats_interval()) {
            debug!(
                algorithm = algorithm.name(),
                pns = ?snapshot.pns,
                exchanges = snapshot.exchanges,
                "Recorded stats snapshot"
            );
        }

        let elapsed = started.elapsed();
        match period.checked_sub(elapsed) {
            Some(rest) if !rest.is_zero() => tokio::time::sleep(rest).await,
            _ => warn!(
                algorithm = algorithm.name(),
                ?elapsed,
                ?period,
                "Gossip round overran its period"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AlgorithmConfig, OverlayConfig, TransportKind};
    use crate::coordinates::Coordinates;
    use async_trait::async_trait;
    use uuid::Uuid;

    struct Unreachable;

    #[async_trait]
    impl GossipTransport for Unreachable {
        async fn exchange(
            &self,
            _peer: &NodeInfo,
            _request: GossipMessage,
            _kind: TransportKind,
            timeout: Duration,
        ) -> Result<GossipMessage> {
            Err(Error::Timeout(timeout))
        }
    }

    fn info(port: u16) -> NodeInfo {
        NodeInfo::new(
            Uuid::new_v4(),
            "n",
            "c",
            Coordinates::origin(),
            format!("127.0.0.1:{port}").parse().unwrap(),
        )
    }

    fn service() -> GossipService {
        let config = OverlayConfig::builder()
            .algorithm(AlgorithmConfig::cyclon())
            .algorithm(AlgorithmConfig::random())
            .build()
            .unwrap();
        GossipService::new(NodeContext::new(info(1), config), Arc::new(Unreachable), None)
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let mean = Duration::from_millis(1_000);
        for _ in 0..1_000 {
            let period = jittered(mean);
            assert!(period >= Duration::from_millis(900));
            assert!(period <= Duration::from_millis(1_100));
        }
    }

    #[test]
    fn round_timeout_leaves_margin() {
        let timeout = round_timeout(Duration::from_millis(1_000), Duration::from_millis(200));
        assert_eq!(timeout, Duration::from_millis(800));
        let squeezed = round_timeout(Duration::from_millis(100), Duration::from_millis(200));
        assert_eq!(squeezed, Duration::from_millis(50));
    }

    #[tokio::test]
    async fn requests_are_routed_by_name() {
        let service = service();
        let request = GossipMessage::new(info(2), info(1), Vec::new(), true, "random");

        let reply = service.handle_request(request).await.unwrap();

        assert_eq!(reply.algorithm_name(), "random");
        assert_eq!(service.algorithm("random").unwrap().cache_size().await, 0);
    }

    #[tokio::test]
    async fn unknown_algorithm_is_rejected() {
        let service = service();
        let request = GossipMessage::new(info(2), info(1), Vec::new(), true, "scamp");

        let result = service.handle_request(request).await;

        assert!(matches!(result, Err(Error::UnknownAlgorithm(name)) if name == "scamp"));
    }

    #[tokio::test]
    async fn nodes_merges_all_caches() {
        let service = service();
        let shared = info(5);
        for algorithm in service.algorithms() {
            algorithm
                .add_entries([crate::gossip::GossipCacheEntry::new(shared.clone())])
                .await;
        }
        service
            .algorithm("cyclon")
            .unwrap()
            .add_entries([crate::gossip::GossipCacheEntry::new(info(6))])
            .await;

        assert_eq!(service.nodes().await.len(), 2);
        assert_eq!(service.summaries().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn loops_keep_running_after_failures() {
        let service = service();
        service
            .algorithm("cyclon")
            .unwrap()
            .add_entries((10..20).map(|port| crate::gossip::GossipCacheEntry::new(info(port))))
            .await;

        let tasks = service.start();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(tasks.iter().all(|task| !task.is_finished()));
        assert!(service.algorithm("cyclon").unwrap().stats().failed_exchanges() >= 3);
        tasks.iter().for_each(JoinHandle::abort);
    }
}
