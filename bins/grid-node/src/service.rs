//! Node service running the overlay until shutdown.

use crate::{NodeConfig, NodeState};
use anyhow::Result;
use grid_overlay::{Advert, FloodSink, NodeInfo, OverlayNode, StaticBootstrap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Flood sink that turns a network-kill request into a local shutdown.
struct ShutdownSink {
    shutdown_tx: watch::Sender<bool>,
}

impl FloodSink for ShutdownSink {
    fn advert_received(&self, advert: &Advert, from: &NodeInfo) {
        info!(
            metric = ?advert.metric,
            count = advert.count,
            bytes = advert.payload.len(),
            from = %from.id(),
            "Advert received"
        );
    }

    fn kill_requested(&self, grace: Duration) {
        warn!(?grace, "Network kill requested, shutting down after grace period");
        let shutdown_tx = self.shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = shutdown_tx.send(true);
        });
    }
}

/// Node service owning one overlay node.
pub struct NodeService {
    config: NodeConfig,
    state: NodeState,
    node: OverlayNode,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl NodeService {
    /// Bind the overlay sockets for the given config and state.
    ///
    /// Nothing is sent or answered until [`run`](Self::run).
    pub async fn new(config: NodeConfig, state: NodeState) -> Result<Self> {
        info!("Creating node service");

        let overlay_config = config.to_overlay_config()?;
        let bootstrap = config.bootstrap_peers()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut builder = OverlayNode::builder()
            .id(state.node_id())
            .name(config.node.name.clone())
            .cluster_name(config.node.cluster.clone())
            .coordinates(config.coordinates())
            .bind_addr(config.listen_addr()?)
            .config(overlay_config)
            .sink(Arc::new(ShutdownSink {
                shutdown_tx: shutdown_tx.clone(),
            }));
        if let Some(addr) = config.advertise_addr()? {
            builder = builder.advertise_addr(addr);
        }
        if bootstrap.is_empty() {
            info!("No bootstrap peers configured, waiting to be contacted");
        } else {
            debug!(peers = ?bootstrap, "Bootstrap peers");
            builder = builder.bootstrap(Arc::new(StaticBootstrap::new(bootstrap)));
        }

        let node = builder.bind().await?;
        info!(node_id = %node.local().id(), "Node service created");

        Ok(Self {
            config,
            state,
            node,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn node(&self) -> &OverlayNode {
        &self.node
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    /// The address the overlay sockets are bound to.
    pub fn bound_addr(&self) -> SocketAddr {
        self.node.bound_addr()
    }

    /// Run the overlay until a shutdown is triggered, logging stats periodically.
    pub async fn run(mut self) -> Result<()> {
        info!("Node service running");
        self.node.start();

        let mut stats = tokio::time::interval(Duration::from_secs(
            self.config.gossip.stats_log_interval_secs.max(1),
        ));
        stats.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        stats.tick().await;

        let mut shutdown = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                _ = stats.tick() => {
                    self.log_stats().await;
                }
                _ = shutdown.changed() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.log_stats().await;
        self.node.shutdown();
        info!("Node service shutdown complete");
        Ok(())
    }

    async fn log_stats(&self) {
        for algorithm in self.node.gossip().algorithms() {
            let summary = algorithm.stats().summary();
            let cache_size = algorithm.cache_size().await;
            info!(
                algorithm = %summary.algorithm,
                cache_size = cache_size,
                pns = ?summary.pns,
                successes = summary.successful_exchanges,
                failures = summary.failed_exchanges,
                "Gossip stats"
            );
        }
    }

    /// Get a shutdown trigger that can be used to signal shutdown.
    ///
    /// This should be called before moving the service into a spawn.
    pub fn shutdown_trigger(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }
}
