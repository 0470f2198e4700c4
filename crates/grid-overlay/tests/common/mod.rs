//! Shared test utilities for grid-overlay tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use grid_overlay::flood::{FloodMessage, FloodTransport};
use grid_overlay::{
    Advert, AlgorithmConfig, Coordinates, Error, FloodSink, NodeInfo, OverlayConfig, OverlayNode,
    Result, StaticBootstrap,
};
use uuid::Uuid;

/// Route overlay logs to the test harness; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("grid_overlay=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Fast timings for tests over localhost.
pub fn test_config(algorithms: impl IntoIterator<Item = AlgorithmConfig>) -> OverlayConfig {
    OverlayConfig::builder()
        .gossip_period(Duration::from_millis(200))
        .safety_margin(Duration::from_millis(50))
        .tcp_timeout(Duration::from_secs(1))
        .udp_timeout(Duration::from_millis(500))
        .algorithms(algorithms)
        .build()
        .expect("test config should be valid")
}

/// Bind a node on an ephemeral localhost port and start serving.
pub async fn serving_node(config: OverlayConfig, bootstrap: Option<SocketAddr>) -> OverlayNode {
    let mut builder = OverlayNode::builder()
        .bind_addr("127.0.0.1:0".parse().expect("valid addr"))
        .cluster_name("test")
        .config(config);
    if let Some(addr) = bootstrap {
        builder = builder.bootstrap(Arc::new(StaticBootstrap::new([addr])));
    }
    let mut node = builder.bind().await.expect("failed to bind test node");
    node.start_serving();
    node
}

/// Ids known to the named algorithm of `node`.
pub async fn known_ids(node: &OverlayNode, algorithm: &str) -> Vec<Uuid> {
    node.gossip()
        .algorithm(algorithm)
        .expect("algorithm should exist")
        .nodes()
        .await
        .iter()
        .map(NodeInfo::id)
        .collect()
}

/// Poll `condition` every 20ms for up to `limit`.
pub async fn wait_until<F, Fut>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition().await
}

/// A record at `x` on the first axis, with a unique loopback port.
pub fn node_at(port: u16, x: f64) -> NodeInfo {
    NodeInfo::new(
        Uuid::new_v4(),
        format!("node-{port}"),
        "test",
        Coordinates::new([x, 0.0, 0.0], 0.0),
        SocketAddr::from(([127, 0, 0, 1], port)),
    )
}

/// Sink that remembers what it received.
#[derive(Default)]
pub struct RecordingSink {
    adverts: Mutex<Vec<Advert>>,
    kills: AtomicUsize,
}

impl RecordingSink {
    pub fn adverts(&self) -> usize {
        self.adverts.lock().expect("sink lock").len()
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

impl FloodSink for RecordingSink {
    fn advert_received(&self, advert: &Advert, _from: &NodeInfo) {
        self.adverts.lock().expect("sink lock").push(advert.clone());
    }

    fn kill_requested(&self, _grace: Duration) {
        self.kills.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory flood network: forwarding calls the target's handler
/// directly, so a flood has fully settled once the originating call
/// returns.
#[derive(Default)]
pub struct FloodNet {
    services: Mutex<HashMap<SocketAddr, Arc<grid_overlay::FloodService>>>,
    forwards: AtomicUsize,
}

impl FloodNet {
    pub fn join(&self, addr: SocketAddr, service: Arc<grid_overlay::FloodService>) {
        self.services
            .lock()
            .expect("net lock")
            .insert(addr, service);
    }

    pub fn forwards(&self) -> usize {
        self.forwards.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FloodTransport for FloodNet {
    async fn forward(&self, peer: &NodeInfo, message: FloodMessage, timeout: Duration) -> Result<()> {
        self.forwards.fetch_add(1, Ordering::SeqCst);
        let target = self
            .services
            .lock()
            .expect("net lock")
            .get(&peer.address())
            .cloned();
        match target {
            Some(service) => {
                service.handle_message(message).await;
                Ok(())
            }
            None => Err(Error::Timeout(timeout)),
        }
    }
}
