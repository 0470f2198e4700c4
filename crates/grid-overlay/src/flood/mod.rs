//! Bounded flooding over the overlay.
//!
//! Floods reach every node within a radius of the originator, measured
//! in hops or in latency-coordinate distance. Each receiver delivers the
//! payload locally, then forwards a copy with the radius reduced by the
//! link it crossed. Forwarding targets are the union of the structured
//! overlay neighbours and every gossip algorithm's cache.

mod message;
mod service;

pub use message::{Advert, FloodMessage, FloodPayload, Radius};
pub use service::{FloodReport, FloodService};

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::node_info::NodeInfo;
use crate::Result;

/// How the reach of an advert is bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FloodMetric {
    /// At most `count` hops.
    Hops,
    /// Within `closest-neighbour distance × 2^count` in latency space.
    Latency,
    /// Direct neighbours only.
    #[default]
    Neighbours,
}

/// Delivery of one flood message to a neighbour.
#[async_trait]
pub trait FloodTransport: Send + Sync + 'static {
    /// Hand `message` to `peer`, waiting at most `timeout` for its ack.
    async fn forward(&self, peer: &NodeInfo, message: FloodMessage, timeout: Duration) -> Result<()>;
}

/// Local consumer of delivered floods.
pub trait FloodSink: Send + Sync + 'static {
    fn advert_received(&self, advert: &Advert, from: &NodeInfo);

    /// A kill flood arrived; the node should stop after `grace`.
    fn kill_requested(&self, grace: Duration);
}

/// Sink that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl FloodSink for LogSink {
    fn advert_received(&self, advert: &Advert, from: &NodeInfo) {
        tracing::info!(
            metric = ?advert.metric,
            bytes = advert.payload.len(),
            from = %from.address(),
            "Advert received"
        );
    }

    fn kill_requested(&self, grace: Duration) {
        tracing::warn!(?grace, "Kill flood received, no handler installed");
    }
}
