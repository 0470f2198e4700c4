//! Gossip-based peer sampling.
//!
//! Each configured algorithm keeps its own partial view of the overlay
//! and refreshes it by periodically swapping a few cache entries with
//! one peer. Two selection disciplines are supported:
//!
//! - [`Strategy::Cyclon`]: contact the oldest entry, evict what was sent.
//! - [`Strategy::Random`]: contact and evict uniformly at random. With a
//!   fallback cache and one retry per round this is the ARRG variant
//!   meant for lossy or partitioned networks.
//!
//! Several instances run side by side; inbound exchanges are routed to
//! the instance named in [`GossipMessage::algorithm_name`].

mod algorithm;
mod cache;
mod message;
mod service;
mod stats;

pub use algorithm::{GossipAlgorithm, RoundOutcome};
pub use cache::{EvictionPolicy, GossipCache, GossipCacheEntry};
pub use message::GossipMessage;
pub use service::GossipService;
pub use stats::{Snapshot, Stats, StatsSummary};

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::TransportKind;
use crate::node_info::NodeInfo;
use crate::Result;

/// Peer selection and eviction discipline of one algorithm instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Cyclon,
    Random,
}

impl Strategy {
    /// Eviction policy of the primary cache.
    pub fn eviction_policy(self) -> EvictionPolicy {
        match self {
            Strategy::Cyclon => EvictionPolicy::Oldest,
            Strategy::Random => EvictionPolicy::Random,
        }
    }
}

/// Request/reply exchange of gossip messages with a remote peer.
///
/// The network implementation is
/// [`NetworkTransport`](crate::transport::NetworkTransport); tests plug in
/// in-memory exchangers.
#[async_trait]
pub trait GossipTransport: Send + Sync + 'static {
    /// Send `request` to `peer` and wait for its reply.
    ///
    /// # Errors
    ///
    /// Fails if the peer cannot be reached within `timeout`, if the
    /// exchange is refused by fault injection, or if the reply is not a
    /// gossip message.
    async fn exchange(
        &self,
        peer: &NodeInfo,
        request: GossipMessage,
        kind: TransportKind,
        timeout: Duration,
    ) -> Result<GossipMessage>;
}
