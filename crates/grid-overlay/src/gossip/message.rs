//! The unit exchanged between two peers in one gossip round.

use serde::{Deserialize, Serialize};

use crate::gossip::cache::GossipCacheEntry;
use crate::node_info::NodeInfo;

/// A request or reply of one gossip exchange.
///
/// Built fresh for every exchange and never mutated afterwards.
/// `algorithm_name` is the key receivers use to route the message to
/// their local algorithm instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GossipMessage {
    sender: NodeInfo,
    receiver: NodeInfo,
    entries: Vec<GossipCacheEntry>,
    reply_requested: bool,
    algorithm_name: String,
}

impl GossipMessage {
    pub fn new(
        sender: NodeInfo,
        receiver: NodeInfo,
        entries: Vec<GossipCacheEntry>,
        reply_requested: bool,
        algorithm_name: impl Into<String>,
    ) -> Self {
        Self {
            sender,
            receiver,
            entries,
            reply_requested,
            algorithm_name: algorithm_name.into(),
        }
    }

    pub fn sender(&self) -> &NodeInfo {
        &self.sender
    }

    pub fn receiver(&self) -> &NodeInfo {
        &self.receiver
    }

    pub fn entries(&self) -> &[GossipCacheEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<GossipCacheEntry> {
        self.entries
    }

    pub fn reply_requested(&self) -> bool {
        self.reply_requested
    }

    pub fn algorithm_name(&self) -> &str {
        &self.algorithm_name
    }
}
