//! Per-node context handed to every component at construction.

use std::sync::Arc;
use std::time::Instant;

use crate::config::OverlayConfig;
use crate::node_info::NodeInfo;

/// What every component needs to know about the local node.
///
/// Shared behind an [`Arc`]; immutable once built.
#[derive(Debug)]
pub struct NodeContext {
    local: NodeInfo,
    config: OverlayConfig,
    started: Instant,
}

impl NodeContext {
    pub fn new(local: NodeInfo, config: OverlayConfig) -> Arc<Self> {
        Arc::new(Self {
            local,
            config,
            started: Instant::now(),
        })
    }

    /// This node's own record.
    pub fn local(&self) -> &NodeInfo {
        &self.local
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    /// When the node started; partition windows are measured from here.
    pub fn started(&self) -> Instant {
        self.started
    }
}
