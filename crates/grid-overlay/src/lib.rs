//! Unstructured overlay for peer-to-peer grid nodes.
//!
//! Nodes keep partial views of the network with gossip-based peer
//! sampling ([`gossip`]) and disseminate adverts and shutdown requests
//! with radius-bounded floods ([`flood`]). [`OverlayNode`] assembles the
//! pieces on top of a shared TCP/UDP [`transport`].

pub mod config;
pub mod context;
pub mod coordinates;
pub mod discovery;
pub mod fault;
pub mod flood;
pub mod gossip;
pub mod node;
pub mod node_info;
pub mod transport;
pub mod wire;

mod error;

pub use config::{AlgorithmConfig, FaultConfig, FloodConfig, OverlayConfig, TransportKind};
pub use context::NodeContext;
pub use coordinates::Coordinates;
pub use discovery::{BootstrapSource, NeighbourSource, StaticBootstrap, StaticNeighbours};
pub use error::{ConfigError, Error, Result};
pub use flood::{Advert, FloodMetric, FloodService, FloodSink};
pub use gossip::{GossipAlgorithm, GossipService, Strategy};
pub use node::{OverlayNode, OverlayNodeBuilder};
pub use node_info::{NodeId, NodeInfo};
pub use wire::MAX_DATAGRAM_SIZE;

/// Default port for grid node traffic, TCP and UDP alike.
pub const DEFAULT_PORT: u16 = 7_400;
