//! Collaborators that feed peers into the overlay.
//!
//! Node discovery transports and the structured cluster overlay live
//! outside this crate. The gossip and flood layers consume them through
//! the [`BootstrapSource`] and [`NeighbourSource`] traits.

use std::net::SocketAddr;

use rand::seq::IndexedRandom;

use crate::node_info::NodeInfo;

/// Source of candidate peers for an under-populated gossip cache.
pub trait BootstrapSource: Send + Sync + 'static {
    /// One candidate peer, or `None` if nothing is known.
    fn bootstrap_candidate(&self) -> Option<NodeInfo>;
}

/// Structured-overlay neighbours of this node.
pub trait NeighbourSource: Send + Sync + 'static {
    fn neighbour_infos(&self) -> Vec<NodeInfo>;

    /// Estimated distance to the closest neighbour, if any is known.
    fn distance_to_closest_neighbour(&self) -> Option<f64>;
}

/// Bootstrap from a fixed list of addresses.
///
/// Candidates are [`NodeInfo::address_only`] placeholders; the first
/// successful exchange replaces them with the peer's real record.
#[derive(Debug, Clone, Default)]
pub struct StaticBootstrap {
    peers: Vec<SocketAddr>,
}

impl StaticBootstrap {
    pub fn new(peers: impl IntoIterator<Item = SocketAddr>) -> Self {
        Self {
            peers: peers.into_iter().collect(),
        }
    }

    pub fn peers(&self) -> &[SocketAddr] {
        &self.peers
    }
}

impl BootstrapSource for StaticBootstrap {
    fn bootstrap_candidate(&self) -> Option<NodeInfo> {
        self.peers
            .choose(&mut rand::rng())
            .map(|addr| NodeInfo::address_only(*addr))
    }
}

/// Bootstrap from known records, used when full identities are at hand.
impl BootstrapSource for Vec<NodeInfo> {
    fn bootstrap_candidate(&self) -> Option<NodeInfo> {
        self.choose(&mut rand::rng()).cloned()
    }
}

/// A fixed neighbour set.
#[derive(Debug, Clone, Default)]
pub struct StaticNeighbours {
    local: Option<NodeInfo>,
    neighbours: Vec<NodeInfo>,
}

impl StaticNeighbours {
    /// No structured overlay: no neighbours, no distance estimate.
    pub fn none() -> Self {
        Self::default()
    }

    /// `neighbours` of the node described by `local`.
    pub fn new(local: NodeInfo, neighbours: Vec<NodeInfo>) -> Self {
        Self {
            local: Some(local),
            neighbours,
        }
    }
}

impl NeighbourSource for StaticNeighbours {
    fn neighbour_infos(&self) -> Vec<NodeInfo> {
        self.neighbours.clone()
    }

    fn distance_to_closest_neighbour(&self) -> Option<f64> {
        let local = self.local.as_ref()?;
        self.neighbours
            .iter()
            .map(|n| local.distance(n))
            .min_by(|a, b| a.total_cmp(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinates::Coordinates;
    use uuid::Uuid;

    fn at(x: f64) -> NodeInfo {
        NodeInfo::new(
            Uuid::new_v4(),
            "n",
            "c",
            Coordinates::new([x, 0.0, 0.0], 0.0),
            "127.0.0.1:1".parse().unwrap(),
        )
    }

    #[test]
    fn static_bootstrap_yields_placeholders() {
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let bootstrap = StaticBootstrap::new([addr]);
        let candidate = bootstrap.bootstrap_candidate().unwrap();
        assert_eq!(candidate.address(), addr);
        assert!(candidate.is_placeholder());
    }

    #[test]
    fn empty_bootstrap_yields_nothing() {
        assert!(StaticBootstrap::default().bootstrap_candidate().is_none());
        assert!(Vec::<NodeInfo>::new().bootstrap_candidate().is_none());
    }

    #[test]
    fn closest_neighbour_distance() {
        let neighbours = StaticNeighbours::new(at(0.0), vec![at(10.0), at(4.0), at(7.0)]);
        assert_eq!(neighbours.distance_to_closest_neighbour(), Some(4.0));
        assert_eq!(StaticNeighbours::none().distance_to_closest_neighbour(), None);
    }
}
