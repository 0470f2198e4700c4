//! Peer identity records.

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coordinates::Coordinates;

/// Protocol version carried in every [`NodeInfo`].
pub const PROTOCOL_VERSION: u32 = 1;

/// Unique identifier of a node.
pub type NodeId = Uuid;

/// Identity record for a peer.
///
/// A node builds one record describing itself when it starts; every
/// other record is read-only data received from the network. Two records
/// describe the same peer iff their ids match, and among such records
/// the one with the larger `created_at` is the fresher observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    id: NodeId,
    name: String,
    cluster_name: String,
    coordinates: Coordinates,
    address: SocketAddr,
    /// Milliseconds since the Unix epoch.
    created_at: u64,
    version: u32,
}

impl NodeInfo {
    /// Describe a node, stamped with the current time.
    pub fn new(
        id: NodeId,
        name: impl Into<String>,
        cluster_name: impl Into<String>,
        coordinates: Coordinates,
        address: SocketAddr,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            cluster_name: cluster_name.into(),
            coordinates,
            address,
            created_at: now_millis(),
            version: PROTOCOL_VERSION,
        }
    }

    /// Placeholder for a peer known only by address.
    ///
    /// The id is derived from the address and the timestamp is zero, so
    /// the placeholder is dropped once the peer answers with its real
    /// record.
    pub fn address_only(address: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v5(&Uuid::NAMESPACE_URL, address.to_string().as_bytes()),
            name: address.to_string(),
            cluster_name: String::new(),
            coordinates: Coordinates::origin(),
            address,
            created_at: 0,
            version: PROTOCOL_VERSION,
        }
    }

    /// Override the creation timestamp.
    pub fn with_created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn coordinates(&self) -> &Coordinates {
        &self.coordinates
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Whether this record is an [`address_only`](Self::address_only)
    /// placeholder.
    pub fn is_placeholder(&self) -> bool {
        self.created_at == 0
    }

    /// Whether both records describe the same peer.
    pub fn same_node_as(&self, other: &NodeInfo) -> bool {
        self.id == other.id
    }

    /// Whether both nodes belong to the same cluster.
    pub fn same_cluster_as(&self, other: &NodeInfo) -> bool {
        self.cluster_name == other.cluster_name
    }

    /// Estimated network distance to `other`.
    pub fn distance(&self, other: &NodeInfo) -> f64 {
        self.coordinates.distance(&other.coordinates)
    }

    /// The fresher of two records.
    ///
    /// Only meaningful for records of the same peer. On equal timestamps
    /// `self` is kept.
    pub fn newer<'a>(&'a self, other: &'a NodeInfo) -> &'a NodeInfo {
        if other.created_at > self.created_at {
            other
        } else {
            self
        }
    }

    /// The freshest record in `infos` that describes the same peer as
    /// `self`, which is itself a candidate.
    pub fn newest<'a>(&'a self, infos: impl IntoIterator<Item = &'a NodeInfo>) -> &'a NodeInfo {
        infos
            .into_iter()
            .filter(|info| info.same_node_as(self))
            .fold(self, |best, info| best.newer(info))
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: NodeId, created_at: u64) -> NodeInfo {
        NodeInfo::new(
            id,
            "node",
            "cluster-a",
            Coordinates::origin(),
            "127.0.0.1:4000".parse().unwrap(),
        )
        .with_created_at(created_at)
    }

    #[test]
    fn same_node_compares_ids_only() {
        let id = Uuid::new_v4();
        let a = info(id, 1);
        let b = info(id, 2);
        let c = info(Uuid::new_v4(), 1);
        assert!(a.same_node_as(&b));
        assert!(!a.same_node_as(&c));
    }

    #[test]
    fn newer_picks_larger_timestamp() {
        let id = Uuid::new_v4();
        let old = info(id, 10);
        let new = info(id, 20);
        assert_eq!(old.newer(&new).created_at(), 20);
        assert_eq!(new.newer(&old).created_at(), 20);
    }

    #[test]
    fn newest_ignores_other_peers() {
        let id = Uuid::new_v4();
        let base = info(id, 5);
        let others = vec![info(id, 7), info(Uuid::new_v4(), 100), info(id, 6)];
        assert_eq!(base.newest(&others).created_at(), 7);
    }

    #[test]
    fn address_only_loses_to_real_record() {
        let addr = "127.0.0.1:4000".parse().unwrap();
        let placeholder = NodeInfo::address_only(addr);
        assert!(placeholder.is_placeholder());
        assert_eq!(placeholder.id(), NodeInfo::address_only(addr).id());

        let real = info(Uuid::new_v4(), 1);
        assert!(!real.is_placeholder());
    }
}
