//! Flood message types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::flood::FloodMetric;
use crate::node_info::NodeInfo;

/// An application advertisement to disseminate.
///
/// `count` is interpreted per metric: a hop budget for
/// [`FloodMetric::Hops`], a doubling exponent for
/// [`FloodMetric::Latency`], and ignored for
/// [`FloodMetric::Neighbours`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advert {
    pub metric: FloodMetric,
    pub count: u32,
    pub payload: Vec<u8>,
}

impl Advert {
    pub fn new(metric: FloodMetric, count: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            metric,
            count,
            payload: payload.into(),
        }
    }
}

/// Remaining reach of a flood message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Radius {
    /// Hops left, this one included.
    Hops(u32),
    /// Remaining latency-space distance.
    Latency(f64),
}

impl Radius {
    /// Whether `self` reaches further than `other`.
    ///
    /// Radii of different kinds never compare as larger.
    pub fn exceeds(&self, other: &Radius) -> bool {
        match (self, other) {
            (Radius::Hops(a), Radius::Hops(b)) => a > b,
            (Radius::Latency(a), Radius::Latency(b)) => a > b,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FloodPayload {
    Advert(Advert),
    /// Shut down the receiving node.
    Kill,
}

/// A flood message as it travels between nodes.
///
/// `id` is fixed at the originator and survives forwarding, so every
/// copy of one flood can be recognised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloodMessage {
    id: Uuid,
    payload: FloodPayload,
    radius: Radius,
    sender: NodeInfo,
}

impl FloodMessage {
    /// A new flood originating at `origin`.
    pub fn new(payload: FloodPayload, radius: Radius, origin: NodeInfo) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            radius,
            sender: origin,
        }
    }

    /// The copy `sender` passes on with the reduced `radius`.
    pub fn forwarded(&self, radius: Radius, sender: NodeInfo) -> Self {
        Self {
            id: self.id,
            payload: self.payload.clone(),
            radius,
            sender,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn payload(&self) -> &FloodPayload {
        &self.payload
    }

    pub fn radius(&self) -> Radius {
        self.radius
    }

    /// The node this copy came from (not necessarily the originator).
    pub fn sender(&self) -> &NodeInfo {
        &self.sender
    }

    pub fn is_kill(&self) -> bool {
        matches!(self.payload, FloodPayload::Kill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinates::Coordinates;

    #[test]
    fn radius_ordering() {
        assert!(Radius::Hops(3).exceeds(&Radius::Hops(2)));
        assert!(!Radius::Hops(2).exceeds(&Radius::Hops(2)));
        assert!(Radius::Latency(2.5).exceeds(&Radius::Latency(1.0)));
        assert!(!Radius::Latency(9.0).exceeds(&Radius::Hops(1)));
    }

    #[test]
    fn forwarding_keeps_identity() {
        let origin = NodeInfo::new(
            Uuid::new_v4(),
            "o",
            "c",
            Coordinates::origin(),
            "127.0.0.1:1".parse().unwrap(),
        );
        let relay = NodeInfo::address_only("127.0.0.1:2".parse().unwrap());
        let message = FloodMessage::new(FloodPayload::Kill, Radius::Hops(4), origin);

        let copy = message.forwarded(Radius::Hops(3), relay.clone());

        assert_eq!(copy.id(), message.id());
        assert_eq!(copy.radius(), Radius::Hops(3));
        assert_eq!(copy.sender(), &relay);
        assert!(copy.is_kill());
    }
}
