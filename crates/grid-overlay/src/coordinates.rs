//! Network coordinates.
//!
//! Coordinates are computed elsewhere (Vivaldi); the overlay only needs
//! to compare two of them.

use serde::{Deserialize, Serialize};

/// Number of Euclidean dimensions in a coordinate.
pub const DIMENSIONS: usize = 3;

/// A synthetic network position.
///
/// The distance between two coordinates estimates the round-trip latency
/// between the nodes holding them, in milliseconds. The `height` component
/// models the access-link delay that every path to the node pays.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinates {
    position: [f64; DIMENSIONS],
    height: f64,
}

impl Coordinates {
    /// Coordinates at the given position with the given height.
    pub fn new(position: [f64; DIMENSIONS], height: f64) -> Self {
        Self {
            position,
            height: height.max(0.0),
        }
    }

    /// The origin: no measurements taken yet.
    pub fn origin() -> Self {
        Self::default()
    }

    pub fn position(&self) -> &[f64; DIMENSIONS] {
        &self.position
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    /// Estimated distance to `other`. Always `>= 0`.
    pub fn distance(&self, other: &Coordinates) -> f64 {
        let euclidean = self
            .position
            .iter()
            .zip(other.position.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt();
        let distance = euclidean + (self.height + other.height);
        if distance.is_finite() { distance } else { 0.0 }
    }
}
