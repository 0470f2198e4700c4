//! Error types for overlay operations.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Overlay error.
///
/// Transport failures are recovered locally by the gossip and flood
/// layers (the peer is evicted, the round is retried or skipped) and
/// never escape the periodic loops. Protocol errors cause the offending
/// connection or datagram to be dropped.
#[derive(Debug, Error)]
pub enum Error {
    // --- Transport errors ---
    /// Unable to establish a connection (no route, refused).
    #[error("dial {addr} failed: {reason}")]
    DialFailed { addr: SocketAddr, reason: String },

    /// Connection or exchange timed out.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// Exchange refused by the simulated network partition.
    #[error("disconnected from {0} by partition window")]
    Disconnected(SocketAddr),

    // --- Protocol errors ---
    /// Request names an algorithm this node does not run.
    #[error("unknown gossip algorithm: {0}")]
    UnknownAlgorithm(String),

    /// Peer answered with a response that does not match the request.
    #[error("unexpected response: expected {expected}, got {got}")]
    UnexpectedResponse {
        expected: &'static str,
        got: String,
    },

    /// Peer reported an error while handling our request.
    #[error("remote error: {0}")]
    Remote(String),

    /// The peer answered with the local node's own identity, i.e. the
    /// address dialled loops back to this node.
    #[error("peer at {0} is the local node")]
    SelfExchange(SocketAddr),

    /// Encoded message exceeds the transport's payload bound.
    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },

    // --- Encoding/decoding errors ---
    /// Failed to encode a message.
    #[error("encode error: {0}")]
    Encode(String),

    /// Failed to decode a message.
    #[error("decode error: {0}")]
    Decode(String),

    // --- Setup errors ---
    /// Bound to a wildcard address with nothing routable to advertise.
    #[error("bound to unspecified address {0}; an advertise address is required")]
    UnadvertisableAddress(SocketAddr),

    // --- Internal errors ---
    /// I/O error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error stems from peer reachability rather than from
    /// a malformed exchange.
    ///
    /// Partition refusals and injected loss (surfacing as timeouts) count
    /// as transport failures: to the caller the peer might just be
    /// unreachable.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::DialFailed { .. }
                | Error::Timeout(_)
                | Error::Disconnected(_)
                | Error::Io(_)
        )
    }
}

/// Result type for overlay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration validation error.
///
/// Returned when [`OverlayConfig`] is built with values that cannot work.
/// These are fatal at startup.
///
/// [`OverlayConfig`]: crate::OverlayConfig
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration value is below the minimum.
    #[error("{field} must be at least {minimum}, got {provided}")]
    BelowMinimum {
        field: &'static str,
        minimum: usize,
        provided: usize,
    },

    /// A value must lie within a closed range.
    #[error("{field} must be within [{min}, {max}], got {provided}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        provided: f64,
    },

    /// A configuration value is invalid relative to another value.
    #[error("{field} must be greater than {other_field} ({field_value:?} <= {other_value:?})")]
    InvalidRelation {
        field: &'static str,
        field_value: Duration,
        other_field: &'static str,
        other_value: Duration,
    },

    /// A configuration value is invalid on its own.
    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_classified() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        assert!(Error::Timeout(Duration::from_secs(1)).is_transport());
        assert!(Error::Disconnected(addr).is_transport());
        assert!(!Error::UnknownAlgorithm("x".into()).is_transport());
        assert!(!Error::SelfExchange(addr).is_transport());
        assert!(!Error::Decode("bad".into()).is_transport());
    }

    #[test]
    fn relation_error_mentions_both_fields() {
        let err = ConfigError::InvalidRelation {
            field: "reconnect_after",
            field_value: Duration::from_secs(1),
            other_field: "disconnect_after",
            other_value: Duration::from_secs(5),
        };
        let msg = err.to_string();
        assert!(msg.contains("reconnect_after"));
        assert!(msg.contains("disconnect_after"));
    }
}
