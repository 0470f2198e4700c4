//! Node state types for persistent storage.
//!
//! The node state holds the node id, so a restarted node rejoins the
//! overlay as the same peer.

use grid_overlay::NodeId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors reading or writing the state file.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse state: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Persistent state for the grid node daemon, stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    /// Overlay node id. Peers merge records by this id.
    node_id: NodeId,
    /// Unix time (seconds) the id was generated.
    created_at: u64,
}

impl NodeState {
    /// Fresh state with a random node id.
    pub fn generate() -> Self {
        let created_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        Self {
            node_id: uuid::Uuid::new_v4(),
            created_at,
        }
    }

    /// Load the state file, or generate and save a new one if it is missing.
    pub fn load_or_create(path: &Path) -> Result<Self, StateError> {
        if path.exists() {
            tracing::debug!(path = %path.display(), "Loading node state");
            return Self::load(path);
        }

        let state = Self::generate();
        state.save(path)?;
        tracing::info!(path = %path.display(), node_id = %state.node_id, "Created node state");
        Ok(state)
    }

    pub fn load(path: &Path) -> Result<Self, StateError> {
        let contents = std::fs::read_to_string(path)?;
        let state = serde_json::from_str(&contents).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to parse node state");
            e
        })?;
        Ok(state)
    }

    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_state_serialization() {
        let state = NodeState::generate();

        let json = serde_json::to_string_pretty(&state).unwrap();
        let deserialized: NodeState = serde_json::from_str(&json).unwrap();

        assert_eq!(state, deserialized);
        assert!(json.contains("node_id"));
    }

    #[test]
    fn test_load_or_create_reuses_id() {
        let temp_dir = tempfile::tempdir().unwrap();
        let state_path = temp_dir.path().join("data").join("node.json");

        let first = NodeState::load_or_create(&state_path).unwrap();
        assert!(state_path.exists());
        let second = NodeState::load_or_create(&state_path).unwrap();

        assert_eq!(first.node_id(), second.node_id());
        assert_eq!(first.created_at(), second.created_at());
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(NodeState::generate().node_id(), NodeState::generate().node_id());
    }

    #[test]
    fn test_corrupt_state_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let state_path = temp_dir.path().join("node.json");
        std::fs::write(&state_path, "{ not json").unwrap();

        let result = NodeState::load_or_create(&state_path);
        assert!(matches!(result, Err(StateError::ParseError(_))));
    }
}
