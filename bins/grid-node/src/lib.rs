//! Grid node daemon library.

pub mod config;
pub mod service;
pub mod state;

pub use config::NodeConfig;
pub use state::NodeState;
