//! Connection Module
//!
//! Peer registry and the accept/lifecycle machinery around it.

pub mod manager;
pub mod registry;

pub use manager::ConnectionManager;
pub use registry::{ConnectionRegistry, Peer, PeerId};
