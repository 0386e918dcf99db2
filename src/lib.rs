//! Relayhub Library
//!
//! A single-room TCP broadcast hub for newline-delimited text.
//!
//! Every message read from a connected peer is framed with the sender's
//! address and fanned out to every other connected peer. No persistence,
//! no authentication, no rooms.

pub mod config;
pub mod connection;
pub mod error;
pub mod relay;
pub mod shutdown;

pub use config::Config;
pub use connection::ConnectionManager;
pub use error::StartupError;
pub use shutdown::ShutdownCoordinator;

/// Common error type for the hub
pub type Result<T> = anyhow::Result<T>;
