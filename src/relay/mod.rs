//! Relay Module
//!
//! Frame construction and fan-out of frames to connected peers.

pub mod engine;
pub mod frame;

pub use engine::BroadcastEngine;
pub use frame::format_frame;
