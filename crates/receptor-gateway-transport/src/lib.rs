//! Transport collaborators for the receptor gateway.
//!
//! Provides:
//! - Wire frames exchanged with agents (JSON)
//! - Session bridge: applies agent frames, drains outbound channels
//! - WebSocket agent transport (feature: websocket)
//! - HTTP management API (feature: management)

pub mod bridge;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "management")]
pub mod management;

pub use protocol::{AgentFrame, GatewayFrame, ProtocolError};
