//! Session state, job dispatch and connection lookup for receptor agents.
//!
//! Provides:
//! - `ReceptorSession` - One live connection and its outbound channels
//! - `JobDispatcher` / `OutboundQueue` - Identified, bounded job hand-off
//! - `LocalConnectionLocator` - Per-process index of sessions
//! - `ControlPlane` - Status, ping, disconnect and listing

pub mod control;
pub mod correlation;
pub mod dispatch;
pub mod registry;
pub mod session;

pub use control::{ConnectionState, ConnectionStatus, ControlPlane, PingResult};
pub use correlation::PendingResponses;
pub use dispatch::{JobDispatcher, OutboundQueue};
pub use registry::LocalConnectionLocator;
pub use session::{PING_DIRECTIVE, ReceptorSession, SessionChannels, SessionFault};
