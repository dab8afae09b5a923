//! Error taxonomy for sessions, dispatch and control operations.

use std::time::Duration;

use thiserror::Error;

/// Gateway error.
///
/// Every failure in the routing layer is returned as one of these values;
/// nothing here panics or aborts the process.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The correlation identifier could not be generated.
    #[error("Unable to generate a correlation identifier: {0}")]
    IdentifierGeneration(String),
    /// The session is closing or already closed.
    #[error("Session for node {node_id} is closed")]
    SessionClosed { node_id: String },
    /// No session is registered for the tenant/node pair.
    #[error("No connection found for node ({tenant}:{node_id})")]
    NotFound { tenant: String, node_id: String },
    /// A bounded blocking operation exceeded its deadline.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
    /// The agent or an intermediate hop reported a failure.
    #[error("Node {sender} reported a failure: {detail}")]
    UpstreamFault { sender: String, detail: String },
    /// The dispatch request is malformed.
    #[error("Invalid job: {0}")]
    InvalidJob(&'static str),
}

impl GatewayError {
    /// Build a `NotFound` error.
    #[must_use]
    pub fn not_found(tenant: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self::NotFound {
            tenant: tenant.into(),
            node_id: node_id.into(),
        }
    }

    /// Build a `SessionClosed` error.
    #[must_use]
    pub fn session_closed(node_id: impl Into<String>) -> Self {
        Self::SessionClosed {
            node_id: node_id.into(),
        }
    }

    /// Whether the error means the node simply isn't reachable through this
    /// gateway. Status-style queries report these as `disconnected`.
    #[must_use]
    pub const fn is_disconnected(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::SessionClosed { .. })
    }
}
