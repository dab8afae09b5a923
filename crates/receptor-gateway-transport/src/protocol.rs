//! Wire frames between the gateway and receptor agents.

use receptor_gateway_core::{ControlMessage, JobResponse, Message, Payload};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Frame decoding/encoding error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// Frame from an agent to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentFrame {
    /// Handshake: the agent's node identity and declared capabilities.
    Hello {
        node_id: String,
        #[serde(default)]
        metadata: Payload,
    },
    /// Topology announcement.
    RouteTable {
        #[serde(default)]
        edges: Vec<String>,
        #[serde(default)]
        seen: Vec<String>,
    },
    /// Reply to a dispatched job.
    Response(JobResponse),
    /// Agent-side failure affecting the whole session.
    Fault { message: String },
}

impl AgentFrame {
    /// Decode a JSON text frame.
    ///
    /// # Errors
    /// Returns error if the text is not a valid frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Frame from the gateway to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayFrame {
    /// A dispatched job.
    Job(Message),
    /// Protocol control traffic.
    Control(ControlMessage),
}

impl GatewayFrame {
    /// Encode as a JSON text frame.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
