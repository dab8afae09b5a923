//! Jobs, messages and the opaque data they carry.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Correlation identifier assigned to every dispatched job.
pub type MessageId = Uuid;

/// Opaque data carried by jobs, replies and registration metadata.
///
/// The gateway never interprets the contents; callers agree on the shape
/// per directive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Payload {
    /// No data.
    #[default]
    Empty,
    /// Structured JSON document.
    Json(Value),
    /// Raw bytes tagged with the schema the receiver should decode them with.
    Bytes {
        schema: String,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
}

impl Payload {
    /// Create a JSON payload.
    #[must_use]
    pub const fn json(value: Value) -> Self {
        Self::Json(value)
    }

    /// Create a schema-tagged byte payload.
    #[must_use]
    pub fn bytes(schema: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self::Bytes {
            schema: schema.into(),
            data: data.into(),
        }
    }

    /// Whether this payload carries no data.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// The payload as plain JSON, without the `kind` envelope.
    ///
    /// `Empty` becomes `null`; byte payloads become `{schema, data}` with
    /// base64 data.
    #[must_use]
    pub fn into_json(self) -> Value {
        match self {
            Self::Empty => Value::Null,
            Self::Json(value) => value,
            Self::Bytes { schema, data } => serde_json::json!({
                "schema": schema,
                "data": base64_bytes::encode(&data),
            }),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// A dispatch request, before a correlation identifier is assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Target node identity.
    pub recipient: String,
    /// Intermediate hops, empty for direct delivery.
    pub route_list: Vec<String>,
    /// Caller-defined data.
    pub payload: Payload,
    /// Remote operation the payload targets.
    pub directive: String,
}

impl Job {
    /// Create a job with an empty route and payload.
    #[must_use]
    pub fn new(recipient: impl Into<String>, directive: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            route_list: Vec::new(),
            payload: Payload::Empty,
            directive: directive.into(),
        }
    }

    /// Set the route list.
    #[must_use]
    pub fn with_route(mut self, route_list: Vec<String>) -> Self {
        self.route_list = route_list;
        self
    }

    /// Set the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }
}

/// A job with its correlation identifier, as handed to a session's transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub recipient: String,
    pub route_list: Vec<String>,
    pub payload: Payload,
    pub directive: String,
}

impl Message {
    /// Attach an identifier to a job.
    #[must_use]
    pub fn from_job(message_id: MessageId, job: Job) -> Self {
        Self {
            message_id,
            recipient: job.recipient,
            route_list: job.route_list,
            payload: job.payload,
            directive: job.directive,
        }
    }
}

/// Protocol-level control traffic toward an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "control", rename_all = "snake_case")]
pub enum ControlMessage {
    /// The node is leaving the mesh and should be dropped from routing tables.
    RouteWithdrawal { node_id: String },
    /// The gateway is terminating the session.
    Terminate { reason: String },
}

/// Outcome reported by the agent for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCode {
    Ok,
    Error,
}

/// An asynchronous reply correlated to a dispatched job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResponse {
    pub in_response_to: MessageId,
    pub sender: String,
    pub code: ResponseCode,
    #[serde(default)]
    pub payload: Payload,
}

/// Latest topology snapshot announced by an agent.
///
/// Stored and returned as-is; no path computation is derived from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingFacts {
    /// Directly reachable neighbors.
    #[serde(default)]
    pub edges: Vec<String>,
    /// Nodes known transitively.
    #[serde(default)]
    pub seen: Vec<String>,
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn encode(data: &[u8]) -> String {
        BASE64.encode(data)
    }

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_payload_is_base64_on_the_wire() {
        let payload = Payload::bytes("application/octet-stream", b"Hello, World!".to_vec());
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "bytes");
        assert_eq!(json["value"]["data"], "SGVsbG8sIFdvcmxkIQ==");

        let parsed: Payload = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn test_into_json_drops_envelope() {
        assert_eq!(Payload::Empty.into_json(), Value::Null);
        assert_eq!(
            Payload::json(serde_json::json!({"ansible": true})).into_json(),
            serde_json::json!({"ansible": true})
        );
        assert_eq!(
            Payload::bytes("raw", b"hi".to_vec()).into_json(),
            serde_json::json!({"schema": "raw", "data": "aGk="})
        );
    }

    #[test]
    fn test_invalid_base64_rejected() {
        let json = serde_json::json!({
            "kind": "bytes",
            "value": { "schema": "raw", "data": "not base64!!" }
        });
        assert!(serde_json::from_value::<Payload>(json).is_err());
    }

    #[test]
    fn test_message_from_job() {
        let id = Uuid::new_v4();
        let job = Job::new("nodeX", "run")
            .with_route(vec!["hop1".into()])
            .with_payload(Payload::json(serde_json::json!({"cmd": "ls"})));
        let msg = Message::from_job(id, job);

        assert_eq!(msg.message_id, id);
        assert_eq!(msg.recipient, "nodeX");
        assert_eq!(msg.route_list, vec!["hop1".to_string()]);
        assert_eq!(msg.directive, "run");
    }

    #[test]
    fn test_response_payload_defaults_to_empty() {
        let json = serde_json::json!({
            "in_response_to": Uuid::nil(),
            "sender": "nodeX",
            "code": "ok"
        });
        let response: JobResponse = serde_json::from_value(json).unwrap();
        assert_eq!(response.code, ResponseCode::Ok);
        assert!(response.payload.is_empty());
    }
}
