//! HTTP management API over the control plane.

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use receptor_gateway_core::Payload;
use receptor_gateway_session::{ConnectionState, ControlPlane};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::trace::TraceLayer;

/// Identifies one connection in request bodies.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionId {
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub node_id: String,
}

/// Error body returned by every management route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub title: String,
    pub status: u16,
    pub detail: String,
}

impl ErrorResponse {
    fn bad_request(title: &str, detail: impl Into<String>) -> Self {
        Self {
            title: title.to_string(),
            status: StatusCode::BAD_REQUEST.as_u16(),
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::BAD_REQUEST);
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct TenantConnections {
    account: String,
    connections: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ConnectionListing {
    connections: Vec<TenantConnections>,
}

#[derive(Debug, Serialize)]
struct TenantListing {
    connections: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Empty {}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    capabilities: Option<Value>,
}

#[derive(Debug, Serialize)]
struct PingResponse {
    status: ConnectionState,
    payload: Option<Value>,
}

const JSON_INPUT_ERROR: &str = "Unable to process json input";

fn connection_id(
    body: Result<Json<ConnectionId>, JsonRejection>,
) -> Result<ConnectionId, ErrorResponse> {
    let Json(id) =
        body.map_err(|e| ErrorResponse::bad_request(JSON_INPUT_ERROR, e.body_text()))?;
    if id.account.is_empty() || id.node_id.is_empty() {
        return Err(ErrorResponse::bad_request(
            JSON_INPUT_ERROR,
            "account and node_id are required",
        ));
    }
    Ok(id)
}

async fn handle_disconnect(
    State(control): State<ControlPlane>,
    body: Result<Json<ConnectionId>, JsonRejection>,
) -> Result<Json<Empty>, ErrorResponse> {
    let id = connection_id(body)?;
    control
        .disconnect(&id.account, &id.node_id)
        .await
        .map_err(|e| ErrorResponse::bad_request("Bad Request", e.to_string()))?;
    Ok(Json(Empty {}))
}

async fn handle_status(
    State(control): State<ControlPlane>,
    body: Result<Json<ConnectionId>, JsonRejection>,
) -> Result<Response, ErrorResponse> {
    let id = connection_id(body)?;
    let status = control.status(&id.account, &id.node_id).await;
    Ok(Json(StatusResponse {
        status: status.status,
        capabilities: status.capabilities.map(Payload::into_json),
    })
    .into_response())
}

async fn handle_ping(
    State(control): State<ControlPlane>,
    body: Result<Json<ConnectionId>, JsonRejection>,
) -> Result<Response, ErrorResponse> {
    let id = connection_id(body)?;
    let result = control
        .ping(&id.account, &id.node_id)
        .await
        .map_err(|e| ErrorResponse::bad_request("Ping failed", e.to_string()))?;
    Ok(Json(PingResponse {
        status: result.status,
        payload: result.payload.map(Payload::into_json),
    })
    .into_response())
}

async fn handle_listing(State(control): State<ControlPlane>) -> Json<ConnectionListing> {
    let mut connections: Vec<_> = control
        .connections()
        .await
        .into_iter()
        .map(|(account, nodes)| TenantConnections {
            account,
            connections: nodes.into_iter().collect(),
        })
        .collect();
    connections.sort_by(|a, b| a.account.cmp(&b.account));
    Json(ConnectionListing { connections })
}

fn is_account_number(account: &str) -> bool {
    !account.is_empty() && account.bytes().all(|b| b.is_ascii_digit())
}

async fn handle_listing_by_account(
    State(control): State<ControlPlane>,
    Path(account): Path<String>,
) -> Result<Json<TenantListing>, StatusCode> {
    if !is_account_number(&account) {
        return Err(StatusCode::NOT_FOUND);
    }
    let connections = control
        .connections_for_tenant(&account)
        .await
        .into_iter()
        .collect();
    Ok(Json(TenantListing { connections }))
}

/// Create the management router.
///
/// Request bodies larger than `max_body_bytes` are rejected with 400.
#[must_use]
pub fn create_management_router(control: ControlPlane, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/connection", get(handle_listing))
        .route("/connection/{account}", get(handle_listing_by_account))
        .route("/connection/disconnect", post(handle_disconnect))
        .route("/connection/status", post(handle_status))
        .route("/connection/ping", post(handle_ping))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(control)
}
