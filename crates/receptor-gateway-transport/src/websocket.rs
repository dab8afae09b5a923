//! WebSocket transport for receptor agents.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, Stream, StreamExt, future};
use receptor_gateway_core::{ConnectionLocator, GatewayConfig, Receptor};
use receptor_gateway_session::ReceptorSession;

use crate::{
    bridge::{apply_agent_frame, forward_outbound},
    protocol::AgentFrame,
};

/// Path agents connect to.
pub const GATEWAY_PATH: &str = "/wss/receptor-controller/gateway";

/// How long the outbound loop gets to flush control frames after close.
const FLUSH_GRACE: Duration = Duration::from_secs(1);

/// WebSocket handler state.
#[derive(Clone)]
pub struct WsState {
    /// Locator every session is registered with.
    pub locator: Arc<dyn ConnectionLocator>,
    /// Gateway configuration.
    pub config: Arc<GatewayConfig>,
}

impl WsState {
    /// Create new WebSocket state.
    #[must_use]
    pub fn new(locator: Arc<dyn ConnectionLocator>, config: Arc<GatewayConfig>) -> Self {
        Self { locator, config }
    }
}

/// WebSocket upgrade handler.
///
/// The tenant is taken from the configured tenant header; connections
/// without one are refused before the upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<WsState>,
) -> Response {
    let Some(tenant) = tenant_from_headers(&headers, &state.config.server.tenant_header) else {
        tracing::warn!("refusing agent connection without a tenant");
        return (StatusCode::UNAUTHORIZED, "missing tenant").into_response();
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, tenant))
}

fn tenant_from_headers(headers: &HeaderMap, header: &str) -> Option<String> {
    headers
        .get(header)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|tenant| !tenant.is_empty())
        .map(str::to_owned)
}

async fn handle_socket(socket: WebSocket, state: WsState, tenant: String) {
    let (sender, mut receiver) = socket.split();

    let handshake = state.config.timeouts.handshake();
    let first = tokio::time::timeout(handshake, next_frame(&mut receiver)).await;
    let (node_id, metadata) = match first {
        Ok(Some(AgentFrame::Hello { node_id, metadata })) => (node_id, metadata),
        Ok(Some(_)) => {
            tracing::warn!(%tenant, "expected hello as first frame, closing");
            return;
        }
        Ok(None) => return,
        Err(_) => {
            tracing::warn!(%tenant, ?handshake, "handshake timed out");
            return;
        }
    };

    let (session, channels) = ReceptorSession::new(&tenant, &node_id, &state.config.queues);
    if let Err(e) = session.register_connection(&node_id, metadata) {
        tracing::error!(%tenant, %node_id, error = %e, "unable to register connection");
        return;
    }

    let receptor: Arc<dyn Receptor> = session.clone();
    if let Some(displaced) = state
        .locator
        .register(&tenant, &node_id, Arc::clone(&receptor))
        .await
    {
        displaced.close();
    }
    tracing::info!(%tenant, %node_id, "receptor connected");

    let sink = sender.with(|text: String| {
        future::ready(Ok::<_, axum::Error>(Message::Text(text.into())))
    });
    let mut send_task = tokio::spawn(forward_outbound(channels, session.close_signal(), sink));

    let closed = session.close_signal();
    loop {
        let frame = tokio::select! {
            () = closed.cancelled() => break,
            _ = &mut send_task => break,
            frame = next_frame(&mut receiver) => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        apply_agent_frame(&session, frame);
    }

    session.close();
    if !send_task.is_finished()
        && tokio::time::timeout(FLUSH_GRACE, &mut send_task)
            .await
            .is_err()
    {
        send_task.abort();
    }

    state.locator.remove_if(&tenant, &node_id, &receptor).await;
    tracing::info!(%tenant, %node_id, "receptor disconnected");
}

/// Next decodable frame, or `None` once the socket is done.
async fn next_frame<S>(receiver: &mut S) -> Option<AgentFrame>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                return None;
            }
        };

        match AgentFrame::decode(&text) {
            Ok(frame) => return Some(frame),
            Err(e) => tracing::warn!("Invalid agent frame: {e}"),
        }
    }
    None
}

/// Create the agent WebSocket router.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_ws_router(WsState::new(locator, config)));
/// ```
#[must_use]
pub fn create_ws_router(state: WsState) -> axum::Router {
    axum::Router::new()
        .route(GATEWAY_PATH, axum::routing::get(ws_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(tenant_from_headers(&headers, "x-receptor-tenant"), None);

        headers.insert("x-receptor-tenant", "  ".parse().unwrap());
        assert_eq!(tenant_from_headers(&headers, "x-receptor-tenant"), None);

        headers.insert("x-receptor-tenant", "acct1".parse().unwrap());
        assert_eq!(
            tenant_from_headers(&headers, "x-receptor-tenant").as_deref(),
            Some("acct1")
        );
        assert_eq!(tenant_from_headers(&headers, "x-other"), None);
    }

    #[tokio::test]
    async fn test_next_frame_skips_invalid_frames() {
        let frames: Vec<Result<Message, axum::Error>> = vec![
            Ok(Message::Text("garbage".into())),
            Ok(Message::Ping(Vec::new().into())),
            Ok(Message::Text(r#"{"type":"fault","message":"x"}"#.into())),
        ];
        let mut stream = futures::stream::iter(frames);

        let frame = next_frame(&mut stream).await.unwrap();
        assert_eq!(frame, AgentFrame::Fault { message: "x".into() });
        assert!(next_frame(&mut stream).await.is_none());
    }

    #[tokio::test]
    async fn test_next_frame_stops_at_close() {
        let frames: Vec<Result<Message, axum::Error>> = vec![
            Ok(Message::Close(None)),
            Ok(Message::Text(r#"{"type":"fault","message":"x"}"#.into())),
        ];
        let mut stream = futures::stream::iter(frames);
        assert!(next_frame(&mut stream).await.is_none());
    }
}
