//! Control-plane operations: status, ping, disconnect and listing.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use receptor_gateway_core::{
    ConnectionLocator, GatewayError, Job, MessageId, Payload, TimeoutConfig,
};
use serde::Serialize;

/// Whether a node currently has a session on this gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Result of a status query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub status: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Payload>,
}

/// Result of a ping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PingResult {
    pub status: ConnectionState,
    pub payload: Option<Payload>,
}

impl ConnectionStatus {
    const fn disconnected() -> Self {
        Self {
            status: ConnectionState::Disconnected,
            capabilities: None,
        }
    }
}

impl PingResult {
    const fn disconnected() -> Self {
        Self {
            status: ConnectionState::Disconnected,
            payload: None,
        }
    }
}

/// Control operations over a connection locator.
///
/// Cancelling any of these calls never closes or mutates a session; only
/// `disconnect` does.
#[derive(Clone)]
pub struct ControlPlane {
    locator: Arc<dyn ConnectionLocator>,
    timeouts: TimeoutConfig,
}

impl ControlPlane {
    /// Create a control plane over `locator`.
    #[must_use]
    pub fn new(locator: Arc<dyn ConnectionLocator>, timeouts: TimeoutConfig) -> Self {
        Self { locator, timeouts }
    }

    /// The locator this control plane reads from.
    #[must_use]
    pub fn locator(&self) -> &Arc<dyn ConnectionLocator> {
        &self.locator
    }

    /// Report whether the node is connected, with its capabilities.
    ///
    /// A session that is closing counts as disconnected even while it is
    /// still registered. Any other capability failure is logged and leaves
    /// `capabilities` empty.
    pub async fn status(&self, tenant: &str, node_id: &str) -> ConnectionStatus {
        tracing::info!(%tenant, %node_id, "checking connection status");

        let session = match self.locator.get(tenant, node_id).await {
            Some(session) if !session.is_closed() => session,
            _ => {
                tracing::info!(%tenant, %node_id, status = "disconnected", "connection status");
                return ConnectionStatus::disconnected();
            }
        };

        let capabilities = match session.get_capabilities(self.timeouts.capabilities()).await {
            Ok(capabilities) => Some(capabilities),
            Err(e) if e.is_disconnected() => {
                tracing::info!(%tenant, %node_id, status = "disconnected", "connection status");
                return ConnectionStatus::disconnected();
            }
            Err(e) => {
                tracing::error!(
                    %tenant,
                    %node_id,
                    error = %e,
                    "unable to retrieve the capabilities of node"
                );
                None
            }
        };

        tracing::info!(%tenant, %node_id, status = "connected", "connection status");
        ConnectionStatus {
            status: ConnectionState::Connected,
            capabilities,
        }
    }

    /// Ping the node through its session and wait for the reply.
    ///
    /// # Errors
    /// `Timeout`, `UpstreamFault`, `IdentifierGeneration` or `InvalidJob`.
    /// A missing or closing session is reported as `Disconnected`.
    pub async fn ping(&self, tenant: &str, node_id: &str) -> Result<PingResult, GatewayError> {
        tracing::info!(%tenant, %node_id, "submitting ping");

        let Some(session) = self.locator.get(tenant, node_id).await else {
            return Ok(PingResult::disconnected());
        };

        match session
            .ping(node_id, vec![node_id.to_string()], self.timeouts.ping())
            .await
        {
            Ok(payload) => Ok(PingResult {
                status: ConnectionState::Connected,
                payload: Some(payload),
            }),
            Err(e) if e.is_disconnected() => {
                tracing::info!(%tenant, %node_id, "session closed during ping");
                Ok(PingResult::disconnected())
            }
            Err(e) => {
                tracing::warn!(%tenant, %node_id, error = %e, "ping failed");
                Err(e)
            }
        }
    }

    /// Close the node's session.
    ///
    /// The locator entry is left for the transport to remove once it has
    /// shut down.
    ///
    /// # Errors
    /// `NotFound` if no session is registered.
    pub async fn disconnect(&self, tenant: &str, node_id: &str) -> Result<(), GatewayError> {
        let session = self.locator.get(tenant, node_id).await.ok_or_else(|| {
            tracing::info!(%tenant, %node_id, "no connection found for node");
            GatewayError::not_found(tenant, node_id)
        })?;

        tracing::info!(%tenant, %node_id, "attempting to disconnect");
        session.close();
        Ok(())
    }

    /// Hand a job to the node's session, bounded by the dispatch timeout.
    ///
    /// # Errors
    /// `NotFound` if no session is registered; otherwise whatever the
    /// session's dispatch returns.
    pub async fn send_job(
        &self,
        tenant: &str,
        node_id: &str,
        job: Job,
    ) -> Result<MessageId, GatewayError> {
        let session = self
            .locator
            .get(tenant, node_id)
            .await
            .ok_or_else(|| GatewayError::not_found(tenant, node_id))?;

        let directive = job.directive.clone();
        let message_id = session.send_message(job, self.timeouts.dispatch()).await?;
        tracing::info!(%tenant, %node_id, %message_id, %directive, "job dispatched");
        Ok(message_id)
    }

    /// Every tenant with its connected node identities.
    pub async fn connections(&self) -> HashMap<String, BTreeSet<String>> {
        tracing::debug!("getting connection list");
        self.locator.get_all().await
    }

    /// Connected node identities for one tenant.
    pub async fn connections_for_tenant(&self, tenant: &str) -> BTreeSet<String> {
        tracing::debug!(%tenant, "getting connections for tenant");
        self.locator.get_by_tenant(tenant).await
    }

    /// Close every registered session, for process shutdown.
    ///
    /// Returns the number of sessions closed.
    pub async fn shutdown(&self) -> usize {
        let mut closed = 0;
        for (tenant, nodes) in self.locator.get_all().await {
            for node_id in nodes {
                if let Some(session) = self.locator.get(&tenant, &node_id).await {
                    session.close();
                    closed += 1;
                }
            }
        }
        tracing::info!(sessions = closed, "closed all sessions");
        closed
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use receptor_gateway_core::{JobResponse, QueueConfig, Receptor, ResponseCode};

    use super::*;
    use crate::{
        registry::LocalConnectionLocator,
        session::{ReceptorSession, SessionChannels},
    };

    fn timeouts() -> TimeoutConfig {
        TimeoutConfig {
            dispatch_ms: 200,
            ping_ms: 200,
            capabilities_ms: 50,
            handshake_ms: 200,
        }
    }

    async fn connected(
        locator: &LocalConnectionLocator,
        tenant: &str,
        node_id: &str,
    ) -> (Arc<ReceptorSession>, SessionChannels) {
        let (session, channels) = ReceptorSession::new(tenant, node_id, &QueueConfig::default());
        locator.register(tenant, node_id, session.clone()).await;
        (session, channels)
    }

    fn control(locator: &Arc<LocalConnectionLocator>) -> ControlPlane {
        let locator: Arc<dyn ConnectionLocator> = locator.clone();
        ControlPlane::new(locator, timeouts())
    }

    #[tokio::test]
    async fn test_status_of_unknown_node() {
        let locator = Arc::new(LocalConnectionLocator::new());
        let status = control(&locator).status("acct1", "nodeX").await;

        assert_eq!(status.status, ConnectionState::Disconnected);
        assert!(status.capabilities.is_none());
    }

    #[tokio::test]
    async fn test_status_reports_registered_metadata() {
        let locator = Arc::new(LocalConnectionLocator::new());
        let (session, _channels) = connected(&locator, "acct1", "nodeX").await;
        let meta = Payload::json(serde_json::json!({"plugins": ["ping"]}));
        session.register_connection("nodeX", meta.clone()).unwrap();

        let status = control(&locator).status("acct1", "nodeX").await;

        assert_eq!(status.status, ConnectionState::Connected);
        assert_eq!(status.capabilities, Some(meta));
    }

    #[tokio::test]
    async fn test_status_degrades_when_capabilities_unavailable() {
        let locator = Arc::new(LocalConnectionLocator::new());
        let (_session, _channels) = connected(&locator, "acct1", "nodeX").await;

        let status = control(&locator).status("acct1", "nodeX").await;

        assert_eq!(status.status, ConnectionState::Connected);
        assert!(status.capabilities.is_none());
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json, serde_json::json!({"status": "connected"}));
    }

    #[tokio::test]
    async fn test_ping_unknown_node_is_disconnected() {
        let locator = Arc::new(LocalConnectionLocator::new());
        let result = control(&locator).ping("acct1", "nodeX").await.unwrap();

        assert_eq!(result.status, ConnectionState::Disconnected);
        assert!(result.payload.is_none());
    }

    #[tokio::test]
    async fn test_ping_connected_node() {
        let locator = Arc::new(LocalConnectionLocator::new());
        let (session, mut channels) = connected(&locator, "acct1", "nodeX").await;

        let agent = tokio::spawn(async move {
            let message = channels.messages.recv().await.unwrap();
            assert_eq!(message.recipient, "nodeX");
            assert_eq!(message.route_list, vec!["nodeX".to_string()]);
            session.deliver_response(JobResponse {
                in_response_to: message.message_id,
                sender: "nodeX".into(),
                code: ResponseCode::Ok,
                payload: Payload::json(serde_json::json!({"status": "ok"})),
            });
        });

        let result = control(&locator).ping("acct1", "nodeX").await.unwrap();
        agent.await.unwrap();

        assert_eq!(result.status, ConnectionState::Connected);
        assert_eq!(
            result.payload,
            Some(Payload::json(serde_json::json!({"status": "ok"})))
        );
    }

    #[tokio::test]
    async fn test_ping_without_reply_is_a_failure() {
        let locator = Arc::new(LocalConnectionLocator::new());
        let (session, _channels) = connected(&locator, "acct1", "nodeX").await;

        let err = control(&locator).ping("acct1", "nodeX").await.unwrap_err();

        assert!(matches!(err, GatewayError::Timeout(_)));
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_ping_closed_session_is_disconnected() {
        let locator = Arc::new(LocalConnectionLocator::new());
        let (session, _channels) = connected(&locator, "acct1", "nodeX").await;
        session.close();

        let result = control(&locator).ping("acct1", "nodeX").await.unwrap();
        assert_eq!(result.status, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_closes_but_keeps_entry() {
        let locator = Arc::new(LocalConnectionLocator::new());
        let (session, _channels) = connected(&locator, "acct1", "nodeX").await;

        control(&locator).disconnect("acct1", "nodeX").await.unwrap();

        assert!(session.is_closed());
        assert!(locator.get("acct1", "nodeX").await.is_some());
    }

    #[tokio::test]
    async fn test_status_after_disconnect_is_disconnected() {
        let locator = Arc::new(LocalConnectionLocator::new());
        let (session, _channels) = connected(&locator, "acct1", "nodeX").await;
        session
            .register_connection("nodeX", Payload::json(serde_json::json!({"v": 1})))
            .unwrap();
        let plane = control(&locator);

        plane.disconnect("acct1", "nodeX").await.unwrap();
        assert!(locator.get("acct1", "nodeX").await.is_some());

        let status = plane.status("acct1", "nodeX").await;
        assert_eq!(status.status, ConnectionState::Disconnected);
        assert!(status.capabilities.is_none());

        let ping = plane.ping("acct1", "nodeX").await.unwrap();
        assert_eq!(ping.status, status.status);
    }

    #[tokio::test]
    async fn test_send_job_reaches_session() {
        let locator = Arc::new(LocalConnectionLocator::new());
        let (_session, mut channels) = connected(&locator, "acct1", "nodeX").await;

        let id = control(&locator)
            .send_job("acct1", "nodeX", Job::new("nodeX", "run"))
            .await
            .unwrap();

        let message = channels.messages.recv().await.unwrap();
        assert_eq!(message.message_id, id);
        assert_eq!(message.directive, "run");
    }

    #[tokio::test]
    async fn test_send_job_respects_dispatch_timeout() {
        let locator = Arc::new(LocalConnectionLocator::new());
        let queues = QueueConfig {
            data_capacity: 1,
            ..QueueConfig::default()
        };
        let (session, _channels) = ReceptorSession::new("acct1", "nodeX", &queues);
        locator.register("acct1", "nodeX", session).await;
        let plane = control(&locator);

        plane
            .send_job("acct1", "nodeX", Job::new("nodeX", "run"))
            .await
            .unwrap();
        let err = plane
            .send_job("acct1", "nodeX", Job::new("nodeX", "run"))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_send_job_unknown_node() {
        let locator = Arc::new(LocalConnectionLocator::new());
        let err = control(&locator)
            .send_job("acct1", "nodeX", Job::new("nodeX", "run"))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_disconnect_unknown_node() {
        let locator = Arc::new(LocalConnectionLocator::new());
        let err = control(&locator)
            .disconnect("acct1", "nodeX")
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_ping_leaves_session_open() {
        let locator = Arc::new(LocalConnectionLocator::new());
        let (session, _channels) = connected(&locator, "acct1", "nodeX").await;
        let plane = control(&locator);

        let cancelled =
            tokio::time::timeout(Duration::from_millis(10), plane.ping("acct1", "nodeX")).await;

        assert!(cancelled.is_err());
        assert!(!session.is_closed());
        assert_eq!(session.pending_responses(), 0);
    }

    #[tokio::test]
    async fn test_listing() {
        let locator = Arc::new(LocalConnectionLocator::new());
        let (_a, _ca) = connected(&locator, "acct1", "nodeA").await;
        let (_b, _cb) = connected(&locator, "acct1", "nodeB").await;
        let (_c, _cc) = connected(&locator, "acct2", "nodeC").await;
        let plane = control(&locator);

        let all = plane.connections().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all["acct1"].len(), 2);
        assert_eq!(plane.connections_for_tenant("acct2").await.len(), 1);
        assert!(plane.connections_for_tenant("acct3").await.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_closes_every_session() {
        let locator = Arc::new(LocalConnectionLocator::new());
        let (a, _ca) = connected(&locator, "acct1", "nodeA").await;
        let (b, _cb) = connected(&locator, "acct2", "nodeB").await;

        assert_eq!(control(&locator).shutdown().await, 2);
        assert!(a.is_closed());
        assert!(b.is_closed());
    }
}
