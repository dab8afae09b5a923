//! Per-connection session state.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::RwLock;
use receptor_gateway_core::{
    ControlMessage, GatewayError, IdSource, Job, JobResponse, Message, MessageId, OsRandomIds,
    Payload, QueueConfig, Receptor, ResponseCode, RoutingFacts,
};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::{
    correlation::{PendingResponses, WaitError},
    dispatch::{JobDispatcher, OutboundQueue},
};

/// Directive answered by every receptor with a liveness reply.
pub const PING_DIRECTIVE: &str = "receptor:ping";

/// A fault observed by the transport for this session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{detail}")]
pub struct SessionFault {
    pub detail: String,
}

/// Receiving ends of a session's channels, owned by its transport loop.
#[derive(Debug)]
pub struct SessionChannels {
    /// Jobs toward the agent.
    pub messages: mpsc::Receiver<Message>,
    /// Protocol control traffic toward the agent.
    pub control: mpsc::Receiver<ControlMessage>,
    /// Faults reported against the session.
    pub faults: mpsc::Receiver<SessionFault>,
}

#[derive(Debug, Clone)]
struct Registration {
    peer_node_id: String,
    metadata: Payload,
}

/// Live connection to one receptor agent.
pub struct ReceptorSession {
    tenant: String,
    node_id: String,
    registration: watch::Sender<Option<Registration>>,
    routing: RwLock<RoutingFacts>,
    outbound: OutboundQueue,
    control_tx: mpsc::Sender<ControlMessage>,
    fault_tx: mpsc::Sender<SessionFault>,
    dispatcher: JobDispatcher,
    pending: PendingResponses,
    closed: CancellationToken,
    closing: AtomicBool,
    network_disconnected: AtomicBool,
}

impl std::fmt::Debug for ReceptorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceptorSession")
            .field("tenant", &self.tenant)
            .field("node_id", &self.node_id)
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ReceptorSession {
    /// Create a session with OS-random job identifiers.
    #[must_use]
    pub fn new(
        tenant: impl Into<String>,
        node_id: impl Into<String>,
        queues: &QueueConfig,
    ) -> (Arc<Self>, SessionChannels) {
        Self::with_id_source(tenant, node_id, queues, Arc::new(OsRandomIds))
    }

    /// Create a session drawing job identifiers from `ids`.
    #[must_use]
    pub fn with_id_source(
        tenant: impl Into<String>,
        node_id: impl Into<String>,
        queues: &QueueConfig,
        ids: Arc<dyn IdSource>,
    ) -> (Arc<Self>, SessionChannels) {
        let node_id = node_id.into();
        let (message_tx, messages) = mpsc::channel(queues.data_capacity.max(1));
        let (control_tx, control) = mpsc::channel(queues.control_capacity.max(1));
        let (fault_tx, faults) = mpsc::channel(queues.error_capacity.max(1));
        let (registration, _) = watch::channel(None);
        let closed = CancellationToken::new();

        let session = Arc::new(Self {
            tenant: tenant.into(),
            outbound: OutboundQueue::new(node_id.clone(), message_tx, closed.clone()),
            node_id,
            registration,
            routing: RwLock::new(RoutingFacts::default()),
            control_tx,
            fault_tx,
            dispatcher: JobDispatcher::new(ids),
            pending: PendingResponses::new(),
            closed,
            closing: AtomicBool::new(false),
            network_disconnected: AtomicBool::new(false),
        });

        let channels = SessionChannels {
            messages,
            control,
            faults,
        };

        (session, channels)
    }

    /// Token cancelled when the session closes or is dropped.
    ///
    /// Cancelling the returned token does not close the session.
    #[must_use]
    pub fn close_signal(&self) -> CancellationToken {
        self.closed.child_token()
    }

    /// Hand an inbound reply to the caller waiting on it.
    ///
    /// Returns `false` for replies nobody is waiting for.
    pub fn deliver_response(&self, response: JobResponse) -> bool {
        let message_id = response.in_response_to;
        let delivered = self.pending.resolve(response);
        if !delivered {
            tracing::debug!(
                tenant = %self.tenant,
                node_id = %self.node_id,
                %message_id,
                "dropping uncorrelated response"
            );
        }
        delivered
    }

    /// Report a transport-level fault.
    ///
    /// Returns `false` if the fault channel is full or gone.
    pub fn report_fault(&self, detail: impl Into<String>) -> bool {
        let fault = SessionFault {
            detail: detail.into(),
        };
        match self.fault_tx.try_send(fault) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(node_id = %self.node_id, error = %e, "unable to report fault");
                false
            }
        }
    }

    /// Whether `disconnect_receptor_network` was issued.
    #[must_use]
    pub fn is_network_disconnected(&self) -> bool {
        self.network_disconnected.load(Ordering::Acquire)
    }

    /// Number of jobs still awaiting a reply.
    #[must_use]
    pub fn pending_responses(&self) -> usize {
        self.pending.len()
    }

    fn closed_error(&self) -> GatewayError {
        GatewayError::session_closed(&self.node_id)
    }

    fn metadata(&self) -> Option<Payload> {
        self.registration
            .borrow()
            .as_ref()
            .map(|registration| registration.metadata.clone())
    }

    async fn wait_for_registration(&self) -> Result<Payload, GatewayError> {
        let mut rx = self.registration.subscribe();
        loop {
            if let Some(metadata) = self.metadata() {
                return Ok(metadata);
            }
            tokio::select! {
                biased;
                () = self.closed.cancelled() => return Err(self.closed_error()),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(self.closed_error());
                    }
                }
            }
        }
    }

    async fn request(&self, job: Job, timeout: Duration) -> Result<JobResponse, GatewayError> {
        let message = self.dispatcher.prepare(job)?;
        let mut waiter = self.pending.register(message.message_id);

        let exchange = async {
            self.outbound.enqueue(message, timeout).await?;
            waiter.recv(timeout).await.map_err(|e| match e {
                WaitError::Closed => self.closed_error(),
                WaitError::TimedOut => GatewayError::Timeout(timeout),
            })
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| GatewayError::Timeout(timeout))?
    }
}

impl Drop for ReceptorSession {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

fn fault_detail(payload: &Payload) -> String {
    match payload {
        Payload::Empty => "no detail provided".to_string(),
        Payload::Json(Value::String(detail)) => detail.clone(),
        Payload::Json(value) => value.to_string(),
        Payload::Bytes { schema, data } => format!("{} bytes of {schema}", data.len()),
    }
}

#[async_trait]
impl Receptor for ReceptorSession {
    fn tenant(&self) -> &str {
        &self.tenant
    }

    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn peer_node_id(&self) -> Option<String> {
        self.registration
            .borrow()
            .as_ref()
            .map(|registration| registration.peer_node_id.clone())
    }

    fn register_connection(
        &self,
        peer_node_id: &str,
        metadata: Payload,
    ) -> Result<(), GatewayError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        tracing::info!(
            tenant = %self.tenant,
            node_id = %self.node_id,
            %peer_node_id,
            "registering a connection"
        );

        self.registration.send_replace(Some(Registration {
            peer_node_id: peer_node_id.to_string(),
            metadata,
        }));
        Ok(())
    }

    fn update_routing_table(
        &self,
        edges: Vec<String>,
        seen: Vec<String>,
    ) -> Result<(), GatewayError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        tracing::debug!(node_id = %self.node_id, ?edges, ?seen, "routing table updated");
        *self.routing.write() = RoutingFacts { edges, seen };
        Ok(())
    }

    fn routing_facts(&self) -> RoutingFacts {
        self.routing.read().clone()
    }

    async fn send_message(&self, job: Job, timeout: Duration) -> Result<MessageId, GatewayError> {
        self.dispatcher.dispatch(&self.outbound, job, timeout).await
    }

    async fn ping(
        &self,
        recipient: &str,
        route_list: Vec<String>,
        timeout: Duration,
    ) -> Result<Payload, GatewayError> {
        let job = Job::new(recipient, PING_DIRECTIVE).with_route(route_list);
        let response = self.request(job, timeout).await?;

        match response.code {
            ResponseCode::Ok => Ok(response.payload),
            ResponseCode::Error => Err(GatewayError::UpstreamFault {
                detail: fault_detail(&response.payload),
                sender: response.sender,
            }),
        }
    }

    async fn get_capabilities(&self, timeout: Duration) -> Result<Payload, GatewayError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        tokio::time::timeout(timeout, self.wait_for_registration())
            .await
            .map_err(|_| GatewayError::Timeout(timeout))?
    }

    fn close(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }

        tracing::info!(tenant = %self.tenant, node_id = %self.node_id, "closing session");

        let terminate = ControlMessage::Terminate {
            reason: "session closed by gateway".to_string(),
        };
        if self.control_tx.try_send(terminate).is_err() {
            tracing::debug!(node_id = %self.node_id, "control channel unavailable for terminate");
        }

        self.closed.cancel();
        self.pending.clear();
    }

    fn disconnect_receptor_network(&self) {
        if self.is_closed() {
            return;
        }
        self.network_disconnected.store(true, Ordering::Release);

        let node_id = self.peer_node_id().unwrap_or_else(|| self.node_id.clone());
        tracing::info!(tenant = %self.tenant, %node_id, "disconnecting node from receptor network");

        if let Err(e) = self
            .control_tx
            .try_send(ControlMessage::RouteWithdrawal { node_id })
        {
            tracing::warn!(node_id = %self.node_id, error = %e, "unable to queue route withdrawal");
        }

        self.close();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
