//! Core traits for sessions and session lookup.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;

use crate::{GatewayError, Job, MessageId, Payload, RoutingFacts};

/// A live connection to a single receptor agent.
///
/// Implementations own the outbound channels that the transport drains; all
/// methods are safe to call from any task.
#[async_trait]
pub trait Receptor: Send + Sync {
    /// Tenant (account) the node belongs to.
    fn tenant(&self) -> &str;

    /// Node identity the session was created for.
    fn node_id(&self) -> &str;

    /// Identity announced by the peer during the handshake, if any yet.
    fn peer_node_id(&self) -> Option<String>;

    /// Record the peer identity and replace the registration metadata.
    ///
    /// # Errors
    /// Returns `SessionClosed` if the session has already been torn down.
    fn register_connection(
        &self,
        peer_node_id: &str,
        metadata: Payload,
    ) -> Result<(), GatewayError>;

    /// Replace the topology snapshot.
    ///
    /// # Errors
    /// Returns `SessionClosed` if the session has already been torn down.
    fn update_routing_table(
        &self,
        edges: Vec<String>,
        seen: Vec<String>,
    ) -> Result<(), GatewayError>;

    /// Latest topology snapshot.
    fn routing_facts(&self) -> RoutingFacts;

    /// Dispatch a job on this session's outbound data channel.
    ///
    /// The returned identifier is only produced once the job has been
    /// enqueued.
    ///
    /// # Errors
    /// `InvalidJob`, `IdentifierGeneration`, `SessionClosed` or `Timeout`.
    async fn send_message(&self, job: Job, timeout: Duration) -> Result<MessageId, GatewayError>;

    /// Send a ping job and wait for the correlated reply.
    ///
    /// # Errors
    /// Any dispatch error, `Timeout` while waiting, or `UpstreamFault` if
    /// the agent answers with a failure.
    async fn ping(
        &self,
        recipient: &str,
        route_list: Vec<String>,
        timeout: Duration,
    ) -> Result<Payload, GatewayError>;

    /// Capabilities declared by the agent.
    ///
    /// # Errors
    /// `Timeout` if nothing was registered before the deadline,
    /// `SessionClosed` if the session goes away first.
    async fn get_capabilities(&self, timeout: Duration) -> Result<Payload, GatewayError>;

    /// Ask the transport to terminate. Idempotent.
    fn close(&self);

    /// Withdraw the peer from mesh routing, then close.
    fn disconnect_receptor_network(&self);

    /// Whether `close` has been called.
    fn is_closed(&self) -> bool;
}

/// Index of live sessions by tenant and node identity.
///
/// The locator only indexes sessions; creating and closing them is the
/// transport's job.
#[async_trait]
pub trait ConnectionLocator: Send + Sync {
    /// Insert or overwrite the entry, returning the displaced session.
    async fn register(
        &self,
        tenant: &str,
        node_id: &str,
        session: Arc<dyn Receptor>,
    ) -> Option<Arc<dyn Receptor>>;

    /// Remove the entry if present.
    async fn remove(&self, tenant: &str, node_id: &str);

    /// Remove the entry only if it still points at `session`.
    ///
    /// Returns whether an entry was removed.
    async fn remove_if(&self, tenant: &str, node_id: &str, session: &Arc<dyn Receptor>) -> bool;

    /// Look up a session.
    async fn get(&self, tenant: &str, node_id: &str) -> Option<Arc<dyn Receptor>>;

    /// Snapshot of every tenant and its connected node identities.
    async fn get_all(&self) -> HashMap<String, BTreeSet<String>>;

    /// Snapshot of one tenant's connected node identities.
    async fn get_by_tenant(&self, tenant: &str) -> BTreeSet<String>;
}
