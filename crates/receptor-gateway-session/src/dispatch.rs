//! Job dispatch onto a session's outbound data channel.

use std::{sync::Arc, time::Duration};

use receptor_gateway_core::{GatewayError, IdSource, Job, Message, MessageId, OsRandomIds};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Bounded outbound data channel of one session.
///
/// Sends block while the channel is full. They give up when the session
/// closes or the caller's deadline passes, whichever comes first.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    node_id: String,
    tx: mpsc::Sender<Message>,
    closed: CancellationToken,
}

impl OutboundQueue {
    /// Wrap a channel sender together with the session's close signal.
    #[must_use]
    pub fn new(
        node_id: impl Into<String>,
        tx: mpsc::Sender<Message>,
        closed: CancellationToken,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            tx,
            closed,
        }
    }

    /// Whether the session has closed or its transport has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    /// Enqueue a message, waiting at most `timeout` for capacity.
    ///
    /// # Errors
    /// `SessionClosed` if the session closes first, `Timeout` on expiry.
    pub async fn enqueue(&self, message: Message, timeout: Duration) -> Result<(), GatewayError> {
        if self.is_closed() {
            return Err(GatewayError::session_closed(&self.node_id));
        }

        let send = async {
            tokio::select! {
                biased;
                () = self.closed.cancelled() => Err(GatewayError::session_closed(&self.node_id)),
                sent = self.tx.send(message) => {
                    sent.map_err(|_| GatewayError::session_closed(&self.node_id))
                }
            }
        };

        tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| GatewayError::Timeout(timeout))?
    }
}

/// Turns dispatch requests into identified messages.
#[derive(Clone)]
pub struct JobDispatcher {
    ids: Arc<dyn IdSource>,
}

impl Default for JobDispatcher {
    fn default() -> Self {
        Self::new(Arc::new(OsRandomIds))
    }
}

impl JobDispatcher {
    /// Create a dispatcher drawing identifiers from `ids`.
    #[must_use]
    pub fn new(ids: Arc<dyn IdSource>) -> Self {
        Self { ids }
    }

    /// Validate a job and assign it a fresh identifier.
    ///
    /// # Errors
    /// `InvalidJob` on an empty recipient or directive,
    /// `IdentifierGeneration` if no identifier could be produced.
    pub fn prepare(&self, job: Job) -> Result<Message, GatewayError> {
        if job.recipient.is_empty() {
            return Err(GatewayError::InvalidJob("recipient must not be empty"));
        }
        if job.directive.is_empty() {
            return Err(GatewayError::InvalidJob("directive must not be empty"));
        }

        let message_id = self.ids.next_id().inspect_err(|e| {
            tracing::error!(
                recipient = %job.recipient,
                error = %e,
                "Unable to generate an identifier for the job, cannot proceed"
            );
        })?;

        Ok(Message::from_job(message_id, job))
    }

    /// Prepare a job and enqueue it.
    ///
    /// The identifier is returned only after the enqueue succeeded.
    ///
    /// # Errors
    /// Any error from `prepare` or `OutboundQueue::enqueue`.
    pub async fn dispatch(
        &self,
        queue: &OutboundQueue,
        job: Job,
        timeout: Duration,
    ) -> Result<MessageId, GatewayError> {
        let message = self.prepare(job)?;
        let message_id = message.message_id;
        let directive = message.directive.clone();

        queue.enqueue(message, timeout).await?;

        tracing::debug!(%message_id, %directive, node_id = %queue.node_id, "job enqueued");
        Ok(message_id)
    }
}
