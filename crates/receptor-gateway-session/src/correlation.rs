//! Correlation of asynchronous replies with dispatched jobs.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use receptor_gateway_core::{JobResponse, MessageId};
use tokio::sync::oneshot;

/// Waiters for replies, keyed by the identifier of the job they answer.
#[derive(Debug, Clone, Default)]
pub struct PendingResponses {
    waiters: Arc<DashMap<MessageId, oneshot::Sender<JobResponse>>>,
}

impl PendingResponses {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the reply to `message_id`.
    ///
    /// Register before the job is enqueued so a fast reply can't be missed.
    #[must_use]
    pub fn register(&self, message_id: MessageId) -> ResponseWaiter {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(message_id, tx);
        ResponseWaiter {
            message_id,
            rx,
            waiters: Arc::clone(&self.waiters),
        }
    }

    /// Hand a reply to its waiter.
    ///
    /// Returns `false` if nobody is waiting (late, duplicate or unsolicited).
    pub fn resolve(&self, response: JobResponse) -> bool {
        match self.waiters.remove(&response.in_response_to) {
            Some((_, tx)) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Drop every waiter; each observes a closed channel.
    pub fn clear(&self) {
        self.waiters.clear();
    }

    /// Number of outstanding waiters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

/// Why a waiter gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The waiter was dropped from the table (session closed).
    Closed,
    /// The deadline passed.
    TimedOut,
}

/// Handle for one outstanding reply.
///
/// Dropping it removes the entry, so timeouts and cancelled callers don't
/// leave waiters behind.
#[derive(Debug)]
pub struct ResponseWaiter {
    message_id: MessageId,
    rx: oneshot::Receiver<JobResponse>,
    waiters: Arc<DashMap<MessageId, oneshot::Sender<JobResponse>>>,
}

impl ResponseWaiter {
    /// Identifier this waiter is correlated with.
    #[must_use]
    pub const fn message_id(&self) -> MessageId {
        self.message_id
    }

    /// Wait for the reply.
    ///
    /// # Errors
    /// `WaitError::TimedOut` on expiry, `WaitError::Closed` if the table was
    /// cleared.
    pub async fn recv(&mut self, timeout: Duration) -> Result<JobResponse, WaitError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(WaitError::Closed),
            Err(_) => Err(WaitError::TimedOut),
        }
    }
}

impl Drop for ResponseWaiter {
    fn drop(&mut self) {
        self.waiters.remove(&self.message_id);
    }
}
