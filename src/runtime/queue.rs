//! Ordered response slots for a single connection.
//!
//! The reader reserves a slot for every data event before the resolver
//! runs. Resolvers fill their slots in whatever order they finish, and the
//! writer only takes the slot at the head of the queue, so responses leave
//! in the order their data events arrived.

use tokio::sync::{mpsc, oneshot};

use crate::descriptor::ResponseDescriptor;
use crate::error::ResolverError;

pub(crate) type SlotOutcome = Result<ResponseDescriptor, ResolverError>;

/// Create a connection's response queue.
pub(crate) fn response_queue() -> (SlotReserver, PendingResponses) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SlotReserver { tx }, PendingResponses { rx, head: None })
}

/// Reader side: appends slots to the tail of the queue.
pub(crate) struct SlotReserver {
    tx: mpsc::UnboundedSender<oneshot::Receiver<SlotOutcome>>,
}

impl SlotReserver {
    /// Reserve the next slot. `None` once the writer has gone away.
    pub fn reserve(&self) -> Option<ResponseSlot> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(rx).ok()?;
        Some(ResponseSlot { tx })
    }
}

/// A reserved position in the queue, filled exactly once.
///
/// Dropping a slot unfilled resolves it as [`ResolverError::Abandoned`].
pub(crate) struct ResponseSlot {
    tx: oneshot::Sender<SlotOutcome>,
}

impl ResponseSlot {
    pub fn fill(self, outcome: SlotOutcome) {
        // Receiver is gone only when the writer stopped; nothing to deliver to
        let _ = self.tx.send(outcome);
    }
}

/// Writer side: yields outcomes in reservation order.
pub(crate) struct PendingResponses {
    rx: mpsc::UnboundedReceiver<oneshot::Receiver<SlotOutcome>>,
    head: Option<oneshot::Receiver<SlotOutcome>>,
}

impl PendingResponses {
    /// Wait for the head slot to be filled. Returns `None` once the
    /// reserver is dropped and every slot has been taken.
    ///
    /// Cancel safe: an unfinished call leaves the head slot in place.
    pub async fn next(&mut self) -> Option<SlotOutcome> {
        if self.head.is_none() {
            self.head = Some(self.rx.recv().await?);
        }
        let slot = self.head.as_mut()?;
        let outcome = slot.await.unwrap_or(Err(ResolverError::Abandoned));
        self.head = None;
        Some(outcome)
    }
}
