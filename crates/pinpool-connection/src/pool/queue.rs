//! Acquisition queue: callers waiting for a connection, oldest first

use std::collections::BTreeMap;

use tokio::sync::oneshot;

use super::record::Checkout;

/// What a waiter is handed when it leaves the queue successfully
pub(crate) enum Grant {
    /// A released connection, still marked in use on the waiter's behalf
    Connection(Checkout),
    /// Permission to open a new connection; counts toward the maximum
    Slot,
    /// The pool is closing; the acquisition fails
    Closing,
}

pub(crate) type WaiterId = u64;
pub(crate) type GrantReceiver = oneshot::Receiver<Grant>;

/// FIFO of pending acquisitions.
///
/// Keys increase monotonically, so the first entry of the map is always the
/// oldest waiter; removing one waiter on timeout leaves the others' order
/// untouched.
#[derive(Default)]
pub(crate) struct WaitQueue {
    next_id: WaiterId,
    waiters: BTreeMap<WaiterId, oneshot::Sender<Grant>>,
}

impl WaitQueue {
    pub(crate) fn enqueue(&mut self) -> (WaiterId, GrantReceiver) {
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(id, tx);
        (id, rx)
    }

    /// Remove a specific waiter. Returns false if it already left the queue.
    pub(crate) fn remove(&mut self, id: WaiterId) -> bool {
        self.waiters.remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Hand `grant` to the oldest waiter still listening.
    ///
    /// Waiters whose receiving side is gone are discarded on the way. Gives
    /// the grant back if nobody took it.
    pub(crate) fn grant(&mut self, grant: Grant) -> std::result::Result<WaiterId, Grant> {
        let mut grant = grant;
        while let Some((id, tx)) = self.waiters.pop_first() {
            match tx.send(grant) {
                Ok(()) => return Ok(id),
                Err(returned) => grant = returned,
            }
        }
        Err(grant)
    }

    /// Fail every waiter with `Grant::Closing`, oldest first
    pub(crate) fn reject_all(&mut self) -> usize {
        let mut rejected = 0;
        while let Some((_, tx)) = self.waiters.pop_first() {
            if tx.send(Grant::Closing).is_ok() {
                rejected += 1;
            }
        }
        rejected
    }
}
