//! Pending-request table.
//!
//! Maps each in-flight request handle to a one-shot waiter. The table owns
//! the handle allocator so that minting and registration happen under one
//! lock: a handle is never visible on the wire before its waiter exists.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::error::ClientError;
use crate::handle::HandleAllocator;
use crate::xmlrpc::Value;

/// Outcome delivered to a waiter: the decoded result value, or the fault /
/// decode / disconnect error that stands in for it.
pub(crate) type CallOutcome = Result<Value, ClientError>;

pub(crate) struct PendingCalls {
    alloc: HandleAllocator,
    waiters: HashMap<u32, oneshot::Sender<CallOutcome>>,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self {
            alloc: HandleAllocator::new(),
            waiters: HashMap::new(),
        }
    }

    /// Mint a handle and register a waiter for its response.
    ///
    /// A wrap collision with an outstanding handle is refused; the caller
    /// treats it as fatal and closes the session rather than silently
    /// replacing a live waiter.
    pub(crate) fn register(
        &mut self,
    ) -> Result<(u32, oneshot::Receiver<CallOutcome>), ClientError> {
        let handle = self.alloc.allocate();
        if self.waiters.contains_key(&handle) {
            return Err(ClientError::HandleCollision(handle));
        }
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(handle, tx);
        Ok((handle, rx))
    }

    /// Mint a handle without registering a waiter (fire-and-forget path).
    /// Any response that later arrives under it is discarded by lookup.
    pub(crate) fn register_no_reply(&mut self) -> u32 {
        self.alloc.allocate()
    }

    /// Remove the waiter for `handle` and hand it the outcome.
    ///
    /// Returns `false` when no waiter is registered: a response for a
    /// fire-and-forget request, or for a call whose future was dropped.
    pub(crate) fn complete(&mut self, handle: u32, outcome: CallOutcome) -> bool {
        match self.waiters.remove(&handle) {
            Some(tx) => {
                // The receiver may be gone if the caller gave up; the
                // response is discarded either way.
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Remove every waiter. Used on any transition out of the connected
    /// state; the session fails each one so no caller hangs forever.
    pub(crate) fn drain(&mut self) -> Vec<oneshot::Sender<CallOutcome>> {
        self.waiters.drain().map(|(_, tx)| tx).collect()
    }

    #[cfg(test)]
    fn outstanding(&self) -> usize {
        self.waiters.len()
    }
}
