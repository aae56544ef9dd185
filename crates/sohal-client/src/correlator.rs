//! Pending-call table and correlation-id allocation.
//!
//! The correlator is the sole owner of in-flight call state: callers get a
//! one-shot receiver back from [`Correlator::register`] and the receive
//! loop completes the matching slot when the response frame arrives. Every
//! pending call is completed exactly once; frames for unknown or
//! already-completed ids are discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::ClientError;

/// Outcome delivered to the caller that issued the call.
pub type CallOutcome = Result<Value, ClientError>;

type CallSlot = oneshot::Sender<CallOutcome>;

/// Tracks in-flight calls and matches inbound responses back to callers.
#[derive(Default)]
pub struct Correlator {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, CallSlot>>,
}

impl Correlator {
    /// Create an empty correlator. Ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh id and register a completion slot for it.
    ///
    /// Ids are strictly increasing for the lifetime of a connection, so an
    /// id is never reused while a call under it is outstanding.
    pub fn register(&self) -> (u64, oneshot::Receiver<CallOutcome>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        let previous = self.pending.lock().insert(id, tx);
        debug_assert!(previous.is_none(), "correlation id reused: {id}");
        (id, rx)
    }

    /// Complete the call registered under `id` with a result payload.
    pub fn resolve(&self, id: u64, result: Value) {
        self.complete(id, Ok(result));
    }

    /// Fail the call registered under `id`.
    pub fn fail(&self, id: u64, err: ClientError) {
        self.complete(id, Err(err));
    }

    fn complete(&self, id: u64, outcome: CallOutcome) {
        let Some(slot) = self.pending.lock().remove(&id) else {
            debug!(id, "discarding frame for unknown or completed call");
            return;
        };
        if slot.send(outcome).is_err() {
            // Caller timed out or dropped the call between lookup and send.
            debug!(id, "caller gone, discarding completion");
        }
    }

    /// Withdraw the call registered under `id`, signalling
    /// [`ClientError::Cancelled`] if anyone still listens.
    ///
    /// Returns `false` if the call was already completed. A late response
    /// for a cancelled id is discarded by [`Correlator::complete`]. The
    /// request already on the wire is not retracted.
    pub fn cancel(&self, id: u64) -> bool {
        let Some(slot) = self.pending.lock().remove(&id) else {
            return false;
        };
        let _ = slot.send(Err(ClientError::Cancelled));
        true
    }

    /// Fail every outstanding call. Used on close and on connection loss.
    ///
    /// The factory is invoked once per pending call since errors are not
    /// cloneable across completion slots.
    pub fn fail_all(&self, err: impl Fn() -> ClientError) {
        let drained: Vec<CallSlot> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, slot)| slot).collect()
        };
        for slot in drained {
            let _ = slot.send(Err(err()));
        }
    }

    /// Number of calls currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }

    /// Restart id allocation for a fresh connection.
    ///
    /// Ids from the previous connection are meaningless afterwards; all
    /// pendings from it must already have been failed.
    pub fn reset(&self) {
        debug_assert!(self.pending.lock().is_empty(), "reset with calls in flight");
        self.next_id.store(0, Ordering::Relaxed);
    }
}
