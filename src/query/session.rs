//! Per-statement call state shared with cancel handles and deadline tasks.
//!
//! All compound updates go through one lock around [`CallState`]. The cancellation
//! flag is mirrored in an atomic so it can be checked without taking the lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::ExecError;
use crate::transport::SharedConnection;

use super::deadline;

/// Phase of the most recent call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Idle,
    Running,
    Completed,
    CancelRequested,
    TimedOut,
}

/// What a cancel request did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelDecision {
    /// No query associated, or already cancelled
    Ignored,
    /// Flag set; no call was running to interrupt
    Flagged,
    /// Running call interrupted; transport reset and kill are due
    Interrupted { query_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeadlineState {
    Unarmed,
    Armed,
    Fired,
}

#[derive(Debug)]
struct CallState {
    query_id: Option<String>,
    cancelled: bool,
    phase: CallPhase,
    /// Interrupt token of the running call
    owner: Option<CancellationToken>,
    deadline: DeadlineState,
}

/// Shared session state of one statement.
#[derive(Debug)]
pub struct SessionShared {
    state: Mutex<CallState>,
    cancelled: AtomicBool,
}

impl Default for SessionShared {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionShared {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CallState {
                query_id: None,
                cancelled: false,
                phase: CallPhase::Idle,
                owner: None,
                deadline: DeadlineState::Unarmed,
            }),
            cancelled: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CallState> {
        // State stays consistent across a panicking holder, so poisoning is ignored.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lock-free check of the cancellation flag.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> CallPhase {
        self.lock().phase
    }

    pub fn query_id(&self) -> Option<String> {
        self.lock().query_id.clone()
    }

    /// Associate a freshly issued query id.
    ///
    /// # Errors
    ///
    /// `InvalidState` if another query is still associated.
    pub fn associate(&self, query_id: &str) -> Result<(), ExecError> {
        let mut state = self.lock();
        if let Some(current) = &state.query_id {
            return Err(ExecError::InvalidState(format!(
                "query {} is still associated with this statement",
                current
            )));
        }
        debug!(query_id, "query associated");
        state.query_id = Some(query_id.to_string());
        Ok(())
    }

    /// Clear the associated query id, returning it.
    pub fn dissociate(&self) -> Option<String> {
        self.lock().query_id.take()
    }

    /// Clear the query id only if it is still `query_id`.
    pub(crate) fn dissociate_if(&self, query_id: &str) {
        let mut state = self.lock();
        if state.query_id.as_deref() == Some(query_id) {
            state.query_id = None;
        }
    }

    /// Clear the cancellation flag, returning whether it was set.
    pub fn take_cancelled(&self) -> bool {
        let mut state = self.lock();
        let was = state.cancelled;
        state.cancelled = false;
        self.cancelled.store(false, Ordering::Release);
        was
    }

    /// Start a call and hand out its interrupt token.
    pub(crate) fn begin_call(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut state = self.lock();
        state.owner = Some(token.clone());
        state.phase = CallPhase::Running;
        state.deadline = DeadlineState::Unarmed;
        token
    }

    /// End the running call.
    pub(crate) fn finish_call(&self) {
        let mut state = self.lock();
        state.owner = None;
        if state.phase == CallPhase::Running {
            state.phase = CallPhase::Completed;
        }
    }

    /// Record that a deadline task is armed for the running call.
    pub(crate) fn arm(&self) {
        self.lock().deadline = DeadlineState::Armed;
    }

    /// Called by the deadline task. Returns false if the call already disarmed it.
    pub(crate) fn fire(&self) -> bool {
        let mut state = self.lock();
        if state.deadline != DeadlineState::Armed {
            return false;
        }
        state.deadline = DeadlineState::Fired;
        state.phase = CallPhase::TimedOut;
        if let Some(owner) = &state.owner {
            owner.cancel();
        }
        true
    }

    /// Called by the caller on return. Returns true if the deadline fired first.
    pub(crate) fn disarm(&self) -> bool {
        let mut state = self.lock();
        let fired = state.deadline == DeadlineState::Fired;
        state.deadline = DeadlineState::Unarmed;
        fired
    }

    /// Apply a cancel request.
    pub fn request_cancel(&self) -> CancelDecision {
        let mut state = self.lock();
        let Some(query_id) = state.query_id.clone() else {
            return CancelDecision::Ignored;
        };
        if state.cancelled {
            return CancelDecision::Ignored;
        }

        state.cancelled = true;
        self.cancelled.store(true, Ordering::Release);

        match &state.owner {
            Some(owner) => {
                owner.cancel();
                state.phase = CallPhase::CancelRequested;
                CancelDecision::Interrupted { query_id }
            }
            None => CancelDecision::Flagged,
        }
    }
}

/// Cloneable handle for cancelling a statement from another task.
#[derive(Clone)]
pub struct CancelHandle {
    shared: Arc<SessionShared>,
    conn: SharedConnection,
}

impl CancelHandle {
    pub(crate) fn new(shared: Arc<SessionShared>, conn: SharedConnection) -> Self {
        Self { shared, conn }
    }

    /// Cancel the statement's current query.
    ///
    /// A no-op when no query is associated or a cancel is already pending. If a call
    /// is running it is interrupted, the transport is reset and a kill is sent for
    /// the query; failures of the kill are only logged.
    pub async fn cancel(&self) -> CancelDecision {
        let decision = self.shared.request_cancel();
        if let CancelDecision::Interrupted { query_id } = &decision {
            info!(query_id = %query_id, "cancel interrupted running call");
            if let Some(err) = deadline::reset_and_kill(&self.conn, query_id).await {
                tracing::warn!(error = %err, "error cancelling query");
            }
            self.shared.dissociate_if(query_id);
        }
        decision
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("shared", &self.shared)
            .field("conn", &"<ConnectionHandle>")
            .finish()
    }
}
