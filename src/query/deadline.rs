//! Client-side deadlines for statement calls.
//!
//! A guarded call races its future against the call's interrupt token. When the
//! statement has an associated query and a non-zero timeout, a deadline task is
//! spawned for the call. On expiry the task interrupts the caller, rebuilds the
//! transport and sends a best-effort kill for the query. Exactly one of the
//! call's own result and the timeout error reaches the caller.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{ExecError, TransportError};
use crate::transport::codec;
use crate::transport::messages::{RequestEnvelope, RequestPayload};
use crate::transport::protocol::ConnectionHandle;
use crate::transport::SharedConnection;

use super::session::SessionShared;

/// Send one kill exchange over the current stream.
async fn send_kill(
    conn: &mut dyn ConnectionHandle,
    envelope: &RequestEnvelope,
) -> Result<(), ExecError> {
    let response = codec::round_trip(conn, envelope).await?;
    codec::classify(&response.confirmation).apply(&mut Vec::new())
}

/// Rebuild the transport and send a kill for `query_id`.
///
/// A kill that fails at the transport level is retried once over a fresh stream.
/// Returns the I/O failure of the reset or of the last kill attempt, if any.
/// Server-side errors of the kill are logged and dropped.
pub(crate) async fn reset_and_kill(
    conn: &SharedConnection,
    query_id: &str,
) -> Option<TransportError> {
    let mut guard = conn.lock().await;

    // Bytes of the interrupted exchange may still be in flight.
    if let Err(e) = guard.reconnect().await {
        warn!(error = %e, "reconnect before kill failed");
        return Some(e);
    }
    guard.set_result_set_open(false);

    info!(query_id, "sending kill");
    let envelope = RequestEnvelope::new(RequestPayload::KillQuery).with_sql(query_id);
    let result = match send_kill(&mut *guard, &envelope).await {
        Err(ExecError::Transport(e)) => {
            warn!(query_id, error = %e, "kill failed, reconnecting and retrying once");
            match guard.reconnect().await {
                Ok(()) => send_kill(&mut *guard, &envelope).await,
                Err(e) => Err(e.into()),
            }
        }
        other => other,
    };

    match result {
        Ok(()) => None,
        Err(ExecError::Transport(e)) => Some(e),
        Err(e) => {
            warn!(query_id, error = %e, "kill rejected");
            None
        }
    }
}

/// Deadline task armed for one call.
struct Deadline {
    handle: JoinHandle<Option<ExecError>>,
}

impl Deadline {
    fn arm(
        shared: Arc<SessionShared>,
        conn: SharedConnection,
        query_id: String,
        timeout_secs: u64,
    ) -> Self {
        shared.arm();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
            if !shared.fire() {
                return None;
            }

            warn!(query_id = %query_id, timeout_secs, "query timeout exceeded");
            let suppressed = reset_and_kill(&conn, &query_id).await;
            shared.dissociate_if(&query_id);
            Some(ExecError::Timeout {
                timeout_secs,
                suppressed,
            })
        });
        Self { handle }
    }

    /// Stop the deadline. If it already fired, wait for and return its outcome.
    async fn disarm(self, shared: &SessionShared) -> Option<ExecError> {
        if !shared.disarm() {
            self.handle.abort();
            return None;
        }
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => Some(ExecError::InvalidState(format!("deadline task failed: {}", e))),
        }
    }
}

/// Run `call` under the statement's cancellation and timeout coordination.
///
/// # Errors
///
/// `ExecError::Timeout` if the deadline fired, `ExecError::Cancelled` if the call was
/// interrupted by a cancel, otherwise whatever `call` returned.
pub(crate) async fn run_guarded<T, F>(
    shared: &Arc<SessionShared>,
    conn: &SharedConnection,
    timeout_secs: u64,
    call: F,
) -> Result<T, ExecError>
where
    F: Future<Output = Result<T, ExecError>>,
{
    let token = shared.begin_call();

    let deadline = match shared.query_id() {
        Some(query_id) if timeout_secs > 0 => Some(Deadline::arm(
            Arc::clone(shared),
            Arc::clone(conn),
            query_id,
            timeout_secs,
        )),
        _ => None,
    };

    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        result = call => Some(result),
    };

    let fired = match deadline {
        Some(deadline) => deadline.disarm(shared).await,
        None => None,
    };
    shared.finish_call();

    if let Some(timeout) = fired {
        return Err(timeout);
    }
    outcome.unwrap_or(Err(ExecError::Cancelled))
}
