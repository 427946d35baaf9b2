//! Transport failover and server redirects.
//!
//! A request that fails at the transport level is retried exactly once over a
//! freshly reconnected stream, unless the statement was cancelled in the meantime.
//! Redirect instructions from the server are followed up to a configured limit,
//! and the first request sent after a redirect carries the force flag.

use std::future::Future;
use tracing::{info, warn};

use crate::error::ExecError;
use crate::transport::messages::{Redirect, RequestSpec};
use crate::transport::SharedConnection;

use super::session::SessionShared;

/// Run `attempt`, retrying once after a reconnect if it fails at the transport level.
///
/// When the statement's cancel flag is set at the time of the failure, the flag is
/// consumed and `Cancelled` is returned instead of retrying. The retry's outcome is
/// final: a second transport failure is returned unchanged.
///
/// # Errors
///
/// `ExecError::Cancelled` for a transport failure after a cancel, a transport error
/// if the reconnect fails, otherwise whatever the last attempt returned.
pub(crate) async fn with_retry<T, F, Fut>(
    shared: &SessionShared,
    conn: &SharedConnection,
    mut attempt: F,
) -> Result<T, ExecError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExecError>>,
{
    match attempt().await {
        Err(ExecError::Transport(e)) => {
            if shared.take_cancelled() {
                info!(error = %e, "transport failure after cancel");
                return Err(ExecError::Cancelled);
            }

            warn!(error = %e, "transport failure, reconnecting and retrying once");
            conn.lock().await.reconnect().await?;
            attempt().await
        }
        other => other,
    }
}

/// Force flag routing for one statement.
#[derive(Debug, Clone, Default)]
pub(crate) struct ForceRouting {
    /// Configured force flag sent with every eligible request
    force: bool,
    /// Set by a redirect; consumed by the next eligible request
    one_shot: bool,
}

impl ForceRouting {
    pub(crate) fn new(force: bool) -> Self {
        Self {
            force,
            one_shot: false,
        }
    }

    /// Force value to put on the next request, if any.
    ///
    /// Only request types that allow forcing and carry SQL text get a value.
    pub(crate) fn next(&mut self, spec: RequestSpec, has_sql: bool) -> Option<bool> {
        if !spec.force_allowed || !has_sql {
            return None;
        }
        if std::mem::take(&mut self.one_shot) {
            Some(true)
        } else {
            Some(self.force)
        }
    }

    pub(crate) fn arm_one_shot(&mut self) {
        self.one_shot = true;
    }

    pub(crate) fn is_one_shot_armed(&self) -> bool {
        self.one_shot
    }
}

/// Redirects followed while sending one request.
#[derive(Debug)]
pub(crate) struct RedirectBudget {
    followed: u32,
    max: u32,
}

impl RedirectBudget {
    pub(crate) fn new(max: u32) -> Self {
        Self { followed: 0, max }
    }

    /// Move the connection to the redirect target.
    ///
    /// # Errors
    ///
    /// `ExecError::Protocol` once more than `max` redirects were requested, or the
    /// transport error of the redirect itself.
    pub(crate) async fn follow(
        &mut self,
        conn: &SharedConnection,
        redirect: &Redirect,
    ) -> Result<(), ExecError> {
        if self.followed >= self.max {
            return Err(ExecError::Protocol(format!(
                "too many redirects (limit {})",
                self.max
            )));
        }
        self.followed += 1;

        info!(
            host = %redirect.host,
            port = redirect.port,
            redirects = self.followed,
            "following server redirect"
        );
        conn.lock()
            .await
            .redirect(&redirect.host, redirect.port)
            .await?;
        Ok(())
    }
}
