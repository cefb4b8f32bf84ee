//! Target session resolution and bootstrap.
//!
//! Resolution order is fixed: a session bound to the operator's terminal
//! wins over one that merely carries the configured name. Creation is
//! explicit and never retried.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tracing::{info, info_span, warn, Instrument};

use crate::mux::Multiplexer;
use crate::session::SessionHandle;
use crate::{AppError, Result};

/// Delays inserted while a new session comes up.
///
/// The program inside the session gives no readiness signal, so these are
/// best-effort waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleDelays {
    /// Wait after the session is created.
    pub after_create: Duration,
    /// Wait after the bootstrap command is submitted.
    pub after_bootstrap: Duration,
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self {
            after_create: Duration::from_secs(1),
            after_bootstrap: Duration::from_secs(3),
        }
    }
}

/// Finds or creates the session commands are dispatched to.
pub struct SessionLocator {
    mux: Arc<dyn Multiplexer>,
}

impl SessionLocator {
    /// Create a locator over `mux`.
    #[must_use]
    pub fn new(mux: Arc<dyn Multiplexer>) -> Self {
        Self { mux }
    }

    /// Resolve the target session.
    ///
    /// 1. A session with a pane bound to `target_tty`.
    /// 2. A session named `preferred_name`.
    ///
    /// # Errors
    ///
    /// - `AppError::SessionNotFound` if neither rule matched.
    /// - `AppError::SessionCommand` if enumeration failed.
    pub async fn resolve(
        &self,
        preferred_name: &str,
        target_tty: Option<&str>,
    ) -> Result<SessionHandle> {
        let sessions = self
            .mux
            .list_sessions()
            .instrument(info_span!("resolve_session", preferred_name, target_tty))
            .await?;

        if let Some(tty) = target_tty {
            if let Some(bound) = sessions.iter().find(|s| s.tty.as_deref() == Some(tty)) {
                info!(session = %bound.name, tty, "found session bound to target terminal");
                return Ok(SessionHandle {
                    name: bound.name.clone(),
                    tty: bound.tty.clone(),
                });
            }
        }

        if let Some(named) = sessions.iter().find(|s| s.name == preferred_name) {
            info!(session = %named.name, tty = ?named.tty, "using session by name");
            return Ok(SessionHandle {
                name: named.name.clone(),
                tty: named.tty.clone(),
            });
        }

        Err(AppError::SessionNotFound(match target_tty {
            Some(tty) => format!("no session bound to {tty} and none named '{preferred_name}'"),
            None => format!("no session named '{preferred_name}'"),
        }))
    }

    /// Start a detached session named `name` and launch `bootstrap` inside it.
    ///
    /// Sleeps `settle.after_create` before typing the bootstrap command and
    /// `settle.after_bootstrap` after submitting it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionCommand` if creation or the bootstrap send fails.
    pub async fn create_session(
        &self,
        name: &str,
        bootstrap: &str,
        settle: SettleDelays,
    ) -> Result<SessionHandle> {
        async move {
            self.mux.create_session(name).await?;
            info!(session = name, "created detached session");

            tokio::time::sleep(settle.after_create).await;

            if !bootstrap.trim().is_empty() {
                self.mux.send_text(name, bootstrap).await?;
                self.mux.send_submit(name).await?;
                info!(session = name, bootstrap, "bootstrap command submitted");
                tokio::time::sleep(settle.after_bootstrap).await;
            }

            // The tty is only informative here; a failed lookup is not fatal.
            let tty = match self.mux.list_sessions().await {
                Ok(sessions) => sessions
                    .into_iter()
                    .find(|s| s.name == name)
                    .and_then(|s| s.tty),
                Err(err) => {
                    warn!(session = name, %err, "could not read back terminal of new session");
                    None
                }
            };

            Ok(SessionHandle {
                name: name.to_owned(),
                tty,
            })
        }
        .instrument(info_span!("create_session", name))
        .await
    }

    /// Resolve, falling back to creating `fallback_name` when nothing matches.
    ///
    /// # Errors
    ///
    /// Propagates enumeration and creation failures.
    pub async fn resolve_or_create(
        &self,
        preferred_name: &str,
        target_tty: Option<&str>,
        fallback_name: &str,
        bootstrap: &str,
        settle: SettleDelays,
    ) -> Result<SessionHandle> {
        match self.resolve(preferred_name, target_tty).await {
            Err(AppError::SessionNotFound(reason)) => {
                info!(%reason, fallback_name, "no existing session; creating one");
                self.create_session(fallback_name, bootstrap, settle).await
            }
            other => other,
        }
    }
}

/// Name for a freshly created session: `<prefix>_<YYYYmmdd_HHMMSS>`.
#[must_use]
pub fn timestamped_name(prefix: &str) -> String {
    format!("{prefix}_{}", Local::now().format("%Y%m%d_%H%M%S"))
}
