use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle};

use super::{AttemptStore, JwtService, SessionRegistry};

/// What one sweep removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub rate_limit_entries: usize,
    pub revoked_tokens: usize,
    pub session_tombstones: usize,
}

/// Periodic cleanup of expired limiter windows, token revocations and session
/// tombstones.
#[derive(Clone)]
pub struct Sweeper {
    attempts: Arc<dyn AttemptStore>,
    jwt: JwtService,
    sessions: Arc<dyn SessionRegistry>,
}

impl Sweeper {
    pub fn new(
        attempts: Arc<dyn AttemptStore>,
        jwt: JwtService,
        sessions: Arc<dyn SessionRegistry>,
    ) -> Self {
        Self {
            attempts,
            jwt,
            sessions,
        }
    }

    pub async fn sweep(&self) -> SweepReport {
        let rate_limit_entries = match self.attempts.purge_expired().await {
            Ok(purged) => purged,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to purge rate limit entries");
                0
            }
        };

        let report = SweepReport {
            rate_limit_entries,
            revoked_tokens: self.jwt.purge_revoked(),
            session_tombstones: self.sessions.purge_expired_tombstones().await,
        };

        if report != SweepReport::default() {
            tracing::debug!(
                rate_limit_entries = report.rate_limit_entries,
                revoked_tokens = report.revoked_tokens,
                session_tombstones = report.session_tombstones,
                "Sweep complete"
            );
        }
        report
    }

    /// Sweep every `interval` until `shutdown` flips to true.
    pub fn spawn(self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::debug!("Sweeper stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}
