//! Fixed-interval status polling with a bounded attempt budget.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::models::remote::{RemoteStatus, StatusReport};
use crate::services::transport::{Transport, TransportError};

/// Timing for one polling loop. `interval * max_attempts` bounds its duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2500),
            max_attempts: 40,
        }
    }
}

/// How a polling loop ended.
#[derive(Debug)]
pub enum PollOutcome {
    /// The service reported a status from the terminal set.
    Terminal(StatusReport),
    /// The attempt budget ran out without a terminal status.
    TimedOut { attempts: u32 },
    /// A status check failed.
    Failed(TransportError),
}

/// Repeatedly checks a job's status until it reaches a terminal status.
pub struct Poller<'a> {
    transport: &'a dyn Transport,
    config: PollConfig,
}

impl<'a> Poller<'a> {
    pub fn new(transport: &'a dyn Transport, config: PollConfig) -> Self {
        Self { transport, config }
    }

    /// Poll `job_id` until a status in `terminal` is observed.
    ///
    /// Every observed status, terminal or not, is passed to `on_status` before
    /// the loop decides whether to continue. Returns `None` once `cancel` is
    /// triggered; no further checks are issued and `on_status` is not called
    /// again after that point.
    pub async fn poll<F>(
        &self,
        job_id: &str,
        terminal: &[RemoteStatus],
        cancel: &CancellationToken,
        mut on_status: F,
    ) -> Option<PollOutcome>
    where
        F: FnMut(&StatusReport) + Send,
    {
        let max_attempts = self.config.max_attempts;

        for attempt in 1..=max_attempts {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                result = self.transport.check_status(job_id) => result,
            };

            if cancel.is_cancelled() {
                return None;
            }

            match result {
                Ok(report) => {
                    tracing::debug!(
                        job_id,
                        attempt,
                        max_attempts,
                        status = %report.status,
                        "Status check"
                    );
                    on_status(&report);
                    if terminal.contains(&report.status) {
                        return Some(PollOutcome::Terminal(report));
                    }
                }
                Err(e) => {
                    tracing::warn!(job_id, attempt, error = %e, "Status check failed");
                    return Some(PollOutcome::Failed(e));
                }
            }

            if attempt < max_attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(self.config.interval) => {}
                }
            }
        }

        tracing::warn!(job_id, attempts = max_attempts, "Polling attempts exhausted");
        Some(PollOutcome::TimedOut {
            attempts: max_attempts,
        })
    }
}
