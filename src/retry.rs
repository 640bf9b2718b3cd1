//! Bounded re-attempts of a failed step.
//!
//! Every failure is persisted before the next attempt, so a reload in the
//! middle of a retry sequence keeps its count. The failure that spends the
//! budget moves the session to `Failed` and tells the operator once.

use std::time::Duration;

use tracing::{error, warn};

use crate::browser::Page;
use crate::config::TimingConfig;
use crate::error::{AutomationError, AutopilotError};
use crate::notify::{Notifier, Severity};
use crate::router::StepRouter;
use crate::state_machine::{AutomationSession, FlowOutcome, FlowReport, StateMachine, Transition};
use crate::store::SessionStore;

/// Delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn from_timing(timing: &TimingConfig) -> Self {
        Self {
            base_delay_ms: timing.retry_base_delay_ms,
            max_delay_ms: timing.retry_max_delay_ms,
        }
    }

    /// delay = base_delay_ms * 2^(attempt - 1), capped at `max_delay_ms`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { attempt: u32 },
    Exhausted { attempts: u32 },
}

impl<P: Page, S: SessionStore, N: Notifier> StepRouter<P, S, N> {
    /// Counts a failed attempt at the session's current step.
    pub(crate) async fn record_failure(
        &mut self,
        session: &mut AutomationSession,
        failure: &AutomationError,
    ) -> Result<RetryDecision, AutopilotError> {
        if session.step.is_terminal() {
            return Ok(RetryDecision::Exhausted {
                attempts: session.retry_count,
            });
        }

        let step = session.step;
        match StateMachine::fail(session, &failure.to_string()) {
            Transition::Retry { attempt, .. } => {
                let max = session.max_retries;
                warn!(%step, attempt, max, error = %failure, "step failed, retrying");
                self.store.save_session(session)?;
                self.notify(
                    Severity::Warning,
                    format!("Attempt {attempt} of {max} failed ({failure}), retrying"),
                )
                .await;
                Ok(RetryDecision::Retry { attempt })
            }
            Transition::Complete(FlowOutcome::Failed {
                step,
                attempts,
                reason,
            }) => {
                let exhausted = AutomationError::RetryBudgetExhausted {
                    step,
                    attempts,
                    last_error: reason.clone(),
                };
                error!(error = %exhausted, "retry budget exhausted");
                self.store.save_session(session)?;

                let report = FlowReport::from_session(
                    session,
                    FlowOutcome::Failed {
                        step,
                        attempts,
                        reason,
                    },
                );
                if let Err(e) = self.store.archive_report(&report) {
                    warn!(error = %e, "could not archive flow report");
                }

                let resume_at = self
                    .page
                    .current_url()
                    .await
                    .unwrap_or_else(|_| self.config.portal.applications_url.clone());
                self.notify(
                    Severity::Error,
                    format!(
                        "Name change automation stopped: {exhausted}. \
                         Finish the request manually at {resume_at}, \
                         or run `torrent-autopilot resume` to start over."
                    ),
                )
                .await;
                Ok(RetryDecision::Exhausted { attempts })
            }
            other => {
                warn!(?other, "unexpected transition while recording a failure");
                Ok(RetryDecision::Exhausted {
                    attempts: session.retry_count,
                })
            }
        }
    }

    pub(crate) async fn backoff(&self, attempt: u32) {
        let delay = RetryPolicy::from_timing(&self.config.timing).delay_for_attempt(attempt);
        tokio::time::sleep(delay).await;
    }
}
