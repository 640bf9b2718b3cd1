//! Bounded polling for page readiness.
//!
//! A [`WaitCondition`] is checked at a fixed interval for at most
//! `max_polls` ticks. Every tick first checks that the document the wait
//! started on is still loaded; a navigation cancels the wait.

use std::fmt;
use std::time::Duration;

use tracing::trace;

use crate::browser::Page;
use crate::error::AutomationError;

/// A single predicate over page state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    ElementPresent(String),
    ElementAbsent(String),
    UrlContains(String),
    UrlLacks(String),
    /// More matches of `selector` than the `baseline` counted earlier.
    Appeared { selector: String, baseline: usize },
}

impl Predicate {
    async fn holds<P: Page>(&self, page: &mut P) -> bool {
        // Query errors count as "not yet".
        match self {
            Predicate::ElementPresent(sel) => page.exists(sel).await.unwrap_or(false),
            Predicate::ElementAbsent(sel) => matches!(page.exists(sel).await, Ok(false)),
            Predicate::Appeared { selector, baseline } => page
                .count(selector)
                .await
                .map(|n| n > *baseline)
                .unwrap_or(false),
            Predicate::UrlContains(part) => page
                .current_url()
                .await
                .map(|u| u.to_lowercase().contains(&part.to_lowercase()))
                .unwrap_or(false),
            Predicate::UrlLacks(part) => page
                .current_url()
                .await
                .map(|u| !u.to_lowercase().contains(&part.to_lowercase()))
                .unwrap_or(false),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::ElementPresent(sel) => write!(f, "`{sel}` present"),
            Predicate::ElementAbsent(sel) => write!(f, "`{sel}` gone"),
            Predicate::Appeared { selector, .. } => write!(f, "new `{selector}`"),
            Predicate::UrlContains(part) => write!(f, "URL containing `{part}`"),
            Predicate::UrlLacks(part) => write!(f, "URL leaving `{part}`"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
    Any,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitCondition {
    pub predicates: Vec<Predicate>,
    pub mode: Match,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl WaitCondition {
    pub fn new(predicate: Predicate) -> Self {
        Self::any(vec![predicate])
    }

    pub fn any(predicates: Vec<Predicate>) -> Self {
        Self {
            predicates,
            mode: Match::Any,
            poll_interval: Duration::from_millis(500),
            max_polls: 20,
        }
    }

    pub fn all(predicates: Vec<Predicate>) -> Self {
        Self {
            mode: Match::All,
            ..Self::any(predicates)
        }
    }

    pub fn budget(mut self, poll_interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = poll_interval;
        self.max_polls = max_polls;
        self
    }

    async fn holds<P: Page>(&self, page: &mut P) -> bool {
        match self.mode {
            Match::Any => {
                for predicate in &self.predicates {
                    if predicate.holds(page).await {
                        return true;
                    }
                }
                false
            }
            Match::All => {
                for predicate in &self.predicates {
                    if !predicate.holds(page).await {
                        return false;
                    }
                }
                !self.predicates.is_empty()
            }
        }
    }
}

impl fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = match self.mode {
            Match::Any => " or ",
            Match::All => " and ",
        };
        let parts: Vec<String> = self.predicates.iter().map(|p| p.to_string()).collect();
        write!(f, "{}", parts.join(sep))
    }
}

/// How a wait ended. A timeout is an outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Satisfied { polls: u32 },
    TimedOut { polls: u32 },
    /// The document was replaced mid-wait.
    Interrupted,
}

impl WaitOutcome {
    /// Converts a non-satisfied outcome into the matching [`AutomationError`].
    pub fn into_result(self, condition: &WaitCondition) -> Result<u32, AutomationError> {
        match self {
            WaitOutcome::Satisfied { polls } => Ok(polls),
            WaitOutcome::TimedOut { polls } => Err(AutomationError::ConditionTimeout {
                condition: condition.to_string(),
                polls,
            }),
            WaitOutcome::Interrupted => Err(AutomationError::NavigationInterrupted {
                operation: format!("wait for {condition}"),
            }),
        }
    }
}

/// Polls `condition` until it holds, the budget runs out, or the page navigates.
pub async fn wait_for<P: Page>(page: &mut P, condition: &WaitCondition) -> WaitOutcome {
    let token = match page.document_token().await {
        Ok(token) => token,
        Err(_) => return WaitOutcome::Interrupted,
    };

    for poll in 1..=condition.max_polls {
        if !page.is_live(&token).await {
            trace!(%condition, poll, "document replaced, abandoning wait");
            return WaitOutcome::Interrupted;
        }
        if condition.holds(page).await {
            trace!(%condition, poll, "condition satisfied");
            return WaitOutcome::Satisfied { polls: poll };
        }
        if poll < condition.max_polls {
            tokio::time::sleep(condition.poll_interval).await;
        }
    }

    WaitOutcome::TimedOut {
        polls: condition.max_polls,
    }
}
