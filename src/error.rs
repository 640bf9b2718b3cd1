use thiserror::Error;

use crate::state_machine::FlowStep;

#[derive(Debug, Error)]
pub enum AutopilotError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("No automation session found. Run `torrent-autopilot init` first.")]
    NoSession,

    #[error("Invalid user data: {0}")]
    InvalidUserData(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Automation error: {0}")]
    Automation(#[from] AutomationError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl AutopilotError {
    /// Wraps an error coming out of the DevTools layer.
    pub fn browser(err: anyhow::Error) -> Self {
        AutopilotError::Browser(format!("{err:#}"))
    }
}

/// Failures a page handler can run into while driving the flow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AutomationError {
    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("timed out after {polls} polls waiting for {condition}")]
    ConditionTimeout { condition: String, polls: u32 },

    #[error("page navigated away during {operation}")]
    NavigationInterrupted { operation: String },

    #[error("{step} failed after {attempts} attempts: {last_error}")]
    RetryBudgetExhausted {
        step: FlowStep,
        attempts: u32,
        last_error: String,
    },

    #[error("unrecognized portal page: {url}")]
    UnrecognizedPage { url: String },

    #[error("field `{field}` did not keep its value")]
    FieldRejected { field: String },

    #[error("the portal rejected the submission")]
    SubmissionRejected,
}

/// How the flow reacts to an [`AutomationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Re-run the whole sub-step against the same document.
    RetryLocally,
    /// Drop the in-flight operation; the next page load re-derives the step.
    Abandon,
    /// Stop automating and hand over to the operator.
    Escalate,
    /// Re-enter the known flow through the sign-in page.
    Reenter,
}

impl AutomationError {
    pub fn recovery(&self) -> Recovery {
        match self {
            AutomationError::ElementNotFound { .. }
            | AutomationError::ConditionTimeout { .. }
            | AutomationError::FieldRejected { .. }
            | AutomationError::SubmissionRejected => Recovery::RetryLocally,
            AutomationError::NavigationInterrupted { .. } => Recovery::Abandon,
            AutomationError::RetryBudgetExhausted { .. } => Recovery::Escalate,
            AutomationError::UnrecognizedPage { .. } => Recovery::Reenter,
        }
    }
}

impl std::fmt::Display for Recovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Recovery::RetryLocally => write!(f, "retry"),
            Recovery::Abandon => write!(f, "abandon"),
            Recovery::Escalate => write!(f, "escalate"),
            Recovery::Reenter => write!(f, "re-enter"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_failures_are_retried_locally() {
        let not_found = AutomationError::ElementNotFound {
            selector: "#submit".into(),
        };
        let timeout = AutomationError::ConditionTimeout {
            condition: "form".into(),
            polls: 10,
        };
        assert_eq!(not_found.recovery(), Recovery::RetryLocally);
        assert_eq!(timeout.recovery(), Recovery::RetryLocally);
        assert_eq!(
            AutomationError::SubmissionRejected.recovery(),
            Recovery::RetryLocally
        );
    }

    #[test]
    fn navigation_and_exhaustion_are_not_retried() {
        let nav = AutomationError::NavigationInterrupted {
            operation: "form fill".into(),
        };
        let exhausted = AutomationError::RetryBudgetExhausted {
            step: FlowStep::FillingForm,
            attempts: 5,
            last_error: "element not found: #name".into(),
        };
        assert_eq!(nav.recovery(), Recovery::Abandon);
        assert_eq!(exhausted.recovery(), Recovery::Escalate);
        assert_eq!(
            AutomationError::UnrecognizedPage { url: "x".into() }.recovery(),
            Recovery::Reenter
        );
    }

    #[test]
    fn exhausted_display_names_step_and_attempts() {
        let err = AutomationError::RetryBudgetExhausted {
            step: FlowStep::FillingForm,
            attempts: 5,
            last_error: "the portal rejected the submission".into(),
        };
        assert_eq!(
            err.to_string(),
            "FILLING_FORM failed after 5 attempts: the portal rejected the submission"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AutopilotError>();
        assert_send_sync::<AutomationError>();
    }
}
