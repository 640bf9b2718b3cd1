use std::fmt;

use serde::{Deserialize, Serialize};

use super::session::{AutomationSession, FlowOutcome};
use crate::router::PageIdentity;

/// The steps of the name-change flow.
///
/// NotStarted → AwaitingLogin → OnApplicationsList → FillingForm → Submitted | Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FlowStep {
    #[default]
    NotStarted,
    AwaitingLogin,
    OnApplicationsList,
    FillingForm,
    Submitted,
    Failed,
}

impl FlowStep {
    pub fn is_terminal(self) -> bool {
        matches!(self, FlowStep::Submitted | FlowStep::Failed)
    }

    /// Rough completion percentage shown by `status`.
    pub fn progress(self) -> u8 {
        match self {
            FlowStep::NotStarted => 0,
            FlowStep::AwaitingLogin => 20,
            FlowStep::OnApplicationsList => 40,
            FlowStep::FillingForm => 70,
            FlowStep::Submitted | FlowStep::Failed => 100,
        }
    }

    /// The step a recognised page implies. `Unknown` implies nothing.
    pub fn expected_for(identity: PageIdentity) -> Option<FlowStep> {
        match identity {
            PageIdentity::Unknown => None,
            PageIdentity::LoginPage => Some(FlowStep::AwaitingLogin),
            PageIdentity::ApplicationsListPage => Some(FlowStep::OnApplicationsList),
            PageIdentity::NameChangeFormPage => Some(FlowStep::FillingForm),
        }
    }
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowStep::NotStarted => write!(f, "NOT_STARTED"),
            FlowStep::AwaitingLogin => write!(f, "AWAITING_LOGIN"),
            FlowStep::OnApplicationsList => write!(f, "ON_APPLICATIONS_LIST"),
            FlowStep::FillingForm => write!(f, "FILLING_FORM"),
            FlowStep::Submitted => write!(f, "SUBMITTED"),
            FlowStep::Failed => write!(f, "FAILED"),
        }
    }
}

/// DOM-observable triggers that advance the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowEvent {
    NavigatedToLogin,
    LoginDetected,
    RequestOpened,
    FormAccepted,
}

/// The result of feeding an event or a failure to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Advance to the next step.
    Next(FlowStep),
    /// Re-attempt the current step.
    Retry {
        step: FlowStep,
        attempt: u32,
        reason: String,
    },
    /// The flow reached a terminal step.
    Complete(FlowOutcome),
    /// The event does not apply to the current step; nothing changed.
    Ignored { step: FlowStep, event: FlowEvent },
}

/// Drives an [`AutomationSession`] through the flow.
pub struct StateMachine;

impl StateMachine {
    /// Applies a trigger to the session.
    ///
    /// Only the forward edges of the flow are accepted; anything else is
    /// reported as `Ignored` and leaves the session untouched.
    pub fn next(session: &mut AutomationSession, event: FlowEvent) -> Transition {
        let transition = match (session.step, event) {
            (FlowStep::NotStarted, FlowEvent::NavigatedToLogin) => {
                Transition::Next(FlowStep::AwaitingLogin)
            }
            (FlowStep::AwaitingLogin, FlowEvent::LoginDetected) => {
                Transition::Next(FlowStep::OnApplicationsList)
            }
            (FlowStep::OnApplicationsList, FlowEvent::RequestOpened) => {
                Transition::Next(FlowStep::FillingForm)
            }
            (FlowStep::FillingForm, FlowEvent::FormAccepted) => {
                Transition::Complete(FlowOutcome::Submitted)
            }
            (step, event) => Transition::Ignored { step, event },
        };

        match &transition {
            Transition::Next(next_step) => Self::enter(session, *next_step),
            Transition::Complete(_) => Self::enter(session, FlowStep::Submitted),
            _ => {}
        }

        transition
    }

    /// Records a failed attempt at the current step.
    ///
    /// Retries while `retry_count < max_retries`; the failure that brings the
    /// counter to `max_retries` moves the session to `Failed`.
    pub fn fail(session: &mut AutomationSession, reason: &str) -> Transition {
        if session.step.is_terminal() {
            return Transition::Complete(FlowOutcome::Failed {
                step: session.step,
                attempts: session.retry_count,
                reason: reason.to_string(),
            });
        }

        session.retry_count += 1;
        session.last_error = Some(reason.to_string());
        session.touch();

        if session.retry_count < session.max_retries {
            Transition::Retry {
                step: session.step,
                attempt: session.retry_count,
                reason: reason.to_string(),
            }
        } else {
            let step = session.step;
            session.step_history.push(step);
            session.step = FlowStep::Failed;
            Transition::Complete(FlowOutcome::Failed {
                step,
                attempts: session.retry_count,
                reason: reason.to_string(),
            })
        }
    }

    /// Re-derives the step from the page when the session disagrees with it.
    ///
    /// Returns `true` when the session changed. Terminal sessions and
    /// unrecognised pages never change anything.
    pub fn reconcile(session: &mut AutomationSession, identity: PageIdentity) -> bool {
        if session.step.is_terminal() {
            return false;
        }
        match FlowStep::expected_for(identity) {
            Some(expected) if expected != session.step => {
                Self::enter(session, expected);
                true
            }
            _ => false,
        }
    }

    /// Puts a failed session back at the start with a fresh budget.
    pub fn resume(session: &mut AutomationSession) {
        session.step_history.push(session.step);
        session.step = FlowStep::NotStarted;
        session.retry_count = 0;
        session.signin_visited = false;
        session.awaiting_confirmation = false;
        session.last_error = None;
        session.touch();
    }

    // A different step starts with a fresh retry budget.
    fn enter(session: &mut AutomationSession, step: FlowStep) {
        session.step_history.push(session.step);
        session.step = step;
        session.retry_count = 0;
        session.last_error = None;
        session.touch();
    }
}
