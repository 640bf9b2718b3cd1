mod session;
mod state;

pub use session::{AutomationSession, FlowOutcome, FlowReport, UserData};
pub use state::{FlowEvent, FlowStep, StateMachine, Transition};
