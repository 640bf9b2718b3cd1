use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::FlowStep;
use crate::error::AutopilotError;

/// Citizen and application details typed into the name-change form.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    /// The new name to put on the connection.
    pub name: String,
    /// Torrent Power service / account number.
    pub account_no: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_no: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl UserData {
    pub fn validate(&self) -> Result<(), AutopilotError> {
        if self.name.trim().is_empty() {
            return Err(AutopilotError::InvalidUserData("name is required".into()));
        }
        if self.account_no.trim().is_empty() {
            return Err(AutopilotError::InvalidUserData(
                "accountNo is required".into(),
            ));
        }
        Ok(())
    }

    /// Looks a value up by its wire key (`name`, `accountNo`, ...).
    /// Empty values count as absent.
    pub fn field(&self, key: &str) -> Option<&str> {
        let value = match key {
            "name" => Some(self.name.as_str()),
            "accountNo" => Some(self.account_no.as_str()),
            "address" => self.address.as_deref(),
            "mobile" => self.mobile.as_deref(),
            "email" => self.email.as_deref(),
            "documentNo" => self.document_no.as_deref(),
            "reason" => self.reason.as_deref(),
            _ => None,
        };
        value.filter(|v| !v.trim().is_empty())
    }
}

/// How a flow ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowOutcome {
    Submitted,
    Failed {
        step: FlowStep,
        attempts: u32,
        reason: String,
    },
}

/// Progress of one name-change request, persisted between page loads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationSession {
    #[serde(default = "new_session_id")]
    pub id: String,
    pub user_data: UserData,
    #[serde(default)]
    pub step: FlowStep,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub step_history: Vec<FlowStep>,
    /// Set once the operator has been shown the sign-in page.
    #[serde(default)]
    pub signin_visited: bool,
    /// Set right before the submit click; cleared once the outcome is known.
    #[serde(default)]
    pub awaiting_confirmation: bool,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_max_retries() -> u32 {
    5
}

impl AutomationSession {
    pub fn new(user_data: UserData, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            id: new_session_id(),
            user_data,
            step: FlowStep::NotStarted,
            retry_count: 0,
            max_retries,
            step_history: Vec::new(),
            signin_visited: false,
            awaiting_confirmation: false,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Summary written when a flow reaches a terminal step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowReport {
    pub session_id: String,
    pub account_no: String,
    pub outcome: FlowOutcome,
    pub step_transitions: Vec<FlowStep>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl FlowReport {
    pub fn from_session(session: &AutomationSession, outcome: FlowOutcome) -> Self {
        let now = Utc::now();
        let duration = now - session.created_at;
        let mut transitions = session.step_history.clone();
        transitions.push(session.step);

        Self {
            session_id: session.id.clone(),
            account_no: session.user_data.account_no.clone(),
            outcome,
            step_transitions: transitions,
            retry_count: session.retry_count,
            max_retries: session.max_retries,
            started_at: session.created_at,
            completed_at: now,
            duration_ms: duration.num_milliseconds(),
        }
    }
}
