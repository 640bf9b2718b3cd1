use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::browser::Page;
use crate::config::{AutopilotConfig, PortalConfig};
use crate::error::{AutomationError, AutopilotError};
use crate::notify::{Notifier, Severity};
use crate::state_machine::{FlowEvent, FlowOutcome, FlowStep, StateMachine, Transition};
use crate::store::SessionStore;

/// Which screen of the portal flow is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageIdentity {
    Unknown,
    LoginPage,
    ApplicationsListPage,
    NameChangeFormPage,
}

impl fmt::Display for PageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageIdentity::Unknown => write!(f, "unknown portal page"),
            PageIdentity::LoginPage => write!(f, "login page"),
            PageIdentity::ApplicationsListPage => write!(f, "applications list"),
            PageIdentity::NameChangeFormPage => write!(f, "name-change form"),
        }
    }
}

/// Where the tab currently is relative to the portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    OffDomain,
    Portal(PageIdentity),
}

/// Classifies a URL. Pure; no DOM access.
///
/// Only the exact portal host counts as in-domain. Path markers are matched
/// case-insensitively anywhere in the path.
pub fn classify(url: &str, portal: &PortalConfig) -> Location {
    let Ok(parsed) = Url::parse(url) else {
        return Location::OffDomain;
    };
    let on_portal = parsed
        .host_str()
        .is_some_and(|host| host.eq_ignore_ascii_case(&portal.host));
    if !on_portal {
        return Location::OffDomain;
    }

    let path = parsed.path().to_lowercase();
    let has = |marker: &str| !marker.is_empty() && path.contains(&marker.to_lowercase());

    let identity = if has(&portal.signin_path) {
        PageIdentity::LoginPage
    } else if has(&portal.applications_path) {
        PageIdentity::ApplicationsListPage
    } else if has(&portal.name_change_path) {
        PageIdentity::NameChangeFormPage
    } else {
        PageIdentity::Unknown
    };
    Location::Portal(identity)
}

/// The handler chosen for a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    NavigateToLogin,
    Login,
    ApplicationsList,
    NameChangeForm,
}

impl HandlerKind {
    pub fn for_identity(identity: PageIdentity) -> Self {
        match identity {
            PageIdentity::Unknown => HandlerKind::NavigateToLogin,
            PageIdentity::LoginPage => HandlerKind::Login,
            PageIdentity::ApplicationsListPage => HandlerKind::ApplicationsList,
            PageIdentity::NameChangeFormPage => HandlerKind::NameChangeForm,
        }
    }
}

/// What a handler did with the page it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// The flow moved forward and a navigation or click was issued.
    Advanced(FlowStep),
    /// Waiting on something outside the automation (the operator's login).
    Pending,
    /// The page changed mid-operation; the next load takes over.
    Interrupted,
    Submitted,
    /// Retry budget spent; the session is now `Failed`.
    Failed,
}

/// The result of one router invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// No session persisted; nothing to automate.
    Idle,
    /// The session is terminal; no automated action.
    Halted(FlowStep),
    /// Off the portal; one navigation to the landing URL.
    Redirected { to: String },
    /// A pending submission was confirmed by the page it led to.
    Finished(FlowStep),
    Handled {
        identity: PageIdentity,
        handler: HandlerKind,
        outcome: HandlerOutcome,
    },
}

/// Entry point run on every page load.
///
/// Owns the page, the durable store and the out-of-page notifier; all
/// progress is read from the store at the start of [`StepRouter::run_once`].
pub struct StepRouter<P, S, N> {
    pub page: P,
    pub store: S,
    pub notifier: N,
    pub config: AutopilotConfig,
}

impl<P: Page, S: SessionStore, N: Notifier> StepRouter<P, S, N> {
    pub fn new(page: P, store: S, notifier: N, config: AutopilotConfig) -> Self {
        Self {
            page,
            store,
            notifier,
            config,
        }
    }

    /// Classifies the current page and runs exactly one handler for it.
    pub async fn run_once(&mut self) -> Result<Dispatch, AutopilotError> {
        let url = self
            .page
            .current_url()
            .await
            .map_err(AutopilotError::browser)?;

        let Some(mut session) = self.store.load_session()? else {
            debug!(%url, "no automation session");
            return Ok(Dispatch::Idle);
        };
        if session.step.is_terminal() {
            info!(step = %session.step, "session is terminal, nothing to automate");
            return Ok(Dispatch::Halted(session.step));
        }

        let identity = match classify(&url, &self.config.portal) {
            Location::OffDomain => {
                let to = self.config.portal.landing_url.clone();
                info!(%url, %to, "outside the portal, redirecting");
                self.page
                    .navigate(&to)
                    .await
                    .map_err(AutopilotError::browser)?;
                return Ok(Dispatch::Redirected { to });
            }
            Location::Portal(identity) => identity,
        };
        debug!(%url, %identity, step = %session.step, "page classified");

        if session.awaiting_confirmation {
            match identity {
                PageIdentity::ApplicationsListPage | PageIdentity::Unknown => {
                    let step = self.confirm_submission(&mut session).await?;
                    return Ok(Dispatch::Finished(step));
                }
                PageIdentity::LoginPage => {
                    // Signed out mid-submit: the portal never took the request.
                    warn!("sent to sign-in before the submit was confirmed");
                    session.awaiting_confirmation = false;
                    session.touch();
                    self.store.save_session(&session)?;
                    self.notify(
                        Severity::Warning,
                        "The portal asked for a new login before confirming the request. \
                         It will be filled again after you log in.",
                    )
                    .await;
                }
                // The form handler judges its own reloads.
                PageIdentity::NameChangeFormPage => {}
            }
        }

        if StateMachine::reconcile(&mut session, identity) {
            info!(%identity, step = %session.step, "session disagreed with the page, re-derived step");
            self.store.save_session(&session)?;
        }

        let handler = HandlerKind::for_identity(identity);
        let outcome = match handler {
            HandlerKind::NavigateToLogin => {
                let err = AutomationError::UnrecognizedPage { url: url.clone() };
                warn!(error = %err, recovery = %err.recovery(), "no handler for this path");
                self.handle_navigate_to_login(&mut session).await?
            }
            HandlerKind::Login => self.handle_login(&mut session).await?,
            HandlerKind::ApplicationsList => self.handle_applications_list(&mut session).await?,
            HandlerKind::NameChangeForm => self.handle_name_change_form(&mut session).await?,
        };

        Ok(Dispatch::Handled {
            identity,
            handler,
            outcome,
        })
    }

    // The submit click led off the form page: the portal accepted it.
    async fn confirm_submission(
        &mut self,
        session: &mut crate::state_machine::AutomationSession,
    ) -> Result<FlowStep, AutopilotError> {
        session.awaiting_confirmation = false;
        match StateMachine::next(session, FlowEvent::FormAccepted) {
            Transition::Complete(FlowOutcome::Submitted) => {
                self.finish_submitted(session).await?;
                Ok(FlowStep::Submitted)
            }
            other => {
                debug!(?other, "pending submission did not complete");
                self.store.save_session(session)?;
                Ok(session.step)
            }
        }
    }
}
