//! One handler per recognised page.
//!
//! Handlers persist the session before any click or navigation that may
//! replace the document, so the next page load reads the step it leads to.

use tracing::{debug, info, warn};

use crate::browser::Page;
use crate::error::{AutomationError, AutopilotError, Recovery};
use crate::notify::{Notification, Notifier, Severity, announce};
use crate::retry::RetryDecision;
use crate::router::{HandlerOutcome, Location, PageIdentity, StepRouter, classify};
use crate::state_machine::{
    AutomationSession, FlowEvent, FlowOutcome, FlowReport, FlowStep, StateMachine,
};
use crate::store::SessionStore;
use crate::waiter::{Predicate, WaitCondition, WaitOutcome, wait_for};

// DevTools calls fail while a document is being torn down.
fn page_err(operation: &str, err: anyhow::Error) -> AutopilotError {
    debug!(operation, error = %err, "page call failed");
    AutomationError::NavigationInterrupted {
        operation: operation.to_string(),
    }
    .into()
}

/// Visible success and error markers at one moment.
#[derive(Debug, Clone, Copy, Default)]
struct Markers {
    success: usize,
    error: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Accepted,
    Rejected,
    /// The submit landed on the sign-in page.
    SignedOut,
    Undecided,
}

/// What came of one fill-and-submit attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Submission {
    Accepted,
    SignedOut,
    /// Clicked, but no outcome seen yet; `awaiting_confirmation` stays set.
    Unconfirmed,
}

impl<P: Page, S: SessionStore, N: Notifier> StepRouter<P, S, N> {
    pub(crate) async fn notify(&mut self, severity: Severity, message: impl Into<String>) {
        announce(
            &mut self.page,
            &mut self.notifier,
            Notification::new(severity, message),
        )
        .await;
    }

    async fn navigate(&mut self, url: &str) -> Result<(), AutopilotError> {
        self.page
            .navigate(url)
            .await
            .map_err(AutopilotError::browser)
    }

    fn element_wait(&self, predicate: Predicate) -> WaitCondition {
        let timing = &self.config.timing;
        WaitCondition::new(predicate).budget(timing.poll_interval(), timing.element_max_polls)
    }

    /// Default for portal pages no other handler recognises: re-enter the
    /// known flow at the entry point for the session's step.
    pub(crate) async fn handle_navigate_to_login(
        &mut self,
        session: &mut AutomationSession,
    ) -> Result<HandlerOutcome, AutopilotError> {
        let portal = self.config.portal.clone();
        let target = match session.step {
            FlowStep::NotStarted => {
                StateMachine::next(session, FlowEvent::NavigatedToLogin);
                portal.signin_url
            }
            FlowStep::AwaitingLogin if session.signin_visited => {
                // The portal only lets the operator off the sign-in page once
                // logged in; the list page sends them back if not.
                info!("left the sign-in page, treating login as complete");
                StateMachine::next(session, FlowEvent::LoginDetected);
                portal.applications_url
            }
            FlowStep::AwaitingLogin => portal.signin_url,
            _ => portal.applications_url,
        };

        self.store.save_session(session)?;
        info!(step = %session.step, %target, "navigating into the flow");
        self.navigate(&target).await?;
        Ok(HandlerOutcome::Advanced(session.step))
    }

    /// The operator logs in by hand; this only watches for it.
    pub(crate) async fn handle_login(
        &mut self,
        session: &mut AutomationSession,
    ) -> Result<HandlerOutcome, AutopilotError> {
        self.notify(Severity::Info, "Please login to your Torrent Power account")
            .await;
        if !session.signin_visited {
            session.signin_visited = true;
            session.touch();
            self.store.save_session(session)?;
        }

        let timing = self.config.timing.clone();
        let login_form = self.config.selectors.login_form.clone();
        let signin_path = self.config.portal.signin_path.clone();

        let rendered = WaitCondition::any(vec![
            Predicate::ElementPresent(login_form.clone()),
            Predicate::UrlLacks(signin_path.clone()),
        ])
        .budget(timing.poll_interval(), timing.element_max_polls);
        match wait_for(&mut self.page, &rendered).await {
            WaitOutcome::Satisfied { .. } => {}
            WaitOutcome::Interrupted => return Ok(HandlerOutcome::Interrupted),
            WaitOutcome::TimedOut { polls } => {
                warn!(polls, "login form never rendered");
                self.notify(
                    Severity::Warning,
                    "The sign-in page has not finished loading yet",
                )
                .await;
                return Ok(HandlerOutcome::Pending);
            }
        }

        // Suspension point: satisfied only by the operator.
        let authenticated = WaitCondition::any(vec![
            Predicate::ElementAbsent(login_form),
            Predicate::UrlLacks(signin_path),
        ])
        .budget(timing.poll_interval(), timing.login_max_polls);
        match wait_for(&mut self.page, &authenticated).await {
            WaitOutcome::Satisfied { polls } => {
                info!(polls, "login detected");
                StateMachine::next(session, FlowEvent::LoginDetected);
                self.store.save_session(session)?;
                let target = self.config.portal.applications_url.clone();
                self.navigate(&target).await?;
                Ok(HandlerOutcome::Advanced(session.step))
            }
            WaitOutcome::TimedOut { polls } => {
                debug!(polls, "still waiting for login");
                self.notify(Severity::Warning, "Still waiting for you to log in")
                    .await;
                Ok(HandlerOutcome::Pending)
            }
            WaitOutcome::Interrupted => Ok(HandlerOutcome::Interrupted),
        }
    }

    /// Opens a new name-change request from the applications list.
    pub(crate) async fn handle_applications_list(
        &mut self,
        session: &mut AutomationSession,
    ) -> Result<HandlerOutcome, AutopilotError> {
        loop {
            let failure = match self.open_new_request(session).await {
                Ok(()) => return Ok(HandlerOutcome::Advanced(session.step)),
                Err(AutopilotError::Automation(e)) => e,
                Err(other) => return Err(other),
            };
            if failure.recovery() == Recovery::Abandon {
                info!(error = %failure, "page changed, leaving it to the next load");
                return Ok(HandlerOutcome::Interrupted);
            }
            match self.record_failure(session, &failure).await? {
                RetryDecision::Retry { attempt } => self.backoff(attempt).await,
                RetryDecision::Exhausted { .. } => return Ok(HandlerOutcome::Failed),
            }
        }
    }

    async fn open_new_request(
        &mut self,
        session: &mut AutomationSession,
    ) -> Result<(), AutopilotError> {
        let selector = self.config.selectors.new_request.clone();
        let present = self.element_wait(Predicate::ElementPresent(selector.clone()));
        wait_for(&mut self.page, &present)
            .await
            .into_result(&present)?;

        let mut opened = session.clone();
        StateMachine::next(&mut opened, FlowEvent::RequestOpened);
        self.store.save_session(&opened)?;

        match self.page.click(&selector).await {
            Ok(true) => {
                info!("new name-change request opened");
                *session = opened;
                Ok(())
            }
            Ok(false) => {
                self.store.save_session(session)?;
                Err(AutomationError::ElementNotFound { selector }.into())
            }
            Err(e) => Err(page_err("opening a new request", e)),
        }
    }

    /// Fills and submits the form, re-filling from scratch on each failure.
    pub(crate) async fn handle_name_change_form(
        &mut self,
        session: &mut AutomationSession,
    ) -> Result<HandlerOutcome, AutopilotError> {
        if session.awaiting_confirmation {
            match self.settle_pending_submission().await {
                Verdict::Accepted => {
                    StateMachine::next(session, FlowEvent::FormAccepted);
                    self.finish_submitted(session).await?;
                    return Ok(HandlerOutcome::Submitted);
                }
                Verdict::Undecided => return Ok(HandlerOutcome::Interrupted),
                Verdict::SignedOut => return self.signed_out(session).await,
                Verdict::Rejected => {
                    // Still on the form with no success marker: the submit
                    // reloaded the form or was turned down.
                    session.awaiting_confirmation = false;
                    let rejected = AutomationError::SubmissionRejected;
                    if let RetryDecision::Exhausted { .. } =
                        self.record_failure(session, &rejected).await?
                    {
                        return Ok(HandlerOutcome::Failed);
                    }
                }
            }
        }

        loop {
            let failure = match self.fill_and_submit(session).await {
                Ok(Submission::Accepted) => {
                    StateMachine::next(session, FlowEvent::FormAccepted);
                    self.finish_submitted(session).await?;
                    return Ok(HandlerOutcome::Submitted);
                }
                Ok(Submission::Unconfirmed) => {
                    // Never re-submit blindly: the next page load decides.
                    info!("submit sent, outcome not visible yet");
                    return Ok(HandlerOutcome::Pending);
                }
                Ok(Submission::SignedOut) => return self.signed_out(session).await,
                Err(AutopilotError::Automation(e)) => e,
                Err(other) => return Err(other),
            };
            if failure.recovery() == Recovery::Abandon {
                info!(error = %failure, "page changed, leaving it to the next load");
                return Ok(HandlerOutcome::Interrupted);
            }
            session.awaiting_confirmation = false;
            match self.record_failure(session, &failure).await? {
                RetryDecision::Retry { attempt } => self.backoff(attempt).await,
                RetryDecision::Exhausted { .. } => return Ok(HandlerOutcome::Failed),
            }
        }
    }

    async fn fill_and_submit(
        &mut self,
        session: &mut AutomationSession,
    ) -> Result<Submission, AutopilotError> {
        let selectors = self.config.selectors.clone();
        let fields = self.config.form_fields.clone();
        let timing = self.config.timing.clone();

        let ready = WaitCondition::all(vec![
            Predicate::UrlContains(self.config.portal.name_change_path.clone()),
            Predicate::ElementPresent(selectors.form_ready.clone()),
        ])
        .budget(timing.poll_interval(), timing.element_max_polls);
        wait_for(&mut self.page, &ready).await.into_result(&ready)?;

        let token = self
            .page
            .document_token()
            .await
            .map_err(|e| page_err("form fill", e))?;

        for field in &fields {
            let Some(value) = session.user_data.field(&field.key) else {
                debug!(field = %field.key, "no value, skipping");
                continue;
            };
            if !self.page.is_live(&token).await {
                return Err(AutomationError::NavigationInterrupted {
                    operation: "form fill".to_string(),
                }
                .into());
            }
            let written = self
                .page
                .set_value(&field.selector, value)
                .await
                .map_err(|e| page_err("form fill", e))?;
            if !written {
                return Err(AutomationError::ElementNotFound {
                    selector: field.selector.clone(),
                }
                .into());
            }
            let echo = self
                .page
                .read_value(&field.selector)
                .await
                .map_err(|e| page_err("form fill", e))?;
            if echo.as_deref() != Some(value) {
                return Err(AutomationError::FieldRejected {
                    field: field.key.clone(),
                }
                .into());
            }
            debug!(field = %field.key, "field filled");
        }

        // Markers left over from an earlier attempt must not decide this one.
        let before = self.count_markers().await;

        session.awaiting_confirmation = true;
        session.touch();
        self.store.save_session(session)?;

        let clicked = self
            .page
            .click(&selectors.submit)
            .await
            .map_err(|e| page_err("submit", e))?;
        if !clicked {
            return Err(AutomationError::ElementNotFound {
                selector: selectors.submit,
            }
            .into());
        }

        let outcome = WaitCondition::any(vec![
            Predicate::Appeared {
                selector: selectors.success_marker,
                baseline: before.success,
            },
            Predicate::Appeared {
                selector: selectors.error_marker,
                baseline: before.error,
            },
            Predicate::UrlLacks(self.config.portal.name_change_path.clone()),
        ])
        .budget(timing.poll_interval(), timing.outcome_max_polls);
        match wait_for(&mut self.page, &outcome).await {
            WaitOutcome::Satisfied { .. } => {}
            WaitOutcome::TimedOut { polls } => {
                warn!(polls, "no response to the submit yet");
                return Ok(Submission::Unconfirmed);
            }
            WaitOutcome::Interrupted => return Ok(Submission::Unconfirmed),
        }

        match self.verdict(before).await {
            Verdict::Accepted => {
                session.awaiting_confirmation = false;
                Ok(Submission::Accepted)
            }
            Verdict::Rejected => Err(AutomationError::SubmissionRejected.into()),
            Verdict::SignedOut => Ok(Submission::SignedOut),
            Verdict::Undecided => Ok(Submission::Unconfirmed),
        }
    }

    async fn count_markers(&mut self) -> Markers {
        let success = self.config.selectors.success_marker.clone();
        let error = self.config.selectors.error_marker.clone();
        Markers {
            success: self.page.count(&success).await.unwrap_or(0),
            error: self.page.count(&error).await.unwrap_or(0),
        }
    }

    /// Reads the outcome of a submit. A new success marker wins over
    /// everything else.
    async fn verdict(&mut self, before: Markers) -> Verdict {
        let now = self.count_markers().await;
        if now.success > before.success {
            return Verdict::Accepted;
        }
        if now.error > before.error {
            return Verdict::Rejected;
        }
        let Ok(url) = self.page.current_url().await else {
            return Verdict::Undecided;
        };
        match classify(&url, &self.config.portal) {
            Location::Portal(PageIdentity::LoginPage) => Verdict::SignedOut,
            Location::Portal(PageIdentity::NameChangeFormPage) | Location::OffDomain => {
                Verdict::Undecided
            }
            Location::Portal(_) => Verdict::Accepted,
        }
    }

    // A later page load on the form: give a slow portal a short grace
    // period to show its outcome before judging.
    async fn settle_pending_submission(&mut self) -> Verdict {
        let selectors = self.config.selectors.clone();
        let timing = &self.config.timing;
        let outcome = WaitCondition::any(vec![
            Predicate::Appeared {
                selector: selectors.success_marker,
                baseline: 0,
            },
            Predicate::Appeared {
                selector: selectors.error_marker,
                baseline: 0,
            },
        ])
        .budget(timing.poll_interval(), timing.element_max_polls);
        if wait_for(&mut self.page, &outcome).await == WaitOutcome::Interrupted {
            return Verdict::Undecided;
        }
        match self.verdict(Markers::default()).await {
            // Back on the form with nothing new: the submit did not take.
            Verdict::Undecided => Verdict::Rejected,
            verdict => verdict,
        }
    }

    async fn signed_out(
        &mut self,
        session: &mut AutomationSession,
    ) -> Result<HandlerOutcome, AutopilotError> {
        session.awaiting_confirmation = false;
        session.touch();
        self.store.save_session(session)?;
        self.notify(
            Severity::Warning,
            "The portal signed you out before accepting the request. \
             Log in again and it will be filled once more.",
        )
        .await;
        Ok(HandlerOutcome::Interrupted)
    }

    /// Clears the session, archives the report and tells the operator.
    pub(crate) async fn finish_submitted(
        &mut self,
        session: &AutomationSession,
    ) -> Result<(), AutopilotError> {
        let report = FlowReport::from_session(session, FlowOutcome::Submitted);
        self.store.clear_session()?;
        if let Err(e) = self.store.archive_report(&report) {
            warn!(error = %e, "could not archive flow report");
        }
        info!(session = %session.id, "name change request submitted");
        self.notify(
            Severity::Success,
            format!(
                "Name change request submitted for account {}",
                session.user_data.account_no
            ),
        )
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FakeDocument, FakePage, Scripted};
    use crate::config::AutopilotConfig;
    use crate::notify::RecordingNotifier;
    use crate::router::{Dispatch, HandlerKind, PageIdentity};
    use crate::state_machine::UserData;
    use crate::store::MemoryStore;

    const LOGIN: &str = "https://connect.torrentpower.com/tplcp/session/signin";
    const APPS: &str = "https://connect.torrentpower.com/tplcp/application/myapplications";
    const FORM: &str = "https://connect.torrentpower.com/tplcp/application/namechangerequest";
    const DONE: &str = "https://connect.torrentpower.com/tplcp/application/requestsuccess";

    const PASSWORD: &str = "input[type='password']";
    const NEW_REQUEST: &str = "a[href*='namechangerequest']";
    const ACCOUNT: &str = "input[formcontrolname='serviceNo']";
    const NAME: &str = "input[formcontrolname='newName']";
    const SUBMIT: &str = "button[type='submit']";
    const ERROR: &str = ".alert-danger, .mat-error, .invalid-feedback";
    const SUCCESS: &str = ".alert-success, .swal2-success";

    type TestRouter = StepRouter<FakePage, MemoryStore, RecordingNotifier>;

    fn session(step: FlowStep) -> AutomationSession {
        let mut session = AutomationSession::new(
            UserData {
                name: "A".into(),
                account_no: "123".into(),
                ..Default::default()
            },
            5,
        );
        session.step = step;
        session
    }

    fn router_with(page: FakePage, session: &AutomationSession) -> TestRouter {
        let store = MemoryStore::default();
        store.save_session(session).unwrap();
        StepRouter::new(
            page,
            store,
            RecordingNotifier::default(),
            AutopilotConfig::for_tests(),
        )
    }

    fn stored(router: &TestRouter) -> Option<AutomationSession> {
        router.store.load_session().unwrap()
    }

    fn form_page() -> FakePage {
        FakePage::at(FORM).route(FORM, FakeDocument::with(&["form", ACCOUNT, NAME, SUBMIT]))
    }

    // --- login ---

    #[tokio::test]
    async fn login_waits_for_the_operator_then_opens_the_list() {
        let page = FakePage::at(LOGIN).route(
            LOGIN,
            FakeDocument::with(&[PASSWORD]).then(4, Scripted::Remove(PASSWORD.into())),
        );
        let mut router = router_with(page, &session(FlowStep::AwaitingLogin));

        let dispatch = router.run_once().await.unwrap();

        assert_eq!(
            dispatch,
            Dispatch::Handled {
                identity: PageIdentity::LoginPage,
                handler: HandlerKind::Login,
                outcome: HandlerOutcome::Advanced(FlowStep::OnApplicationsList),
            }
        );
        assert_eq!(router.notifier.count(Severity::Info), 1);
        assert_eq!(router.page.navigations, vec![APPS]);
        let s = stored(&router).unwrap();
        assert_eq!(s.step, FlowStep::OnApplicationsList);
        assert!(s.signin_visited);
    }

    #[tokio::test]
    async fn login_timeout_is_not_a_transition() {
        let page = FakePage::at(LOGIN).with_element(PASSWORD);
        let mut router = router_with(page, &session(FlowStep::AwaitingLogin));

        let dispatch = router.run_once().await.unwrap();

        assert!(matches!(
            dispatch,
            Dispatch::Handled {
                outcome: HandlerOutcome::Pending,
                ..
            }
        ));
        assert_eq!(router.notifier.count(Severity::Info), 1);
        assert_eq!(router.notifier.count(Severity::Error), 0);
        let s = stored(&router).unwrap();
        assert_eq!(s.step, FlowStep::AwaitingLogin);
        assert_eq!(s.retry_count, 0);
        assert!(router.page.navigations.is_empty());
    }

    #[tokio::test]
    async fn redirect_after_login_interrupts_and_resumes_on_next_load() {
        let dashboard = "https://connect.torrentpower.com/tplcp/dashboard";
        let page = FakePage::at(LOGIN).route(
            LOGIN,
            FakeDocument::with(&[PASSWORD]).then(3, Scripted::Navigate(dashboard.into())),
        );
        let mut router = router_with(page, &session(FlowStep::AwaitingLogin));

        let first = router.run_once().await.unwrap();
        assert!(matches!(
            first,
            Dispatch::Handled {
                outcome: HandlerOutcome::Interrupted,
                ..
            }
        ));
        assert_eq!(router.page.url, dashboard);

        // Next page load: unknown path, sign-in already visited.
        let second = router.run_once().await.unwrap();
        assert_eq!(
            second,
            Dispatch::Handled {
                identity: PageIdentity::Unknown,
                handler: HandlerKind::NavigateToLogin,
                outcome: HandlerOutcome::Advanced(FlowStep::OnApplicationsList),
            }
        );
        assert_eq!(router.page.navigations.last().map(String::as_str), Some(APPS));
    }

    // --- applications list ---

    #[tokio::test]
    async fn new_request_is_opened_and_persisted_first() {
        let page = FakePage::at(APPS)
            .route(APPS, FakeDocument::with(&[NEW_REQUEST]))
            .clicking(NEW_REQUEST, Scripted::Navigate(FORM.into()));
        let mut router = router_with(page, &session(FlowStep::OnApplicationsList));

        let dispatch = router.run_once().await.unwrap();

        assert!(matches!(
            dispatch,
            Dispatch::Handled {
                handler: HandlerKind::ApplicationsList,
                outcome: HandlerOutcome::Advanced(FlowStep::FillingForm),
                ..
            }
        ));
        assert_eq!(router.page.clicks, vec![NEW_REQUEST]);
        assert_eq!(stored(&router).unwrap().step, FlowStep::FillingForm);
    }

    #[tokio::test]
    async fn missing_new_request_control_exhausts_budget() {
        let page = FakePage::at(APPS);
        let mut router = router_with(page, &session(FlowStep::OnApplicationsList));

        let dispatch = router.run_once().await.unwrap();

        assert!(matches!(
            dispatch,
            Dispatch::Handled {
                outcome: HandlerOutcome::Failed,
                ..
            }
        ));
        let s = stored(&router).unwrap();
        assert_eq!(s.step, FlowStep::Failed);
        assert_eq!(s.retry_count, 5);
        assert_eq!(router.notifier.count(Severity::Error), 1);
    }

    #[tokio::test]
    async fn logged_in_operator_landing_on_list_is_reconciled() {
        let page = FakePage::at(APPS)
            .route(APPS, FakeDocument::with(&[NEW_REQUEST]))
            .clicking(NEW_REQUEST, Scripted::Navigate(FORM.into()));
        let mut router = router_with(page, &session(FlowStep::AwaitingLogin));

        router.run_once().await.unwrap();

        assert_eq!(stored(&router).unwrap().step, FlowStep::FillingForm);
    }

    // --- name-change form ---

    #[tokio::test]
    async fn form_is_filled_checked_and_submitted() {
        let page = form_page().clicking(SUBMIT, Scripted::Navigate(DONE.into()));
        let mut router = router_with(page, &session(FlowStep::FillingForm));

        let dispatch = router.run_once().await.unwrap();

        // Leaving the form page after the click is the portal's acceptance.
        assert_eq!(
            dispatch,
            Dispatch::Handled {
                identity: PageIdentity::NameChangeFormPage,
                handler: HandlerKind::NameChangeForm,
                outcome: HandlerOutcome::Submitted,
            }
        );
        assert_eq!(
            router.page.writes,
            vec![
                (ACCOUNT.to_string(), "123".to_string()),
                (NAME.to_string(), "A".to_string())
            ]
        );
        assert_eq!(router.page.clicks, vec![SUBMIT]);
        assert!(stored(&router).is_none());
        assert_eq!(router.notifier.count(Severity::Success), 1);
        assert_eq!(router.run_once().await.unwrap(), Dispatch::Idle);
    }

    #[tokio::test]
    async fn in_page_success_marker_completes_the_flow() {
        let page = form_page().clicking(SUBMIT, Scripted::Insert(SUCCESS.into()));
        let mut router = router_with(page, &session(FlowStep::FillingForm));

        let dispatch = router.run_once().await.unwrap();

        assert!(matches!(
            dispatch,
            Dispatch::Handled {
                outcome: HandlerOutcome::Submitted,
                ..
            }
        ));
        assert!(stored(&router).is_none());
        let reports = router.store.reports.borrow();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, FlowOutcome::Submitted);
    }

    #[tokio::test]
    async fn five_failed_fills_end_in_failed_without_a_sixth_attempt() {
        // The name input never renders, so every fill stops after the account number.
        let page = FakePage::at(FORM).route(FORM, FakeDocument::with(&["form", ACCOUNT, SUBMIT]));
        let mut router = router_with(page, &session(FlowStep::FillingForm));

        let dispatch = router.run_once().await.unwrap();

        assert!(matches!(
            dispatch,
            Dispatch::Handled {
                outcome: HandlerOutcome::Failed,
                ..
            }
        ));
        let s = stored(&router).unwrap();
        assert_eq!(s.step, FlowStep::Failed);
        assert_eq!(s.retry_count, s.max_retries);
        assert_eq!(router.notifier.count(Severity::Error), 1);
        assert_eq!(router.page.writes_to(ACCOUNT), 5);

        // Later loads do not try again.
        assert_eq!(
            router.run_once().await.unwrap(),
            Dispatch::Halted(FlowStep::Failed)
        );
        assert_eq!(router.page.writes_to(ACCOUNT), 5);
        assert_eq!(router.notifier.count(Severity::Error), 1);
    }

    #[tokio::test]
    async fn rejected_echo_is_retried_from_scratch() {
        let page = form_page().rejecting(NAME);
        let mut session = session(FlowStep::FillingForm);
        session.max_retries = 2;
        let mut router = router_with(page, &session);

        router.run_once().await.unwrap();

        let s = stored(&router).unwrap();
        assert_eq!(s.step, FlowStep::Failed);
        assert_eq!(s.last_error.as_deref(), Some("field `name` did not keep its value"));
        assert_eq!(router.page.writes_to(ACCOUNT), 2);
        assert!(router.page.clicks.is_empty());
    }

    #[tokio::test]
    async fn site_validation_error_counts_as_a_failure() {
        let page = form_page().clicking(SUBMIT, Scripted::Insert(ERROR.into()));
        let mut session = session(FlowStep::FillingForm);
        session.max_retries = 3;
        let mut router = router_with(page, &session);

        router.run_once().await.unwrap();

        let s = stored(&router).unwrap();
        assert_eq!(s.step, FlowStep::Failed);
        assert!(!s.awaiting_confirmation);
        assert_eq!(router.page.clicks.len(), 3);
        assert_eq!(router.notifier.count(Severity::Error), 1);
    }

    #[tokio::test]
    async fn reloaded_form_after_submit_counts_as_rejection() {
        let mut session = session(FlowStep::FillingForm);
        session.awaiting_confirmation = true;
        let page = form_page().clicking(SUBMIT, Scripted::Insert(SUCCESS.into()));
        let mut router = router_with(page, &session);

        let dispatch = router.run_once().await.unwrap();

        assert!(matches!(
            dispatch,
            Dispatch::Handled {
                outcome: HandlerOutcome::Submitted,
                ..
            }
        ));
        assert_eq!(router.notifier.count(Severity::Warning), 1);
        assert!(router.notifier.notifications[0].message.contains("rejected the submission"));
        assert!(stored(&router).is_none());
    }

    #[tokio::test]
    async fn stale_error_marker_does_not_reject_a_good_submit() {
        // A validation message from an earlier attempt is still on screen.
        let page = FakePage::at(FORM)
            .route(
                FORM,
                FakeDocument::with(&["form", ACCOUNT, NAME, SUBMIT, ERROR]),
            )
            .clicking(SUBMIT, Scripted::Insert(SUCCESS.into()));
        let mut router = router_with(page, &session(FlowStep::FillingForm));

        let dispatch = router.run_once().await.unwrap();

        assert!(matches!(
            dispatch,
            Dispatch::Handled {
                outcome: HandlerOutcome::Submitted,
                ..
            }
        ));
        assert_eq!(router.page.clicks.len(), 1);
        assert_eq!(router.notifier.count(Severity::Warning), 0);
        assert!(stored(&router).is_none());
    }

    #[tokio::test]
    async fn slow_outcome_is_not_submitted_twice() {
        // The success banner shows up only after the outcome wait ran out.
        let page = FakePage::at(FORM).route(
            FORM,
            FakeDocument::with(&["form", ACCOUNT, NAME, SUBMIT])
                .then(10, Scripted::Insert(SUCCESS.into())),
        );
        let mut router = router_with(page, &session(FlowStep::FillingForm));

        let first = router.run_once().await.unwrap();

        assert!(matches!(
            first,
            Dispatch::Handled {
                outcome: HandlerOutcome::Pending,
                ..
            }
        ));
        let s = stored(&router).unwrap();
        assert!(s.awaiting_confirmation);
        assert_eq!(s.retry_count, 0);
        assert_eq!(router.page.clicks.len(), 1);
        assert_eq!(router.notifier.count(Severity::Error), 0);

        let second = router.run_once().await.unwrap();

        assert!(matches!(
            second,
            Dispatch::Handled {
                outcome: HandlerOutcome::Submitted,
                ..
            }
        ));
        assert_eq!(router.page.clicks.len(), 1);
        assert!(stored(&router).is_none());
    }

    #[tokio::test]
    async fn route_change_to_sign_in_after_submit_is_not_acceptance() {
        let page = form_page().clicking(SUBMIT, Scripted::SetUrl(LOGIN.into()));
        let mut router = router_with(page, &session(FlowStep::FillingForm));

        let dispatch = router.run_once().await.unwrap();

        assert!(matches!(
            dispatch,
            Dispatch::Handled {
                outcome: HandlerOutcome::Interrupted,
                ..
            }
        ));
        let s = stored(&router).unwrap();
        assert!(!s.awaiting_confirmation);
        assert_eq!(s.step, FlowStep::FillingForm);
        assert_eq!(router.page.clicks.len(), 1);
        assert_eq!(router.notifier.count(Severity::Success), 0);
        assert_eq!(router.notifier.count(Severity::Warning), 1);
        assert!(router.store.reports.borrow().is_empty());
    }
}
