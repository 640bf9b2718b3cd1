use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use crate::browser::Page;
use crate::error::AutopilotError;
use crate::notify::Notifier;
use crate::router::{Dispatch, HandlerOutcome, StepRouter};
use crate::store::SessionStore;
use crate::ui::WaitSpinner;

/// How a driver run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Router invocations, one per observed page load or re-check.
    pub runs: u32,
    pub last: Dispatch,
}

/// Drives the router across page loads of one tab.
///
/// The router runs once per document: the driver watches the document
/// token and URL, and re-runs the router when either changes, or after
/// `rerun_after_ms` on a page that stays put (the login page).
pub struct Autopilot<P, S, N> {
    pub router: StepRouter<P, S, N>,
    spinner: Option<WaitSpinner>,
}

impl<P: Page, S: SessionStore, N: Notifier> Autopilot<P, S, N> {
    pub fn new(router: StepRouter<P, S, N>) -> Self {
        Self {
            router,
            spinner: None,
        }
    }

    pub fn with_spinner(mut self, spinner: WaitSpinner) -> Self {
        self.spinner = Some(spinner);
        self
    }

    /// Runs until the flow ends or there is nothing to automate.
    pub async fn run(&mut self) -> Result<RunSummary, AutopilotError> {
        let timing = self.router.config.timing.clone();
        let page_check = Duration::from_millis(timing.page_check_ms);
        let rerun_after = Duration::from_millis(timing.rerun_after_ms);

        let mut seen: Option<(String, String)> = None;
        let mut last_run = Instant::now();
        let mut runs = 0u32;

        loop {
            // A tab mid-navigation has no document to stamp yet.
            let current = self.observe().await;
            let changed = current.is_some() && current != seen;
            let stale = current.is_some() && last_run.elapsed() >= rerun_after;

            if changed || stale {
                if let Some((_, url)) = &current {
                    debug!(%url, changed, "running router");
                }
                seen = current;
                let dispatch = self.router.run_once().await?;
                runs += 1;
                last_run = Instant::now();
                self.show_progress();

                if Self::is_final(&dispatch) {
                    info!(runs, ?dispatch, "driver finished");
                    if let Some(spinner) = &self.spinner {
                        spinner.finish();
                    }
                    return Ok(RunSummary {
                        runs,
                        last: dispatch,
                    });
                }
            }

            sleep(page_check).await;
        }
    }

    async fn observe(&mut self) -> Option<(String, String)> {
        let token = self.router.page.document_token().await.ok()?;
        let url = self.router.page.current_url().await.ok()?;
        Some((token, url))
    }

    fn show_progress(&self) {
        let Some(spinner) = &self.spinner else {
            return;
        };
        if let Ok(Some(session)) = self.router.store.load_session() {
            spinner.set_step(session.step);
        }
    }

    fn is_final(dispatch: &Dispatch) -> bool {
        match dispatch {
            Dispatch::Idle | Dispatch::Halted(_) | Dispatch::Finished(_) => true,
            Dispatch::Redirected { .. } => false,
            Dispatch::Handled { outcome, .. } => {
                matches!(outcome, HandlerOutcome::Submitted | HandlerOutcome::Failed)
            }
        }
    }
}
