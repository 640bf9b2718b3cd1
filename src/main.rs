mod browser;
mod cli;
mod config;
mod error;
mod handlers;
mod notify;
mod orchestrator;
mod retry;
mod router;
mod state_machine;
mod store;
mod ui;
mod waiter;

use anyhow::{Context, Result};
use clap::Parser;
use console::Style;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use browser::{ChromePage, discover_ws_url};
use cli::{Cli, Command, InitArgs};
use config::AutopilotConfig;
use error::AutopilotError;
use orchestrator::Autopilot;
use router::{Location, StepRouter, classify};
use state_machine::{AutomationSession, FlowReport, FlowStep, StateMachine};
use store::{FileStore, SessionStore};
use ui::{TerminalNotifier, WaitSpinner};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = AutopilotConfig::load()?;
    if let Some(max) = cli.max_retries {
        config.max_retries = max.max(1);
    }
    let store = FileStore::new(&config.state_dir);

    match cli.command {
        Command::Init(args) => init(&store, &config, &args),
        Command::Run => run(store, config, cli.max_retries).await,
        Command::Status => {
            match store.load_session()? {
                Some(session) => ui::print_session(&session),
                None => println!("No automation session. Run `torrent-autopilot init` to start one."),
            }
            Ok(())
        }
        Command::Cancel => {
            store.clear_session()?;
            println!("  {} Session removed", Style::new().green().apply_to("✓"));
            Ok(())
        }
        Command::Resume => resume(&store),
        Command::Classify { url } => {
            match classify(&url, &config.portal) {
                Location::OffDomain => println!("off-domain"),
                Location::Portal(identity) => println!("{identity}"),
            }
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn init(store: &FileStore, config: &AutopilotConfig, args: &InitArgs) -> Result<()> {
    let user_data = args.user_data()?;
    if let Some(existing) = store.load_session()? {
        warn!(step = %existing.step, "replacing existing session");
    }
    let session = AutomationSession::new(user_data, config.max_retries);
    store.save_session(&session)?;
    info!(session = %session.id, dir = %store.dir().display(), "session created");
    ui::print_session(&session);
    Ok(())
}

fn resume(store: &FileStore) -> Result<()> {
    let mut session = store.load_session()?.ok_or(AutopilotError::NoSession)?;
    if session.step != FlowStep::Failed {
        println!("Session is at {}, nothing to resume.", session.step);
        return Ok(());
    }
    StateMachine::resume(&mut session);
    store.save_session(&session)?;
    println!(
        "  {} Session reset, run `torrent-autopilot run` to continue",
        Style::new().green().apply_to("✓")
    );
    Ok(())
}

async fn run(store: FileStore, config: AutopilotConfig, max_retries: Option<u32>) -> Result<()> {
    let mut session = store.load_session()?.ok_or(AutopilotError::NoSession)?;
    if let Some(max) = max_retries {
        session.max_retries = max.max(1);
        store.save_session(&session)?;
    }
    let session_id = session.id.clone();

    let ws_url = match discover_ws_url(&config.chrome.debug_url).await {
        Ok(ws) => Some(ws),
        Err(e) => {
            warn!(error = %e, "no running Chrome found");
            None
        }
    };
    let chrome = config.chrome.clone();
    let page = tokio::task::spawn_blocking(move || ChromePage::connect(&chrome, ws_url))
        .await
        .context("Chrome startup task failed")??;

    let spinner = WaitSpinner::start();
    let mut notifier = TerminalNotifier::default();
    notifier.attach(&spinner);

    let reports = store.report_path(&session_id);
    let router = StepRouter::new(page, store, notifier, config);
    let mut autopilot = Autopilot::new(router).with_spinner(spinner);

    tokio::select! {
        summary = autopilot.run() => {
            let summary = summary?;
            info!(runs = summary.runs, last = ?summary.last, "driver stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, progress is saved");
            return Ok(());
        }
    }

    if reports.exists() {
        let raw = std::fs::read_to_string(&reports)?;
        let report: FlowReport = serde_json::from_str(&raw)?;
        ui::print_report(&report);
    }
    Ok(())
}
