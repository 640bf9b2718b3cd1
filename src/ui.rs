//! Interface de terminal do autopilot: spinner e saída colorida.
//!
//! Usa `indicatif` para o spinner enquanto o driver espera a próxima
//! página e `console` para as cores. O [`TerminalNotifier`] é o destino
//! das notificações fora da página.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::notify::{Notification, Notifier, Severity};
use crate::state_machine::{AutomationSession, FlowOutcome, FlowReport, FlowStep};

/// Escolhe o estilo de cada severidade.
fn style_for(severity: Severity) -> Style {
    match severity {
        Severity::Info => Style::new().cyan(),
        Severity::Success => Style::new().green().bold(),
        Severity::Warning => Style::new().yellow(),
        Severity::Error => Style::new().red().bold(),
    }
}

fn symbol_for(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "ℹ",
        Severity::Success => "✓",
        Severity::Warning => "↻",
        Severity::Error => "✗",
    }
}

/// Imprime cada notificação como uma linha colorida no terminal.
#[derive(Debug, Default)]
pub struct TerminalNotifier {
    // Spinner ativo, para não quebrar a linha animada.
    spinner: Option<ProgressBar>,
}

impl TerminalNotifier {
    /// Imprime acima do spinner em vez de sobrescrevê-lo.
    pub fn attach(&mut self, spinner: &WaitSpinner) {
        self.spinner = Some(spinner.pb.clone());
    }

    fn line(notification: &Notification) -> String {
        let style = style_for(notification.severity);
        format!(
            "  {} {}",
            style.apply_to(symbol_for(notification.severity)),
            notification.message
        )
    }
}

impl Notifier for TerminalNotifier {
    fn notify(&mut self, notification: &Notification) {
        let line = Self::line(notification);
        match &self.spinner {
            Some(pb) if !pb.is_finished() => pb.println(line),
            _ => eprintln!("{line}"),
        }
    }
}

/// Spinner exibido enquanto o driver observa o navegador.
pub struct WaitSpinner {
    pb: ProgressBar,
}

impl WaitSpinner {
    pub fn start() -> Self {
        let pb = ProgressBar::new_spinner();
        // Template fixo; um erro aqui só mantém o estilo padrão.
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message("Waiting for the portal...");
        pb.enable_steady_tick(Duration::from_millis(100));
        Self { pb }
    }

    /// Atualiza a mensagem com o passo atual e o progresso.
    pub fn set_step(&self, step: FlowStep) {
        self.pb
            .set_message(format!("{step} ({}%)", step.progress()));
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

/// Imprime a sessão persistida (comando `status`).
pub fn print_session(session: &AutomationSession) {
    let bold = Style::new().bold();
    let step_style = match session.step {
        FlowStep::Submitted => Style::new().green().bold(),
        FlowStep::Failed => Style::new().red().bold(),
        _ => Style::new().yellow(),
    };

    println!("{}", bold.apply_to("─── Automation Session ───"));
    println!("  id:        {}", session.id);
    println!("  account:   {}", session.user_data.account_no);
    println!("  new name:  {}", session.user_data.name);
    println!(
        "  step:      {} ({}%)",
        step_style.apply_to(session.step),
        session.step.progress()
    );
    println!(
        "  attempts:  {}/{}",
        session.retry_count, session.max_retries
    );
    if let Some(err) = &session.last_error {
        println!("  last error: {}", Style::new().red().apply_to(err));
    }
    if session.awaiting_confirmation {
        println!("  submitted, waiting for the portal to confirm");
    }
    let history: Vec<String> = session.step_history.iter().map(|s| s.to_string()).collect();
    if !history.is_empty() {
        println!("  history:   {}", history.join(" → "));
    }
    println!("  updated:   {}", session.updated_at.to_rfc3339());
}

/// Imprime o relatório final em JSON com estilo colorido.
pub fn print_report(report: &FlowReport) {
    let style = match report.outcome {
        FlowOutcome::Submitted => Style::new().green().bold(),
        FlowOutcome::Failed { .. } => Style::new().red().bold(),
    };
    println!();
    println!("{}", style.apply_to("─── Flow Report ───"));
    println!(
        "{}",
        serde_json::to_string_pretty(report).unwrap_or_default()
    );
}
