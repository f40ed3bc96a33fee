//! Interface de terminal do simulador: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para o progresso da sessão e `console` para
//! estilização com cores. O [`SessionProgress`] acompanha visualmente
//! os jobs de uma sessão até que todos terminem.

use anyhow::Result;
use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::VersionedConfig;
use crate::simulation::{FinalState, SessionReport};
use crate::state_machine::{JobId, JobStatus};

/// Indicador visual de progresso para uma sessão simulada no terminal.
///
/// Exibe um spinner com a contagem de jobs finalizados e mensagens
/// coloridas para sucesso (verde), falha (vermelho) e cancelamento (amarelo).
pub struct SessionProgress {
    // Spinner do indicatif.
    pb: ProgressBar,
    // Estilo verde para mensagens de sucesso.
    green: Style,
    // Estilo vermelho para mensagens de falha.
    red: Style,
    // Estilo amarelo para cancelamentos e desistências.
    yellow: Style,
}

impl SessionProgress {
    pub fn new() -> Self {
        Self::with_bar(ProgressBar::new_spinner())
    }

    /// Variante sem saída no terminal (usada em testes).
    pub fn hidden() -> Self {
        Self::with_bar(ProgressBar::hidden())
    }

    fn with_bar(pb: ProgressBar) -> Self {
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg} [{pos}/{len}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Inicia o spinner para `total` jobs.
    pub fn start(&self, total: usize) {
        self.pb.set_length(total as u64);
        self.pb.set_message("polling jobs");
        self.pb.enable_steady_tick(std::time::Duration::from_millis(100));
    }

    /// Registra o resultado final de um job.
    pub fn job_settled(&self, id: &JobId, state: &FinalState) {
        self.pb.inc(1);
        let line = match state {
            FinalState::Completed => format!("  {} {id} completed", self.green.apply_to("✓")),
            FinalState::Cancelled => format!("  {} {id} cancelled", self.yellow.apply_to("⊘")),
            FinalState::PermanentlyFailed => {
                format!("  {} {id} permanently failed", self.red.apply_to("✗"))
            }
            FinalState::GaveUp => format!("  {} {id}: too many failed checks", self.yellow.apply_to("↻")),
            FinalState::Error(msg) => format!("  {} {id}: {msg}", self.red.apply_to("✗")),
        };
        self.pb.println(line);
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }

    /// Imprime o resumo da sessão, agrupado por status e tier.
    pub fn print_report(&self, report: &SessionReport) {
        println!();
        println!("{}", self.green.apply_to("─── Session Summary ───"));
        for group in &report.groups {
            let style = match group.status {
                JobStatus::Completed => &self.green,
                JobStatus::PermanentlyFailed | JobStatus::Failed => &self.red,
                JobStatus::Pending | JobStatus::Cancelled => &self.yellow,
            };
            println!(
                "  {:<20} {:<8} {}",
                style.apply_to(group.status),
                group.tier,
                group.jobs.len()
            );
        }
        println!(
            "  rejected: {}  dispatched: {}  worker failures: {}  cleaned up: {}",
            report.rejected, report.dispatched, report.worker_failures, report.cleaned_up
        );
    }

    /// Imprime o relatório completo em JSON.
    pub fn print_json(&self, report: &SessionReport) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(report)?);
        Ok(())
    }
}

impl Default for SessionProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Imprime a configuração efetiva em TOML, sem revelar o token administrativo.
pub fn print_config(config: &VersionedConfig) -> Result<()> {
    let mut redacted = config.config.clone();
    redacted.admin_token = "********".into();
    println!("# version {}", config.version);
    println!("{}", toml::to_string_pretty(&redacted)?);
    Ok(())
}
