//! Interface de terminal do streamline — spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`RunProgress`] acompanha visualmente
//! uma execução de auto-apply no terminal.

use console::{Style, Term};
use indicatif::{ProgressBar, ProgressStyle};

use crate::activity::{ActivityLog, EngineEvent, LogPhase};
use crate::engine::RunOutcome;
use crate::ledger::{EXPORT_COLUMNS, LedgerSummary};
use crate::pulse::{PulseState, PulseStatus};
use crate::state_machine::ApprovalRequest;

const HEALTH_BAR_WIDTH: usize = 30;

/// Indicador visual de progresso para uma execução de auto-apply.
///
/// Exibe um spinner durante cada candidatura e mensagens coloridas para
/// sucesso (verde), falha (vermelho) e pausa/pulo (amarelo).
pub struct RunProgress {
    // Spinner do indicatif.
    pb: ProgressBar,
    // Histórico da execução atual.
    log: ActivityLog,
    green: Style,
    red: Style,
    yellow: Style,
}

impl RunProgress {
    /// Inicia o spinner com o número de vagas elegíveis.
    pub fn start(eligible: usize, log_window: usize) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("Auto-apply: {eligible} eligible jobs"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            log: ActivityLog::new(log_window),
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Atualiza o spinner e imprime uma linha para cada evento do motor.
    pub fn handle(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::Log(entry) => {
                self.log.record(entry);
                let time = entry.timestamp.format("%H:%M:%S");
                match &entry.phase {
                    LogPhase::Applying => {
                        self.pb.set_message(format!("Applying to {}", entry.identity));
                    }
                    LogPhase::Done { application_id } => self.pb.println(format!(
                        "  {} {time} {} ({application_id})",
                        self.green.apply_to("✓"),
                        entry.identity
                    )),
                    LogPhase::Skipped => self.pb.println(format!(
                        "  {} {time} {} skipped",
                        self.yellow.apply_to("↷"),
                        entry.identity
                    )),
                    LogPhase::Failed(kind) => self.pb.println(format!(
                        "  {} {time} {}: {kind}",
                        self.red.apply_to("✗"),
                        entry.identity
                    )),
                }
            }
            EngineEvent::Paused(reason) => {
                self.pb.set_message(format!("Paused: {reason}"));
                self.pb
                    .println(format!("  {} Paused: {reason}", self.yellow.apply_to("⏸")));
            }
            EngineEvent::Resumed => {
                self.pb.println(format!("  {} Resumed", self.green.apply_to("▶")));
            }
        }
    }

    /// Suspende o spinner enquanto `f` interage com o terminal.
    pub fn suspend<R>(&self, f: impl FnOnce() -> R) -> R {
        self.pb.suspend(f)
    }

    /// Finaliza o spinner e exibe o resultado da execução e as entradas recentes.
    pub fn complete(&mut self, outcome: &RunOutcome) {
        self.pb.finish_and_clear();
        let style = match outcome {
            RunOutcome::Completed(_) => &self.green,
            RunOutcome::Cancelled(_) => &self.yellow,
            RunOutcome::Halted(_) => &self.red,
        };
        println!("  {} Auto-apply {outcome}", style.apply_to("■"));
        println!();
        println!("{}", style.apply_to("─── Recent activity ───"));
        for entry in self.log.recent() {
            println!(
                "  {:<9} {}",
                entry.phase.label(),
                entry.identity
            );
        }
        self.log.clear();
    }
}

/// Barra de saúde em texto, colorida por faixa.
pub fn health_bar(health: u8) -> String {
    let filled = usize::from(health.min(100)) * HEALTH_BAR_WIDTH / 100;
    let style = if health > 70 {
        Style::new().green()
    } else if health > 40 {
        Style::new().yellow()
    } else {
        Style::new().red()
    };
    let bar = format!("{}{}", "█".repeat(filled), "░".repeat(HEALTH_BAR_WIDTH - filled));
    format!("[{}] {health}/100", style.apply_to(bar))
}

/// Imprime o widget de pulso.
pub fn print_pulse(state: &PulseState) {
    let status_style = match state.status {
        PulseStatus::Active => Style::new().green().bold(),
        PulseStatus::Cooldown => Style::new().yellow().bold(),
        PulseStatus::Halted | PulseStatus::AwaitingApproval => Style::new().red().bold(),
    };
    println!("{}", Style::new().bold().apply_to("Human Pulse"));
    println!("  Status: {}", status_style.apply_to(state.status));
    println!("  Batch:  {}/{}", state.batch_index, state.batch_total);
    println!("  Health: {}", health_bar(state.health));
    if state.cooldown_remaining_secs > 0 {
        println!("  Cooldown: {}m", state.cooldown_remaining_secs / 60);
    }
}

/// Imprime as linhas do ledger em formato de tabela, seguidas do resumo.
pub fn print_ledger(rows: &[[String; 7]], summary: &LedgerSummary) {
    let header = Style::new().bold();
    println!(
        "{}",
        header.apply_to(format!(
            "{:<8} {:<16} {:<30} {:<10} {:<9} {:>5} {:<14}",
            EXPORT_COLUMNS[0],
            EXPORT_COLUMNS[1],
            EXPORT_COLUMNS[2],
            EXPORT_COLUMNS[3],
            EXPORT_COLUMNS[4],
            EXPORT_COLUMNS[5],
            EXPORT_COLUMNS[6]
        ))
    );
    for [id, company, title, date, status, score, source] in rows {
        println!("{id:<8} {company:<16} {title:<30} {date:<10} {status:<9} {score:>5} {source:<14}");
    }
    println!();
    println!(
        "Total {} · Response rate {:.1}% · Interview rate {:.1}% · Avg match {:.1}",
        summary.total, summary.response_rate, summary.interview_rate, summary.avg_match_score
    );
}

/// Mostra a carta gerada e pergunta se deve enviar. Retorna `true` para aprovar.
pub fn prompt_approval(request: &ApprovalRequest) -> std::io::Result<bool> {
    let term = Term::stdout();
    term.write_line(&format!(
        "\n{} {} (match {}%)",
        Style::new().cyan().bold().apply_to("Ready to submit:"),
        request.identity,
        request.match_score
    ))?;
    term.write_line(&format!("\n{}\n", request.cover_letter))?;
    term.write_str("Approve & submit? (yes/no): ")?;
    let answer = term.read_line()?;
    Ok(is_yes(&answer))
}

/// Pergunta se o próximo lote pode começar.
pub fn prompt_next_batch() -> std::io::Result<bool> {
    let term = Term::stdout();
    term.write_str("Batch limit reached. Continue to next batch? (yes/no): ")?;
    let answer = term.read_line()?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_bar_width_is_fixed() {
        console::set_colors_enabled(false);
        let bar = health_bar(50);
        assert_eq!(bar.matches('█').count(), 15);
        assert_eq!(bar.matches('░').count(), 15);
        assert!(bar.ends_with("50/100"));
        assert_eq!(health_bar(100).matches('░').count(), 0);
    }

    #[test]
    fn yes_answers() {
        assert!(is_yes("Yes\n"));
        assert!(is_yes(" y "));
        assert!(!is_yes("no"));
        assert!(!is_yes(""));
    }
}
