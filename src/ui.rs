//! Interface de terminal do agentik: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`JobProgress`] acompanha visualmente
//! o registro de status de um job no terminal.

use std::collections::BTreeMap;
use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::job::{JobStatus, StatusRecord};
use crate::orchestrator::Heartbeat;
use crate::retry::AuditEntry;
use crate::workflow::WorkflowRegistry;

/// Indicador visual de progresso para um job acompanhado no terminal.
///
/// Exibe um spinner animado enquanto o job avança pelos estágios e mensagens
/// coloridas para sucesso (verde), falha (vermelho) e progresso (amarelo).
pub struct JobProgress {
    // Spinner do indicatif.
    pb: ProgressBar,
    green: Style,
    red: Style,
    // Último marcador de estágio impresso, para não repetir linhas.
    last_stage: Option<String>,
}

impl JobProgress {
    /// Inicia o spinner para o job e retorna a instância de progresso.
    pub fn start(job_id: &str, job_type: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("{job_type} {job_id}: queued"));
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            last_stage: None,
        }
    }

    /// Atualiza o spinner com o status atual; cada novo estágio vira uma linha.
    pub fn update(&mut self, record: &StatusRecord) {
        if let Some(marker) = &record.stage {
            if self.last_stage.as_ref() != Some(marker) {
                self.pb
                    .println(format!("  {} {marker}", Style::new().yellow().apply_to("›")));
                self.last_stage = Some(marker.clone());
            }
        }
        let current = record.current_stage.as_deref().unwrap_or("-");
        self.pb
            .set_message(format!("{} · {current}", record.status));
    }

    /// Finaliza o spinner e exibe o resultado final do job.
    pub fn complete(&self, record: &StatusRecord) {
        self.pb.finish_and_clear();
        match record.status {
            JobStatus::Completed => {
                println!("  {} Job {} completed", self.green.apply_to("✓"), record.job_id);
            }
            _ => {
                let error = record.error.as_deref().unwrap_or("unknown error");
                println!("  {} Job {} failed: {error}", self.red.apply_to("✗"), record.job_id);
            }
        }
    }
}

fn status_style(status: JobStatus) -> Style {
    match status {
        JobStatus::Completed => Style::new().green().bold(),
        JobStatus::Failed => Style::new().red().bold(),
        _ => Style::new().yellow(),
    }
}

/// Imprime o registro de status formatado em JSON com cabeçalho colorido.
pub fn print_status(record: &StatusRecord) {
    println!(
        "{}",
        status_style(record.status).apply_to(format!("─── {} · {} ───", record.job_id, record.status))
    );
    println!("{}", serde_json::to_string_pretty(record).unwrap_or_default());
}

/// Uma linha por job: id, tipo, status e estágio.
pub fn print_job_list(records: &[StatusRecord]) {
    if records.is_empty() {
        println!("{}", Style::new().dim().apply_to("no jobs"));
        return;
    }
    for record in records {
        println!(
            "{}  {:<20} {:<12} {}",
            record.job_id,
            record.job_type.as_deref().unwrap_or("-"),
            status_style(record.status).apply_to(record.status),
            record.stage.as_deref().unwrap_or("-"),
        );
    }
}

/// Uma linha por tentativa, da mais antiga para a mais recente.
pub fn print_audit(agent: &str, entries: &[AuditEntry]) {
    if entries.is_empty() {
        println!("{}", Style::new().dim().apply_to(format!("no audit entries for {agent}")));
        return;
    }
    for entry in entries {
        let outcome = if entry.success {
            Style::new().green().apply_to("ok")
        } else {
            Style::new().red().apply_to("failed")
        };
        println!(
            "{}  {}  #{} {outcome} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.job_id,
            entry.attempt,
            entry.error.as_deref().unwrap_or(""),
        );
    }
}

pub fn print_queues(depths: &BTreeMap<String, usize>) {
    let bold = Style::new().bold();
    for (queue, depth) in depths {
        let style = if *depth > 0 { Style::new().yellow() } else { Style::new().dim() };
        println!("{:<22} {}", bold.apply_to(queue), style.apply_to(depth));
    }
}

pub fn print_heartbeat(heartbeat: Option<&Heartbeat>) {
    let Some(beat) = heartbeat else {
        println!("{}", Style::new().red().apply_to("no heartbeat recorded"));
        return;
    };
    let state = if beat.running {
        Style::new().green().bold().apply_to("running")
    } else {
        Style::new().red().bold().apply_to("stopped")
    };
    println!("{state} at {} (v{})", beat.ts, beat.version);
    println!("agents: {}", beat.agents.join(", "));
    for (queue, depth) in &beat.queues {
        let depth = depth.map_or_else(|| "?".to_string(), |d| d.to_string());
        println!("  {queue:<20} {depth}");
    }
}

pub fn print_workflows(registry: &WorkflowRegistry) {
    let bold = Style::new().bold();
    for workflow in registry.iter() {
        println!("{}: {}", bold.apply_to(&workflow.name), workflow.stages.join(" → "));
    }
    for (alias, target) in registry.aliases() {
        println!("{} → {target}", Style::new().dim().apply_to(alias));
    }
}
