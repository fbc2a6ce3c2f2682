//! End-of-run statistics and the plain-text report written next to the
//! portal's outputs.

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::job::{Period, Portal, TaskResult, TaskStatus};
use crate::sanitize::redact_path;
use crate::sink::ResultSink;

/// How a run ended, as far as the operator is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every task succeeded or found no data.
    Success,
    /// At least one task failed.
    Partial,
    Cancelled,
    /// Pre-flight checks rejected the job; no task ran.
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatistics {
    pub run_id: String,
    pub portal: Portal,
    pub period: Period,
    pub total: usize,
    pub succeeded: usize,
    pub no_data: usize,
    pub failed: usize,
    /// Recorded results in the order they arrived.
    pub results: Vec<TaskResult>,
    pub started_at: DateTime<Local>,
    pub ended_at: Option<DateTime<Local>>,
    pub cancel_requested: bool,
    /// Pre-flight failure that stopped the run before any task.
    pub abort_reason: Option<String>,
    pub report_path: Option<PathBuf>,
}

impl RunStatistics {
    pub fn new(run_id: impl Into<String>, portal: Portal, period: Period, total: usize) -> Self {
        Self {
            run_id: run_id.into(),
            portal,
            period,
            total,
            succeeded: 0,
            no_data: 0,
            failed: 0,
            results: Vec::new(),
            started_at: Local::now(),
            ended_at: None,
            cancel_requested: false,
            abort_reason: None,
            report_path: None,
        }
    }

    /// Statistics for a run that never started.
    pub fn aborted(run_id: impl Into<String>, portal: Portal, period: Period, reason: String) -> Self {
        let mut stats = Self::new(run_id, portal, period, 0);
        stats.abort_reason = Some(reason);
        stats.ended_at = Some(Local::now());
        stats
    }

    pub fn record(&mut self, result: TaskResult) {
        match result.status {
            TaskStatus::Succeeded => self.succeeded += 1,
            TaskStatus::NoData => self.no_data += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Cancelled => {}
        }
        self.results.push(result);
    }

    pub fn finish(&mut self, cancel_requested: bool) {
        self.cancel_requested = cancel_requested;
        self.ended_at = Some(Local::now());
    }

    /// Tasks that never reached a verdict, started or not.
    pub fn cancelled(&self) -> usize {
        self.total
            .saturating_sub(self.succeeded + self.no_data + self.failed)
    }

    pub fn completed(&self) -> usize {
        self.succeeded + self.no_data + self.failed
    }

    /// Percentage of all tasks that succeeded or found no data.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.succeeded + self.no_data) as f64 * 100.0 / self.total as f64
    }

    pub fn outcome(&self) -> RunOutcome {
        if self.abort_reason.is_some() {
            RunOutcome::Aborted
        } else if self.cancel_requested && self.cancelled() > 0 {
            RunOutcome::Cancelled
        } else if self.failed > 0 {
            RunOutcome::Partial
        } else {
            RunOutcome::Success
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskResult> {
        self.results.iter().filter(|r| r.status == TaskStatus::Failed)
    }

    pub fn successes(&self) -> impl Iterator<Item = &TaskResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.status, TaskStatus::Succeeded | TaskStatus::NoData))
    }
}

fn header(outcome: RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::Success => "COLETA CONCLUÍDA COM SUCESSO",
        RunOutcome::Partial => "COLETA CONCLUÍDA COM FALHAS",
        RunOutcome::Cancelled => "COLETA CANCELADA PELO USUÁRIO",
        RunOutcome::Aborted => "COLETA NÃO INICIADA (VERIFICAÇÃO INICIAL FALHOU)",
    }
}

fn duration_label(stats: &RunStatistics) -> String {
    let ended = stats.ended_at.unwrap_or_else(Local::now);
    let secs = (ended - stats.started_at).num_seconds().max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Renders and writes the run report.
#[derive(Debug, Clone)]
pub struct RunReporter {
    include_success_list: bool,
}

impl RunReporter {
    pub fn new(include_success_list: bool) -> Self {
        Self {
            include_success_list,
        }
    }

    pub fn file_name(stats: &RunStatistics, sink: &ResultSink) -> String {
        format!(
            "RELATORIO_{}_{}.txt",
            stats.portal.report_code(),
            sink.run_date().format("%Y-%m-%d")
        )
    }

    pub fn render(&self, stats: &RunStatistics) -> String {
        let rule = "=".repeat(70);
        let mut out = String::new();

        // Writing into a String cannot fail.
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "RELATÓRIO DE COLETA - {}", stats.portal.display_name());
        let _ = writeln!(out, "{}", header(stats.outcome()));
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "Data: {}", Local::now().format("%d/%m/%Y %H:%M:%S"));
        let _ = writeln!(out, "Execução: {}", stats.run_id);
        let _ = writeln!(out, "Período: {}", stats.period);
        let _ = writeln!(out, "Duração: {}", duration_label(stats));

        if let Some(reason) = &stats.abort_reason {
            let _ = writeln!(out);
            let _ = writeln!(out, "Motivo: {}", reason);
            return out;
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "TOTAIS");
        let _ = writeln!(out, "  Municípios: {}", stats.total);
        let _ = writeln!(out, "  Sucesso: {}", stats.succeeded);
        let _ = writeln!(out, "  Sem dados: {}", stats.no_data);
        let _ = writeln!(out, "  Falhas: {}", stats.failed);
        if stats.cancelled() > 0 {
            let _ = writeln!(out, "  Não concluídos: {}", stats.cancelled());
        }
        let _ = writeln!(out, "  Taxa de sucesso: {:.1}%", stats.success_rate());

        if self.include_success_list && stats.succeeded + stats.no_data > 0 {
            let _ = writeln!(out);
            let _ = writeln!(out, "MUNICÍPIOS CONCLUÍDOS");
            for result in stats.successes() {
                let detail = if result.status == TaskStatus::NoData {
                    "sem dados".to_string()
                } else {
                    result
                        .outputs
                        .iter()
                        .map(|p| redact_path(p))
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                let _ = writeln!(out, "  - {} ({})", result.task.municipality, detail);
            }
        }

        if stats.failed > 0 {
            let _ = writeln!(out);
            let _ = writeln!(out, "FALHAS");
            for (i, result) in stats.failures().enumerate() {
                let (kind, message) = match &result.error {
                    Some(e) => (e.kind.to_string(), e.message.as_str()),
                    None => ("Unexpected".to_string(), ""),
                };
                let _ = writeln!(
                    out,
                    "  {}. {} [{}] {}",
                    i + 1,
                    result.task.municipality,
                    kind,
                    message
                );
            }
        }
        out
    }

    /// Writes the report into the portal's output folder. Failures are
    /// logged and never reach the caller.
    pub fn write(&self, stats: &RunStatistics, sink: &ResultSink) -> Option<PathBuf> {
        let dir = sink.portal_dir(stats.portal);
        let path = dir.join(Self::file_name(stats, sink));

        let written = std::fs::create_dir_all(&dir)
            .and_then(|()| std::fs::write(&path, self.render(stats)));
        match written {
            Ok(()) => {
                info!(file = %redact_path(&path), outcome = ?stats.outcome(), "Run report written");
                Some(path)
            }
            Err(e) => {
                warn!(file = %redact_path(&path), error = %e, "Could not write run report");
                None
            }
        }
    }
}
