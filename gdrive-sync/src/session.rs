use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use time::OffsetDateTime;
use time::macros::format_description;

use crate::auth::{Authorizer, ENV_OAUTH_MANUAL, ENV_TOKEN};
use crate::config::SyncConfig;
use crate::sync::{SyncEngine, SyncSummary, TracingProgress};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Authorizing,
    Planning,
    Downloading,
    Summarizing,
    Done,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Idle => "idle",
            RunPhase::Authorizing => "authorizing",
            RunPhase::Planning => "planning",
            RunPhase::Downloading => "downloading",
            RunPhase::Summarizing => "summarizing",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One mirror run from authorization to the summary report.
pub struct SyncRuntime {
    config: SyncConfig,
    phase: RunPhase,
    history: Vec<RunPhase>,
}

impl SyncRuntime {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            phase: RunPhase::Idle,
            history: vec![RunPhase::Idle],
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Every phase the run has entered, in order.
    pub fn history(&self) -> &[RunPhase] {
        &self.history
    }

    pub async fn run(&mut self) -> anyhow::Result<SyncSummary> {
        self.transition(RunPhase::Authorizing);
        let manual = std::env::var(ENV_OAUTH_MANUAL)
            .map(|value| matches!(value.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let authorizer = Authorizer::from_config(&self.config).manual(manual);
        let remote = match authorizer
            .connect(&self.config.remote_folder_id, std::env::var(ENV_TOKEN).ok())
            .await
        {
            Ok(remote) => remote.with_page_size(self.config.page_size),
            Err(err) => {
                self.transition(RunPhase::Failed);
                return Err(err);
            }
        };

        let engine = SyncEngine::new(Arc::new(remote))
            .with_top_folder(self.config.include_top_folder)
            .with_orchestrator_config(self.config.orchestrator_config())
            .with_observer(Arc::new(TracingProgress));
        self.run_with_engine(&engine).await
    }

    /// Runs planning and downloads on an already authorized engine.
    pub async fn run_with_engine(&mut self, engine: &SyncEngine) -> anyhow::Result<SyncSummary> {
        let started_at = OffsetDateTime::now_utc();

        self.transition(RunPhase::Planning);
        let plan = match engine
            .plan(
                &self.config.remote_folder_id,
                &self.config.destination_path,
                self.config.force_downloads,
            )
            .await
            .context("failed to plan the sync")
        {
            Ok(plan) => plan,
            Err(err) => {
                self.transition(RunPhase::Failed);
                return Err(err);
            }
        };
        tracing::info!(
            scheduled = plan.tasks.len(),
            visited = plan.visited,
            failed = plan.failures.len(),
            "plan ready"
        );

        self.transition(RunPhase::Downloading);
        let outcomes = engine.download(plan.tasks).await;

        self.transition(RunPhase::Summarizing);
        let summary = SyncSummary::aggregate(plan.failures, outcomes);
        let report = RunReport {
            started_at,
            finished_at: OffsetDateTime::now_utc(),
            summary: &summary,
        };

        self.transition(RunPhase::Done);
        report.log();
        Ok(summary)
    }

    fn transition(&mut self, next: RunPhase) {
        tracing::info!(from = %self.phase, to = %next, "sync phase");
        self.phase = next;
        self.history.push(next);
    }
}

struct RunReport<'a> {
    started_at: OffsetDateTime,
    finished_at: OffsetDateTime,
    summary: &'a SyncSummary,
}

impl RunReport<'_> {
    fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("started:   {}", format_timestamp(self.started_at)),
            format!("finished:  {}", format_timestamp(self.finished_at)),
            format!(
                "run time:  {}",
                format_runtime(self.finished_at - self.started_at)
            ),
            format!("total:     {}", self.summary.total()),
            format!("succeeded: {}", self.summary.success_count()),
            format!("failed:    {}", self.summary.failure_count()),
        ];
        for failure in self.summary.failures() {
            let destination = failure
                .destination
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "-".to_string());
            lines.push(format!(
                "  {} -> {}: {}",
                failure.entry.display_name(),
                destination,
                failure.error
            ));
        }
        lines
    }

    fn log(&self) {
        for line in self.lines() {
            tracing::info!("{line}");
        }
    }
}

fn format_timestamp(at: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second] UTC");
    at.format(&format).unwrap_or_else(|_| at.to_string())
}

fn format_runtime(elapsed: time::Duration) -> String {
    let millis = elapsed.whole_milliseconds().max(0);
    let secs = millis / 1000;
    if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}.{:03}s", secs, millis % 1000)
    }
}
