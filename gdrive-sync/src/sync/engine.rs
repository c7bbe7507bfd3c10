use std::path::Path;
use std::sync::Arc;

use super::backoff::Backoff;
use super::model::{DownloadTask, SyncOutcome};
use super::orchestrator::{DownloadOrchestrator, OrchestratorConfig};
use super::planner::{PlanError, SyncPlan, SyncPlanner};
use super::progress::{NoopProgress, ProgressObserver};
use super::remote::{ContentFetcher, EntryFetcher, RemoteLister};
use super::summary::SyncSummary;

/// Wires planner, orchestrator and aggregation for a single run. Each call
/// to [`SyncEngine::plan`] starts with an empty parent cache.
pub struct SyncEngine {
    lister: Arc<dyn RemoteLister>,
    fetcher: Arc<dyn EntryFetcher>,
    content: Arc<dyn ContentFetcher>,
    observer: Arc<dyn ProgressObserver>,
    include_top_folder: bool,
    orchestrator: OrchestratorConfig,
    backoff: Backoff,
}

impl SyncEngine {
    pub fn new<R>(remote: Arc<R>) -> Self
    where
        R: RemoteLister + EntryFetcher + ContentFetcher + 'static,
    {
        Self {
            lister: remote.clone(),
            fetcher: remote.clone(),
            content: remote,
            observer: Arc::new(NoopProgress),
            include_top_folder: true,
            orchestrator: OrchestratorConfig::default(),
            backoff: Backoff::default(),
        }
    }

    pub fn with_top_folder(mut self, include: bool) -> Self {
        self.include_top_folder = include;
        self
    }

    pub fn with_orchestrator_config(mut self, config: OrchestratorConfig) -> Self {
        self.orchestrator = config;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub async fn plan(
        &self,
        remote_folder_id: &str,
        local_root: &Path,
        force_downloads: bool,
    ) -> Result<SyncPlan, PlanError> {
        SyncPlanner::new(self.lister.as_ref(), self.fetcher.as_ref())
            .with_top_folder(self.include_top_folder)
            .with_backoff(self.backoff)
            .plan(remote_folder_id, local_root, force_downloads)
            .await
    }

    pub async fn download(&self, tasks: Vec<DownloadTask>) -> Vec<SyncOutcome> {
        DownloadOrchestrator::new(Arc::clone(&self.content), self.orchestrator)
            .with_observer(Arc::clone(&self.observer))
            .execute(tasks)
            .await
    }

    pub async fn run(
        &self,
        remote_folder_id: &str,
        local_root: &Path,
        force_downloads: bool,
    ) -> Result<SyncSummary, PlanError> {
        let plan = self.plan(remote_folder_id, local_root, force_downloads).await?;
        let outcomes = self.download(plan.tasks).await;
        Ok(SyncSummary::aggregate(plan.failures, outcomes))
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
