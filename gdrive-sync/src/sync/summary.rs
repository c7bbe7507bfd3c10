use super::model::{DownloadTask, SyncFailure, SyncOutcome};

/// Final result of one run. Built once by [`SyncSummary::aggregate`].
#[derive(Debug, Default)]
pub struct SyncSummary {
    successes: Vec<DownloadTask>,
    failures: Vec<SyncFailure>,
}

impl SyncSummary {
    /// Planning failures come first, then download failures in outcome order.
    pub fn aggregate(planning_failures: Vec<SyncFailure>, outcomes: Vec<SyncOutcome>) -> Self {
        let mut successes = Vec::new();
        let mut failures = planning_failures;
        for outcome in outcomes {
            match outcome {
                SyncOutcome::Succeeded(task) => successes.push(task),
                SyncOutcome::Failed(failure) => failures.push(failure),
            }
        }
        Self {
            successes,
            failures,
        }
    }

    pub fn successes(&self) -> &[DownloadTask] {
        &self.successes
    }

    pub fn failures(&self) -> &[SyncFailure] {
        &self.failures
    }

    pub fn success_count(&self) -> usize {
        self.successes.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn total(&self) -> usize {
        self.successes.len() + self.failures.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::model::{EntryError, RemoteEntry};
    use crate::sync::resolver::ResolveError;
    use std::path::PathBuf;
    use std::time::Duration;

    fn task(id: &str) -> DownloadTask {
        DownloadTask::new(
            RemoteEntry::new(id, format!("{id}.txt")),
            PathBuf::from(format!("/d/{id}.txt")),
        )
    }

    #[test]
    fn planning_failures_precede_download_failures() {
        let planning = vec![SyncFailure::planning(
            RemoteEntry::new("p", ""),
            None,
            EntryError::Resolve(ResolveError::Unnamed("p".into())),
        )];
        let outcomes = vec![
            SyncOutcome::Succeeded(task("a")),
            SyncOutcome::Failed(SyncFailure::for_task(
                task("b"),
                EntryError::Timeout(Duration::from_secs(1)),
            )),
            SyncOutcome::Succeeded(task("c")),
        ];

        let summary = SyncSummary::aggregate(planning, outcomes);

        assert_eq!(summary.total(), 4);
        assert_eq!(summary.success_count(), 2);
        assert_eq!(summary.failure_count(), 2);
        let failed: Vec<_> = summary.failures().iter().map(|f| f.entry.id.as_str()).collect();
        assert_eq!(failed, vec!["p", "b"]);
        let succeeded: Vec<_> = summary.successes().iter().map(|t| t.entry.id.as_str()).collect();
        assert_eq!(succeeded, vec!["a", "c"]);
    }

    #[test]
    fn empty_run_has_zero_total() {
        let summary = SyncSummary::aggregate(Vec::new(), Vec::new());
        assert_eq!(summary.total(), 0);
        assert!(summary.successes().is_empty());
    }
}
