pub mod backoff;
pub mod engine;
pub mod model;
pub mod orchestrator;
pub mod paths;
pub mod planner;
pub mod progress;
pub mod remote;
pub mod resolver;
pub mod summary;
pub mod transfer;

#[cfg(test)]
pub(crate) mod test_support;

pub use engine::SyncEngine;
pub use model::{DownloadTask, EntryError, RemoteEntry, SyncFailure, SyncOutcome};
pub use orchestrator::{DEFAULT_BATCH_SIZE, DownloadOrchestrator, OrchestratorConfig};
pub use planner::{PlanError, SyncPlan, SyncPlanner};
pub use progress::{
    ChannelProgress, DownloadProgress, DownloadStatus, NoopProgress, ProgressEvent,
    ProgressObserver, TracingProgress,
};
pub use remote::{
    ByteStream, ContentFetcher, DriveRemote, EntryFetcher, MAX_REMOTE_ATTEMPTS, RemoteError,
    RemoteLister, RemotePage,
};
pub use resolver::{MAX_DEPTH, PathResolver, ResolveError};
pub use summary::SyncSummary;
