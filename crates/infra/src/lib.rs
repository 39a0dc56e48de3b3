//! Infrastructure layer: job storage, the queue engine, dispatch tokens,
//! artifact storage, and configuration.

pub mod artifacts;
pub mod config;
pub mod jobs;
pub mod tokens;

pub use artifacts::{ArtifactError, ArtifactStore};
pub use config::{ConfigError, ServerConfig, StoreBackend};
pub use jobs::{
    ClaimFilter, ClaimedJob, Job, JobDescription, JobInfo, JobQueue, JobStatus, JobStore,
    JobStoreError, JobType, LocalJobStore, QueueError, open_store,
};
pub use tokens::{TokenError, TokenRegistry};
