//! Job queue: records, storage, and the dispatch engine.
//!
//! ## Components
//!
//! - `Job`: the persisted record (type, args, dependencies, status, canceled flag)
//! - `JobStore`: atomic create / get / update / claim-next over some medium
//! - `JobQueue`: enqueue, claim with dynamic args, conclusion, cancellation

#[cfg(feature = "postgres")]
pub mod postgres;
pub mod queue;
pub mod store;
pub mod types;

use std::sync::Arc;

#[cfg(feature = "postgres")]
pub use postgres::PostgresJobStore;
pub use queue::{ClaimedJob, JobDescription, JobInfo, JobQueue, QueueError};
pub use store::{JobMutator, JobStore, JobStoreError, LocalJobStore};
pub use types::{ClaimFilter, Job, JobStatus, JobType};

use crate::config::StoreBackend;

/// Open the store selected by configuration.
pub async fn open_store(backend: &StoreBackend) -> Result<Arc<dyn JobStore>, JobStoreError> {
    match backend {
        StoreBackend::Memory => Ok(Arc::new(LocalJobStore::in_memory())),
        StoreBackend::Filesystem(root) => Ok(Arc::new(LocalJobStore::open(root.clone()).await?)),
        #[cfg(feature = "postgres")]
        StoreBackend::Postgres(url) => {
            let store = PostgresJobStore::connect(url).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
    }
}
