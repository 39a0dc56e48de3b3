use std::sync::Arc;

use tracing::{info, warn};

use kiln_infra::{ArtifactStore, JobQueue, JobStore, JobStoreError, ServerConfig, StoreBackend, open_store};

/// Shared state behind every handler.
pub struct AppServices {
    pub queue: JobQueue,
    pub artifacts: ArtifactStore,
}

impl AppServices {
    pub fn new(store: Arc<dyn JobStore>, artifacts: ArtifactStore) -> Self {
        Self {
            queue: JobQueue::new(store),
            artifacts,
        }
    }

    /// In-memory jobs, uploads discarded (dev/test).
    pub fn in_memory() -> Self {
        Self::new(Arc::new(kiln_infra::LocalJobStore::in_memory()), ArtifactStore::new(None))
    }
}

pub async fn build_services(config: &ServerConfig) -> Result<AppServices, JobStoreError> {
    match &config.store {
        StoreBackend::Memory => {
            warn!("KILN_STATE_DIR not set; jobs are kept in memory and lost on restart");
        }
        StoreBackend::Filesystem(root) => info!(root = %root.display(), "using filesystem job store"),
        #[cfg(feature = "postgres")]
        StoreBackend::Postgres(_) => info!("using postgres job store"),
    }
    let store = open_store(&config.store).await?;

    let artifacts = ArtifactStore::new(config.artifacts_dir.clone());
    if !artifacts.is_configured() {
        warn!("KILN_ARTIFACTS_DIR not set; uploaded artifacts will be discarded");
    }

    Ok(AppServices::new(store, artifacts))
}
