//! Job storage: the durable queue underneath the engine.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use kiln_core::JobId;

use super::types::{ClaimFilter, Job, JobStatus};

/// All-or-nothing mutation of one record. If it returns an error the stored
/// record is left untouched.
pub type JobMutator = Box<dyn FnOnce(&mut Job) -> Result<(), JobStoreError> + Send>;

/// Job store abstraction.
///
/// Implementations must make `update` and `next` atomic per record, and must
/// never hand the same Pending record to two `next` callers.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new record. Fails if the id already exists.
    async fn create(&self, job: Job) -> Result<(), JobStoreError>;

    /// Read a record by id.
    async fn get(&self, id: JobId) -> Result<Job, JobStoreError>;

    /// Apply `mutator` atomically and return the updated record.
    async fn update(&self, id: JobId, mutator: JobMutator) -> Result<Job, JobStoreError>;

    /// Claim the oldest Pending job matching `filter` whose dependencies are
    /// all Finished, marking it Running. `None` when nothing matches now.
    async fn next(&self, filter: &ClaimFilter) -> Result<Option<Job>, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
    #[error("unreadable job record {path}: {message}")]
    Corrupt { path: String, message: String },
    #[error("storage error: {0}")]
    Storage(String),
}

type Record = Arc<Mutex<Job>>;

#[derive(Default)]
struct Index {
    records: HashMap<JobId, Record>,
    /// Ids that were Pending when last touched. Claims scan this in id order,
    /// which is enqueue order for UUIDv7 ids.
    pending: BTreeSet<JobId>,
}

/// Store kept in process memory, optionally backed by one JSON file per job.
///
/// Each record sits behind its own async mutex; the index lock is only held
/// for map lookups and never across an await, so work on different jobs does
/// not serialize. With a root directory every change is written (temp file +
/// rename) before the in-memory copy is replaced, and the directory is
/// reloaded on startup.
///
/// A claim holds the candidate's lock while it inspects the candidate's
/// dependencies. Dependencies always predate their dependents, so locks are
/// only ever taken from a job towards its dependencies and cannot cycle.
pub struct LocalJobStore {
    root: Option<PathBuf>,
    index: RwLock<Index>,
}

impl LocalJobStore {
    /// Volatile store for tests/dev.
    pub fn in_memory() -> Self {
        Self {
            root: None,
            index: RwLock::new(Index::default()),
        }
    }

    /// Open (or create) a filesystem-backed store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, JobStoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| storage_error("create store directory", &root, e))?;

        let mut index = Index::default();
        let mut entries = tokio::fs::read_dir(&root)
            .await
            .map_err(|e| storage_error("read store directory", &root, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_error("read store directory", &root, e))?
        {
            let path = entry.path();
            if !is_record_file(&path) {
                continue;
            }
            let job = read_record(&path).await?;
            if job.status == JobStatus::Pending {
                index.pending.insert(job.id);
            }
            index.records.insert(job.id, Arc::new(Mutex::new(job)));
        }

        debug!(root = %root.display(), jobs = index.records.len(), "opened job store");

        Ok(Self {
            root: Some(root),
            index: RwLock::new(index),
        })
    }

    fn read_index(&self) -> RwLockReadGuard<'_, Index> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, Index> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, id: JobId) -> Result<Record, JobStoreError> {
        self.read_index()
            .records
            .get(&id)
            .cloned()
            .ok_or(JobStoreError::NotFound(id))
    }

    async fn persist(&self, job: &Job) -> Result<(), JobStoreError> {
        let Some(root) = &self.root else {
            return Ok(());
        };

        let path = root.join(format!("{}.json", job.id));
        let tmp = root.join(format!(".{}.json.tmp", job.id));
        let bytes = serde_json::to_vec_pretty(job)
            .map_err(|e| JobStoreError::Storage(format!("serialize job {}: {e}", job.id)))?;

        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| storage_error("write job record", &tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| storage_error("commit job record", &path, e))?;
        Ok(())
    }

    async fn dependencies_finished(&self, job: &Job) -> Result<bool, JobStoreError> {
        for dep in &job.dependencies {
            let record = match self.record(*dep) {
                Ok(record) => record,
                Err(JobStoreError::NotFound(_)) => {
                    warn!(job_id = %job.id, dependency = %dep, "dependency record missing");
                    return Ok(false);
                }
                Err(e) => return Err(e),
            };
            if record.lock().await.status != JobStatus::Finished {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl JobStore for LocalJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id), err)]
    async fn create(&self, job: Job) -> Result<(), JobStoreError> {
        let id = job.id;
        if self.read_index().records.contains_key(&id) {
            return Err(JobStoreError::AlreadyExists(id));
        }

        self.persist(&job).await?;

        let mut index = self.write_index();
        if index.records.contains_key(&id) {
            return Err(JobStoreError::AlreadyExists(id));
        }
        if job.status == JobStatus::Pending {
            index.pending.insert(id);
        }
        index.records.insert(id, Arc::new(Mutex::new(job)));
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Job, JobStoreError> {
        let record = self.record(id)?;
        let job = record.lock().await.clone();
        Ok(job)
    }

    #[instrument(skip(self, mutator), err)]
    async fn update(&self, id: JobId, mutator: JobMutator) -> Result<Job, JobStoreError> {
        let record = self.record(id)?;
        let mut guard = record.lock().await;

        let mut next = guard.clone();
        mutator(&mut next)?;
        self.persist(&next).await?;

        if guard.status == JobStatus::Pending && next.status != JobStatus::Pending {
            self.write_index().pending.remove(&id);
        } else if guard.status != JobStatus::Pending && next.status == JobStatus::Pending {
            self.write_index().pending.insert(id);
        }
        *guard = next;
        Ok(guard.clone())
    }

    #[instrument(skip(self), err)]
    async fn next(&self, filter: &ClaimFilter) -> Result<Option<Job>, JobStoreError> {
        let candidates: Vec<(JobId, Record)> = {
            let index = self.read_index();
            index
                .pending
                .iter()
                .filter_map(|id| index.records.get(id).map(|r| (*id, r.clone())))
                .collect()
        };

        for (id, record) in candidates {
            let mut guard = record.lock().await;
            // Re-checked under the record lock: another caller may have
            // claimed it since the snapshot.
            if !filter.matches(&guard) {
                continue;
            }
            if !self.dependencies_finished(&guard).await? {
                continue;
            }

            let mut claimed = guard.clone();
            claimed.mark_running(Utc::now())?;
            self.persist(&claimed).await?;

            self.write_index().pending.remove(&id);
            *guard = claimed;
            return Ok(Some(guard.clone()));
        }

        Ok(None)
    }
}

fn is_record_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    !name.starts_with('.') && name.ends_with(".json")
}

async fn read_record(path: &Path) -> Result<Job, JobStoreError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| storage_error("read job record", path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| JobStoreError::Corrupt {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn storage_error(what: &str, path: &Path, err: std::io::Error) -> JobStoreError {
    JobStoreError::Storage(format!("{what} {}: {err}", path.display()))
}
