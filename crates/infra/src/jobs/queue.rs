//! The job queue engine.
//!
//! Sits between the worker protocol and the store: validates dependencies on
//! enqueue, claims work and assembles dynamic arguments from dependency
//! results, hands out dispatch tokens, and concludes or cancels jobs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use kiln_core::{DispatchToken, DomainError, JobId};

use super::store::{JobStore, JobStoreError};
use super::types::{ClaimFilter, Job, JobStatus, JobType};
use crate::tokens::{TokenError, TokenRegistry};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error("unknown dependency: {0}")]
    InvalidDependency(JobId),
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("unknown dispatch token")]
    UnknownToken,
    #[error("claim already concluded")]
    ClaimConcluded,
    #[error("{0} is not a terminal status")]
    InvalidStatus(JobStatus),
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
    #[error("job store unavailable: {0}")]
    Store(JobStoreError),
}

impl From<TokenError> for QueueError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Unknown => QueueError::UnknownToken,
            TokenError::Retired => QueueError::ClaimConcluded,
        }
    }
}

impl From<JobStoreError> for QueueError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::NotFound(id) => QueueError::NotFound(id),
            JobStoreError::InvalidTransition { from, to } => QueueError::InvalidTransition { from, to },
            other => QueueError::Store(other),
        }
    }
}

/// A job handed to a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedJob {
    pub token: DispatchToken,
    pub job_id: JobId,
    pub job_type: JobType,
    pub args: Value,
    /// One entry per dependency, in declared order. `None` when the job has
    /// no dependencies.
    pub dynamic_args: Option<IndexMap<JobId, Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobDescription {
    pub job_type: JobType,
    pub args: Value,
    pub dependencies: Vec<JobId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobInfo {
    pub status: JobStatus,
    pub canceled: bool,
    pub result: Option<Value>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

pub struct JobQueue {
    store: Arc<dyn JobStore>,
    tokens: TokenRegistry,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            tokens: TokenRegistry::new(),
        }
    }

    /// Add a Pending job. Every dependency must already exist.
    #[instrument(skip(self, args, job_type), fields(job_type = %job_type), err)]
    pub async fn enqueue(
        &self,
        job_type: JobType,
        args: Value,
        dependencies: Vec<JobId>,
    ) -> Result<JobId, QueueError> {
        let mut deps: Vec<JobId> = Vec::with_capacity(dependencies.len());
        for dep in dependencies {
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
        for dep in &deps {
            match self.store.get(*dep).await {
                Ok(_) => {}
                Err(JobStoreError::NotFound(_)) => return Err(QueueError::InvalidDependency(*dep)),
                Err(e) => return Err(e.into()),
            }
        }

        let job = Job::new(job_type, args, deps);
        let id = job.id;
        self.store.create(job).await?;
        info!(job_id = %id, "job enqueued");
        Ok(id)
    }

    /// Claim the oldest runnable job of one of `kinds` on `arch`.
    ///
    /// Returns `Ok(None)` right away when nothing is runnable.
    #[instrument(skip(self, kinds), err)]
    pub async fn request_job<I, S>(&self, kinds: I, arch: &str) -> Result<Option<ClaimedJob>, QueueError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let filter = ClaimFilter::new(kinds, arch);
        let Some(job) = self.store.next(&filter).await? else {
            return Ok(None);
        };

        let dynamic_args = match self.dynamic_args(&job).await {
            Ok(args) => args,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "assembling dynamic args failed, releasing claim");
                if let Err(release) = self.store.update(job.id, Box::new(|j: &mut Job| j.release())).await {
                    warn!(job_id = %job.id, error = %release, "could not release claim");
                }
                return Err(e);
            }
        };

        let token = self.tokens.issue(job.id);
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            live_claims = self.tokens.live_count(),
            "job claimed"
        );

        Ok(Some(ClaimedJob {
            token,
            job_id: job.id,
            job_type: job.job_type,
            args: job.args,
            dynamic_args,
        }))
    }

    async fn dynamic_args(&self, job: &Job) -> Result<Option<IndexMap<JobId, Value>>, QueueError> {
        if job.dependencies.is_empty() {
            return Ok(None);
        }
        let mut args = IndexMap::with_capacity(job.dependencies.len());
        for dep in &job.dependencies {
            let dep_job = self.store.get(*dep).await?;
            args.insert(*dep, dep_job.result.unwrap_or(Value::Null));
        }
        Ok(Some(args))
    }

    /// Administrative lookup by job id.
    pub async fn job(&self, id: JobId) -> Result<JobDescription, QueueError> {
        let job = self.store.get(id).await?;
        Ok(JobDescription {
            job_type: job.job_type,
            args: job.args,
            dependencies: job.dependencies,
        })
    }

    pub async fn job_status(&self, id: JobId) -> Result<JobInfo, QueueError> {
        let job = self.store.get(id).await?;
        Ok(JobInfo {
            status: job.status,
            canceled: job.canceled,
            result: job.result,
            queued_at: job.queued_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        })
    }

    /// Conclude the claim behind `token`.
    ///
    /// `None` concludes as Finished. The token is retired on success, and
    /// also when the job turns out to be no longer Running.
    #[instrument(skip(self, result), err)]
    pub async fn update_status(
        &self,
        token: DispatchToken,
        status: Option<JobStatus>,
        result: Option<Value>,
    ) -> Result<(), QueueError> {
        let job_id = self.tokens.resolve_live(&token)?;
        let status = status.unwrap_or(JobStatus::Finished);
        if !status.is_terminal() {
            return Err(QueueError::InvalidStatus(status));
        }

        let now = Utc::now();
        match self
            .store
            .update(job_id, Box::new(move |job: &mut Job| job.conclude(status, result, now)))
            .await
        {
            Ok(_) => {
                self.tokens.retire(&token);
                info!(job_id = %job_id, %status, "job concluded");
                Ok(())
            }
            Err(JobStoreError::InvalidTransition { from, .. }) => {
                self.tokens.retire(&token);
                warn!(job_id = %job_id, %from, "update against a job that is no longer running");
                Err(QueueError::ClaimConcluded)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Set the canceled flag. Idempotent, works in any status.
    #[instrument(skip(self), err)]
    pub async fn cancel(&self, id: JobId) -> Result<(), QueueError> {
        self.store
            .update(
                id,
                Box::new(|job: &mut Job| {
                    job.cancel();
                    Ok(())
                }),
            )
            .await?;
        info!(job_id = %id, "job canceled");
        Ok(())
    }

    /// Cancellation check for workers. Answers for retired tokens too.
    pub async fn is_canceled(&self, token: DispatchToken) -> Result<bool, QueueError> {
        let job_id = self.tokens.resolve(&token)?;
        Ok(self.store.get(job_id).await?.canceled)
    }

    /// Job id behind a token whose claim is still live.
    pub fn live_claim(&self, token: DispatchToken) -> Result<JobId, QueueError> {
        Ok(self.tokens.resolve_live(&token)?)
    }
}
