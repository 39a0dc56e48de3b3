//! Core job record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kiln_core::{DomainError, DomainResult, JobId};

use super::store::JobStoreError;

/// What a job is and which architecture it must run on.
///
/// Rendered as `kind:arch` (e.g. `osbuild:x86_64`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobType {
    pub kind: String,
    pub arch: String,
}

impl JobType {
    pub fn new(kind: impl Into<String>, arch: impl Into<String>) -> DomainResult<Self> {
        let kind = kind.into();
        let arch = arch.into();
        if kind.trim().is_empty() || arch.trim().is_empty() {
            return Err(DomainError::validation("job kind and architecture must not be empty"));
        }
        if kind.contains(':') || arch.contains(':') {
            return Err(DomainError::validation("job kind and architecture must not contain ':'"));
        }
        Ok(Self { kind, arch })
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.arch)
    }
}

impl std::str::FromStr for JobType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, arch) = s
            .split_once(':')
            .ok_or_else(|| DomainError::validation(format!("job type '{s}' is not kind:arch")))?;
        Self::new(kind, arch)
    }
}

/// Job lifecycle status.
///
/// `Pending → Running` happens once (the claim); `Running → Finished | Failed`
/// happens once (the conclusion). Cancellation is a separate flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Finished,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Finished => "FINISHED",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "RUNNING" => Ok(JobStatus::Running),
            "FINISHED" => Ok(JobStatus::Finished),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(DomainError::validation(format!("unknown job status '{other}'"))),
        }
    }
}

/// A persisted job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    /// Opaque, caller-owned payload handed to the worker unchanged.
    pub args: serde_json::Value,
    /// Jobs whose results feed this one. Fixed at enqueue.
    pub dependencies: Vec<JobId>,
    pub status: JobStatus,
    /// Monotonic: once set it is never cleared.
    pub canceled: bool,
    pub result: Option<serde_json::Value>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(job_type: JobType, args: serde_json::Value, dependencies: Vec<JobId>) -> Self {
        Self {
            id: JobId::new(),
            job_type,
            args,
            dependencies,
            status: JobStatus::Pending,
            canceled: false,
            result: None,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Claim transition. Callers hold the record lock.
    pub fn mark_running(&mut self, now: DateTime<Utc>) -> Result<(), JobStoreError> {
        if self.status != JobStatus::Pending {
            return Err(JobStoreError::InvalidTransition {
                from: self.status,
                to: JobStatus::Running,
            });
        }
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        Ok(())
    }

    /// Put a claimed job back in the queue. Only used when a claim could not
    /// be handed out after the store already marked it running.
    pub fn release(&mut self) -> Result<(), JobStoreError> {
        if self.status != JobStatus::Running {
            return Err(JobStoreError::InvalidTransition {
                from: self.status,
                to: JobStatus::Pending,
            });
        }
        self.status = JobStatus::Pending;
        self.started_at = None;
        Ok(())
    }

    /// Conclusion transition: `Running → Finished | Failed`, at most once.
    pub fn conclude(
        &mut self,
        status: JobStatus,
        result: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<(), JobStoreError> {
        if self.status != JobStatus::Running || !status.is_terminal() {
            return Err(JobStoreError::InvalidTransition {
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        self.result = result;
        self.finished_at = Some(now);
        Ok(())
    }

    pub fn cancel(&mut self) {
        self.canceled = true;
    }
}

/// Claim predicate, expressed as data so database-backed stores can evaluate
/// it in a query.
///
/// Matches a Pending job whose kind is one of `kinds` and whose architecture
/// equals `arch`. The "all dependencies finished" half of the predicate needs
/// other records and is checked by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimFilter {
    pub kinds: Vec<String>,
    pub arch: String,
}

impl ClaimFilter {
    pub fn new(kinds: impl IntoIterator<Item = impl Into<String>>, arch: impl Into<String>) -> Self {
        Self {
            kinds: kinds.into_iter().map(Into::into).collect(),
            arch: arch.into(),
        }
    }

    pub fn matches(&self, job: &Job) -> bool {
        job.status == JobStatus::Pending
            && job.job_type.arch == self.arch
            && self.kinds.iter().any(|k| *k == job.job_type.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_job() -> Job {
        Job::new(
            JobType::new("osbuild", "x86_64").unwrap(),
            serde_json::json!({"manifest": {}}),
            Vec::new(),
        )
    }

    #[test]
    fn job_type_renders_and_parses() {
        let t = JobType::new("osbuild", "x86_64").unwrap();
        assert_eq!(t.to_string(), "osbuild:x86_64");
        assert_eq!("osbuild:x86_64".parse::<JobType>().unwrap(), t);
        assert!("osbuild".parse::<JobType>().is_err());
        assert!(JobType::new("", "x86_64").is_err());
        assert!(JobType::new("a:b", "x86_64").is_err());
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(serde_json::to_string(&JobStatus::Finished).unwrap(), "\"FINISHED\"");
        assert_eq!("FAILED".parse::<JobStatus>().unwrap(), JobStatus::Failed);
        assert!("finished".parse::<JobStatus>().is_err());
    }

    #[test]
    fn job_lifecycle() {
        let mut job = build_job();
        assert_eq!(job.status, JobStatus::Pending);

        let now = Utc::now();
        job.mark_running(now).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.started_at, Some(now));
        assert!(job.mark_running(now).is_err());

        job.conclude(JobStatus::Finished, Some(serde_json::json!({"ok": true})), now)
            .unwrap();
        assert_eq!(job.status, JobStatus::Finished);
        assert!(job.finished_at.is_some());
        assert!(job.conclude(JobStatus::Failed, None, now).is_err());
        assert_eq!(job.status, JobStatus::Finished);
    }

    #[test]
    fn conclude_rejects_non_terminal_status() {
        let mut job = build_job();
        job.mark_running(Utc::now()).unwrap();
        let err = job.conclude(JobStatus::Pending, None, Utc::now()).unwrap_err();
        assert!(matches!(err, JobStoreError::InvalidTransition { .. }));
        assert_eq!(job.status, JobStatus::Running);
    }

    #[test]
    fn cancel_does_not_touch_status() {
        let mut job = build_job();
        job.cancel();
        job.cancel();
        assert!(job.canceled);
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn filter_matches_kind_and_arch() {
        let job = build_job();
        assert!(ClaimFilter::new(["osbuild"], "x86_64").matches(&job));
        assert!(ClaimFilter::new(["koji-init", "osbuild"], "x86_64").matches(&job));
        assert!(!ClaimFilter::new(["osbuild"], "aarch64").matches(&job));
        assert!(!ClaimFilter::new(Vec::<String>::new(), "x86_64").matches(&job));
    }
}
