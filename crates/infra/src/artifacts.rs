//! Artifact storage.
//!
//! Layout: `<root>/<job id>/<artifact name>`. Uploads are streamed into a
//! hidden temp file in the job directory and published with a hard link, so
//! a name either does not exist or holds a complete upload. Published names
//! are never overwritten.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncRead;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use kiln_core::{ArtifactName, JobId};

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact '{name}' already exists for job {job_id}")]
    AlreadyExists { job_id: JobId, name: ArtifactName },
    #[error("artifact '{name}' not found for job {job_id}")]
    NotFound { job_id: JobId, name: ArtifactName },
    #[error("artifact storage is not configured")]
    Unconfigured,
    #[error("artifact io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: Option<PathBuf>,
}

impl ArtifactStore {
    /// `None` accepts uploads and throws them away.
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    pub fn is_configured(&self) -> bool {
        self.root.is_some()
    }

    fn job_dir(&self, job_id: JobId) -> Result<PathBuf, ArtifactError> {
        let root = self.root.as_ref().ok_or(ArtifactError::Unconfigured)?;
        Ok(root.join(job_id.to_string()))
    }

    /// Stream `body` into the artifact `name` of `job_id`. Returns the number
    /// of bytes written.
    #[instrument(skip_all, fields(job_id = %job_id, name = %name), err)]
    pub async fn put<R>(&self, job_id: JobId, name: &ArtifactName, body: &mut R) -> Result<u64, ArtifactError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let Some(root) = &self.root else {
            let discarded = tokio::io::copy(body, &mut tokio::io::sink()).await?;
            warn!(bytes = discarded, "no artifact directory configured, upload discarded");
            return Ok(discarded);
        };

        let dir = root.join(job_id.to_string());
        tokio::fs::create_dir_all(&dir).await?;

        let target = dir.join(name.as_str());
        if tokio::fs::try_exists(&target).await? {
            return Err(ArtifactError::AlreadyExists {
                job_id,
                name: name.clone(),
            });
        }

        let tmp = dir.join(format!(".upload-{}", Uuid::new_v4()));
        let written = match write_file(&tmp, body).await {
            Ok(n) => n,
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e.into());
            }
        };

        let published = tokio::fs::hard_link(&tmp, &target).await;
        let _ = tokio::fs::remove_file(&tmp).await;
        match published {
            Ok(()) => {
                debug!(bytes = written, "artifact stored");
                Ok(written)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(ArtifactError::AlreadyExists {
                job_id,
                name: name.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Where a stored artifact lives on disk.
    pub async fn resolve(&self, job_id: JobId, name: &ArtifactName) -> Result<PathBuf, ArtifactError> {
        let path = self.job_dir(job_id)?.join(name.as_str());
        if tokio::fs::try_exists(&path).await? {
            Ok(path)
        } else {
            Err(ArtifactError::NotFound {
                job_id,
                name: name.clone(),
            })
        }
    }

    pub async fn open(&self, job_id: JobId, name: &ArtifactName) -> Result<tokio::fs::File, ArtifactError> {
        let path = self.resolve(job_id, name).await?;
        Ok(tokio::fs::File::open(path).await?)
    }

    /// Remove every artifact of `job_id`. Missing directories are fine.
    pub async fn delete(&self, job_id: JobId) -> Result<(), ArtifactError> {
        let dir = self.job_dir(job_id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn write_file<R>(path: &Path, body: &mut R) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    let written = tokio::io::copy(body, &mut file).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}
