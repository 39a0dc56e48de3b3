//! HTTP client for workers.

use std::sync::Arc;

use indexmap::IndexMap;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use tracing::debug;

use kiln_core::{ArtifactName, DispatchToken, JobId};

use crate::error::ClientError;
use crate::oauth::{OAuthConfig, TokenSource};

pub const API_BASE_PATH: &str = "/api/worker/v1";

/// Terminal outcome reported for a claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Finished,
    Failed,
}

#[derive(Debug)]
struct Inner {
    http: reqwest::Client,
    /// Scheme + authority, no trailing slash.
    server_url: String,
    tokens: Option<TokenSource>,
}

/// Client for one dispatch server. Cheap to clone.
#[derive(Debug, Clone)]
pub struct WorkerClient {
    inner: Arc<Inner>,
}

impl WorkerClient {
    pub fn new(server_url: impl Into<String>, oauth: Option<OAuthConfig>) -> Self {
        let http = reqwest::Client::new();
        let tokens = oauth.map(|config| TokenSource::new(http.clone(), config));
        Self {
            inner: Arc::new(Inner {
                http,
                server_url: server_url.into().trim_end_matches('/').to_string(),
                tokens,
            }),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}{}", self.inner.server_url, API_BASE_PATH, path)
    }

    fn absolute(&self, location: &str) -> String {
        format!("{}{}", self.inner.server_url, location)
    }

    /// Build a request with the bearer token attached. Token exchange
    /// failures end the call here.
    async fn request(&self, method: Method, url: &str) -> Result<RequestBuilder, ClientError> {
        let mut req = self.inner.http.request(method, url);
        if let Some(tokens) = &self.inner.tokens {
            req = req.bearer_auth(tokens.access_token().await?);
        }
        Ok(req)
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, ClientError> {
        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            return Err(ClientError::Api(status, resp.text().await.unwrap_or_default()));
        }
        Ok(resp)
    }

    /// Liveness check.
    pub async fn status(&self) -> Result<(), ClientError> {
        let req = self.request(Method::GET, &self.api_url("/status")).await?;
        self.send(req).await?;
        Ok(())
    }

    /// Ask for one job of any of `types` on `arch`. `None` when the server has
    /// nothing runnable right now; callers wanting to wait poll again.
    pub async fn request_job(&self, types: &[&str], arch: &str) -> Result<Option<ClaimedJob>, ClientError> {
        let req = self
            .request(Method::POST, &self.api_url("/jobs"))
            .await?
            .json(&json!({ "types": types, "arch": arch }));
        let resp = self.send(req).await?;
        if resp.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let body: ClaimResponse = resp.json().await?;
        debug!(job_type = %body.job_type, "claimed job");
        Ok(Some(ClaimedJob {
            client: self.clone(),
            token: body.id,
            job_type: body.job_type,
            args: body.args,
            dynamic_args: body.dynamic_args,
            location: body.location,
            artifact_location: body.artifact_location,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct ClaimResponse {
    id: DispatchToken,
    location: String,
    artifact_location: String,
    #[serde(rename = "type")]
    job_type: String,
    args: Value,
    #[serde(default)]
    dynamic_args: Option<IndexMap<JobId, Value>>,
}

#[derive(Debug, Serialize)]
struct UpdateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CanceledResponse {
    canceled: bool,
}

/// A job this worker holds a claim on.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    client: WorkerClient,
    token: DispatchToken,
    job_type: String,
    args: Value,
    dynamic_args: Option<IndexMap<JobId, Value>>,
    location: String,
    artifact_location: String,
}

impl ClaimedJob {
    pub fn token(&self) -> DispatchToken {
        self.token
    }

    /// Job kind, without architecture.
    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn args(&self) -> &Value {
        &self.args
    }

    /// Results of the jobs this one depends on, in dependency order.
    pub fn dynamic_args(&self) -> Option<&IndexMap<JobId, Value>> {
        self.dynamic_args.as_ref()
    }

    pub async fn canceled(&self) -> Result<bool, ClientError> {
        let url = self.client.absolute(&self.location);
        let req = self.client.request(Method::GET, &url).await?;
        let body: CanceledResponse = self.client.send(req).await?.json().await?;
        Ok(body.canceled)
    }

    /// Report the outcome. `None` lets the server record the job as finished.
    pub async fn update(&self, outcome: Option<Outcome>, result: Option<Value>) -> Result<(), ClientError> {
        let body = UpdateRequest {
            status: outcome,
            result,
        };
        let url = self.client.absolute(&self.location);
        let req = self.client.request(Method::PATCH, &url).await?.json(&body);
        self.client.send(req).await?;
        Ok(())
    }

    /// Stream `reader` to the server as artifact `name`.
    pub async fn upload_artifact<R>(&self, name: &str, reader: R) -> Result<(), ClientError>
    where
        R: AsyncRead + Send + Sync + 'static,
    {
        let name: ArtifactName = name.parse()?;
        let url = self.client.absolute(&format!("{}{}", self.artifact_location, name));
        let body = reqwest::Body::wrap_stream(ReaderStream::new(reader));
        let req = self.client.request(Method::PUT, &url).await?.body(body);
        self.client.send(req).await?;
        Ok(())
    }
}
