use axum::body::Bytes;
use axum::http::StatusCode;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use kiln_core::{DispatchToken, JobId};
use kiln_infra::{ClaimedJob, JobStatus};

use crate::app::{BASE_PATH, errors};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct RequestJobRequest {
    pub types: Vec<String>,
    pub arch: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateJobRequest {
    pub status: Option<JobStatus>,
    pub result: Option<Value>,
}

/// Decode a JSON body by hand so that an empty or untyped body is a plain 400.
pub fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, axum::response::Response> {
    if body.is_empty() {
        return Err(errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", "request body is empty"));
    }
    serde_json::from_slice(body)
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", e.to_string()))
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct RequestJobResponse {
    /// The dispatch token. Workers never see job ids.
    pub id: DispatchToken,
    pub location: String,
    pub artifact_location: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub args: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dynamic_args: Option<IndexMap<JobId, Value>>,
}

impl From<ClaimedJob> for RequestJobResponse {
    fn from(claimed: ClaimedJob) -> Self {
        let location = format!("{BASE_PATH}/jobs/{}", claimed.token);
        Self {
            id: claimed.token,
            artifact_location: format!("{location}/artifacts/"),
            location,
            job_type: claimed.job_type.kind,
            args: claimed.args,
            dynamic_args: claimed.dynamic_args,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub canceled: bool,
}

#[derive(Debug, Serialize)]
pub struct EmptyResponse {}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_infra::JobType;
    use serde_json::json;

    fn claimed(dynamic_args: Option<IndexMap<JobId, Value>>) -> ClaimedJob {
        ClaimedJob {
            token: DispatchToken::new(),
            job_id: JobId::new(),
            job_type: JobType::new("osbuild", "x86_64").unwrap(),
            args: json!({"manifest": {}}),
            dynamic_args,
        }
    }

    #[test]
    fn claimed_job_wire_shape() {
        let c = claimed(None);
        let token = c.token.to_string();
        let body = serde_json::to_value(RequestJobResponse::from(c)).unwrap();

        assert_eq!(body["id"], token);
        assert_eq!(body["type"], "osbuild");
        assert_eq!(body["location"], format!("/api/worker/v1/jobs/{token}"));
        assert_eq!(body["artifact_location"], format!("/api/worker/v1/jobs/{token}/artifacts/"));
        assert_eq!(body["args"], json!({"manifest": {}}));
        assert!(body.get("dynamic_args").is_none());
    }

    #[test]
    fn dynamic_args_keep_dependency_order() {
        let (a, b) = (JobId::new(), JobId::new());
        let mut deps = IndexMap::new();
        deps.insert(b, json!(2));
        deps.insert(a, json!(1));

        let text = serde_json::to_string(&RequestJobResponse::from(claimed(Some(deps)))).unwrap();
        let pos_b = text.find(&b.to_string()).unwrap();
        let pos_a = text.find(&a.to_string()).unwrap();
        assert!(pos_b < pos_a);
    }

    #[test]
    fn empty_and_malformed_bodies_are_rejected() {
        assert!(parse_body::<RequestJobRequest>(&Bytes::new()).is_err());
        assert!(parse_body::<RequestJobRequest>(&Bytes::from_static(b"{")).is_err());
        assert!(parse_body::<RequestJobRequest>(&Bytes::from_static(b"{\"types\":[]}")).is_err());

        let ok: UpdateJobRequest = parse_body(&Bytes::from_static(b"{}")).unwrap();
        assert!(ok.status.is_none() && ok.result.is_none());
    }
}
