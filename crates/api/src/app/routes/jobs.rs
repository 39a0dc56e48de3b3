use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tokio_stream::StreamExt;
use tokio_util::io::StreamReader;
use tracing::info;

use kiln_core::{ArtifactName, DispatchToken};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::IdentityContext;

fn parse_token(raw: &str) -> Result<DispatchToken, axum::response::Response> {
    raw.parse().map_err(|_| errors::invalid_token())
}

pub async fn request_job(
    Extension(services): Extension<Arc<AppServices>>,
    identity: Option<Extension<IdentityContext>>,
    body: Bytes,
) -> axum::response::Response {
    let body: dto::RequestJobRequest = match dto::parse_body(&body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    let claimed = match services.queue.request_job(body.types, &body.arch).await {
        Ok(Some(c)) => c,
        Ok(None) => return StatusCode::NO_CONTENT.into_response(),
        Err(e) => return errors::queue_error_to_response(e),
    };

    if let Some(Extension(identity)) = identity {
        info!(
            job_id = %claimed.job_id,
            account = identity.account_number(),
            "job handed to worker"
        );
    }

    (StatusCode::CREATED, Json(dto::RequestJobResponse::from(claimed))).into_response()
}

pub async fn job_status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(token): Path<String>,
) -> axum::response::Response {
    let token = match parse_token(&token) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    match services.queue.is_canceled(token).await {
        Ok(canceled) => (StatusCode::OK, Json(dto::JobStatusResponse { canceled })).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

pub async fn update_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(token): Path<String>,
    body: Bytes,
) -> axum::response::Response {
    let token = match parse_token(&token) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let body: dto::UpdateJobRequest = match dto::parse_body(&body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    match services
        .queue
        .update_status(token, body.status, body.result)
        .await
    {
        Ok(()) => (StatusCode::OK, Json(dto::EmptyResponse {})).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

pub async fn upload_artifact(
    Extension(services): Extension<Arc<AppServices>>,
    Path((token, name)): Path<(String, String)>,
    body: Body,
) -> axum::response::Response {
    let token = match parse_token(&token) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let name: ArtifactName = match name.parse() {
        Ok(n) => n,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_artifact_name", format!("{e}"));
        }
    };
    let job_id = match services.queue.live_claim(token) {
        Ok(id) => id,
        Err(e) => return errors::queue_error_to_response(e),
    };

    let stream = body.into_data_stream().map(|chunk| chunk.map_err(std::io::Error::other));
    let mut reader = StreamReader::new(stream);

    match services.artifacts.put(job_id, &name, &mut reader).await {
        Ok(_) => (StatusCode::OK, Json(dto::EmptyResponse {})).into_response(),
        Err(e) => errors::artifact_error_to_response(e),
    }
}
