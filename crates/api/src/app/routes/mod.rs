use axum::{
    routing::{get, post, put},
    Router,
};

pub mod jobs;
pub mod system;

/// Worker protocol routes, relative to the API base path.
pub fn router() -> Router {
    Router::new()
        .route("/status", get(system::status))
        .route("/jobs", post(jobs::request_job))
        .route("/jobs/:token", get(jobs::job_status).patch(jobs::update_job))
        .route("/jobs/:token/artifacts/:name", put(jobs::upload_artifact))
}
