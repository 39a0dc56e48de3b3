//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: job queue and artifact store construction
//! - `routes/`: worker protocol handlers
//! - `dto.rs`: request/response DTOs and body parsing
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::middleware::{self, AccessState};

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Where the worker protocol is mounted.
pub const BASE_PATH: &str = "/api/worker/v1";

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
///
/// Access control wraps everything, unknown paths included.
pub fn build_app(services: Arc<services::AppServices>, access: AccessState) -> Router {
    Router::new()
        .nest(BASE_PATH, routes::router())
        .fallback(|| async { errors::not_found() })
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            access,
            middleware::access_middleware,
        ))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}
