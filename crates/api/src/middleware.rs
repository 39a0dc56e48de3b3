use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::debug;

use kiln_auth::{AccessPolicy, BearerValidator, Credentials, Hs256BearerValidator, IDENTITY_HEADER};
use kiln_infra::ServerConfig;

use crate::app::errors;
use crate::context::IdentityContext;

#[derive(Clone)]
pub struct AccessState {
    pub policy: Arc<AccessPolicy>,
    pub bearer: Option<Arc<dyn BearerValidator>>,
}

impl AccessState {
    pub fn new(policy: AccessPolicy, bearer: Option<Arc<dyn BearerValidator>>) -> Self {
        Self {
            policy: Arc::new(policy),
            bearer,
        }
    }

    /// No allow-list: every request passes.
    pub fn open() -> Self {
        Self::new(AccessPolicy::open(), None)
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        let bearer = config
            .jwt_secret
            .as_ref()
            .map(|secret| Arc::new(Hs256BearerValidator::new(secret.as_bytes())) as Arc<dyn BearerValidator>);
        Self::new(AccessPolicy::new(config.allowed_accounts.iter().cloned()), bearer)
    }
}

/// Authenticates every request against the allow-list.
///
/// Rejections are answered with the generic not-found response, so a caller
/// without access cannot tell a protected path from a missing one.
pub async fn access_middleware(
    State(state): State<AccessState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let outcome = {
        let headers = req.headers();
        let credentials = Credentials {
            assertion: headers.get(IDENTITY_HEADER).and_then(|v| v.to_str().ok()),
            bearer: extract_bearer(headers),
        };
        state
            .policy
            .authenticate(credentials, state.bearer.as_deref(), Utc::now())
    };

    match outcome {
        Ok(Some(identity)) => {
            req.extensions_mut().insert(IdentityContext::new(identity));
            next.run(req).await
        }
        Ok(None) => next.run(req).await,
        Err(e) => {
            debug!(error = %e, path = %req.uri().path(), "request rejected by access policy");
            errors::not_found()
        }
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}
