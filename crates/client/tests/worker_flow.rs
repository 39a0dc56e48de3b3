use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Form, Json, Router,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::{Value, json};
use tower::ServiceExt;

use kiln_api::app::build_app;
use kiln_api::app::services::AppServices;
use kiln_api::middleware::AccessState;
use kiln_auth::{AccessPolicy, IDENTITY_HEADER, Identity};
use kiln_client::{ClientError, OAuthConfig, Outcome, WorkerClient};
use kiln_infra::{JobStatus, JobType};

const REFRESH_TOKEN: &str = "refresh!";
const ACCESS_TOKEN: &str = "accessToken!";

#[derive(Clone)]
struct TokenEndpoint {
    exchanges: Arc<AtomicUsize>,
    expires_in: i64,
    fail: bool,
}

async fn token_handler(State(state): State<TokenEndpoint>, Form(form): Form<HashMap<String, String>>) -> Response {
    state.exchanges.fetch_add(1, Ordering::SeqCst);
    if state.fail {
        return (StatusCode::UNAUTHORIZED, "invalid_grant").into_response();
    }
    assert_eq!(form.get("grant_type").map(String::as_str), Some("refresh_token"));
    assert_eq!(form.get("client_id").map(String::as_str), Some("rhsm-api"));
    assert_eq!(form.get("refresh_token").map(String::as_str), Some(REFRESH_TOKEN));

    Json(json!({ "access_token": ACCESS_TOKEN, "expires_in": state.expires_in })).into_response()
}

/// Stand-in for the authenticating proxy: checks the bearer token, injects
/// the identity assertion, and hands the request to the dispatch router.
async fn proxy_handler(State(app): State<Router>, mut req: Request) -> Response {
    let expected = format!("Bearer {ACCESS_TOKEN}");
    let authorized = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let assertion = Identity::new("000000").with_org("000000").to_assertion();
    req.headers_mut()
        .insert(IDENTITY_HEADER, HeaderValue::from_str(&assertion).unwrap());
    match app.oneshot(req).await {
        Ok(resp) => resp,
        Err(never) => match never {},
    }
}

struct Harness {
    services: Arc<AppServices>,
    exchanges: Arc<AtomicUsize>,
    proxy_url: String,
    token_url: String,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl Harness {
    async fn spawn(expires_in: i64, fail: bool) -> Self {
        let services = Arc::new(AppServices::in_memory());
        let dispatch = build_app(
            services.clone(),
            AccessState::new(AccessPolicy::new(["000000"]), None),
        );

        let exchanges = Arc::new(AtomicUsize::new(0));
        let oauth = Router::new()
            .route("/token", post(token_handler))
            .with_state(TokenEndpoint {
                exchanges: exchanges.clone(),
                expires_in,
                fail,
            });
        let proxy = Router::new().fallback(proxy_handler).with_state(dispatch);

        let (token_addr, h1) = serve(oauth).await;
        let (proxy_addr, h2) = serve(proxy).await;

        Self {
            services,
            exchanges,
            proxy_url: format!("http://{proxy_addr}"),
            token_url: format!("http://{token_addr}/token"),
            handles: vec![h1, h2],
        }
    }

    fn client(&self) -> WorkerClient {
        WorkerClient::new(&self.proxy_url, Some(OAuthConfig::new(&self.token_url, REFRESH_TOKEN)))
    }

    fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        for h in &self.handles {
            h.abort();
        }
    }
}

async fn serve(app: Router) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind ephemeral port");
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, handle)
}

#[tokio::test]
async fn access_token_is_exchanged_once_and_reused() {
    let h = Harness::spawn(900, false).await;
    let client = h.client();

    client.status().await.unwrap();
    assert_eq!(h.exchanges(), 1);
    client.status().await.unwrap();
    assert_eq!(h.exchanges(), 1);
}

#[tokio::test]
async fn short_lived_token_is_exchanged_again() {
    // Lifetime inside the refresh margin: never reusable.
    let h = Harness::spawn(5, false).await;
    let client = h.client();

    client.status().await.unwrap();
    client.status().await.unwrap();
    assert_eq!(h.exchanges(), 2);
}

#[tokio::test]
async fn failed_exchange_fails_the_call() {
    let h = Harness::spawn(900, true).await;
    let err = h.client().status().await.unwrap_err();
    assert!(matches!(err, ClientError::TokenExchange(_)), "got {err:?}");
    assert_eq!(h.exchanges(), 1);
}

#[tokio::test]
async fn unrepresentable_token_lifetime_fails_the_call() {
    let h = Harness::spawn(i64::MAX, false).await;
    let client = h.client();

    let err = client.status().await.unwrap_err();
    assert!(matches!(err, ClientError::TokenExchange(_)), "got {err:?}");

    // Nothing was cached, so the next call exchanges again.
    let err = client.status().await.unwrap_err();
    assert!(matches!(err, ClientError::TokenExchange(_)), "got {err:?}");
    assert_eq!(h.exchanges(), 2);
}

#[tokio::test]
async fn missing_bearer_is_refused_by_proxy() {
    let h = Harness::spawn(900, false).await;
    let err = WorkerClient::new(&h.proxy_url, None).status().await.unwrap_err();
    assert!(matches!(err, ClientError::Api(401, _)), "got {err:?}");
}

#[tokio::test]
async fn worker_round_trip_through_proxy() {
    let h = Harness::spawn(900, false).await;
    let client = h.client();

    assert!(client.request_job(&["osbuild"], "x86_64").await.unwrap().is_none());

    let init = h
        .services
        .queue
        .enqueue(JobType::new("koji-init", "x86_64").unwrap(), json!({}), vec![])
        .await
        .unwrap();
    let build = h
        .services
        .queue
        .enqueue(
            JobType::new("osbuild", "x86_64").unwrap(),
            json!({"manifest": {"version": "2"}}),
            vec![init],
        )
        .await
        .unwrap();

    let init_job = client.request_job(&["koji-init"], "x86_64").await.unwrap().unwrap();
    assert_eq!(init_job.job_type(), "koji-init");
    assert!(init_job.dynamic_args().is_none());
    init_job
        .update(Some(Outcome::Finished), Some(json!({"build_id": 1})))
        .await
        .unwrap();

    let job = client.request_job(&["osbuild"], "x86_64").await.unwrap().unwrap();
    assert_eq!(job.args(), &json!({"manifest": {"version": "2"}}));
    let dynamic = job.dynamic_args().unwrap();
    assert_eq!(dynamic.len(), 1);
    assert_eq!(dynamic[&init], json!({"build_id": 1}));

    assert!(!job.canceled().await.unwrap());
    h.services.queue.cancel(build).await.unwrap();
    assert!(job.canceled().await.unwrap());

    job.upload_artifact("disk.img", &b"image bytes"[..]).await.unwrap();
    job.update(None, Some(Value::Null)).await.unwrap();

    let err = job.update(None, None).await.unwrap_err();
    assert!(matches!(err, ClientError::Api(404, _)), "got {err:?}");
    assert_eq!(
        h.services.queue.job_status(build).await.unwrap().status,
        JobStatus::Finished
    );

    assert_eq!(h.exchanges(), 1);
}

#[tokio::test]
async fn invalid_artifact_name_is_rejected_locally() {
    let h = Harness::spawn(900, false).await;
    h.services
        .queue
        .enqueue(JobType::new("osbuild", "x86_64").unwrap(), json!({}), vec![])
        .await
        .unwrap();
    let job = h.client().request_job(&["osbuild"], "x86_64").await.unwrap().unwrap();

    let err = job.upload_artifact("../escape", &b"x"[..]).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidArtifactName(_)));
}
