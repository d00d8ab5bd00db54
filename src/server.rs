use crate::app::ports::{TaskApiPort, WebhookPort};
use crate::config::Config;
use crate::error::RelayError;
use crate::metrics;
use crate::relay::{
    CorrelationStore, DeliveryEngine, PostbackIngestor, RateLimiter, TaskSubmitter,
    TokenAuthority, UsageCounter,
};
use crate::storage::KvStore;
use crate::types::TaskStatus;
use axum::{
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, Path},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Extension, Router,
};
use hyper::Server;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

/// Postback bodies can carry hundreds of items
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Everything a request handler needs, built once at startup
pub struct AppState {
    pub submitter: TaskSubmitter,
    pub ingestor: PostbackIngestor,
    pub delivery: DeliveryEngine,
    pub correlations: Arc<CorrelationStore>,
    pub usage: Arc<UsageCounter>,
    pub credential_header: String,
    pub default_webhook: Option<String>,
}

impl AppState {
    pub fn new(
        config: &Config,
        store: Arc<dyn KvStore>,
        task_api: Arc<dyn TaskApiPort>,
        webhook: Arc<dyn WebhookPort>,
        authority: TokenAuthority,
    ) -> Self {
        let correlations = Arc::new(CorrelationStore::new(store.clone(), config.record_ttl()));
        let usage = Arc::new(UsageCounter::new(store.clone()));
        let limiter = Arc::new(RateLimiter::new(
            store,
            config.rate_limit.limit,
            config.rate_window(),
        ));
        let submitter = TaskSubmitter::new(
            Arc::new(authority),
            limiter,
            correlations.clone(),
            usage.clone(),
            task_api,
            config.endpoints.base_postback_url.clone().unwrap_or_default(),
        );

        Self {
            submitter,
            ingestor: PostbackIngestor::new(correlations.clone()),
            delivery: DeliveryEngine::new(webhook, config.delivery.settings()),
            correlations,
            usage,
            credential_header: config.server.credential_header.to_ascii_lowercase(),
            default_webhook: config.endpoints.webhook_url.clone(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "success": false, "error": self.to_string() }));
        (self.status_code(), body).into_response()
    }
}

/// First `x-forwarded-for` hop, else the peer address
fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "postback-relay",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn metrics_text() -> impl IntoResponse {
    metrics::render()
}

async fn submit_task(
    Extension(state): Extension<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let credential = headers
        .get(state.credential_header.as_str())
        .and_then(|v| v.to_str().ok());
    let client = client_key(&headers, peer.map(|ConnectInfo(addr)| addr));

    // Unparsable bodies still go through auth and admission first
    let body: Value = serde_json::from_slice(&body).unwrap_or_else(|e| {
        debug!("Submission body is not JSON: {}", e);
        Value::Null
    });

    match state.submitter.submit(&body, credential, &client).await {
        Ok(receipt) => Json(json!({
            "success": true,
            "taskId": receipt.task_id,
            "correlationId": receipt.correlation_id,
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn receive_postback(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let callback = match state.ingestor.ingest(&id, &body, &headers).await {
        Ok(callback) => callback,
        Err(e) => return e.into_response(),
    };

    let delivery = state
        .delivery
        .deliver(&callback, state.default_webhook.as_deref())
        .await;

    if callback.correlated {
        let status = if delivery.is_ok() {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        if let Err(e) = state.correlations.mark_status(&callback.task_id, status).await {
            error!("Could not mark task {} as {:?}: {}", callback.task_id, status, e);
        }
    }

    match delivery {
        Ok(report) => {
            if let Some(identity) = callback.credential_index {
                state.usage.record_chunks(identity, report.chunks_delivered).await;
            }
            let message = if report.acknowledgement_only {
                "Postback received but no items to process"
            } else {
                "Postback received and processed"
            };
            info!(
                task_id = %callback.task_id,
                chunks = report.chunks_delivered,
                destination = ?report.destination,
                "{}", message
            );
            Json(json!({ "success": true, "message": message })).into_response()
        }
        Err(e) => {
            error!("Error processing postback for task {}: {}", callback.task_id, e);
            e.into_response()
        }
    }
}

/// Create the HTTP router with all routes
pub fn create_server(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .route("/api/tasks", post(submit_task))
        .route("/api/postback/:id", post(receive_postback))
        .layer(Extension(state))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

/// Serve until ctrl-c
pub async fn start_server(state: Arc<AppState>, port: u16) -> anyhow::Result<()> {
    let app = create_server(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("HTTP server running on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    Server::bind(&addr)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::HttpPostResult;
    use crate::error::Result;
    use crate::storage::InMemoryStore;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    struct FixedTaskApi;

    #[async_trait]
    impl TaskApiPort for FixedTaskApi {
        async fn create_task(&self, _batch: &Value) -> Result<Value> {
            Ok(json!({"tasks": [{"id": "task-abc"}]}))
        }
    }

    #[derive(Default)]
    struct RecordingWebhook {
        calls: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl WebhookPort for RecordingWebhook {
        async fn post_json(&self, url: &str, payload: &Value) -> Result<HttpPostResult> {
            self.calls.lock().await.push((url.to_string(), payload.clone()));
            Ok(HttpPostResult { status: 200, body: "ok".into() })
        }
    }

    fn app(limit: usize) -> (Router, Arc<RecordingWebhook>) {
        let mut config = Config::default();
        config.rate_limit.limit = limit;
        config.endpoints.base_postback_url = Some("https://relay.test/api/postback/".into());
        config.endpoints.webhook_url = Some("https://hooks.test/default".into());
        let webhook = Arc::new(RecordingWebhook::default());
        let state = AppState::new(
            &config,
            Arc::new(InMemoryStore::new()),
            Arc::new(FixedTaskApi),
            webhook.clone(),
            TokenAuthority::new(vec!["tok".into()]),
        );
        (create_server(Arc::new(state)), webhook)
    }

    fn submission(token: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/tasks")
            .header("content-type", "application/json")
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1");
        if let Some(token) = token {
            builder = builder.header("authentication", token);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    const VALID: &str = r#"[{"language_code":"en","location_code":2840,"keyword":"tailor","depth":10,"postback_data":"advanced"}]"#;

    #[test]
    fn test_client_key_resolution() {
        let mut headers = HeaderMap::new();
        let peer: SocketAddr = "192.0.2.1:5555".parse().unwrap();
        assert_eq!(client_key(&headers, Some(peer)), "192.0.2.1");
        assert_eq!(client_key(&headers, None), "unknown");
        headers.insert("x-forwarded-for", "198.51.100.4, 10.0.0.1".parse().unwrap());
        assert_eq!(client_key(&headers, Some(peer)), "198.51.100.4");
    }

    #[tokio::test]
    async fn test_submission_status_codes() {
        let (app, _) = app(1);

        let response = app.clone().oneshot(submission(None, VALID)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["success"], json!(false));

        let response = app.clone().oneshot(submission(Some("tok"), VALID)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["taskId"], json!("task-abc"));
        assert!(body["correlationId"].as_str().is_some());

        let response = app.clone().oneshot(submission(Some("tok"), VALID)).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_bad_body_is_400_after_auth() {
        let (app, _) = app(10);
        let response = app.clone().oneshot(submission(Some("tok"), "{not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app.oneshot(submission(None, "{not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_postback_routes() {
        let (app, webhook) = app(10);

        let malformed = Request::builder()
            .method("POST")
            .uri("/api/postback/whatever")
            .body(Body::from(r#"{"tasks": []}"#))
            .unwrap();
        let response = app.clone().oneshot(malformed).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let empty = json!({"tasks": [{"id": "task-zzz", "data": {"location_code": 2840, "keyword": "tailor"}, "result": null}]});
        let request = Request::builder()
            .method("POST")
            .uri("/api/postback/corr-zzz")
            .body(Body::from(empty.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await["message"],
            json!("Postback received but no items to process")
        );

        let calls = webhook.calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "https://hooks.test/default");
    }

    #[tokio::test]
    async fn test_health_and_method_not_allowed() {
        let (app, _) = app(10);
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/api/tasks").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
