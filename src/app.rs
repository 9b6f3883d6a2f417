use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use axum::{
    Json,
    Router,
    extract::State,
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    auth::AuthStateStore,
    config::Config,
    handlers::{message, session},
    metrics,
    registry::RegistryClient,
    session::{SessionManager, SessionStatistics},
};

/// Shared application state, assembled once at startup and handed to both
/// the HTTP layer and the background services.
#[derive(Clone)]
pub struct AppState {
    ready: Arc<AtomicBool>,
    manager: SessionManager,
    auth: Arc<AuthStateStore>,
    registry: Option<Arc<RegistryClient>>,
    config: Arc<Config>,
    started_at: tokio::time::Instant,
}

impl AppState {
    pub fn new(
        manager: SessionManager,
        auth: Arc<AuthStateStore>,
        registry: Option<Arc<RegistryClient>>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            manager,
            auth,
            registry,
            config,
            started_at: tokio::time::Instant::now(),
        }
    }

    /// Sets readiness status.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    pub fn auth(&self) -> &Arc<AuthStateStore> {
        &self.auth
    }

    pub fn registry(&self) -> Option<&Arc<RegistryClient>> {
        self.registry.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn started_at(&self) -> tokio::time::Instant {
        self.started_at
    }
}

/// Builds the root HTTP router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/live", get(live_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/session/start", post(session::start_handler))
        .route("/api/session/create", post(session::create_handler))
        .route("/api/session/:id/qr", get(session::qr_handler))
        .route("/api/session/:id/status", get(session::status_handler))
        .route("/api/session/:id/restart", post(session::restart_handler))
        .route(
            "/api/session/:id/disconnect",
            post(session::disconnect_handler),
        )
        .route("/api/session/:id/logout", post(session::logout_handler))
        .route("/api/session/:id", delete(session::delete_handler))
        .route("/api/sessions", get(session::list_handler))
        .route("/api/:session_id/send", post(message::send_handler))
        .route("/api/:session_id/send-bulk", post(message::send_bulk_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(request_observability_middleware))
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthDependencies {
    protocol: bool,
    storage: bool,
    object_store: bool,
    backend: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    ok: bool,
    worker_id: String,
    dependencies: HealthDependencies,
    statistics: SessionStatistics,
    metrics: metrics::WorkerMetrics,
}

async fn health_handler(State(state): State<AppState>) -> Response {
    let stats = state.manager().statistics().await;
    let ok = state.is_ready();

    let body = HealthResponse {
        ok,
        worker_id: state.config().worker_id.clone(),
        dependencies: HealthDependencies {
            protocol: ok,
            storage: true,
            object_store: state.auth().has_remote(),
            backend: state.registry().is_some(),
        },
        metrics: metrics::worker_metrics(state.started_at(), &stats),
        statistics: stats,
    };

    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

#[derive(Debug, Serialize)]
struct ReadyResponse {
    ready: bool,
}

async fn ready_handler(State(state): State<AppState>) -> Response {
    if state.is_ready() {
        (StatusCode::OK, Json(ReadyResponse { ready: true })).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse { ready: false }),
        )
            .into_response()
    }
}

async fn live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "alive": true }))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.manager().list().await;
    let stats = state.manager().statistics().await;
    Json(metrics::snapshot(state.started_at(), stats, &sessions))
}

async fn request_observability_middleware(
    request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let request_id = uuid::Uuid::new_v4();
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started = tokio::time::Instant::now();

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert("x-request-id", value);
    }

    tracing::info!(
        %request_id,
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "http_request"
    );

    response
}
