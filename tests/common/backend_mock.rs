use std::sync::Arc;

use axum::{
    Json,
    Router,
    extract::State,
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use tokio::{
    sync::Mutex,
    time::{Duration, sleep, timeout},
};

/// One captured backend call.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub body: Value,
}

#[derive(Clone)]
struct MockState {
    seen: Arc<Mutex<Vec<CapturedRequest>>>,
    recovery_required: bool,
    assignments: Value,
    reject_registrations: Arc<Mutex<u32>>,
}

/// In-process control-plane double capturing every request it receives.
pub struct BackendMock {
    pub base_url: String,
    seen: Arc<Mutex<Vec<CapturedRequest>>>,
    reject_registrations: Arc<Mutex<u32>>,
}

impl BackendMock {
    pub async fn start(recovery_required: bool, assignments: Value) -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let reject_registrations = Arc::new(Mutex::new(0));
        let state = MockState {
            seen: seen.clone(),
            recovery_required,
            assignments,
            reject_registrations: reject_registrations.clone(),
        };

        let router = Router::new().fallback(capture_handler).with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind backend mock");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self {
            base_url: format!("http://{addr}"),
            seen,
            reject_registrations,
        }
    }

    /// Makes the next `count` registration attempts fail with 503.
    pub async fn reject_next_registrations(&self, count: u32) {
        *self.reject_registrations.lock().await = count;
    }

    pub async fn requests(&self) -> Vec<CapturedRequest> {
        self.seen.lock().await.clone()
    }

    pub async fn requests_to(&self, path_fragment: &str) -> Vec<CapturedRequest> {
        self.seen
            .lock()
            .await
            .iter()
            .filter(|r| r.path.contains(path_fragment))
            .cloned()
            .collect()
    }

    /// Waits until at least `count` requests hit a path fragment.
    pub async fn wait_for(&self, path_fragment: &str, count: usize) -> Vec<CapturedRequest> {
        timeout(Duration::from_secs(5), async {
            loop {
                let matching = self.requests_to(path_fragment).await;
                if matching.len() >= count {
                    return matching;
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("backend never saw {count}x {path_fragment}"))
    }
}

async fn capture_handler(
    State(state): State<MockState>,
    method: Method,
    uri: Uri,
    body: Option<Json<Value>>,
) -> Response {
    let path = uri.path().to_owned();
    state.seen.lock().await.push(CapturedRequest {
        method: method.to_string(),
        path: path.clone(),
        body: body.map(|Json(value)| value).unwrap_or(Value::Null),
    });

    if path == "/api/v1/workers/register" {
        let mut remaining = state.reject_registrations.lock().await;
        if *remaining > 0 {
            *remaining -= 1;
            return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": "not ready"})))
                .into_response();
        }

        return Json(json!({
            "recoveryRequired": state.recovery_required,
            "assignedSessionCount": state.assignments.as_array().map(Vec::len).unwrap_or(0),
        }))
        .into_response();
    }

    if path.ends_with("/sessions/assigned") {
        return Json(json!({ "sessions": state.assignments })).into_response();
    }

    Json(json!({ "ok": true })).into_response()
}
