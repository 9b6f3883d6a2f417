use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::{
    app::AppState,
    error::ApiError,
    session::{SessionSnapshot, SessionState},
    wa,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    pub session_id: String,
    pub user_id: String,
    #[serde(default)]
    pub session_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    session: SessionSnapshot,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionOkResponse {
    session_id: String,
    status: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QrResponse {
    session_id: String,
    qr: String,
    qr_image: Option<String>,
    attempt: u32,
    expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: &'static str,
}

/// `POST /api/session/start`: idempotent resume-or-create.
pub async fn start_handler(
    State(state): State<AppState>,
    Json(request): Json<StartSessionRequest>,
) -> Result<Response, ApiError> {
    let outcome = state
        .manager()
        .start(
            &request.session_id,
            &request.user_id,
            request.session_name,
            false,
        )
        .await?;

    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(SessionResponse {
            session: outcome.snapshot,
        }),
    )
        .into_response())
}

/// `POST /api/session/create`: strict create, 409 when the id is taken.
pub async fn create_handler(
    State(state): State<AppState>,
    Json(request): Json<StartSessionRequest>,
) -> Result<Response, ApiError> {
    let snapshot = state
        .manager()
        .create(
            &request.session_id,
            &request.user_id,
            request.session_name,
            false,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(SessionResponse { session: snapshot })).into_response())
}

/// `GET /api/session/:id/qr`: current pairing challenge.
///
/// 202 while the protocol instance is still initializing, a plain message
/// once connected.
pub async fn qr_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    let snapshot = state.manager().status(&session_id).await?;

    match snapshot.state {
        SessionState::QrReady => {
            let Some(challenge) = snapshot.qr else {
                return Ok((
                    StatusCode::ACCEPTED,
                    Json(MessageResponse {
                        message: "qr not generated yet",
                    }),
                )
                    .into_response());
            };

            let qr_image = wa::qr::render_qr_png_data_url(&challenge.code).ok();
            Ok(Json(QrResponse {
                session_id: snapshot.session_id,
                qr: challenge.code,
                qr_image,
                attempt: challenge.attempt,
                expires_at: challenge.expires_at,
            })
            .into_response())
        }
        SessionState::Initializing | SessionState::Reconnecting => Ok((
            StatusCode::ACCEPTED,
            Json(MessageResponse {
                message: "session initializing, qr not ready",
            }),
        )
            .into_response()),
        SessionState::Connected => Ok(Json(MessageResponse {
            message: "session already connected",
        })
        .into_response()),
        other => Err(ApiError::new(
            StatusCode::CONFLICT,
            "session_not_pairing",
            format!("session is {}", other.as_str()),
        )),
    }
}

/// `GET /api/session/:id/status`
pub async fn status_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    let snapshot = state.manager().status(&session_id).await?;
    Ok(Json(SessionResponse { session: snapshot }).into_response())
}

/// `POST /api/session/:id/restart`
pub async fn restart_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    state.manager().restart(&session_id).await?;
    Ok(Json(SessionOkResponse {
        session_id,
        status: "restarting",
    })
    .into_response())
}

/// `POST /api/session/:id/disconnect`
pub async fn disconnect_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    state.manager().disconnect(&session_id).await?;
    Ok(Json(SessionOkResponse {
        session_id,
        status: "disconnected",
    })
    .into_response())
}

/// `POST /api/session/:id/logout`
pub async fn logout_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    state.manager().logout(&session_id).await?;
    Ok(Json(SessionOkResponse {
        session_id,
        status: "logged_out",
    })
    .into_response())
}

/// `DELETE /api/session/:id`
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    state.manager().delete(&session_id).await?;
    Ok(Json(SessionOkResponse {
        session_id,
        status: "deleted",
    })
    .into_response())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionListResponse {
    total: usize,
    sessions: Vec<SessionSnapshot>,
}

/// `GET /api/sessions`
pub async fn list_handler(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.manager().list().await;
    Json(SessionListResponse {
        total: sessions.len(),
        sessions,
    })
}
