use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    metrics::WorkerMetrics,
    session::{SessionSnapshot, SessionState},
};

/// Process-global worker identity advertised to the backend.
#[derive(Debug, Clone)]
pub struct WorkerIdentity {
    pub worker_id: String,
    /// URL the backend uses to reach this worker.
    pub endpoint: String,
    pub max_sessions: usize,
    pub environment: String,
    pub version: String,
    pub description: String,
}

/// Session status enum understood by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackendSessionStatus {
    Connected,
    QrRequired,
    Reconnecting,
    Init,
    LoggedOut,
    Disconnected,
}

impl From<SessionState> for BackendSessionStatus {
    fn from(state: SessionState) -> Self {
        match state {
            SessionState::Initializing => Self::Init,
            SessionState::QrReady => Self::QrRequired,
            SessionState::Connected => Self::Connected,
            SessionState::Reconnecting => Self::Reconnecting,
            SessionState::LoggedOut => Self::LoggedOut,
            SessionState::Disconnected
            | SessionState::AutoDisconnected
            | SessionState::Failed => Self::Disconnected,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub worker_id: String,
    pub endpoint: String,
    pub max_sessions: usize,
    pub description: String,
    pub version: String,
    pub environment: String,
}

impl From<&WorkerIdentity> for RegisterRequest {
    fn from(identity: &WorkerIdentity) -> Self {
        Self {
            worker_id: identity.worker_id.clone(),
            endpoint: identity.endpoint.clone(),
            max_sessions: identity.max_sessions,
            description: identity.description.clone(),
            version: identity.version.clone(),
            environment: identity.environment.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    #[serde(default)]
    pub recovery_required: bool,
    #[serde(default)]
    pub assigned_session_count: u32,
}

/// One backend-assigned session this worker must hold.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRecord {
    pub session_id: String,
    pub user_id: String,
    pub status: BackendSessionStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentList {
    #[serde(default)]
    pub sessions: Vec<AssignmentRecord>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatSession {
    pub session_id: String,
    pub user_id: String,
    pub status: BackendSessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl From<&SessionSnapshot> for HeartbeatSession {
    fn from(snapshot: &SessionSnapshot) -> Self {
        Self {
            session_id: snapshot.session_id.clone(),
            user_id: snapshot.user_id.clone(),
            status: snapshot.state.into(),
            phone_number: snapshot.phone_number.clone(),
            last_seen: snapshot.last_seen,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    pub worker_id: String,
    pub sessions: Vec<HeartbeatSession>,
    pub metrics: WorkerMetrics,
}

/// Body of a `session-status` webhook; one per state transition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusWebhook {
    pub session_id: String,
    pub status: BackendSessionStatus,
    /// Transition name, e.g. `qr_ready` or `session_logged_out`.
    pub event: &'static str,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_disconnect_in: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_auth: Option<bool>,
}

impl SessionStatusWebhook {
    pub fn new(session_id: &str, status: BackendSessionStatus, event: &'static str) -> Self {
        Self {
            session_id: session_id.to_owned(),
            status,
            event,
            timestamp: Utc::now(),
            qr_code: None,
            attempt: None,
            auto_disconnect_in: None,
            phone_number: None,
            display_name: None,
            reason: None,
            requires_auth: None,
        }
    }
}

/// Body of a `message-status` webhook.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStatusWebhook {
    pub session_id: String,
    pub message_id: String,
    pub recipient: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryOutcome {
    Recovered,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryResultEntry {
    pub session_id: String,
    pub outcome: RecoveryOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverySummary {
    pub total: usize,
    pub recovered: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    pub worker_id: String,
    pub results: Vec<RecoveryResultEntry>,
    pub summary: RecoverySummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreservedSession {
    pub session_id: String,
    pub status: BackendSessionStatus,
}

/// Preserved-session list posted during graceful shutdown.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreservedReport {
    pub worker_id: String,
    pub sessions: Vec<PreservedSession>,
}
