pub mod types;

use std::sync::Arc;

use reqwest::StatusCode;
use thiserror::Error;
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{Duration, MissedTickBehavior, sleep},
};

use crate::{
    metrics,
    session::{SessionEvent, SessionManager, SessionState},
};

pub use types::{
    AssignmentRecord,
    BackendSessionStatus,
    HeartbeatPayload,
    HeartbeatSession,
    MessageStatusWebhook,
    PreservedReport,
    PreservedSession,
    RecoveryOutcome,
    RecoveryReport,
    RecoveryResultEntry,
    RecoverySummary,
    RegisterRequest,
    RegisterResponse,
    SessionStatusWebhook,
    WorkerIdentity,
};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(15);
const RECOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from backend calls.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend rejected request: {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("registration retries exhausted without an attempt")]
    RetriesExhausted,
}

/// Retry/backoff settings for registration.
#[derive(Debug, Clone)]
pub struct RegistrationPolicy {
    pub max_retries: u32,
    pub retry_interval: Duration,
    /// Delay before the first attempt, giving the backend time to come up.
    pub startup_delay: Duration,
}

impl Default for RegistrationPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_interval: Duration::from_secs(5),
            startup_delay: Duration::from_secs(5),
        }
    }
}

/// HTTP client for the control-plane backend.
///
/// Registers this worker, heartbeats session snapshots, mirrors engine
/// transitions as webhooks, and reports recovery/preservation outcomes.
/// Webhook and heartbeat failures are logged and swallowed; they never
/// propagate into the lifecycle.
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    identity: WorkerIdentity,
    registration: RegistrationPolicy,
}

impl RegistryClient {
    pub fn new(
        base_url: String,
        token: String,
        identity: WorkerIdentity,
        registration: RegistrationPolicy,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            token,
            identity,
            registration,
        }
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn worker_url(&self, suffix: &str) -> String {
        self.url(&format!(
            "/api/v1/workers/{}{suffix}",
            self.identity.worker_id
        ))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, RegistryError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(RegistryError::Status { status, body })
    }

    /// Registers this worker, retrying on a fixed interval.
    pub async fn register_with_retry(&self) -> Result<RegisterResponse, RegistryError> {
        sleep(self.registration.startup_delay).await;

        let mut last_error = None;
        for attempt in 1..=self.registration.max_retries {
            match self.register().await {
                Ok(response) => {
                    tracing::info!(
                        worker_id = %self.identity.worker_id,
                        attempt,
                        recovery_required = response.recovery_required,
                        assigned = response.assigned_session_count,
                        "worker registered"
                    );
                    return Ok(response);
                }
                Err(error) => {
                    tracing::warn!(
                        attempt,
                        max = self.registration.max_retries,
                        %error,
                        "worker registration failed"
                    );
                    last_error = Some(error);
                    if attempt < self.registration.max_retries {
                        sleep(self.registration.retry_interval).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(RegistryError::RetriesExhausted))
    }

    async fn register(&self) -> Result<RegisterResponse, RegistryError> {
        let response = self
            .http
            .post(self.url("/api/v1/workers/register"))
            .bearer_auth(&self.token)
            .timeout(REGISTRATION_TIMEOUT)
            .json(&RegisterRequest::from(&self.identity))
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    /// Sends one heartbeat with per-session snapshots and process metrics.
    pub async fn heartbeat(&self, payload: &HeartbeatPayload) -> Result<(), RegistryError> {
        let response = self
            .http
            .put(self.worker_url("/heartbeat"))
            .bearer_auth(&self.token)
            .timeout(HEARTBEAT_TIMEOUT)
            .json(payload)
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    /// Fetches the authoritative list of sessions this worker must resume.
    /// A 404 means the backend has nothing recorded for this worker.
    pub async fn fetch_assignments(&self) -> Result<Vec<AssignmentRecord>, RegistryError> {
        let response = self
            .http
            .get(self.worker_url("/sessions/assigned"))
            .bearer_auth(&self.token)
            .timeout(RECOVERY_TIMEOUT)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let list: types::AssignmentList = Self::check(response).await?.json().await?;
        Ok(list.sessions)
    }

    pub async fn report_recovery(&self, report: &RecoveryReport) -> Result<(), RegistryError> {
        let response = self
            .http
            .post(self.worker_url("/sessions/recovery-status"))
            .bearer_auth(&self.token)
            .timeout(RECOVERY_TIMEOUT)
            .json(report)
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    pub async fn report_preserved(&self, report: &PreservedReport) -> Result<(), RegistryError> {
        let response = self
            .http
            .post(self.worker_url("/sessions/preserved"))
            .bearer_auth(&self.token)
            .timeout(RECOVERY_TIMEOUT)
            .json(report)
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    /// Removes this worker from the backend. Failures are logged, never
    /// returned: unregistration runs during shutdown.
    pub async fn unregister(&self) {
        let result = self
            .http
            .delete(self.worker_url(""))
            .bearer_auth(&self.token)
            .timeout(RECOVERY_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::info!(worker_id = %self.identity.worker_id, "worker unregistered");
            }
            Ok(response) => {
                tracing::warn!(status = %response.status(), "worker unregistration rejected");
            }
            Err(error) => {
                tracing::warn!(%error, "worker unregistration failed");
            }
        }
    }

    pub async fn post_session_status(&self, hook: &SessionStatusWebhook) -> Result<(), RegistryError> {
        let response = self
            .http
            .post(self.url("/api/v1/webhooks/session-status"))
            .bearer_auth(&self.token)
            .timeout(WEBHOOK_TIMEOUT)
            .json(hook)
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    pub async fn post_message_status(&self, hook: &MessageStatusWebhook) -> Result<(), RegistryError> {
        let response = self
            .http
            .post(self.url("/api/v1/webhooks/message-status"))
            .bearer_auth(&self.token)
            .timeout(WEBHOOK_TIMEOUT)
            .json(hook)
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    /// Spawns the heartbeat loop.
    pub fn spawn_heartbeat(
        self: &Arc<Self>,
        manager: SessionManager,
        interval: Duration,
        started_at: tokio::time::Instant,
    ) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval.max(Duration::from_secs(1)));
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tick.tick().await;

            loop {
                tick.tick().await;

                let snapshots = manager.list().await;
                let stats = manager.statistics().await;
                let payload = HeartbeatPayload {
                    worker_id: client.identity.worker_id.clone(),
                    sessions: snapshots.iter().map(HeartbeatSession::from).collect(),
                    metrics: metrics::worker_metrics(started_at, &stats),
                };

                if let Err(error) = client.heartbeat(&payload).await {
                    tracing::warn!(%error, "heartbeat failed");
                }
            }
        })
    }

    /// Spawns the event pump: every engine transition becomes a
    /// fire-and-forget webhook post.
    pub fn spawn_event_pump(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<SessionEvent>,
    ) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "event pump lagged, webhooks dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let client = client.clone();
                tokio::spawn(async move {
                    client.deliver(event).await;
                });
            }
        })
    }

    async fn deliver(&self, event: SessionEvent) {
        if let SessionEvent::MessageStatus {
            session_id,
            message_id,
            recipient,
            status,
        } = &event
        {
            let hook = MessageStatusWebhook {
                session_id: session_id.clone(),
                message_id: message_id.clone(),
                recipient: recipient.clone(),
                status: status.as_str().to_owned(),
                timestamp: chrono::Utc::now(),
            };
            if let Err(error) = self.post_message_status(&hook).await {
                tracing::warn!(
                    session_id = %hook.session_id,
                    message_id = %hook.message_id,
                    %error,
                    "message-status webhook failed"
                );
            }
            return;
        }

        let Some(hook) = webhook_from_event(&event) else {
            return;
        };

        if let Err(error) = self.post_session_status(&hook).await {
            tracing::warn!(
                session_id = %hook.session_id,
                event = hook.event,
                %error,
                "session-status webhook failed"
            );
        }
    }
}

/// Maps an engine transition to its `session-status` webhook body.
pub fn webhook_from_event(event: &SessionEvent) -> Option<SessionStatusWebhook> {
    let hook = match event {
        SessionEvent::Created { session_id } => SessionStatusWebhook::new(
            session_id,
            BackendSessionStatus::Init,
            "session_created",
        ),
        SessionEvent::QrReady {
            session_id,
            qr,
            attempt,
            ..
        } => {
            let mut hook =
                SessionStatusWebhook::new(session_id, BackendSessionStatus::QrRequired, "qr_ready");
            hook.qr_code = Some(qr.clone());
            hook.attempt = Some(*attempt);
            hook
        }
        SessionEvent::QrAttemptsExhausted {
            session_id,
            qr,
            attempt,
            auto_disconnect_in,
        } => {
            let mut hook = SessionStatusWebhook::new(
                session_id,
                BackendSessionStatus::QrRequired,
                "session_auto_disconnected",
            );
            hook.qr_code = Some(qr.clone());
            hook.attempt = Some(*attempt);
            hook.auto_disconnect_in = Some(*auto_disconnect_in);
            hook
        }
        SessionEvent::Connected {
            session_id,
            phone_number,
            display_name,
        } => {
            let mut hook = SessionStatusWebhook::new(
                session_id,
                BackendSessionStatus::Connected,
                "session_connected",
            );
            hook.phone_number = phone_number.clone();
            hook.display_name = display_name.clone();
            hook
        }
        SessionEvent::Reconnecting { session_id } => SessionStatusWebhook::new(
            session_id,
            BackendSessionStatus::Reconnecting,
            "reconnecting",
        ),
        SessionEvent::Disconnected {
            session_id,
            reason,
            requires_auth,
        } => {
            let mut hook = SessionStatusWebhook::new(
                session_id,
                BackendSessionStatus::Disconnected,
                "disconnected",
            );
            hook.reason = Some(reason.clone());
            hook.requires_auth = Some(*requires_auth);
            hook
        }
        SessionEvent::LoggedOut {
            session_id,
            phone_number,
            display_name,
        } => {
            let mut hook = SessionStatusWebhook::new(
                session_id,
                BackendSessionStatus::LoggedOut,
                "session_logged_out",
            );
            hook.phone_number = phone_number.clone();
            hook.display_name = display_name.clone();
            hook.reason = Some("logged_out".to_owned());
            hook
        }
        SessionEvent::AutoDisconnected { session_id } => {
            let mut hook = SessionStatusWebhook::new(
                session_id,
                BackendSessionStatus::Disconnected,
                "auto_disconnected",
            );
            hook.reason = Some("qr_attempts_exhausted".to_owned());
            hook
        }
        SessionEvent::Deleted { session_id } => SessionStatusWebhook::new(
            session_id,
            BackendSessionStatus::Disconnected,
            "session_deleted",
        ),
        SessionEvent::Failed { session_id, error } => {
            let mut hook = SessionStatusWebhook::new(
                session_id,
                BackendSessionStatus::Disconnected,
                "session_failed",
            );
            hook.reason = Some(error.clone());
            hook
        }
        SessionEvent::MessageStatus { .. } => return None,
    };

    Some(hook)
}

/// Builds the preserved-session report for graceful shutdown.
pub fn preserved_report(
    worker_id: &str,
    snapshots: &[crate::session::SessionSnapshot],
) -> PreservedReport {
    PreservedReport {
        worker_id: worker_id.to_owned(),
        sessions: snapshots
            .iter()
            .filter(|s| matches!(s.state, SessionState::Connected | SessionState::QrReady))
            .map(|s| PreservedSession {
                session_id: s.session_id.clone(),
                status: s.state.into(),
            })
            .collect(),
    }
}
