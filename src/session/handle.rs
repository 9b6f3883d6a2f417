use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, mpsc, oneshot};

use crate::{
    session::error::SessionError,
    wa::{SendAction, SendReceipt},
};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Protocol socket is being created or is pairing.
    Initializing,
    /// Waiting for a QR scan.
    QrReady,
    Connected,
    /// Socket lost; a reconnect is scheduled.
    Reconnecting,
    /// Socket closed, auth preserved; `Start` can revive.
    Disconnected,
    /// Device unlinked; auth purged.
    LoggedOut,
    /// QR attempts exhausted without a scan.
    AutoDisconnected,
    /// Unrecoverable error during create or restart.
    Failed,
}

impl SessionState {
    /// Stable string representation of a session state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::QrReady => "qr_ready",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
            Self::LoggedOut => "logged_out",
            Self::AutoDisconnected => "auto_disconnected",
            Self::Failed => "failed",
        }
    }

    /// Whether `Start` must restart the session instead of returning it.
    pub fn needs_restart(self) -> bool {
        matches!(
            self,
            Self::Disconnected | Self::LoggedOut | Self::AutoDisconnected | Self::Failed
        )
    }
}

/// Current QR pairing challenge for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrChallenge {
    /// Raw pairing string the phone scans.
    pub code: String,
    /// Attempt index, `1..=max_qr_attempts`.
    pub attempt: u32,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Set on the terminal attempt; the grace timer is armed.
    pub max_attempts_reached: bool,
}

/// Share-read view of one session, updated only by its owning task.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr: Option<QrChallenge>,
    pub qr_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_disconnect_reason: Option<String>,
    pub manual_disconnect: bool,
    pub is_recovered: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disconnected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logged_out_at: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    pub fn new(
        session_id: &str,
        user_id: &str,
        session_name: Option<String>,
        is_recovered: bool,
    ) -> Self {
        Self {
            session_id: session_id.to_owned(),
            user_id: user_id.to_owned(),
            session_name,
            state: SessionState::Initializing,
            phone_number: None,
            display_name: None,
            qr: None,
            qr_attempts: 0,
            last_disconnect_reason: None,
            manual_disconnect: false,
            is_recovered,
            created_at: Utc::now(),
            last_seen: None,
            connected_at: None,
            disconnected_at: None,
            logged_out_at: None,
        }
    }
}

/// Commands accepted by a session task.
#[derive(Debug)]
pub enum SessionCommand {
    /// Closes the socket, preserves auth, recreates the protocol instance.
    Restart,
    /// Closes the socket, preserves auth, marks the session manual.
    Disconnect,
    /// Invalidates the device registration, then cleans up auth.
    Logout,
    /// Terminal removal; the task replies once cleanup finished and exits.
    Delete { reply: oneshot::Sender<()> },
    /// Outbound send routed through the owning task.
    Send {
        to: String,
        action: SendAction,
        human_simulation: bool,
        reply: oneshot::Sender<Result<SendReceipt, SessionError>>,
    },
    /// Process shutdown: close the socket and exit without events.
    Shutdown,
}

/// Handle used by other modules to interact with a session task.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
    snapshot: Arc<RwLock<SessionSnapshot>>,
}

impl SessionHandle {
    pub fn new(tx: mpsc::Sender<SessionCommand>, snapshot: Arc<RwLock<SessionSnapshot>>) -> Self {
        Self { tx, snapshot }
    }

    /// Returns the current session snapshot.
    pub async fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Returns the current lifecycle state.
    pub async fn state(&self) -> SessionState {
        self.snapshot.read().await.state
    }

    pub async fn restart(&self) -> Result<(), SessionError> {
        self.command(SessionCommand::Restart).await
    }

    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.command(SessionCommand::Disconnect).await
    }

    pub async fn logout(&self) -> Result<(), SessionError> {
        self.command(SessionCommand::Logout).await
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.command(SessionCommand::Shutdown).await
    }

    /// Asks the task to tear the session down and waits for cleanup.
    pub async fn delete(&self) -> Result<(), SessionError> {
        let (reply, done) = oneshot::channel();
        self.command(SessionCommand::Delete { reply }).await?;
        done.await.map_err(|_| SessionError::ChannelClosed)
    }

    /// Routes a send through the session task and waits for the receipt.
    pub async fn send(
        &self,
        to: String,
        action: SendAction,
        human_simulation: bool,
    ) -> Result<SendReceipt, SessionError> {
        let (reply, result) = oneshot::channel();
        self.command(SessionCommand::Send {
            to,
            action,
            human_simulation,
            reply,
        })
        .await?;

        result.await.map_err(|_| SessionError::ChannelClosed)?
    }

    async fn command(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SessionError::ChannelClosed)
    }
}
