pub mod error;
pub mod events;
pub mod handle;
pub(crate) mod runner;

use std::{collections::HashMap, sync::Arc};

use serde::Serialize;
use tokio::{
    sync::{RwLock, broadcast, mpsc},
    time::Duration,
};

use crate::{
    auth::AuthStateStore,
    wa::{SendAction, SendReceipt, WaEvent, WaSocketFactory},
};

pub use error::SessionError;
pub use events::SessionEvent;
pub use handle::{QrChallenge, SessionHandle, SessionSnapshot, SessionState};

/// Tunables for the lifecycle engine, derived from configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// QR attempts before the session auto-disconnects.
    pub max_qr_attempts: u32,
    /// Expiry of a non-terminal QR challenge.
    pub qr_timeout: Duration,
    /// Expiry of the terminal QR challenge.
    pub terminal_qr_timeout: Duration,
    /// Grace between the terminal QR and the forced disconnect.
    pub auto_disconnect_grace: Duration,
    /// Default reconnect delay.
    pub reconnect_interval: Duration,
    /// Reconnect delay for recovered sessions.
    pub recovered_reconnect_interval: Duration,
    /// Reconnect delay after a keepalive timeout.
    pub timed_out_reconnect_interval: Duration,
    /// Consecutive reconnects without an open before the session fails.
    pub max_reconnect_attempts: u32,
    /// Per protocol query timeout forwarded to the library.
    pub query_timeout: Duration,
    pub link_preview: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_qr_attempts: 3,
            qr_timeout: Duration::from_secs(60),
            terminal_qr_timeout: Duration::from_secs(30),
            auto_disconnect_grace: Duration::from_secs(30),
            reconnect_interval: Duration::from_secs(5),
            recovered_reconnect_interval: Duration::from_secs(3),
            timed_out_reconnect_interval: Duration::from_secs(10),
            max_reconnect_attempts: 5,
            query_timeout: Duration::from_secs(60),
            link_preview: true,
        }
    }
}

/// Per-state session counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatistics {
    pub total: usize,
    pub initializing: usize,
    pub qr_ready: usize,
    pub connected: usize,
    pub reconnecting: usize,
    pub disconnected: usize,
    pub logged_out: usize,
    pub auto_disconnected: usize,
    pub failed: usize,
}

/// Result of a `start` call.
#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub snapshot: SessionSnapshot,
    /// Whether a new session was created (as opposed to resumed/restarted).
    pub created: bool,
}

/// In-memory manager for the sessions owned by this worker.
///
/// Holds one [`SessionHandle`] per session id; all mutation goes through the
/// session's owning task. State-transition events fan out on a broadcast
/// channel consumed by the registry client.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
    auth: Arc<AuthStateStore>,
    factory: Arc<dyn WaSocketFactory>,
    settings: EngineSettings,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    const COMMAND_BUFFER: usize = 32;
    const WA_EVENT_BUFFER: usize = 64;
    const EVENT_FANOUT_BUFFER: usize = 256;

    pub fn new(
        auth: Arc<AuthStateStore>,
        factory: Arc<dyn WaSocketFactory>,
        settings: EngineSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(Self::EVENT_FANOUT_BUFFER);
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            auth,
            factory,
            settings,
            events,
        }
    }

    /// Subscribes to engine state-transition events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Idempotent resume-or-create.
    ///
    /// Running sessions return their current snapshot; quasi-terminal ones
    /// are restarted; unknown ids are created fresh.
    pub async fn start(
        &self,
        session_id: &str,
        user_id: &str,
        session_name: Option<String>,
        is_recovery: bool,
    ) -> Result<StartOutcome, SessionError> {
        validate_session_id(session_id)?;

        let existing = {
            let sessions = self.sessions.read().await;
            sessions.get(session_id).cloned()
        };

        if let Some(handle) = existing {
            let snapshot = handle.snapshot().await;
            if snapshot.state.needs_restart() {
                handle.restart().await?;
                let snapshot = handle.snapshot().await;
                return Ok(StartOutcome {
                    snapshot,
                    created: false,
                });
            }

            return Ok(StartOutcome {
                snapshot,
                created: false,
            });
        }

        let snapshot = self
            .create_session(session_id, user_id, session_name, is_recovery)
            .await?;
        Ok(StartOutcome {
            snapshot,
            created: true,
        })
    }

    /// Strict create: fails with `AlreadyExists` when the id is taken.
    pub async fn create(
        &self,
        session_id: &str,
        user_id: &str,
        session_name: Option<String>,
        is_recovery: bool,
    ) -> Result<SessionSnapshot, SessionError> {
        validate_session_id(session_id)?;
        self.create_session(session_id, user_id, session_name, is_recovery)
            .await
    }

    async fn create_session(
        &self,
        session_id: &str,
        user_id: &str,
        session_name: Option<String>,
        is_recovery: bool,
    ) -> Result<SessionSnapshot, SessionError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(session_id) {
            return Err(SessionError::AlreadyExists);
        }

        // Fail fast before inserting anything; nothing to roll back on error.
        self.auth
            .ensure_local(session_id)
            .await
            .map_err(|error| SessionError::Internal(error.to_string()))?;

        let (command_tx, command_rx) = mpsc::channel(Self::COMMAND_BUFFER);
        let (wa_tx, wa_rx) = mpsc::channel::<WaEvent>(Self::WA_EVENT_BUFFER);
        let snapshot = Arc::new(RwLock::new(SessionSnapshot::new(
            session_id,
            user_id,
            session_name,
            is_recovery,
        )));
        let handle = SessionHandle::new(command_tx, snapshot.clone());

        let runner = runner::SessionRunner {
            session_id: session_id.to_owned(),
            settings: self.settings.clone(),
            auth: self.auth.clone(),
            factory: self.factory.clone(),
            events: self.events.clone(),
            snapshot: snapshot.clone(),
            wa_tx,
            is_recovered: is_recovery,
            socket: None,
            reconnect_attempts: 0,
        };
        tokio::spawn(runner.run(command_rx, wa_rx));

        sessions.insert(session_id.to_owned(), handle);
        drop(sessions);

        tracing::info!(session_id, user_id, is_recovery, "session created");
        let _ = self.events.send(SessionEvent::Created {
            session_id: session_id.to_owned(),
        });

        Ok(snapshot.read().await.clone())
    }

    async fn handle(&self, session_id: &str) -> Result<SessionHandle, SessionError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or(SessionError::NotFound)
    }

    /// Returns the status snapshot for a session.
    pub async fn status(&self, session_id: &str) -> Result<SessionSnapshot, SessionError> {
        Ok(self.handle(session_id).await?.snapshot().await)
    }

    pub async fn restart(&self, session_id: &str) -> Result<(), SessionError> {
        self.handle(session_id).await?.restart().await
    }

    pub async fn disconnect(&self, session_id: &str) -> Result<(), SessionError> {
        self.handle(session_id).await?.disconnect().await
    }

    pub async fn logout(&self, session_id: &str) -> Result<(), SessionError> {
        self.handle(session_id).await?.logout().await
    }

    /// Terminal removal: logs out, purges auth, drops in-memory state.
    pub async fn delete(&self, session_id: &str) -> Result<(), SessionError> {
        let handle = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(session_id).ok_or(SessionError::NotFound)?
        };

        match handle.delete().await {
            Ok(()) => Ok(()),
            Err(SessionError::ChannelClosed) => {
                // Task already died; make sure the auth material still goes.
                let outcome = self.auth.purge(session_id).await;
                if !outcome.is_clean() {
                    tracing::warn!(session_id, errors = ?outcome.errors, "orphan auth cleanup incomplete");
                }
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    /// Routes a send to the session task. Fails unless the session is
    /// connected with a paired user.
    pub async fn send(
        &self,
        session_id: &str,
        to: String,
        action: SendAction,
        human_simulation: bool,
    ) -> Result<SendReceipt, SessionError> {
        self.handle(session_id)
            .await?
            .send(to, action, human_simulation)
            .await
    }

    /// Snapshots of every session on this worker.
    pub async fn list(&self) -> Vec<SessionSnapshot> {
        let handles: Vec<SessionHandle> = self.sessions.read().await.values().cloned().collect();

        let mut snapshots = Vec::with_capacity(handles.len());
        for handle in handles {
            snapshots.push(handle.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        snapshots
    }

    /// Per-state counts across all sessions.
    pub async fn statistics(&self) -> SessionStatistics {
        let mut stats = SessionStatistics::default();
        for snapshot in self.list().await {
            stats.total += 1;
            match snapshot.state {
                SessionState::Initializing => stats.initializing += 1,
                SessionState::QrReady => stats.qr_ready += 1,
                SessionState::Connected => stats.connected += 1,
                SessionState::Reconnecting => stats.reconnecting += 1,
                SessionState::Disconnected => stats.disconnected += 1,
                SessionState::LoggedOut => stats.logged_out += 1,
                SessionState::AutoDisconnected => stats.auto_disconnected += 1,
                SessionState::Failed => stats.failed += 1,
            }
        }
        stats
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Asks every session task to close its socket and exit. Used during
    /// graceful shutdown, after preservation.
    pub async fn shutdown_all(&self) {
        let handles: Vec<SessionHandle> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, handle)| handle).collect()
        };

        for handle in handles {
            let _ = handle.shutdown().await;
        }
    }
}

/// Session ids are `3..=50` chars of `[A-Za-z0-9_-]`. Doubles as a path
/// traversal guard for the auth directory layout.
fn validate_session_id(session_id: &str) -> Result<(), SessionError> {
    let len = session_id.len();
    if !(3..=50).contains(&len) {
        return Err(SessionError::Validation(
            "session id must be 3-50 characters".to_owned(),
        ));
    }

    if !session_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(SessionError::Validation(
            "session id may only contain letters, digits, '_' and '-'".to_owned(),
        ));
    }

    Ok(())
}
