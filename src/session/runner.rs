use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use tokio::{
    sync::{RwLock, broadcast, mpsc},
    time::{Duration, Instant},
};

use crate::{
    auth::{AuthStateStore, StoreError},
    pacer,
    session::{
        EngineSettings,
        error::SessionError,
        events::SessionEvent,
        handle::{QrChallenge, SessionCommand, SessionSnapshot, SessionState},
    },
    wa::{
        self,
        CloseClass,
        ConnectionPhase,
        ConnectionUpdate,
        DisconnectInfo,
        MediaKind,
        MediaSource,
        MessageKey,
        MessageStatus,
        OutboundContent,
        PresenceKind,
        SendAction,
        SendReceipt,
        SocketOptions,
        WaEvent,
        WaSocket,
        WaSocketFactory,
        WaUser,
        classify_close,
    },
};

/// Owning task for a single session.
///
/// All protocol events, commands and timers for the session are serialized
/// through this task; the shared snapshot is only written from here.
pub(crate) struct SessionRunner {
    pub(crate) session_id: String,
    pub(crate) settings: EngineSettings,
    pub(crate) auth: Arc<AuthStateStore>,
    pub(crate) factory: Arc<dyn WaSocketFactory>,
    pub(crate) events: broadcast::Sender<SessionEvent>,
    pub(crate) snapshot: Arc<RwLock<SessionSnapshot>>,
    pub(crate) wa_tx: mpsc::Sender<WaEvent>,
    pub(crate) is_recovered: bool,
    pub(crate) socket: Option<Arc<dyn WaSocket>>,
    pub(crate) reconnect_attempts: u32,
}

/// Armed flags for the two timers owned by the select loop. Disarmed timers
/// keep a far-future deadline so the pinned sleeps stay reusable.
struct Timers {
    reconnect_armed: bool,
    qr_armed: bool,
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365)
}

impl SessionRunner {
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut wa_events: mpsc::Receiver<WaEvent>,
    ) {
        let reconnect_timer = tokio::time::sleep_until(far_future());
        let qr_timer = tokio::time::sleep_until(far_future());
        tokio::pin!(reconnect_timer, qr_timer);
        let mut timers = Timers {
            reconnect_armed: false,
            qr_armed: false,
        };

        if let Err(error) = self.spawn_socket().await {
            self.fail(error.to_string()).await;
        }

        loop {
            tokio::select! {
                maybe_command = commands.recv() => {
                    let Some(command) = maybe_command else {
                        break;
                    };

                    match command {
                        SessionCommand::Restart => {
                            timers.reconnect_armed = false;
                            timers.qr_armed = false;
                            self.restart().await;
                        }
                        SessionCommand::Disconnect => {
                            timers.reconnect_armed = false;
                            timers.qr_armed = false;
                            self.manual_disconnect().await;
                        }
                        SessionCommand::Logout => {
                            timers.reconnect_armed = false;
                            timers.qr_armed = false;
                            self.operator_logout().await;
                        }
                        SessionCommand::Delete { reply } => {
                            self.delete().await;
                            let _ = reply.send(());
                            break;
                        }
                        SessionCommand::Send { to, action, human_simulation, reply } => {
                            let result = self.handle_send(&to, action, human_simulation).await;
                            let _ = reply.send(result);
                        }
                        SessionCommand::Shutdown => {
                            if let Some(socket) = self.socket.take() {
                                socket.end().await;
                            }
                            break;
                        }
                    }
                }
                maybe_event = wa_events.recv() => {
                    let Some(event) = maybe_event else {
                        break;
                    };

                    match event {
                        WaEvent::Connection(update) => {
                            self.handle_connection_update(
                                update,
                                &mut timers,
                                &mut |deadline| qr_timer.as_mut().reset(deadline),
                                &mut |deadline| reconnect_timer.as_mut().reset(deadline),
                            )
                            .await;
                        }
                        WaEvent::CredsUpdate => {
                            self.touch().await;
                            tracing::debug!(session_id = %self.session_id, "credentials updated");
                        }
                        WaEvent::MessagesUpsert { count } => {
                            self.touch().await;
                            tracing::debug!(session_id = %self.session_id, count, "inbound messages");
                        }
                        WaEvent::MessageUpdate(update) => {
                            self.emit(SessionEvent::MessageStatus {
                                session_id: self.session_id.clone(),
                                message_id: update.message_id,
                                recipient: update.remote_jid,
                                status: update.status,
                            });
                        }
                        WaEvent::PresenceUpdate { jid, presence } => {
                            tracing::debug!(session_id = %self.session_id, %jid, %presence, "presence update");
                        }
                    }
                }
                () = &mut reconnect_timer, if timers.reconnect_armed => {
                    timers.reconnect_armed = false;
                    self.reconnect_now().await;
                }
                () = &mut qr_timer, if timers.qr_armed => {
                    timers.qr_armed = false;
                    self.force_auto_disconnect().await;
                }
            }
        }

        if let Some(socket) = self.socket.take() {
            socket.end().await;
        }
    }

    async fn handle_connection_update(
        &mut self,
        update: ConnectionUpdate,
        timers: &mut Timers,
        arm_qr: &mut (dyn FnMut(Instant) + Send),
        arm_reconnect: &mut (dyn FnMut(Instant) + Send),
    ) {
        if let Some(qr) = update.qr {
            self.handle_qr(qr, timers, arm_qr).await;
        }

        match update.connection {
            Some(ConnectionPhase::Open) => {
                timers.reconnect_armed = false;
                timers.qr_armed = false;
                self.handle_open(update.me).await;
            }
            Some(ConnectionPhase::Close) => {
                self.handle_close(update.last_disconnect, timers, arm_reconnect)
                    .await;
            }
            Some(ConnectionPhase::Connecting) | None => {}
        }
    }

    /// QR flow: bump the attempt counter, store the challenge, and on the
    /// terminal attempt arm the auto-disconnect grace timer.
    async fn handle_qr(&mut self, qr: String, timers: &mut Timers, arm_qr: &mut (dyn FnMut(Instant) + Send)) {
        let max_attempts = self.settings.max_qr_attempts;
        let (attempt, exhausted) = {
            let mut snapshot = self.snapshot.write().await;
            if snapshot.qr_attempts >= max_attempts {
                tracing::warn!(
                    session_id = %self.session_id,
                    attempts = snapshot.qr_attempts,
                    "qr event past attempt cap, ignoring"
                );
                return;
            }

            snapshot.qr_attempts += 1;
            let attempt = snapshot.qr_attempts;
            let exhausted = attempt >= max_attempts;
            let ttl = if exhausted {
                self.settings.terminal_qr_timeout
            } else {
                self.settings.qr_timeout
            };

            let now = Utc::now();
            snapshot.state = SessionState::QrReady;
            snapshot.qr = Some(QrChallenge {
                code: qr.clone(),
                attempt,
                issued_at: now,
                expires_at: now
                    + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero()),
                max_attempts_reached: exhausted,
            });
            (attempt, exhausted)
        };

        if exhausted {
            tracing::info!(
                session_id = %self.session_id,
                attempt,
                "qr attempts exhausted, arming auto-disconnect"
            );
            arm_qr(Instant::now() + self.settings.auto_disconnect_grace);
            timers.qr_armed = true;
            self.emit(SessionEvent::QrAttemptsExhausted {
                session_id: self.session_id.clone(),
                qr,
                attempt,
                auto_disconnect_in: self.settings.auto_disconnect_grace.as_secs(),
            });
        } else {
            self.emit(SessionEvent::QrReady {
                session_id: self.session_id.clone(),
                qr,
                attempt,
                expires_in: self.settings.qr_timeout.as_secs(),
            });
        }
    }

    async fn handle_open(&mut self, me: Option<WaUser>) {
        let phone_number = me
            .as_ref()
            .and_then(|user| wa::jid::format_phone_number(&user.jid));
        let display_name = me.and_then(|user| user.display_name);

        {
            let mut snapshot = self.snapshot.write().await;
            snapshot.state = SessionState::Connected;
            snapshot.qr = None;
            snapshot.qr_attempts = 0;
            snapshot.phone_number = phone_number.clone();
            snapshot.display_name = display_name.clone();
            snapshot.manual_disconnect = false;
            snapshot.last_disconnect_reason = None;
            snapshot.connected_at = Some(Utc::now());
            snapshot.last_seen = Some(Utc::now());
        }
        self.reconnect_attempts = 0;

        tracing::info!(
            session_id = %self.session_id,
            phone_number = phone_number.as_deref().unwrap_or("unknown"),
            "session connected"
        );
        self.emit(SessionEvent::Connected {
            session_id: self.session_id.clone(),
            phone_number,
            display_name,
        });

        // Mirror auth to the remote store; upload failure must never block
        // the connected transition.
        if self.auth.has_remote() {
            let auth = self.auth.clone();
            let session_id = self.session_id.clone();
            tokio::spawn(async move {
                if let Err(error) = auth.snapshot(&session_id).await {
                    tracing::warn!(%session_id, %error, "auth snapshot after connect failed");
                }
            });
        }
    }

    async fn handle_close(
        &mut self,
        info: Option<DisconnectInfo>,
        timers: &mut Timers,
        arm_reconnect: &mut (dyn FnMut(Instant) + Send),
    ) {
        if self.snapshot.read().await.manual_disconnect {
            // Operator-initiated close already transitioned and webhooked.
            tracing::debug!(session_id = %self.session_id, "close after manual disconnect, ignoring");
            return;
        }

        let class = classify_close(info.as_ref());
        let reason = info
            .as_ref()
            .map(|i| i.message.clone())
            .unwrap_or_else(|| "connection closed".to_owned());
        tracing::info!(
            session_id = %self.session_id,
            ?class,
            status_code = ?info.as_ref().and_then(|i| i.status_code),
            %reason,
            "connection closed"
        );

        // Recovered sessions reattach aggressively: anything short of a
        // terminal auth failure retries on the short delay.
        if self.is_recovered && !matches!(class, CloseClass::LoggedOut | CloseClass::BadSession) {
            self.schedule_reconnect(
                self.settings.recovered_reconnect_interval,
                &reason,
                timers,
                arm_reconnect,
            )
            .await;
            return;
        }

        match class {
            CloseClass::LoggedOut => {
                timers.reconnect_armed = false;
                timers.qr_armed = false;
                self.socket = None;

                let (phone_number, display_name) = {
                    let mut snapshot = self.snapshot.write().await;
                    snapshot.state = SessionState::LoggedOut;
                    snapshot.qr = None;
                    snapshot.qr_attempts = 0;
                    snapshot.last_disconnect_reason = Some(reason);
                    snapshot.disconnected_at = Some(Utc::now());
                    snapshot.logged_out_at = Some(Utc::now());
                    (snapshot.phone_number.clone(), snapshot.display_name.clone())
                };

                self.purge_auth().await;
                self.emit(SessionEvent::LoggedOut {
                    session_id: self.session_id.clone(),
                    phone_number,
                    display_name,
                });
            }
            CloseClass::ConnectionReplaced => {
                timers.reconnect_armed = false;
                timers.qr_armed = false;
                self.socket = None;
                self.transition_disconnected("connection_replaced").await;
                self.emit(SessionEvent::Disconnected {
                    session_id: self.session_id.clone(),
                    reason: "connection_replaced".to_owned(),
                    requires_auth: false,
                });
            }
            CloseClass::BadSession => {
                timers.reconnect_armed = false;
                timers.qr_armed = false;
                self.socket = None;
                self.transition_disconnected("bad_session").await;
                self.purge_auth().await;
                self.emit(SessionEvent::Disconnected {
                    session_id: self.session_id.clone(),
                    reason: "bad_session".to_owned(),
                    requires_auth: true,
                });
            }
            CloseClass::RestartRequired => {
                timers.reconnect_armed = false;
                timers.qr_armed = false;
                self.emit(SessionEvent::Reconnecting {
                    session_id: self.session_id.clone(),
                });
                self.reconnect_now().await;
            }
            CloseClass::TimedOut => {
                self.schedule_reconnect(
                    self.settings.timed_out_reconnect_interval,
                    &reason,
                    timers,
                    arm_reconnect,
                )
                .await;
            }
            CloseClass::Recoverable => {
                self.schedule_reconnect(
                    self.settings.reconnect_interval,
                    &reason,
                    timers,
                    arm_reconnect,
                )
                .await;
            }
        }
    }

    async fn schedule_reconnect(
        &mut self,
        delay: Duration,
        reason: &str,
        timers: &mut Timers,
        arm_reconnect: &mut (dyn FnMut(Instant) + Send),
    ) {
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        if self.reconnect_attempts > self.settings.max_reconnect_attempts {
            self.fail(format!("reconnect attempts exhausted after: {reason}"))
                .await;
            return;
        }

        {
            let mut snapshot = self.snapshot.write().await;
            snapshot.state = SessionState::Reconnecting;
            snapshot.qr = None;
            snapshot.last_disconnect_reason = Some(reason.to_owned());
            snapshot.disconnected_at = Some(Utc::now());
        }

        timers.qr_armed = false;
        arm_reconnect(Instant::now() + delay);
        timers.reconnect_armed = true;

        tracing::info!(
            session_id = %self.session_id,
            delay_ms = delay.as_millis() as u64,
            attempt = self.reconnect_attempts,
            "reconnect scheduled"
        );
        self.emit(SessionEvent::Reconnecting {
            session_id: self.session_id.clone(),
        });
    }

    /// Reconnect timer fired (or an immediate restart was requested): drop
    /// the old socket and create a fresh protocol instance.
    async fn reconnect_now(&mut self) {
        if let Some(socket) = self.socket.take() {
            socket.end().await;
        }

        {
            let mut snapshot = self.snapshot.write().await;
            snapshot.state = SessionState::Initializing;
            snapshot.qr = None;
        }

        if let Err(error) = self.spawn_socket().await {
            self.fail(error.to_string()).await;
        }
    }

    async fn force_auto_disconnect(&mut self) {
        if let Some(socket) = self.socket.take() {
            socket.end().await;
        }

        {
            let mut snapshot = self.snapshot.write().await;
            snapshot.state = SessionState::AutoDisconnected;
            snapshot.qr = None;
            snapshot.last_disconnect_reason = Some("qr_attempts_exhausted".to_owned());
            snapshot.disconnected_at = Some(Utc::now());
        }

        self.purge_auth().await;
        tracing::info!(session_id = %self.session_id, "auto-disconnected after unscanned qr");
        self.emit(SessionEvent::AutoDisconnected {
            session_id: self.session_id.clone(),
        });
    }

    async fn restart(&mut self) {
        if let Some(socket) = self.socket.take() {
            socket.end().await;
        }

        {
            let mut snapshot = self.snapshot.write().await;
            snapshot.state = SessionState::Initializing;
            snapshot.qr = None;
            snapshot.qr_attempts = 0;
            snapshot.manual_disconnect = false;
            snapshot.last_disconnect_reason = None;
        }
        self.reconnect_attempts = 0;

        self.emit(SessionEvent::Reconnecting {
            session_id: self.session_id.clone(),
        });

        if let Err(error) = self.spawn_socket().await {
            self.fail(error.to_string()).await;
        }
    }

    async fn manual_disconnect(&mut self) {
        {
            let mut snapshot = self.snapshot.write().await;
            snapshot.manual_disconnect = true;
        }

        if let Some(socket) = self.socket.take() {
            socket.end().await;
        }

        {
            let mut snapshot = self.snapshot.write().await;
            snapshot.state = SessionState::Disconnected;
            snapshot.qr = None;
            snapshot.qr_attempts = 0;
            snapshot.last_disconnect_reason = Some("manual".to_owned());
            snapshot.disconnected_at = Some(Utc::now());
        }

        self.emit(SessionEvent::Disconnected {
            session_id: self.session_id.clone(),
            reason: "manual".to_owned(),
            requires_auth: false,
        });
    }

    async fn operator_logout(&mut self) {
        if let Some(socket) = self.socket.take() {
            if let Err(error) = socket.logout().await {
                tracing::warn!(session_id = %self.session_id, %error, "protocol logout failed");
            }
            socket.end().await;
        }

        {
            let mut snapshot = self.snapshot.write().await;
            snapshot.state = SessionState::LoggedOut;
            snapshot.qr = None;
            snapshot.qr_attempts = 0;
            snapshot.last_disconnect_reason = Some("logged_out".to_owned());
            snapshot.disconnected_at = Some(Utc::now());
            snapshot.logged_out_at = Some(Utc::now());
        }

        self.purge_auth().await;
        self.emit(SessionEvent::Disconnected {
            session_id: self.session_id.clone(),
            reason: "logged_out".to_owned(),
            requires_auth: false,
        });
    }

    async fn delete(&mut self) {
        if let Some(socket) = self.socket.take() {
            if let Err(error) = socket.logout().await {
                tracing::debug!(session_id = %self.session_id, %error, "logout during delete failed");
            }
            socket.end().await;
        }

        self.purge_auth().await;
        self.emit(SessionEvent::Deleted {
            session_id: self.session_id.clone(),
        });
    }

    async fn handle_send(
        &mut self,
        to: &str,
        action: SendAction,
        human_simulation: bool,
    ) -> Result<SendReceipt, SessionError> {
        if self.snapshot.read().await.state != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }

        let socket = self
            .socket
            .as_ref()
            .ok_or(SessionError::NotConnected)?
            .clone();
        if !socket.is_authenticated() {
            return Err(SessionError::NotAuthenticated);
        }

        let jid = wa::jid::to_jid(to)
            .ok_or_else(|| SessionError::Validation(format!("invalid recipient: {to}")))?;

        let receipt = match action {
            SendAction::Seen { message_id } => {
                socket
                    .read_messages(&[MessageKey {
                        remote_jid: jid,
                        id: message_id.clone(),
                        from_me: false,
                    }])
                    .await?;
                SendReceipt {
                    message_id,
                    status: MessageStatus::Read,
                }
            }
            SendAction::TypingStart => {
                socket
                    .send_presence(PresenceKind::Composing, Some(&jid))
                    .await?;
                SendReceipt {
                    message_id: wa::generate_message_id(),
                    status: MessageStatus::Sent,
                }
            }
            SendAction::TypingStop => {
                socket
                    .send_presence(PresenceKind::Paused, Some(&jid))
                    .await?;
                SendReceipt {
                    message_id: wa::generate_message_id(),
                    status: MessageStatus::Sent,
                }
            }
            SendAction::Message(content) => {
                let content = self.stage_media(content).await?;

                if human_simulation {
                    let delays = pacer::PacerDelays::sample();
                    pacer::apply_before_send(socket.as_ref(), &jid, &delays).await;
                }

                let receipt = socket.send_message(&jid, &content).await?;

                if human_simulation {
                    pacer::settle_after_send(socket.as_ref(), &jid).await;
                }
                receipt
            }
        };

        self.touch().await;
        Ok(receipt)
    }

    /// Uploads raw media bytes to the media bucket and rewrites the source
    /// to the presigned URL the protocol library will fetch.
    async fn stage_media(&self, content: OutboundContent) -> Result<OutboundContent, SessionError> {
        let OutboundContent::Media {
            kind,
            source: MediaSource::Bytes(data),
            caption,
            filename,
        } = content
        else {
            return Ok(content);
        };

        let name = filename
            .clone()
            .unwrap_or_else(|| default_media_name(kind).to_owned());

        let url = self
            .auth
            .upload_media(&self.session_id, &name, Bytes::from(data))
            .await
            .map_err(|error| match error {
                StoreError::RemoteDisabled => {
                    SessionError::Validation("media payloads require the object store".to_owned())
                }
                other => SessionError::Transient(other.to_string()),
            })?;

        Ok(OutboundContent::Media {
            kind,
            source: MediaSource::Url(url),
            caption,
            filename,
        })
    }

    async fn spawn_socket(&mut self) -> Result<(), SessionError> {
        let handle = self
            .auth
            .load(&self.session_id)
            .await
            .map_err(|error| SessionError::Internal(error.to_string()))?;

        let options = SocketOptions {
            query_timeout: self.settings.query_timeout,
            link_preview: self.settings.link_preview,
        };

        let socket = self
            .factory
            .connect(handle, self.wa_tx.clone(), options)
            .await
            .map_err(|error| SessionError::Internal(error.to_string()))?;

        self.socket = Some(socket);
        Ok(())
    }

    async fn transition_disconnected(&self, reason: &str) {
        let mut snapshot = self.snapshot.write().await;
        snapshot.state = SessionState::Disconnected;
        snapshot.qr = None;
        snapshot.qr_attempts = 0;
        snapshot.last_disconnect_reason = Some(reason.to_owned());
        snapshot.disconnected_at = Some(Utc::now());
    }

    async fn fail(&mut self, error: String) {
        tracing::error!(session_id = %self.session_id, %error, "session failed");
        {
            let mut snapshot = self.snapshot.write().await;
            snapshot.state = SessionState::Failed;
            snapshot.qr = None;
            snapshot.last_disconnect_reason = Some(error.clone());
            snapshot.disconnected_at = Some(Utc::now());
        }

        self.emit(SessionEvent::Failed {
            session_id: self.session_id.clone(),
            error,
        });
    }

    async fn purge_auth(&self) {
        let outcome = self.auth.purge(&self.session_id).await;
        if !outcome.is_clean() {
            tracing::warn!(
                session_id = %self.session_id,
                errors = ?outcome.errors,
                "auth cleanup incomplete"
            );
        }
    }

    async fn touch(&self) {
        self.snapshot.write().await.last_seen = Some(Utc::now());
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

fn default_media_name(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Image => "image.jpg",
        MediaKind::Document => "document.bin",
        MediaKind::Video => "video.mp4",
        MediaKind::Audio => "audio.ogg",
    }
}
