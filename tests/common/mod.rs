#![allow(dead_code)]

pub mod backend_mock;

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use tokio::{
    sync::{Mutex, broadcast, mpsc},
    time::{Duration, Instant, sleep, timeout},
};

use whatsam_worker::{
    auth::{AuthHandle, AuthStateStore, InMemoryRemoteStore, RemoteStore},
    session::{EngineSettings, SessionEvent, SessionManager, SessionState},
    wa::{
        ConnectionPhase,
        ConnectionUpdate,
        DisconnectInfo,
        MessageKey,
        MessageStatus,
        OutboundContent,
        PresenceKind,
        SendReceipt,
        SocketOptions,
        WaError,
        WaEvent,
        WaSocket,
        WaSocketFactory,
        WaUser,
        generate_message_id,
    },
};

/// Scriptable protocol factory: tests drive sessions by pushing events into
/// the channel each connect hands over.
#[derive(Default)]
pub struct MockWaSocketFactory {
    state: Mutex<FactoryState>,
}

#[derive(Default)]
struct FactoryState {
    senders: HashMap<String, mpsc::Sender<WaEvent>>,
    sockets: HashMap<String, Arc<MockWaSocket>>,
    connects: HashMap<String, usize>,
    refuse: HashSet<String>,
}

impl MockWaSocketFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes future connects for a session fail with a transport error.
    pub async fn refuse_connect(&self, session_id: &str) {
        self.state.lock().await.refuse.insert(session_id.to_owned());
    }

    pub async fn connect_count(&self, session_id: &str) -> usize {
        self.state
            .lock()
            .await
            .connects
            .get(session_id)
            .copied()
            .unwrap_or(0)
    }

    /// Waits until at least `count` connects happened for a session.
    pub async fn wait_for_connects(&self, session_id: &str, count: usize) {
        timeout(Duration::from_secs(5), async {
            loop {
                if self.connect_count(session_id).await >= count {
                    return;
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("session {session_id} never reached {count} connects"));
    }

    /// Latest socket handed to the engine for a session.
    pub async fn socket(&self, session_id: &str) -> Arc<MockWaSocket> {
        self.wait_for_connects(session_id, 1).await;
        self.state
            .lock()
            .await
            .sockets
            .get(session_id)
            .cloned()
            .expect("socket present after connect")
    }

    async fn sender(&self, session_id: &str) -> mpsc::Sender<WaEvent> {
        self.wait_for_connects(session_id, 1).await;
        self.state
            .lock()
            .await
            .senders
            .get(session_id)
            .cloned()
            .expect("sender present after connect")
    }

    pub async fn emit(&self, session_id: &str, event: WaEvent) {
        self.sender(session_id)
            .await
            .send(event)
            .await
            .expect("session task alive");
    }

    pub async fn emit_qr(&self, session_id: &str, qr: &str) {
        self.emit(
            session_id,
            WaEvent::Connection(ConnectionUpdate {
                qr: Some(qr.to_owned()),
                ..ConnectionUpdate::default()
            }),
        )
        .await;
    }

    pub async fn emit_open(&self, session_id: &str, jid: &str, display_name: Option<&str>) {
        self.socket(session_id)
            .await
            .authenticated
            .store(true, Ordering::SeqCst);
        self.emit(
            session_id,
            WaEvent::Connection(ConnectionUpdate {
                connection: Some(ConnectionPhase::Open),
                me: Some(WaUser {
                    jid: jid.to_owned(),
                    display_name: display_name.map(ToOwned::to_owned),
                }),
                ..ConnectionUpdate::default()
            }),
        )
        .await;
    }

    pub async fn emit_close(&self, session_id: &str, status_code: Option<u16>, message: &str) {
        self.emit(
            session_id,
            WaEvent::Connection(ConnectionUpdate {
                connection: Some(ConnectionPhase::Close),
                last_disconnect: Some(DisconnectInfo {
                    status_code,
                    message: message.to_owned(),
                }),
                ..ConnectionUpdate::default()
            }),
        )
        .await;
    }
}

#[async_trait]
impl WaSocketFactory for MockWaSocketFactory {
    async fn connect(
        &self,
        auth: AuthHandle,
        events: mpsc::Sender<WaEvent>,
        _options: SocketOptions,
    ) -> Result<Arc<dyn WaSocket>, WaError> {
        let mut state = self.state.lock().await;
        if state.refuse.contains(&auth.session_id) {
            return Err(WaError::Transport("mock connect refused".to_owned()));
        }

        let socket = Arc::new(MockWaSocket::default());
        state.senders.insert(auth.session_id.clone(), events);
        state
            .sockets
            .insert(auth.session_id.clone(), socket.clone());
        *state.connects.entry(auth.session_id).or_default() += 1;
        Ok(socket)
    }
}

pub struct SentRecord {
    pub to: String,
    pub content: OutboundContent,
    pub at: Instant,
}

/// Recording socket double.
#[derive(Default)]
pub struct MockWaSocket {
    pub authenticated: AtomicBool,
    pub sent: Mutex<Vec<SentRecord>>,
    pub presences: Mutex<Vec<(PresenceKind, Instant)>>,
    pub reads: Mutex<Vec<MessageKey>>,
    pub logouts: AtomicUsize,
    pub ended: AtomicBool,
}

impl MockWaSocket {
    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    pub async fn presence_sequence(&self) -> Vec<PresenceKind> {
        self.presences.lock().await.iter().map(|(p, _)| *p).collect()
    }
}

#[async_trait]
impl WaSocket for MockWaSocket {
    async fn send_message(
        &self,
        to: &str,
        content: &OutboundContent,
    ) -> Result<SendReceipt, WaError> {
        if !self.authenticated.load(Ordering::SeqCst) {
            return Err(WaError::NotAuthenticated);
        }

        self.sent.lock().await.push(SentRecord {
            to: to.to_owned(),
            content: content.clone(),
            at: Instant::now(),
        });
        Ok(SendReceipt {
            message_id: generate_message_id(),
            status: MessageStatus::Sent,
        })
    }

    async fn send_presence(&self, presence: PresenceKind, _to: Option<&str>) -> Result<(), WaError> {
        self.presences.lock().await.push((presence, Instant::now()));
        Ok(())
    }

    async fn read_messages(&self, keys: &[MessageKey]) -> Result<(), WaError> {
        self.reads.lock().await.extend(keys.iter().cloned());
        Ok(())
    }

    async fn logout(&self) -> Result<(), WaError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn end(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }
}

/// A fully wired engine over temp storage and an in-memory remote store.
pub struct TestEngine {
    pub manager: SessionManager,
    pub factory: Arc<MockWaSocketFactory>,
    pub auth: Arc<AuthStateStore>,
    pub remote: Arc<InMemoryRemoteStore>,
    pub tmp: tempfile::TempDir,
}

/// Engine settings with millisecond-scale timers so policy tests run fast.
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        max_qr_attempts: 3,
        qr_timeout: Duration::from_secs(60),
        terminal_qr_timeout: Duration::from_secs(30),
        auto_disconnect_grace: Duration::from_millis(300),
        reconnect_interval: Duration::from_millis(200),
        recovered_reconnect_interval: Duration::from_millis(60),
        timed_out_reconnect_interval: Duration::from_millis(400),
        max_reconnect_attempts: 5,
        query_timeout: Duration::from_secs(60),
        link_preview: true,
    }
}

pub fn test_engine_with(settings: EngineSettings) -> TestEngine {
    let tmp = tempfile::tempdir().expect("tempdir");
    let remote = InMemoryRemoteStore::new();
    let auth = Arc::new(AuthStateStore::new(
        tmp.path().join("sessions"),
        Some(remote.clone() as Arc<dyn RemoteStore>),
    ));
    let factory = MockWaSocketFactory::new();
    let manager = SessionManager::new(auth.clone(), factory.clone(), settings);

    TestEngine {
        manager,
        factory,
        auth,
        remote,
        tmp,
    }
}

pub fn test_engine() -> TestEngine {
    test_engine_with(fast_settings())
}

/// Polls until the session reaches the wanted state.
pub async fn wait_for_state(manager: &SessionManager, session_id: &str, wanted: SessionState) {
    timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(snapshot) = manager.status(session_id).await {
                if snapshot.state == wanted {
                    return;
                }
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("session {session_id} never reached {}", wanted.as_str()));
}

/// Receives events until one matches the predicate, or panics after 5 s.
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<SessionEvent>,
    mut matches: F,
) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("expected event never arrived")
}
