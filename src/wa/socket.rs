use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::{sync::mpsc, time::Duration};

use crate::{
    auth::AuthHandle,
    wa::{
        events::WaEvent,
        message::{MessageKey, OutboundContent, SendReceipt},
    },
};

/// Presence states the library can broadcast on our behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceKind {
    Available,
    Unavailable,
    Composing,
    Paused,
}

impl PresenceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Unavailable => "unavailable",
            Self::Composing => "composing",
            Self::Paused => "paused",
        }
    }
}

/// Construction options forwarded to the protocol library.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Per protocol query timeout.
    pub query_timeout: Duration,
    /// Whether to generate link previews for link sends.
    pub link_preview: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(60),
            link_preview: true,
        }
    }
}

/// Errors surfaced by the protocol library.
#[derive(Debug, Error)]
pub enum WaError {
    #[error("socket has no paired user")]
    NotAuthenticated,
    #[error("protocol query timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("send rejected: {0}")]
    Rejected(String),
}

/// One live connection of the external WhatsApp protocol library.
///
/// The library is a black box: it emits [`WaEvent`]s on the channel handed to
/// its factory and accepts the calls below. Nothing else about it may be
/// assumed.
#[async_trait]
pub trait WaSocket: Send + Sync {
    /// Sends a message to a JID. Requires a paired user.
    async fn send_message(
        &self,
        to: &str,
        content: &OutboundContent,
    ) -> Result<SendReceipt, WaError>;

    /// Broadcasts a presence update, optionally scoped to one chat.
    async fn send_presence(
        &self,
        presence: PresenceKind,
        to: Option<&str>,
    ) -> Result<(), WaError>;

    /// Marks received messages as read.
    async fn read_messages(&self, keys: &[MessageKey]) -> Result<(), WaError>;

    /// Invalidates the device registration on the WhatsApp servers.
    async fn logout(&self) -> Result<(), WaError>;

    /// Closes the socket without touching the registration.
    async fn end(&self);

    /// Whether the socket currently has a paired user.
    fn is_authenticated(&self) -> bool;
}

/// Creates protocol sockets bound to a session's auth directory.
///
/// Each call opens a fresh connection; events flow into `events` until the
/// socket is ended or replaced. Every socket generation of one session shares
/// the same channel so the owning task observes events in arrival order.
#[async_trait]
pub trait WaSocketFactory: Send + Sync {
    async fn connect(
        &self,
        auth: AuthHandle,
        events: mpsc::Sender<WaEvent>,
        options: SocketOptions,
    ) -> Result<Arc<dyn WaSocket>, WaError>;
}

/// Synthetic factory used as the default placeholder until a real protocol
/// adapter is wired in. Emits a pairing challenge that can never be scanned;
/// sends fail as unauthenticated.
#[derive(Default)]
pub struct StubWaSocketFactory;

#[async_trait]
impl WaSocketFactory for StubWaSocketFactory {
    async fn connect(
        &self,
        auth: AuthHandle,
        events: mpsc::Sender<WaEvent>,
        _options: SocketOptions,
    ) -> Result<Arc<dyn WaSocket>, WaError> {
        let _ = events
            .send(WaEvent::Connection(crate::wa::events::ConnectionUpdate {
                connection: Some(crate::wa::events::ConnectionPhase::Connecting),
                ..Default::default()
            }))
            .await;
        let _ = events
            .send(WaEvent::Connection(crate::wa::events::ConnectionUpdate {
                qr: Some(format!("2@{}:synthetic", auth.session_id)),
                ..Default::default()
            }))
            .await;

        Ok(Arc::new(StubWaSocket))
    }
}

struct StubWaSocket;

#[async_trait]
impl WaSocket for StubWaSocket {
    async fn send_message(
        &self,
        _to: &str,
        _content: &OutboundContent,
    ) -> Result<SendReceipt, WaError> {
        Err(WaError::NotAuthenticated)
    }

    async fn send_presence(
        &self,
        _presence: PresenceKind,
        _to: Option<&str>,
    ) -> Result<(), WaError> {
        Ok(())
    }

    async fn read_messages(&self, _keys: &[MessageKey]) -> Result<(), WaError> {
        Ok(())
    }

    async fn logout(&self) -> Result<(), WaError> {
        Ok(())
    }

    async fn end(&self) {}

    fn is_authenticated(&self) -> bool {
        false
    }
}
