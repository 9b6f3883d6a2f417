use crate::wa::message::MessageStatus;

/// Events surfaced by the protocol library over a session's inbound channel.
#[derive(Debug, Clone, PartialEq)]
pub enum WaEvent {
    /// Connection lifecycle update (`connection.update`).
    Connection(ConnectionUpdate),
    /// Credentials changed on disk (`creds.update`).
    CredsUpdate,
    /// Inbound messages arrived (`messages.upsert`).
    MessagesUpsert { count: usize },
    /// Delivery status change for an outbound message (`messages.update`).
    MessageUpdate(MessageStatusUpdate),
    /// Remote presence change (`presence.update`).
    PresenceUpdate { jid: String, presence: String },
}

/// Connection lifecycle phases reported by the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Connecting,
    Open,
    Close,
}

/// `connection.update` payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConnectionUpdate {
    pub connection: Option<ConnectionPhase>,
    /// Pairing challenge string, present while the library waits for a scan.
    pub qr: Option<String>,
    /// Populated when `connection` is `Close`.
    pub last_disconnect: Option<DisconnectInfo>,
    /// Paired account, populated when `connection` is `Open`.
    pub me: Option<WaUser>,
}

/// The error attached to a connection close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectInfo {
    pub status_code: Option<u16>,
    pub message: String,
}

/// Paired WhatsApp account identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaUser {
    /// Full JID, e.g. `6285179971457:52@s.whatsapp.net`.
    pub jid: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageStatusUpdate {
    pub message_id: String,
    pub remote_jid: String,
    pub status: MessageStatus,
}

/// Disconnect status codes used by the protocol library.
pub mod close_code {
    pub const LOGGED_OUT: u16 = 401;
    pub const FORBIDDEN: u16 = 403;
    pub const TIMED_OUT: u16 = 408;
    pub const MULTIDEVICE_MISMATCH: u16 = 411;
    pub const CONNECTION_CLOSED: u16 = 428;
    pub const CONNECTION_REPLACED: u16 = 440;
    pub const BAD_SESSION: u16 = 500;
    pub const RESTART_REQUIRED: u16 = 515;
}

/// Reconnect policy buckets for a connection close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseClass {
    /// Device was unlinked remotely; auth is invalid.
    LoggedOut,
    /// Another client took over the session slot.
    ConnectionReplaced,
    /// Stored auth material is corrupt or rejected.
    BadSession,
    /// The library asks for an immediate socket recreation.
    RestartRequired,
    /// Keepalive lapse; retry on a longer delay.
    TimedOut,
    /// Any other close; retry on the default delay.
    Recoverable,
}

/// Classifies a close reason into a reconnect policy bucket.
///
/// The status code is authoritative. The substring match on the error message
/// is a last-resort fallback for library versions that close the stream
/// without a usable code.
pub fn classify_close(info: Option<&DisconnectInfo>) -> CloseClass {
    let Some(info) = info else {
        return CloseClass::Recoverable;
    };

    match info.status_code {
        Some(close_code::LOGGED_OUT) => CloseClass::LoggedOut,
        Some(close_code::CONNECTION_REPLACED) => CloseClass::ConnectionReplaced,
        Some(close_code::BAD_SESSION) => CloseClass::BadSession,
        Some(close_code::RESTART_REQUIRED) => CloseClass::RestartRequired,
        Some(close_code::TIMED_OUT) => CloseClass::TimedOut,
        Some(_) | None => {
            let message = info.message.to_ascii_lowercase();
            if message.contains("stream errored (conflict)")
                || message.contains("conflict")
                || message.contains("logged out")
            {
                CloseClass::LoggedOut
            } else {
                CloseClass::Recoverable
            }
        }
    }
}
