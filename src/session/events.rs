use crate::wa::MessageStatus;

/// State-transition events published by the lifecycle engine.
///
/// The registry client subscribes to these and mirrors them to the backend
/// as webhooks; transitions never wait on delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Created {
        session_id: String,
    },
    QrReady {
        session_id: String,
        qr: String,
        attempt: u32,
        expires_in: u64,
    },
    /// The terminal QR attempt was issued; the session will be force-closed
    /// unless it connects within the grace window.
    QrAttemptsExhausted {
        session_id: String,
        qr: String,
        attempt: u32,
        auto_disconnect_in: u64,
    },
    Connected {
        session_id: String,
        phone_number: Option<String>,
        display_name: Option<String>,
    },
    Reconnecting {
        session_id: String,
    },
    Disconnected {
        session_id: String,
        reason: String,
        requires_auth: bool,
    },
    /// Remote unlink: the phone removed this device.
    LoggedOut {
        session_id: String,
        phone_number: Option<String>,
        display_name: Option<String>,
    },
    /// The QR grace window lapsed without a scan.
    AutoDisconnected {
        session_id: String,
    },
    Deleted {
        session_id: String,
    },
    Failed {
        session_id: String,
        error: String,
    },
    MessageStatus {
        session_id: String,
        message_id: String,
        recipient: String,
        status: MessageStatus,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Created { session_id }
            | Self::QrReady { session_id, .. }
            | Self::QrAttemptsExhausted { session_id, .. }
            | Self::Connected { session_id, .. }
            | Self::Reconnecting { session_id }
            | Self::Disconnected { session_id, .. }
            | Self::LoggedOut { session_id, .. }
            | Self::AutoDisconnected { session_id }
            | Self::Deleted { session_id }
            | Self::Failed { session_id, .. }
            | Self::MessageStatus { session_id, .. } => session_id,
        }
    }
}
