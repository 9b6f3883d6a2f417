use serde::{Deserialize, Serialize};

/// Delivery status of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    /// Stable string representation used in webhooks and responses.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }
}

/// Key identifying a message on the protocol side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageKey {
    pub remote_jid: String,
    pub id: String,
    pub from_me: bool,
}

/// Result of a protocol send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: String,
    pub status: MessageStatus,
}

/// Media categories supported by the send path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Document,
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Document => "document",
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

/// Where a media payload comes from.
///
/// Raw bytes are uploaded to the media bucket and rewritten to a presigned
/// URL before they reach the protocol library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    Url(String),
    Bytes(Vec<u8>),
}

/// Validated outbound message content handed to the protocol library.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundContent {
    Text {
        body: String,
    },
    /// Text with link preview generation enabled.
    Link {
        body: String,
    },
    Media {
        kind: MediaKind,
        source: MediaSource,
        caption: Option<String>,
        filename: Option<String>,
    },
    Location {
        latitude: f64,
        longitude: f64,
        name: Option<String>,
    },
    Contact {
        name: String,
        phone: String,
    },
    Poll {
        name: String,
        options: Vec<String>,
        selectable_count: u32,
    },
}

/// A send request after validation: either a message or a presence action.
#[derive(Debug, Clone, PartialEq)]
pub enum SendAction {
    Message(OutboundContent),
    /// Mark a received message as read.
    Seen { message_id: String },
    TypingStart,
    TypingStop,
}

/// Generates a WhatsApp-style uppercase hex message id.
pub fn generate_message_id() -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
    format!("3EB0{}", &raw[..16])
}
