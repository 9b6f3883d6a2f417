use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use crate::{
    app::AppState,
    error::ApiError,
    wa::{MediaKind, MediaSource, MessageStatus, OutboundContent, SendAction},
};

/// Hard cap on bulk requests.
const BULK_LIMIT: usize = 100;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(default)]
    pub to: Option<String>,
    #[serde(rename = "type", default = "default_message_type")]
    pub message_type: String,
    /// Text body; caption fallback for media kinds.
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    /// Base64-encoded media payload.
    #[serde(default)]
    pub media: Option<String>,
    /// Already-hosted media URL, passed through unchanged.
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub location: Option<LocationPayload>,
    #[serde(default)]
    pub contact: Option<ContactPayload>,
    #[serde(default)]
    pub poll: Option<PollPayload>,
    /// Message id to mark as read for `seen`.
    #[serde(default)]
    pub message_id: Option<String>,
    /// Per-call human pacing override; defaults to on.
    #[serde(default)]
    pub human_simulation: Option<bool>,
}

fn default_message_type() -> String {
    "text".to_owned()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationPayload {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContactPayload {
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollPayload {
    pub name: String,
    pub options: Vec<String>,
    #[serde(default)]
    pub selectable_count: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    message_id: String,
    status: MessageStatus,
}

/// Turns a raw request into recipient + validated action.
fn parse_request(request: SendRequest) -> Result<(String, SendAction, bool), String> {
    let to = request
        .to
        .as_deref()
        .map(str::trim)
        .filter(|to| !to.is_empty())
        .ok_or_else(|| "missing required field: to".to_owned())?
        .to_owned();
    let human_simulation = request.human_simulation.unwrap_or(true);

    let action = match request.message_type.as_str() {
        "text" => SendAction::Message(OutboundContent::Text {
            body: required_text(request.message, "message")?,
        }),
        "link" => SendAction::Message(OutboundContent::Link {
            body: required_text(request.message, "message")?,
        }),
        "image" | "document" | "video" | "audio" => {
            let kind = match request.message_type.as_str() {
                "image" => MediaKind::Image,
                "document" => MediaKind::Document,
                "video" => MediaKind::Video,
                _ => MediaKind::Audio,
            };

            let source = if let Some(url) = request.media_url.filter(|u| !u.trim().is_empty()) {
                MediaSource::Url(url)
            } else if let Some(encoded) = request.media.filter(|m| !m.trim().is_empty()) {
                let bytes = STANDARD
                    .decode(encoded.trim())
                    .map_err(|_| "media is not valid base64".to_owned())?;
                MediaSource::Bytes(bytes)
            } else {
                return Err(format!(
                    "{} messages require media or mediaUrl",
                    request.message_type
                ));
            };

            SendAction::Message(OutboundContent::Media {
                kind,
                source,
                caption: request.caption.or(request.message),
                filename: request.filename,
            })
        }
        "location" => {
            let location = request
                .location
                .ok_or_else(|| "location messages require location".to_owned())?;
            SendAction::Message(OutboundContent::Location {
                latitude: location.latitude,
                longitude: location.longitude,
                name: location.name,
            })
        }
        "contact" => {
            let contact = request
                .contact
                .ok_or_else(|| "contact messages require contact".to_owned())?;
            if contact.name.trim().is_empty() || contact.phone.trim().is_empty() {
                return Err("contact requires name and phone".to_owned());
            }
            SendAction::Message(OutboundContent::Contact {
                name: contact.name,
                phone: contact.phone,
            })
        }
        "poll" => {
            let poll = request
                .poll
                .ok_or_else(|| "poll messages require poll".to_owned())?;
            if poll.name.trim().is_empty() || poll.options.len() < 2 {
                return Err("poll requires a name and at least two options".to_owned());
            }
            SendAction::Message(OutboundContent::Poll {
                name: poll.name,
                options: poll.options,
                selectable_count: poll.selectable_count.unwrap_or(1),
            })
        }
        "seen" => SendAction::Seen {
            message_id: required_text(request.message_id, "messageId")?,
        },
        "typing_start" => SendAction::TypingStart,
        "typing_stop" => SendAction::TypingStop,
        other => return Err(format!("unsupported message type: {other}")),
    };

    Ok((to, action, human_simulation))
}

fn required_text(value: Option<String>, field: &str) -> Result<String, String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("missing required field: {field}"))
}

/// `POST /api/:sessionId/send`
pub async fn send_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<SendRequest>,
) -> Result<Response, ApiError> {
    let (to, action, human_simulation) = parse_request(request).map_err(ApiError::bad_request)?;

    let receipt = state
        .manager()
        .send(&session_id, to, action, human_simulation)
        .await?;

    Ok(Json(SendResponse {
        message_id: receipt.message_id,
        status: receipt.status,
    })
    .into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSendRequest {
    pub messages: Vec<SendRequest>,
    /// Pause between dispatches; defaults to the configured delay.
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkResultEntry {
    index: usize,
    message_id: String,
    status: MessageStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkErrorEntry {
    index: usize,
    error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkSendResponse {
    total: usize,
    results: Vec<BulkResultEntry>,
    errors: Vec<BulkErrorEntry>,
}

/// `POST /api/:sessionId/send-bulk`: up to 100 messages with an
/// inter-message delay. Every item lands in `results` or `errors`, keyed by
/// request position.
pub async fn send_bulk_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<BulkSendRequest>,
) -> Result<Response, ApiError> {
    if request.messages.is_empty() {
        return Err(ApiError::bad_request("messages must not be empty"));
    }
    if request.messages.len() > BULK_LIMIT {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "validation_error",
            format!("bulk requests are limited to {BULK_LIMIT} messages"),
        ));
    }

    let delay = request
        .delay_ms
        .map(tokio::time::Duration::from_millis)
        .unwrap_or(state.config().bulk_message_delay);

    let total = request.messages.len();
    let mut results = Vec::new();
    let mut errors = Vec::new();

    for (index, item) in request.messages.into_iter().enumerate() {
        let parsed = match parse_request(item) {
            Ok(parsed) => parsed,
            Err(error) => {
                errors.push(BulkErrorEntry { index, error });
                continue;
            }
        };

        let (to, action, human_simulation) = parsed;
        match state
            .manager()
            .send(&session_id, to, action, human_simulation)
            .await
        {
            Ok(receipt) => results.push(BulkResultEntry {
                index,
                message_id: receipt.message_id,
                status: receipt.status,
            }),
            Err(error) => errors.push(BulkErrorEntry {
                index,
                error: error.to_string(),
            }),
        }

        if index + 1 < total {
            tokio::time::sleep(delay).await;
        }
    }

    Ok(Json(BulkSendResponse {
        total,
        results,
        errors,
    })
    .into_response())
}
