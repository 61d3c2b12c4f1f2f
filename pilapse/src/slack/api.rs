//! Slack Web API payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::command::InboundMessage;
use crate::notification::{DeliveryError, OutgoingMessage};

/// Error codes meaning the token lacks a scope or the app is not allowed.
const PERMISSION_ERRORS: &[&str] = &[
    "missing_scope",
    "not_allowed_token_type",
    "no_permission",
    "not_in_channel",
    "restricted_action",
];

/// Turn a Web API response body into `Ok(body)` or the matching error.
pub(crate) fn check_ok(method: &str, body: Value) -> Result<Value, DeliveryError> {
    if body.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(body);
    }

    let code = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown_error")
        .to_string();

    if PERMISSION_ERRORS.contains(&code.as_str()) {
        let needed = body
            .get("needed")
            .and_then(Value::as_str)
            .map(|scope| format!(" (needs {scope})"))
            .unwrap_or_default();
        return Err(DeliveryError::PermissionDenied(format!("{method}: {code}{needed}")));
    }
    if code == "ratelimited" {
        return Err(DeliveryError::RateLimited { retry_after: None });
    }
    Err(DeliveryError::api(format!("{method}: {code}")))
}

/// `chat.postMessage` body.
pub(crate) fn post_message_payload(
    channel: &str,
    message: &OutgoingMessage,
    username: &str,
    icon_emoji: &str,
    now_unix: i64,
) -> Value {
    let mut payload = json!({
        "channel": channel,
        "text": message.text,
        "username": username,
        "icon_emoji": icon_emoji,
    });

    if let Some(thread) = &message.thread {
        payload["thread_ts"] = json!(thread.as_str());
    }

    if message.title.is_some() || message.color.is_some() {
        payload["attachments"] = json!([{
            "fallback": message.text,
            "color": message.color.map(|c| c.as_str()).unwrap_or("good"),
            "fields": [{
                "title": message.title.as_deref().unwrap_or("Camera Status"),
                "value": "",
                "short": false,
            }],
            "ts": now_unix,
        }]);
    }

    payload
}

#[derive(Debug, Deserialize)]
pub(crate) struct PostMessageResponse {
    pub ts: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UploadUrlResponse {
    pub upload_url: String,
    pub file_id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct CompleteUploadFile<'a> {
    pub id: &'a str,
    pub title: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AuthTestResponse {
    pub user_id: Option<String>,
    pub team: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConversationsListResponse {
    #[serde(default)]
    pub channels: Vec<ChannelInfo>,
    pub response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChannelInfo {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseMetadata {
    pub next_cursor: Option<String>,
}

impl ResponseMetadata {
    pub fn cursor(&self) -> Option<&str> {
        self.next_cursor.as_deref().filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryResponse {
    #[serde(default)]
    pub messages: Vec<HistoryMessage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryMessage {
    pub ts: String,
    pub user: Option<String>,
    pub bot_id: Option<String>,
    pub subtype: Option<String>,
    #[serde(default)]
    pub text: String,
}

impl HistoryMessage {
    pub fn into_inbound(self, channel: &str) -> InboundMessage {
        InboundMessage {
            channel: channel.to_string(),
            ts: self.ts,
            user: self.user.or(self.bot_id),
            text: self.text,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConnectionsOpenResponse {
    pub url: String,
}

/// Whether `channel` already is a conversation id rather than a `#name`.
pub(crate) fn looks_like_channel_id(channel: &str) -> bool {
    let mut chars = channel.chars();
    matches!(chars.next(), Some('C' | 'G' | 'D'))
        && channel.len() >= 9
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}
