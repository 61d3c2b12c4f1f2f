//! Chat delivery capability.
//!
//! The dispatcher only talks to a chat platform through [`MessageSink`].
//! Every failure is reported as a [`DeliveryError`] so the dispatcher can
//! decide whether to fall back to a cheaper delivery strategy.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::events::MessageColor;

/// Delivery faults reported by a sink.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The request never produced a usable response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The platform answered with `ok = false`.
    #[error("api error: {code}")]
    Api { code: String },

    /// The token lacks the scope needed for this call.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The sink cannot perform this kind of delivery at all.
    #[error("not supported: {0}")]
    NotSupported(&'static str),

    /// Still rate limited after exhausting retries.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// The sink is switched off or missing credentials.
    #[error("sink disabled")]
    Disabled,
}

impl DeliveryError {
    pub fn api(code: impl Into<String>) -> Self {
        Self::Api { code: code.into() }
    }
}

/// Identifier of a posted message that later replies can nest under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationThread(String);

impl ConversationThread {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One step of the image delivery chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageDelivery {
    /// Upload URL + complete call.
    ExternalUpload,
    /// Single multipart upload call.
    LegacyUpload,
    /// Plain text describing the image.
    TextDescription,
}

impl ImageDelivery {
    /// Upload method used by this step, `None` for the text fallback.
    pub fn upload_method(self) -> Option<UploadMethod> {
        match self {
            Self::ExternalUpload => Some(UploadMethod::External),
            Self::LegacyUpload => Some(UploadMethod::Legacy),
            Self::TextDescription => None,
        }
    }
}

/// Upload API to use for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMethod {
    External,
    Legacy,
}

impl UploadMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::External => "external",
            Self::Legacy => "legacy",
        }
    }
}

/// A text message ready for delivery.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub text: String,
    pub title: Option<String>,
    pub color: Option<MessageColor>,
    pub thread: Option<ConversationThread>,
}

impl OutgoingMessage {
    /// Plain reply without attachment styling.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            title: None,
            color: None,
            thread: None,
        }
    }
}

/// An image ready for upload.
#[derive(Debug, Clone, Copy)]
pub struct ImageUpload<'a> {
    pub bytes: &'a [u8],
    pub filename: &'a str,
    pub title: &'a str,
    /// Comment posted alongside the image.
    pub text: &'a str,
    pub thread: Option<&'a ConversationThread>,
}

/// Acknowledgement of a posted text message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostAck {
    /// Platform id of the posted message, usable as a thread root.
    pub ts: Option<String>,
}

/// Chat delivery capability.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Short identifier used in logs.
    fn sink_type(&self) -> &'static str;

    /// Whether the sink is configured to deliver anything.
    fn is_enabled(&self) -> bool;

    /// Post a text message.
    async fn post_text(
        &self,
        channel: &str,
        message: &OutgoingMessage,
    ) -> Result<PostAck, DeliveryError>;

    /// Upload an image with a comment.
    async fn post_image(
        &self,
        channel: &str,
        image: ImageUpload<'_>,
        method: UploadMethod,
    ) -> Result<(), DeliveryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_delivery_serde_names() {
        let chain: Vec<ImageDelivery> =
            serde_json::from_str(r#"["external_upload","legacy_upload","text_description"]"#)
                .unwrap();
        assert_eq!(
            chain,
            vec![
                ImageDelivery::ExternalUpload,
                ImageDelivery::LegacyUpload,
                ImageDelivery::TextDescription
            ]
        );
        assert_eq!(ImageDelivery::TextDescription.upload_method(), None);
    }
}
