//! Slack Web API client.
//!
//! Implements [`MessageSink`] for notifications and command replies, and
//! [`HistorySource`] for the polling command listener. Rate-limited calls
//! (HTTP 429) are retried after the `Retry-After` delay, up to
//! [`MAX_RATE_LIMIT_RETRIES`] attempts.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, multipart};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::SlackConfig;
use super::api::{
    AuthTestResponse, CompleteUploadFile, ConnectionsOpenResponse, ConversationsListResponse,
    HistoryResponse, PostMessageResponse, UploadUrlResponse, check_ok, looks_like_channel_id,
    post_message_payload,
};
use crate::command::{HistorySource, InboundMessage};
use crate::notification::{
    DeliveryError, ImageUpload, MessageSink, OutgoingMessage, PostAck, UploadMethod,
};

/// Maximum number of attempts for a rate-limited request.
pub const MAX_RATE_LIMIT_RETRIES: u32 = 3;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Slack Web API client.
pub struct SlackClient {
    config: SlackConfig,
    client: Client,
    channel_ids: RwLock<HashMap<String, String>>,
    bot_user_id: OnceCell<Option<String>>,
}

impl SlackClient {
    pub fn new(config: SlackConfig) -> Self {
        super::install_rustls_provider();
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("pilapse/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build HTTP client, using defaults");
                Client::new()
            });
        Self {
            config,
            client,
            channel_ids: RwLock::new(HashMap::new()),
            bot_user_id: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &SlackConfig {
        &self.config
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), method)
    }

    fn ensure_enabled(&self) -> Result<(), DeliveryError> {
        if self.config.is_enabled() {
            Ok(())
        } else {
            Err(DeliveryError::Disabled)
        }
    }

    /// Send a request built by `build`, retrying on 429.
    async fn send_with_retry<F>(&self, method: &str, build: F) -> Result<Value, DeliveryError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;

            let response = build()
                .send()
                .await
                .map_err(|e| DeliveryError::Transport(format!("{method}: {e}")))?;
            let status = response.status();

            if status.as_u16() == 429 {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);

                if attempts >= MAX_RATE_LIMIT_RETRIES {
                    warn!(
                        "Slack rate limit on {}: max retries ({}) exceeded, last retry_after was {:?}",
                        method, MAX_RATE_LIMIT_RETRIES, retry_after
                    );
                    return Err(DeliveryError::RateLimited { retry_after });
                }

                let wait = retry_after.unwrap_or(Duration::from_secs(1));
                debug!(
                    "Slack rate limited (429) on {}, waiting {:?} before retry (attempt {}/{})",
                    method, wait, attempts, MAX_RATE_LIMIT_RETRIES
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(DeliveryError::Transport(format!(
                    "{method} failed: {status} - {body}"
                )));
            }

            let body: Value = response
                .json()
                .await
                .map_err(|e| DeliveryError::Transport(format!("{method}: invalid response: {e}")))?;
            return check_ok(method, body);
        }
    }

    async fn call<T: DeserializeOwned, F>(&self, method: &str, build: F) -> Result<T, DeliveryError>
    where
        F: Fn() -> RequestBuilder,
    {
        let body = self.send_with_retry(method, build).await?;
        serde_json::from_value(body)
            .map_err(|e| DeliveryError::Transport(format!("{method}: unexpected response: {e}")))
    }

    fn post_json(&self, method: &str, token: &str, payload: &Value) -> RequestBuilder {
        self.client
            .post(self.url(method))
            .bearer_auth(token)
            .json(payload)
    }

    fn post_form(&self, method: &str, form: &[(&str, String)]) -> RequestBuilder {
        self.client
            .post(self.url(method))
            .bearer_auth(&self.config.bot_token)
            .form(form)
    }

    /// Verify the bot token and log the workspace it belongs to.
    pub async fn verify(&self) -> Result<(), DeliveryError> {
        self.ensure_enabled()?;
        let auth: AuthTestResponse = self
            .call("auth.test", || self.post_form("auth.test", &[]))
            .await?;
        info!(
            team = auth.team.as_deref().unwrap_or("unknown"),
            "Slack client initialized"
        );
        Ok(())
    }

    /// Look up the id of a `#channel` name, caching the result.
    async fn lookup_channel(&self, channel: &str) -> Result<String, DeliveryError> {
        if looks_like_channel_id(channel) {
            return Ok(channel.to_string());
        }

        let name = channel.trim_start_matches('#');
        if let Some(id) = self.channel_ids.read().get(name) {
            return Ok(id.clone());
        }

        let mut cursor: Option<String> = None;
        loop {
            let mut form = vec![
                ("types", "public_channel,private_channel".to_string()),
                ("exclude_archived", "true".to_string()),
                ("limit", "200".to_string()),
            ];
            if let Some(c) = &cursor {
                form.push(("cursor", c.clone()));
            }

            let page: ConversationsListResponse = self
                .call("conversations.list", || self.post_form("conversations.list", &form))
                .await?;

            if let Some(found) = page
                .channels
                .iter()
                .find(|c| c.name.as_deref() == Some(name))
            {
                debug!(channel = %name, id = %found.id, "Resolved channel id");
                self.channel_ids
                    .write()
                    .insert(name.to_string(), found.id.clone());
                return Ok(found.id.clone());
            }

            match page.response_metadata.as_ref().and_then(|m| m.cursor()) {
                Some(next) => cursor = Some(next.to_string()),
                None => break,
            }
        }

        Err(DeliveryError::api(format!("channel #{name} not found")))
    }

    async fn upload_external(
        &self,
        channel: &str,
        image: &ImageUpload<'_>,
    ) -> Result<(), DeliveryError> {
        let channel_id = self.lookup_channel(channel).await?;

        let form = [
            ("filename", image.filename.to_string()),
            ("length", image.bytes.len().to_string()),
        ];
        let target: UploadUrlResponse = self
            .call("files.getUploadURLExternal", || {
                self.post_form("files.getUploadURLExternal", &form)
            })
            .await?;

        let response = self
            .client
            .post(&target.upload_url)
            .body(image.bytes.to_vec())
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(format!("file upload: {e}")))?;
        if !response.status().is_success() {
            return Err(DeliveryError::Transport(format!(
                "file upload failed: {}",
                response.status()
            )));
        }

        let mut payload = json!({
            "files": [CompleteUploadFile { id: &target.file_id, title: image.title }],
            "channel_id": channel_id,
            "initial_comment": image.text,
        });
        if let Some(thread) = image.thread {
            payload["thread_ts"] = json!(thread.as_str());
        }
        self.send_with_retry("files.completeUploadExternal", || {
            self.post_json("files.completeUploadExternal", &self.config.bot_token, &payload)
        })
        .await?;
        Ok(())
    }

    async fn upload_legacy(
        &self,
        channel: &str,
        image: &ImageUpload<'_>,
    ) -> Result<(), DeliveryError> {
        let channel_id = self.lookup_channel(channel).await?;

        self.send_with_retry("files.upload", || {
            let part = multipart::Part::bytes(image.bytes.to_vec())
                .file_name(image.filename.to_string())
                .mime_str("image/jpeg")
                .unwrap_or_else(|_| multipart::Part::bytes(image.bytes.to_vec()));
            let mut form = multipart::Form::new()
                .text("channels", channel_id.clone())
                .text("filename", image.filename.to_string())
                .text("title", image.title.to_string())
                .text("initial_comment", image.text.to_string())
                .part("file", part);
            if let Some(thread) = image.thread {
                form = form.text("thread_ts", thread.as_str().to_string());
            }
            self.client
                .post(self.url("files.upload"))
                .bearer_auth(&self.config.bot_token)
                .multipart(form)
        })
        .await?;
        Ok(())
    }

    /// Open a Socket Mode connection and return its websocket URL.
    pub async fn open_socket_connection(&self) -> Result<String, DeliveryError> {
        if self.config.app_token.is_empty() {
            return Err(DeliveryError::NotSupported("socket mode requires an app token"));
        }
        let response: ConnectionsOpenResponse = self
            .call("apps.connections.open", || {
                self.post_json("apps.connections.open", &self.config.app_token, &json!({}))
            })
            .await?;
        Ok(response.url)
    }
}

#[async_trait]
impl MessageSink for SlackClient {
    fn sink_type(&self) -> &'static str {
        "slack"
    }

    fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    async fn post_text(
        &self,
        channel: &str,
        message: &OutgoingMessage,
    ) -> Result<PostAck, DeliveryError> {
        self.ensure_enabled()?;
        let payload = post_message_payload(
            channel,
            message,
            &self.config.username,
            &self.config.icon_emoji,
            Utc::now().timestamp(),
        );
        let response: PostMessageResponse = self
            .call("chat.postMessage", || {
                self.post_json("chat.postMessage", &self.config.bot_token, &payload)
            })
            .await?;
        Ok(PostAck { ts: response.ts })
    }

    async fn post_image(
        &self,
        channel: &str,
        image: ImageUpload<'_>,
        method: UploadMethod,
    ) -> Result<(), DeliveryError> {
        self.ensure_enabled()?;
        info!(
            filename = image.filename,
            bytes = image.bytes.len(),
            method = method.as_str(),
            "Uploading image to Slack"
        );
        match method {
            UploadMethod::External => self.upload_external(channel, &image).await,
            UploadMethod::Legacy => self.upload_legacy(channel, &image).await,
        }
    }
}

#[async_trait]
impl HistorySource for SlackClient {
    async fn bot_user_id(&self) -> Result<Option<String>, DeliveryError> {
        self.ensure_enabled()?;
        let id = self
            .bot_user_id
            .get_or_try_init(|| async {
                let auth: AuthTestResponse = self
                    .call("auth.test", || self.post_form("auth.test", &[]))
                    .await?;
                Ok::<_, DeliveryError>(auth.user_id)
            })
            .await?;
        Ok(id.clone())
    }

    async fn resolve_channel(&self, channel: &str) -> Result<String, DeliveryError> {
        self.ensure_enabled()?;
        self.lookup_channel(channel).await
    }

    async fn fetch_since(
        &self,
        channel_id: &str,
        oldest: Option<&str>,
        limit: usize,
    ) -> Result<Vec<InboundMessage>, DeliveryError> {
        self.ensure_enabled()?;
        let mut form = vec![
            ("channel", channel_id.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(oldest) = oldest {
            form.push(("oldest", oldest.to_string()));
        }

        let history: HistoryResponse = self
            .call("conversations.history", || {
                self.post_form("conversations.history", &form)
            })
            .await?;

        Ok(history
            .messages
            .into_iter()
            .filter(|m| m.subtype.is_none() || m.subtype.as_deref() == Some("thread_broadcast"))
            .map(|m| m.into_inbound(channel_id))
            .collect())
    }
}
