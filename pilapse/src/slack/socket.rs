//! Slack Socket Mode listener.
//!
//! Opens a websocket through `apps.connections.open`, acknowledges every
//! envelope as soon as it arrives and forwards `app_mention` events to the
//! command dispatcher. Reconnects with exponential backoff; a
//! server-requested `disconnect` reconnects immediately.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::SlackClient;
use crate::command::InboundMessage;
use crate::notification::DeliveryError;
use crate::{Error, Result};

const BASE_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// One decoded Socket Mode frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Frame {
    Hello,
    Disconnect { reason: String },
    /// Anything carrying an `envelope_id`; must be acknowledged.
    Envelope {
        envelope_id: String,
        mention: Option<InboundMessage>,
    },
    Other,
}

/// Decode a text frame.
pub(crate) fn parse_frame(text: &str) -> Frame {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return Frame::Other;
    };

    match value.get("type").and_then(Value::as_str) {
        Some("hello") => return Frame::Hello,
        Some("disconnect") => {
            return Frame::Disconnect {
                reason: value
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            };
        }
        _ => {}
    }

    let Some(envelope_id) = value.get("envelope_id").and_then(Value::as_str) else {
        return Frame::Other;
    };

    let mention = (value.get("type").and_then(Value::as_str) == Some("events_api"))
        .then(|| value.pointer("/payload/event"))
        .flatten()
        .filter(|event| event.get("type").and_then(Value::as_str) == Some("app_mention"))
        .and_then(|event| {
            Some(InboundMessage {
                channel: event.get("channel")?.as_str()?.to_string(),
                ts: event.get("ts")?.as_str()?.to_string(),
                user: event.get("user").and_then(Value::as_str).map(str::to_string),
                text: event
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })
        });

    Frame::Envelope {
        envelope_id: envelope_id.to_string(),
        mention,
    }
}

enum ConnectionEnd {
    Cancelled,
    Reconnect,
}

/// Push-based command intake over Socket Mode.
pub struct SocketModeListener {
    client: Arc<SlackClient>,
}

impl SocketModeListener {
    pub fn new(client: Arc<SlackClient>) -> Self {
        Self { client }
    }

    /// Run until `token` is cancelled or the receiver goes away.
    ///
    /// Fails immediately when Socket Mode is not usable at all (no app token,
    /// missing permission) so the caller can fall back to polling.
    pub async fn run(&self, tx: mpsc::Sender<InboundMessage>, token: CancellationToken) -> Result<()> {
        super::install_rustls_provider();
        let mut delay = BASE_RECONNECT_DELAY;
        let mut connected_once = false;

        loop {
            if token.is_cancelled() || tx.is_closed() {
                break;
            }

            match self.serve_connection(&tx, &token, &mut connected_once).await {
                Ok(ConnectionEnd::Cancelled) => break,
                Ok(ConnectionEnd::Reconnect) => {
                    delay = BASE_RECONNECT_DELAY;
                    info!("Socket Mode reconnecting");
                    continue;
                }
                Err(Error::Delivery(
                    e @ (DeliveryError::NotSupported(_)
                    | DeliveryError::PermissionDenied(_)
                    | DeliveryError::Disabled),
                )) if !connected_once => {
                    return Err(Error::Delivery(e));
                }
                Err(e) => {
                    warn!(error = %e, retry_in = ?delay, "Socket Mode connection failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token.cancelled() => break,
            }
            delay = (delay * 2).min(MAX_RECONNECT_DELAY);
        }

        debug!("Socket Mode listener stopped");
        Ok(())
    }

    async fn serve_connection(
        &self,
        tx: &mpsc::Sender<InboundMessage>,
        token: &CancellationToken,
        connected_once: &mut bool,
    ) -> Result<ConnectionEnd> {
        let url = self.client.open_socket_connection().await?;
        let (mut stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::Other(format!("Socket Mode connect failed: {e}")))?;
        *connected_once = true;
        info!("Socket Mode connected");

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    let _ = stream.close(None).await;
                    return Ok(ConnectionEnd::Cancelled);
                }

                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => match parse_frame(text.as_str()) {
                        Frame::Hello => debug!("Socket Mode hello received"),
                        Frame::Disconnect { reason } => {
                            info!(reason = %reason, "Socket Mode disconnect requested");
                            let _ = stream.close(None).await;
                            return Ok(ConnectionEnd::Reconnect);
                        }
                        Frame::Envelope { envelope_id, mention } => {
                            let ack = json!({ "envelope_id": envelope_id }).to_string();
                            stream
                                .send(Message::text(ack))
                                .await
                                .map_err(|e| Error::Other(format!("Socket Mode ack failed: {e}")))?;
                            trace!(envelope_id = %envelope_id, "Envelope acknowledged");

                            if let Some(message) = mention
                                && tx.send(message).await.is_err()
                            {
                                return Ok(ConnectionEnd::Cancelled);
                            }
                        }
                        Frame::Other => trace!("Ignoring Socket Mode frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        debug!(frame = ?frame, "Socket Mode connection closed by server");
                        return Ok(ConnectionEnd::Reconnect);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(Error::Other(format!("Socket Mode read failed: {e}")));
                    }
                    None => {
                        warn!("Socket Mode stream closed");
                        return Ok(ConnectionEnd::Reconnect);
                    }
                },
            }
        }
    }
}
