use crate::error::{Result, SlackError};
use crate::slack::SlackWebClient;
use crate::types::{AppMention, ChannelId, MessageTs, UserId};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(2);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Events surfaced by the Socket Mode connection, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Connecting,
    Connected,
    ConnectionError { error: String },
    Hello,
    Disconnect { reason: String },
    AppMention(AppMention),
    MemberJoined { user: UserId, channel: ChannelId },
    /// An envelope that is not an Events API callback (slash commands, interactivity).
    Unsupported { envelope_type: String },
    /// A callback event of a type the relay does not act on.
    Ignored { event_type: String },
    /// The envelope decoded but its payload did not. Still acked so Slack stops retrying.
    Malformed { envelope_type: String, error: String },
}

/// A decoded WebSocket text frame. `envelope_id` is set when Slack expects an ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketFrame {
    pub envelope_id: Option<String>,
    pub event: SocketEvent,
}

pub fn parse_frame(text: &str) -> Result<SocketFrame> {
    let envelope: SocketEnvelope = serde_json::from_str(text)?;
    let envelope_id = envelope.envelope_id.filter(|id| !id.is_empty());

    let event = match envelope.envelope_type.as_str() {
        "hello" => SocketEvent::Hello,
        "disconnect" => SocketEvent::Disconnect {
            reason: envelope.reason.unwrap_or_else(|| "unknown".to_string()),
        },
        "events_api" => match parse_events_api(envelope.payload) {
            Ok(event) => event,
            Err(error) => SocketEvent::Malformed {
                envelope_type: envelope.envelope_type.clone(),
                error: error.to_string(),
            },
        },
        other => SocketEvent::Unsupported {
            envelope_type: other.to_string(),
        },
    };

    Ok(SocketFrame { envelope_id, event })
}

fn parse_events_api(payload: serde_json::Value) -> Result<SocketEvent> {
    let callback: EventCallback = serde_json::from_value(payload)?;
    if callback.callback_type != "event_callback" {
        return Ok(SocketEvent::Unsupported {
            envelope_type: format!("events_api/{}", callback.callback_type),
        });
    }
    let Some(event) = callback.event else {
        return Err(SlackError::ResponseFormat(
            "event_callback without event".to_string(),
        ));
    };

    let event_type = event
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string();
    match event_type.as_str() {
        "app_mention" => {
            let raw: RawAppMention = serde_json::from_value(event)?;
            Ok(SocketEvent::AppMention(AppMention {
                channel: ChannelId::new(raw.channel),
                user: raw.user.map(UserId::new),
                text: raw.text,
                ts: MessageTs::new(raw.ts),
                thread_ts: raw
                    .thread_ts
                    .filter(|t| !t.trim().is_empty())
                    .map(MessageTs::new),
            }))
        }
        "member_joined_channel" => {
            let raw: RawMemberJoined = serde_json::from_value(event)?;
            Ok(SocketEvent::MemberJoined {
                user: UserId::new(raw.user),
                channel: ChannelId::new(raw.channel),
            })
        }
        _ => Ok(SocketEvent::Ignored { event_type }),
    }
}

fn ack_payload(envelope_id: &str) -> String {
    serde_json::json!({ "envelope_id": envelope_id }).to_string()
}

fn reconnect_delay(attempt: u32) -> Duration {
    RECONNECT_BASE_DELAY
        .saturating_mul(attempt.max(1))
        .min(RECONNECT_MAX_DELAY)
}

#[derive(Debug, Deserialize)]
struct SocketEnvelope {
    #[serde(rename = "type")]
    envelope_type: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct EventCallback {
    #[serde(rename = "type", default)]
    callback_type: String,
    #[serde(default)]
    event: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawAppMention {
    channel: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: String,
    ts: String,
    #[serde(default)]
    thread_ts: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMemberJoined {
    user: String,
    channel: String,
}

enum SessionEnd {
    Shutdown,
    Reconnect,
    ReceiverClosed,
}

/// Socket Mode connection: acknowledges envelopes and forwards decoded events.
#[derive(Clone)]
pub struct SocketModeClient {
    web: SlackWebClient,
}

impl SocketModeClient {
    pub fn new(web: SlackWebClient) -> Self {
        Self { web }
    }

    /// Spawns the connection loop. It runs until `shutdown` fires or `tx` is closed.
    pub fn start(
        self,
        tx: mpsc::Sender<SocketEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(error) = self.run(tx, shutdown).await {
                tracing::error!(%error, "slack socket mode loop exited");
            }
        })
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn run(&self, tx: mpsc::Sender<SocketEvent>, shutdown: CancellationToken) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                let delay = reconnect_delay(attempt);
                tracing::info!(attempt, ?delay, "reconnecting to slack socket mode");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.cancelled() => return Ok(()),
                }
            }
            if shutdown.is_cancelled() {
                return Ok(());
            }

            if tx.send(SocketEvent::Connecting).await.is_err() {
                return Ok(());
            }
            let connected = async {
                let url = self.web.open_socket_url().await?;
                let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
                Ok::<_, SlackError>(ws)
            };
            let ws = tokio::select! {
                result = connected => result,
                _ = shutdown.cancelled() => return Ok(()),
            };
            let ws = match ws {
                Ok(ws) => ws,
                Err(error) => {
                    attempt = attempt.saturating_add(1);
                    let event = SocketEvent::ConnectionError {
                        error: error.to_string(),
                    };
                    if tx.send(event).await.is_err() {
                        return Ok(());
                    }
                    continue;
                }
            };

            attempt = 0;
            if tx.send(SocketEvent::Connected).await.is_err() {
                return Ok(());
            }

            match self.run_session(ws, &tx, &shutdown).await {
                Ok(SessionEnd::Shutdown) | Ok(SessionEnd::ReceiverClosed) => return Ok(()),
                Ok(SessionEnd::Reconnect) => {}
                Err(error) => {
                    tracing::warn!(%error, "slack socket session ended with error");
                }
            }
            attempt = attempt.saturating_add(1);
        }
    }

    async fn run_session<S>(
        &self,
        ws: tokio_tungstenite::WebSocketStream<S>,
        tx: &mpsc::Sender<SocketEvent>,
        shutdown: &CancellationToken,
    ) -> Result<SessionEnd>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let (mut write, mut read) = ws.split();

        loop {
            let msg = tokio::select! {
                msg = read.next() => msg,
                _ = shutdown.cancelled() => {
                    if let Err(error) = write.close().await {
                        tracing::debug!(%error, "slack socket close failed");
                    }
                    return Ok(SessionEnd::Shutdown);
                }
            };

            let msg = match msg {
                Some(msg) => msg?,
                None => {
                    tracing::info!("slack socket stream ended");
                    return Ok(SessionEnd::Reconnect);
                }
            };

            match msg {
                Message::Text(text) => {
                    let frame = match parse_frame(text.as_str()) {
                        Ok(frame) => frame,
                        Err(error) => {
                            tracing::warn!(%error, "failed to decode slack socket frame");
                            continue;
                        }
                    };
                    if let Some(envelope_id) = frame.envelope_id.as_deref() {
                        write
                            .send(Message::Text(ack_payload(envelope_id).into()))
                            .await?;
                    }
                    let reconnect = matches!(frame.event, SocketEvent::Disconnect { .. });
                    if tx.send(frame.event).await.is_err() {
                        return Ok(SessionEnd::ReceiverClosed);
                    }
                    if reconnect {
                        return Ok(SessionEnd::Reconnect);
                    }
                }
                Message::Ping(data) => {
                    write.send(Message::Pong(data)).await?;
                }
                Message::Close(frame) => {
                    tracing::info!(?frame, "slack socket closed by server");
                    return Ok(SessionEnd::Reconnect);
                }
                _ => {}
            }
        }
    }
}
