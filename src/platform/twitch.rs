use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::{Identity, ReconnectPolicy, Settings};
use crate::platform::irc::{ctcp_action, IrcMessage};
use crate::platform::{ChatEvent, ChatTransport, TransportEvent};

pub const TWITCH_HOST: &str = "irc-ws.chat.twitch.tv";
pub const TWITCH_PORT: u16 = 443;

const CAPABILITIES: &str = "CAP REQ :twitch.tv/tags twitch.tv/commands";

/// NOTICE texts Twitch sends when the PASS/NICK pair is rejected.
const AUTH_FAILURES: [&str; 3] = [
    "Login authentication failed",
    "Login unsuccessful",
    "Improperly formatted auth",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub secure: bool,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            secure: true,
            host: TWITCH_HOST.to_string(),
            port: TWITCH_PORT,
        }
    }
}

/// What to do with one line received from the server
#[derive(Debug, PartialEq, Eq)]
enum LineAction {
    Reply(String),
    Welcome,
    Chat(ChatEvent),
    Reconnect(String),
    AuthFailed(String),
    Ignore,
}

/// How a single connection ended
#[derive(Debug)]
enum SessionEnd {
    /// Dropped; worth trying again.
    Lost(String),
    /// Rejected; retrying would fail the same way.
    Fatal(String),
    /// Nobody is listening for events any more.
    Stopped,
}

/// Twitch chat over IRC-on-WebSocket, with bounded reconnects.
pub struct TwitchTransport {
    identity: Identity,
    channels: Vec<String>,
    reconnect: ReconnectPolicy,
    endpoint: Endpoint,
}

impl TwitchTransport {
    pub fn new(settings: &Settings) -> Self {
        Self {
            identity: settings.identity.clone(),
            channels: settings.join_channels.clone(),
            reconnect: settings.reconnect.clone(),
            endpoint: Endpoint::default(),
        }
    }

    #[cfg(test)]
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    fn login_lines(&self) -> Vec<String> {
        let mut lines = vec![CAPABILITIES.to_string()];
        if let Some(password) = &self.identity.password {
            if password.starts_with("oauth:") {
                lines.push(format!("PASS {}", password));
            } else {
                lines.push(format!("PASS oauth:{}", password));
            }
        }
        lines.push(format!("NICK {}", self.identity.username.to_lowercase()));
        lines
    }

    fn join_line(&self) -> String {
        let channels: Vec<String> = self
            .channels
            .iter()
            .map(|c| format!("#{}", c.to_lowercase()))
            .collect();
        format!("JOIN {}", channels.join(","))
    }

    fn interpret(&self, msg: &IrcMessage) -> LineAction {
        match msg.command.as_str() {
            "PING" => LineAction::Reply(format!("PONG :{}", msg.trailing().unwrap_or("tmi.twitch.tv"))),
            "001" => LineAction::Welcome,
            "RECONNECT" => LineAction::Reconnect("server requested reconnect".to_string()),
            "NOTICE" => {
                let text = msg.trailing().unwrap_or_default();
                if AUTH_FAILURES.iter().any(|f| text.contains(f)) {
                    LineAction::AuthFailed(text.to_string())
                } else {
                    warn!(
                        channel = msg.param(0).unwrap_or_default(),
                        msg_id = msg.tag("msg-id").unwrap_or_default(),
                        notice = %text,
                        "Twitch notice"
                    );
                    LineAction::Ignore
                }
            }
            "PRIVMSG" => {
                let (Some(channel), Some(sender), Some(text)) = (msg.param(0), msg.nick(), msg.param(1))
                else {
                    return LineAction::Ignore;
                };
                if let Some(action) = ctcp_action(text) {
                    debug!(channel, sender, text = action, "ignoring action message");
                    return LineAction::Ignore;
                }
                LineAction::Chat(ChatEvent {
                    channel: channel.to_string(),
                    sender: sender.to_string(),
                    message: text.to_string(),
                    is_self: sender.eq_ignore_ascii_case(&self.identity.username),
                })
            }
            _ => LineAction::Ignore,
        }
    }

    /// One connection, from handshake to close. Sets `connected` once the
    /// server has welcomed us.
    async fn session(
        &self,
        events: &mpsc::Sender<TransportEvent>,
        connected: &mut bool,
    ) -> Result<SessionEnd> {
        let url = self.endpoint.url();
        info!(url = %url, "Connecting to Twitch chat");

        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .with_context(|| format!("WebSocket connect to {} failed", url))?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        for line in self.login_lines() {
            ws_tx
                .send(Message::text(line))
                .await
                .context("Failed to send login")?;
        }

        while let Some(frame) = ws_rx.next().await {
            let frame = match frame {
                Ok(f) => f,
                Err(e) => return Ok(SessionEnd::Lost(format!("WebSocket read error: {}", e))),
            };

            match frame {
                Message::Text(text) => {
                    for line in text.lines() {
                        let Some(msg) = IrcMessage::parse(line) else {
                            continue;
                        };
                        match self.interpret(&msg) {
                            LineAction::Reply(reply) => {
                                ws_tx.send(Message::text(reply)).await.context("Failed to reply")?;
                            }
                            LineAction::Welcome => {
                                *connected = true;
                                ws_tx
                                    .send(Message::text(self.join_line()))
                                    .await
                                    .context("Failed to join channels")?;
                                let event = TransportEvent::Connected {
                                    address: self.endpoint.host.clone(),
                                    port: self.endpoint.port,
                                };
                                if events.send(event).await.is_err() {
                                    return Ok(SessionEnd::Stopped);
                                }
                            }
                            LineAction::Chat(chat) => {
                                if events.send(TransportEvent::Chat(chat)).await.is_err() {
                                    return Ok(SessionEnd::Stopped);
                                }
                            }
                            LineAction::Reconnect(reason) => return Ok(SessionEnd::Lost(reason)),
                            LineAction::AuthFailed(reason) => return Ok(SessionEnd::Fatal(reason)),
                            LineAction::Ignore => {}
                        }
                    }
                }
                Message::Ping(data) => {
                    ws_tx
                        .send(Message::Pong(data))
                        .await
                        .context("Failed to reply")?;
                }
                Message::Close(_) => {
                    return Ok(SessionEnd::Lost("connection closed by server".to_string()));
                }
                _ => {}
            }
        }

        Ok(SessionEnd::Lost("connection closed".to_string()))
    }
}

#[async_trait]
impl ChatTransport for TwitchTransport {
    async fn run(&self, events: mpsc::Sender<TransportEvent>) -> Result<()> {
        let mut attempts = 0u32;
        let mut ever_connected = false;

        loop {
            let mut connected = false;
            let end = self
                .session(&events, &mut connected)
                .await
                .unwrap_or_else(|e| SessionEnd::Lost(format!("{:#}", e)));
            if connected {
                ever_connected = true;
                attempts = 0;
            }

            let reason = match end {
                SessionEnd::Stopped => return Ok(()),
                SessionEnd::Fatal(reason) => reason,
                SessionEnd::Lost(reason)
                    if self.reconnect.enabled && attempts < self.reconnect.max_attempts =>
                {
                    attempts += 1;
                    let delay = self.reconnect.delay_for(attempts);
                    warn!(
                        reason = %reason,
                        attempt = attempts,
                        max_attempts = self.reconnect.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Twitch connection lost, reconnecting"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                SessionEnd::Lost(reason) => reason,
            };

            if !ever_connected {
                anyhow::bail!("Could not connect to Twitch chat: {}", reason);
            }
            let _ = events.send(TransportEvent::Disconnected { reason }).await;
            return Ok(());
        }
    }
}
