pub mod irc;
pub mod twitch;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A chat message received from a joined channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    /// Channel name including the leading `#`
    pub channel: String,
    /// Login of the user who sent the message
    pub sender: String,
    /// The message text
    pub message: String,
    /// True when the message came from our own connection
    pub is_self: bool,
}

/// Events surfaced by a chat transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected { address: String, port: u16 },
    /// The transport has given up; no further events follow.
    Disconnected { reason: String },
    Chat(ChatEvent),
}

/// A live chat connection that reports what happens on it.
///
/// `run` owns the session until it ends. It returns an error only when no
/// session could ever be established; once connected, the end of the session
/// is reported as `TransportEvent::Disconnected`.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn run(&self, events: mpsc::Sender<TransportEvent>) -> Result<()>;
}
