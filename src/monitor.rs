use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::filter::FilterPolicy;
use crate::notifier::{Dispatcher, NotificationPayload};
use crate::platform::{ChatEvent, ChatTransport, TransportEvent};

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Terminating,
}

/// Connection lifecycle. `Terminating` is only reachable from a disconnect
/// that follows a successful connection, and is final.
#[derive(Debug)]
pub struct Lifecycle {
    state: ConnectionState,
    was_connected: bool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            was_connected: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn connecting(&mut self) {
        if self.state == ConnectionState::Disconnected {
            self.state = ConnectionState::Connecting;
        }
    }

    pub fn connected(&mut self) {
        if self.state != ConnectionState::Terminating {
            self.state = ConnectionState::Connected;
            self.was_connected = true;
        }
    }

    /// Record a disconnect. Returns true when the process should now stop.
    pub fn disconnected(&mut self) -> bool {
        if self.state == ConnectionState::Terminating {
            return true;
        }
        self.state = ConnectionState::Disconnected;
        if self.was_connected {
            self.state = ConnectionState::Terminating;
        }
        self.state == ConnectionState::Terminating
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Why the monitor stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shutdown {
    Graceful,
    Disconnected { reason: String },
}

impl Shutdown {
    pub fn exit_code(&self) -> i32 {
        match self {
            Shutdown::Graceful => 0,
            Shutdown::Disconnected { .. } => 1,
        }
    }
}

/// Routes transport events through the filter and on to the dispatcher.
pub struct Monitor {
    filter: FilterPolicy,
    dispatcher: Dispatcher,
    lifecycle: Lifecycle,
}

impl Monitor {
    pub fn new(filter: FilterPolicy, dispatcher: Dispatcher) -> Self {
        Self {
            filter,
            dispatcher,
            lifecycle: Lifecycle::new(),
        }
    }

    /// Handle one chat message. The filter decision is made here; the
    /// notification itself is left running in the background.
    pub fn on_chat(&self, event: &ChatEvent) -> bool {
        debug!(
            channel = %event.channel,
            sender = %event.sender,
            text = %event.message,
            "received chat message"
        );

        if !self.filter.should_notify(event) {
            return false;
        }

        info!(
            channel = %event.channel,
            sender = %event.sender,
            text = %event.message,
            "sending notification for chat message"
        );
        let _detached = self.dispatcher.dispatch(NotificationPayload::from(event));
        true
    }

    /// Apply one transport event. Returns the shutdown reason once the
    /// connection is gone for good.
    pub fn handle_event(&mut self, event: TransportEvent) -> Option<Shutdown> {
        match event {
            TransportEvent::Connected { address, port } => {
                self.lifecycle.connected();
                info!(endpoint = %format!("{}:{}", address, port), "connected to twitch");
                None
            }
            TransportEvent::Disconnected { reason } => {
                info!(reason = %reason, "disconnected");
                let terminate = self.lifecycle.disconnected();
                debug!(state = ?self.lifecycle.state(), "connection state changed");
                if terminate {
                    Some(Shutdown::Disconnected { reason })
                } else {
                    warn!("disconnect reported before any connection");
                    None
                }
            }
            TransportEvent::Chat(chat) => {
                self.on_chat(&chat);
                None
            }
        }
    }

    /// Drive `transport` until it disconnects or `shutdown_signal` fires.
    pub async fn run<S>(
        mut self,
        transport: Arc<dyn ChatTransport>,
        shutdown_signal: S,
    ) -> Result<Shutdown>
    where
        S: Future<Output = ()> + Send,
    {
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        self.lifecycle.connecting();
        let session = tokio::spawn(async move { transport.run(tx).await });
        tokio::pin!(shutdown_signal);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown_signal => {
                    info!("shutting down");
                    session.abort();
                    return Ok(Shutdown::Graceful);
                }
                event = rx.recv() => match event {
                    Some(event) => {
                        if let Some(shutdown) = self.handle_event(event) {
                            session.abort();
                            return Ok(shutdown);
                        }
                    }
                    None => break,
                },
            }
        }

        // The transport hung up without reporting a disconnect.
        session.await.context("Chat transport task panicked")??;
        self.lifecycle.disconnected();
        Ok(Shutdown::Disconnected {
            reason: "transport closed".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::{Notifier, NotifyError};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every payload it is asked to send
    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<NotificationPayload>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(payload.clone());
            if self.fail {
                Err(NotifyError::Status {
                    status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                    body: "boom".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    /// Plays back a fixed list of events, then ends
    struct ScriptedTransport {
        events: Vec<TransportEvent>,
        fail: bool,
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn run(&self, events: mpsc::Sender<TransportEvent>) -> Result<()> {
            for event in self.events.clone() {
                events.send(event).await?;
            }
            if self.fail {
                anyhow::bail!("Could not connect to Twitch chat: refused");
            }
            Ok(())
        }
    }

    fn monitor(notifier: Arc<RecordingNotifier>) -> Monitor {
        let filter = FilterPolicy::new(&test_settings());
        Monitor::new(filter, Dispatcher::new(notifier))
    }

    fn test_settings() -> crate::config::Settings {
        crate::config::Settings::from_lookup(|key| {
            match key {
                "TWITCH_NAME" => Some("alice"),
                "TWITCH_CODE" => Some("oauth:x"),
                "MONITORED_CHANNELS" => Some("#ninja"),
                "MONITORED_TERMS" => Some("alice"),
                "EVENT_NAME" => Some("chat"),
                "IFTTT_KEY" => Some("key"),
                _ => None,
            }
            .map(str::to_string)
        })
        .unwrap()
    }

    fn chat(channel: &str, sender: &str, message: &str) -> TransportEvent {
        TransportEvent::Chat(ChatEvent {
            channel: channel.to_string(),
            sender: sender.to_string(),
            message: message.to_string(),
            is_self: false,
        })
    }

    fn connected() -> TransportEvent {
        TransportEvent::Connected {
            address: "irc-ws.chat.twitch.tv".to_string(),
            port: 443,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), ConnectionState::Disconnected);
        lifecycle.connecting();
        assert_eq!(lifecycle.state(), ConnectionState::Connecting);
        lifecycle.connected();
        assert_eq!(lifecycle.state(), ConnectionState::Connected);
        assert!(lifecycle.disconnected());
        assert_eq!(lifecycle.state(), ConnectionState::Terminating);
    }

    #[test]
    fn test_lifecycle_disconnect_before_connect() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.connecting();
        assert!(!lifecycle.disconnected());
        assert_eq!(lifecycle.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_terminating_is_final() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.connecting();
        lifecycle.connected();
        lifecycle.disconnected();
        lifecycle.connecting();
        lifecycle.connected();
        assert_eq!(lifecycle.state(), ConnectionState::Terminating);
        assert!(lifecycle.disconnected());
    }

    #[tokio::test]
    async fn test_qualifying_chat_is_dispatched() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut m = monitor(notifier.clone());

        assert_eq!(m.handle_event(connected()), None);
        assert_eq!(m.handle_event(chat("#ninja", "bob", "hi")), None);
        assert_eq!(m.handle_event(chat("#shroud", "carol", "nothing")), None);
        assert_eq!(m.handle_event(chat("#shroud", "dave", "yo alice")), None);
        assert_eq!(m.handle_event(chat("#ninja", "alice", "my own")), None);
        settle().await;

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent.contains(&NotificationPayload {
            message: "hi".to_string(),
            sender: "bob".to_string(),
            channel: "#ninja".to_string(),
        }));
        assert!(sent.iter().any(|p| p.sender == "dave"));
    }

    #[tokio::test]
    async fn test_failed_dispatch_does_not_stop_processing() {
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let m = monitor(notifier.clone());

        assert!(m.on_chat(&ChatEvent {
            channel: "#ninja".to_string(),
            sender: "bob".to_string(),
            message: "first".to_string(),
            is_self: false,
        }));
        settle().await;
        assert!(m.on_chat(&ChatEvent {
            channel: "#ninja".to_string(),
            sender: "bob".to_string(),
            message: "second".to_string(),
            is_self: false,
        }));
        settle().await;

        assert_eq!(notifier.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_terminates_with_code_one() {
        let notifier = Arc::new(RecordingNotifier::default());
        let transport = Arc::new(ScriptedTransport {
            events: vec![
                connected(),
                chat("#ninja", "bob", "hi"),
                TransportEvent::Disconnected {
                    reason: "connection closed".to_string(),
                },
                chat("#ninja", "bob", "never seen"),
            ],
            fail: false,
        });

        let shutdown = monitor(notifier.clone())
            .run(transport, std::future::pending())
            .await
            .unwrap();
        assert_eq!(
            shutdown,
            Shutdown::Disconnected {
                reason: "connection closed".to_string()
            }
        );
        assert_eq!(shutdown.exit_code(), 1);

        settle().await;
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_is_error() {
        let transport = Arc::new(ScriptedTransport {
            events: vec![],
            fail: true,
        });
        let err = monitor(Arc::new(RecordingNotifier::default()))
            .run(transport, std::future::pending())
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Could not connect"));
    }

    #[tokio::test]
    async fn test_shutdown_signal_is_graceful() {
        let transport = Arc::new(ScriptedTransport {
            events: vec![connected()],
            fail: false,
        });
        let shutdown = monitor(Arc::new(RecordingNotifier::default()))
            .run(transport, async {})
            .await
            .unwrap();
        assert_eq!(shutdown, Shutdown::Graceful);
        assert_eq!(shutdown.exit_code(), 0);
    }
}
