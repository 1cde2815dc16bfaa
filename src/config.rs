use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

/// Login used when no `TWITCH_NAME` is configured. Read-only chat access.
pub const ANONYMOUS_USERNAME: &str = "justinfan0";

const DEFAULT_LOG_LEVEL: &str = "info";

/// Fatal configuration problems. Each one stops the process at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no channels to join (set TWITCH_CHANNELS or MONITORED_CHANNELS)")]
    NoChannels,
    #[error("nothing is being monitored (set MONITORED_CHANNELS or MONITORED_TERMS)")]
    NothingMonitored,
    #[error("missing auth credential for {0} (set TWITCH_CODE)")]
    MissingAuth(String),
    #[error("missing webhook configuration (set EVENT_NAME and IFTTT_KEY)")]
    MissingWebhook,
    #[error("unknown LOG_FORMAT {0:?} (expected json or text)")]
    InvalidLogFormat(String),
}

#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub password: Option<String>,
}

impl Identity {
    /// `justinfan` followed by digits is Twitch's anonymous login.
    pub fn is_anonymous(&self) -> bool {
        is_anonymous_name(&self.username)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    pub event_name: String,
    pub key: String,
}

impl fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("event_name", &self.event_name)
            .field("key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

impl LogFormat {
    fn parse(value: Option<&str>) -> Result<Self, ConfigError> {
        match value {
            None => Ok(LogFormat::default()),
            Some(v) if v.eq_ignore_ascii_case("json") => Ok(LogFormat::Json),
            Some(v) if v.eq_ignore_ascii_case("text") => Ok(LogFormat::Text),
            Some(v) => Err(ConfigError::InvalidLogFormat(v.to_string())),
        }
    }
}

/// How the chat transport retries a dropped connection before giving up.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub decay: f64,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.decay.powi(attempt.saturating_sub(1) as i32);
        self.initial_delay.mul_f64(factor).min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            decay: 1.5,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Runtime settings, resolved once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct Settings {
    pub identity: Identity,
    /// Channel names including the leading `#`.
    pub monitored_channels: Vec<String>,
    pub monitored_terms: Vec<String>,
    /// Bare channel names to join on connect.
    pub join_channels: Vec<String>,
    pub webhook: WebhookConfig,
    pub reconnect: ReconnectPolicy,
}

impl Settings {
    /// Resolve settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let scalar = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let twitch_name = scalar("TWITCH_NAME");
        let fallback: Vec<String> = twitch_name.iter().cloned().collect();

        let monitored_channels = split_list(lookup("MONITORED_CHANNELS")).unwrap_or_default();
        let monitored_terms =
            split_list(lookup("MONITORED_TERMS")).unwrap_or_else(|| fallback.clone());
        let other_channels = split_list(lookup("TWITCH_CHANNELS")).unwrap_or(fallback);
        let join_channels = join_set(&monitored_channels, &other_channels);

        info!(
            channels = ?join_channels,
            monitored_channels = ?monitored_channels,
            monitored_terms = ?monitored_terms,
            "starting up"
        );

        let identity = Identity {
            username: twitch_name.unwrap_or_else(|| ANONYMOUS_USERNAME.to_string()),
            password: scalar("TWITCH_CODE"),
        };

        if join_channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }
        if monitored_channels.is_empty() && monitored_terms.is_empty() {
            return Err(ConfigError::NothingMonitored);
        }
        if !identity.is_anonymous() && identity.password.is_none() {
            return Err(ConfigError::MissingAuth(identity.username));
        }
        let webhook = match (scalar("EVENT_NAME"), scalar("IFTTT_KEY")) {
            (Some(event_name), Some(key)) => WebhookConfig { event_name, key },
            _ => return Err(ConfigError::MissingWebhook),
        };

        Ok(Self {
            identity,
            monitored_channels,
            monitored_terms,
            join_channels,
            webhook,
            reconnect: ReconnectPolicy::default(),
        })
    }
}

/// Logging setup. Resolved before `Settings` so that configuration errors
/// are already logged at the right verbosity and format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
}

impl LogSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let scalar = |key: &str| lookup(key).filter(|v| !v.is_empty());
        Ok(Self {
            level: scalar("LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            format: LogFormat::parse(scalar("LOG_FORMAT").as_deref())?,
        })
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: LogFormat::default(),
        }
    }
}

/// `None` when the key is unset, an empty list when it is set to "".
fn split_list(value: Option<String>) -> Option<Vec<String>> {
    value.map(|s| s.split_whitespace().map(str::to_string).collect())
}

/// Union of the monitored channels (leading marker stripped) and the
/// explicit join list, keeping first-seen order.
fn join_set(monitored: &[String], others: &[String]) -> Vec<String> {
    let mut channels: Vec<String> = Vec::new();
    let bare = monitored.iter().map(|channel| {
        let mut chars = channel.chars();
        if chars.next() != Some('#') {
            warn!(channel = %channel, "monitored channel has no leading '#', it will never match");
        }
        chars.as_str()
    });
    for name in bare.chain(others.iter().map(String::as_str)) {
        if !name.is_empty() && !channels.iter().any(|c| c == name) {
            channels.push(name.to_string());
        }
    }
    channels
}

fn is_anonymous_name(name: &str) -> bool {
    name.strip_prefix("justinfan")
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_ascii_digit())
}
