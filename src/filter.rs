use tracing::debug;

use crate::config::Settings;
use crate::platform::ChatEvent;

/// Decides which chat messages are worth a notification.
#[derive(Debug, Clone)]
pub struct FilterPolicy {
    identity: String,
    monitored_channels: Vec<String>,
    monitored_terms: Vec<String>,
}

impl FilterPolicy {
    pub fn new(settings: &Settings) -> Self {
        Self {
            identity: settings.identity.username.clone(),
            monitored_channels: settings.monitored_channels.clone(),
            monitored_terms: settings.monitored_terms.clone(),
        }
    }

    /// Own messages never notify, otherwise a monitored channel or a
    /// monitored term is enough.
    pub fn should_notify(&self, event: &ChatEvent) -> bool {
        if event.sender == self.identity {
            return false;
        }

        let in_channel = self.is_monitored_channel(&event.channel);
        let has_term = self.matching_term(&event.message).is_some();
        in_channel || has_term
    }

    fn is_monitored_channel(&self, channel: &str) -> bool {
        let monitored = self.monitored_channels.iter().any(|c| c == channel);
        debug!(channel, monitored, "checking if channel is monitored");
        monitored
    }

    fn matching_term(&self, message: &str) -> Option<&str> {
        self.monitored_terms
            .iter()
            .map(String::as_str)
            .find(|term| {
                let matches = message.contains(term);
                debug!(term, matches, "checking if monitored term matches");
                matches
            })
    }
}
