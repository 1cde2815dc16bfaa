mod config;
mod filter;
mod monitor;
mod notifier;
mod platform;

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LogSettings, Settings};
use crate::filter::FilterPolicy;
use crate::monitor::Monitor;
use crate::notifier::{Dispatcher, IftttNotifier};
use crate::platform::twitch::TwitchTransport;

fn init_logging(log: &LogSettings) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log.format {
        LogFormat::Json => builder.json().flatten_event(true).init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let (log, log_error) = match LogSettings::from_env() {
        Ok(log) => (log, None),
        Err(e) => (LogSettings::default(), Some(e)),
    };
    init_logging(&log);
    if let Some(e) = log_error {
        error!("{}", e);
        std::process::exit(1);
    }

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    // rustls needs a process-wide crypto provider for the wss connection
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let filter = FilterPolicy::new(&settings);
    let dispatcher = Dispatcher::new(Arc::new(IftttNotifier::new(settings.webhook.clone())));
    let transport = Arc::new(TwitchTransport::new(&settings));

    info!(
        username = %settings.identity.username,
        channels = settings.join_channels.len(),
        "Monitor is starting..."
    );

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    match Monitor::new(filter, dispatcher).run(transport, shutdown_signal).await {
        Ok(shutdown) => std::process::exit(shutdown.exit_code()),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}
