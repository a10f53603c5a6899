//! Settings reload on SIGHUP

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Config, Settings};

/// Re-read the settings file on every SIGHUP until `token` is cancelled.
///
/// A file that fails to parse leaves the published settings untouched.
pub async fn watch_reloads(
    config: Config,
    settings_tx: watch::Sender<Settings>,
    token: CancellationToken,
) -> Result<()> {
    let mut sighup = signal(SignalKind::hangup()).context("failed to register SIGHUP handler")?;

    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            _ = sighup.recv() => reload(&config, &settings_tx),
        }
    }
}

fn reload(config: &Config, settings_tx: &watch::Sender<Settings>) {
    match config.load_settings() {
        Ok(settings) => {
            info!(
                path = %config.settings_path.display(),
                provider = %settings.assistant.active_provider,
                continuous = settings.assistant.continuous_listening,
                "settings reloaded"
            );
            settings_tx.send_replace(settings);
        }
        Err(e) => warn!(error = %e, "settings reload failed, keeping previous settings"),
    }
}
