//! maya-daemon: background daemon for the Maya voice assistant
//!
//! This daemon provides:
//! - Wake phrase detection and utterance capture
//! - Dispatch to the configured chat provider with spoken replies
//! - IPC server for control clients (enable, disable, provider switch)
//!
//! Without audio hardware the console collaborators stand in: stdin lines
//! are transcripts and utterances are printed.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use maya_daemon::audio::{AudioOutput, WavFileDevice};
use maya_daemon::config::Config;
use maya_daemon::console::{ConsoleSynthesizer, StdinTranscriptSource};
use maya_daemon::events::StateEvent;
use maya_daemon::gateway::{AiGateway, HttpClientFactory};
use maya_daemon::history::JsonlConversationLog;
use maya_daemon::ipc::Server;
use maya_daemon::lifecycle::{watch_reloads, ShutdownSignal};
use maya_daemon::orchestrator::{Collaborators, ControlCommand, Orchestrator};
use maya_daemon::speech::{SynthesisSink, TTS_CHANNEL_CAPACITY};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "maya-daemon starting");

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    let settings = config.load_settings()?;
    info!(
        ?config.socket_path,
        provider = %settings.assistant.active_provider,
        "configuration loaded"
    );

    // Create shutdown signal handler
    let shutdown = ShutdownSignal::new();
    let token = shutdown.token();

    // Channels for inter-component communication
    let (settings_tx, settings_rx) = watch::channel(settings.clone());
    let (event_tx, _event_rx) = broadcast::channel::<StateEvent>(64);
    let (control_tx, control_rx) = mpsc::channel::<ControlCommand>(32);
    let (tts_tx, tts_rx) = mpsc::channel(TTS_CHANNEL_CAPACITY);

    // Provider gateway, built lazily on first dispatch
    let factory = Arc::new(HttpClientFactory::new()?);
    let gateway = Arc::new(AiGateway::new(
        factory,
        settings.active_descriptor(),
        settings.voice_descriptor(),
    ));
    if !gateway.is_configured() {
        warn!(
            provider = %gateway.active_provider(),
            "chat provider is not configured, requests will be answered with an apology"
        );
    }

    // Speech output
    let output = Arc::new(AudioOutput::new(Arc::new(WavFileDevice::new(
        config.playback_path(),
    ))));
    let local = Arc::new(ConsoleSynthesizer::new(tts_tx.clone()));
    let sink = Arc::new(SynthesisSink::new(
        local,
        Arc::clone(&gateway),
        output,
        tts_tx,
        settings.voice.sample_rate,
    ));

    let (history, history_task) = JsonlConversationLog::spawn(config.conversation_log_path());

    let orchestrator = Orchestrator::new(
        Collaborators {
            transcripts: Box::new(StdinTranscriptSource::spawn()),
            sink,
            gateway: Arc::clone(&gateway),
            settings: Arc::new(settings_rx),
            history: Arc::new(history),
        },
        event_tx.clone(),
        tts_rx,
        token.clone(),
    );

    // Create IPC server with event subscription
    let server = Server::with_events(&config.socket_path, control_tx.clone(), event_tx.clone())?
        .with_gateway(Arc::clone(&gateway));
    server.set_provider(gateway.active_provider()).await;

    if settings.assistant.enable_on_start {
        control_tx
            .send(ControlCommand::Enable)
            .await
            .context("session control channel closed")?;
    }

    // Subscribe to state events for IPC updates
    let mut ipc_event_rx = event_tx.subscribe();
    let server_for_events = &server;

    let session = tokio::spawn(orchestrator.run(control_rx));
    let reloads = tokio::spawn(watch_reloads(config.clone(), settings_tx, token.clone()));

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Keep the IPC status in step with the session
        _ = async {
            loop {
                match ipc_event_rx.recv().await {
                    Ok(event) => {
                        info!(%event, "session event");
                        if let StateEvent::ProviderSwitched { provider } = &event {
                            server_for_events.set_provider(*provider).await;
                        } else if let Some(state) = event.entered_state() {
                            server_for_events.set_state(state).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "state event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("state event handler exited");
        }

        // Wait for shutdown signal
        result = shutdown.wait() => {
            if let Err(e) = result {
                error!(?e, "signal handling failed");
            }
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    token.cancel();
    if let Err(e) = session.await {
        error!(?e, "session task failed");
    }
    match reloads.await {
        Ok(Err(e)) => warn!(?e, "settings reload watcher failed"),
        Err(e) => warn!(?e, "settings reload task failed"),
        Ok(Ok(())) => {}
    }
    server.shutdown().await;

    // The log writer drains once the session has released its handle
    if let Err(e) = history_task.await {
        warn!(?e, "conversation log task failed");
    }

    info!("maya-daemon stopped");

    Ok(())
}
