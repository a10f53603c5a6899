//! Unix domain socket server for IPC
//!
//! Provides request-response communication, forwards session commands to
//! the orchestrator, and pushes session events to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::events::StateEvent;
use crate::gateway::{AiGateway, ProviderKind};
use crate::orchestrator::ControlCommand;
use crate::state::SessionState;

use super::protocol::{DaemonStatus, Notification, Request, Response};

/// Largest accepted request body
const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    context: ClientContext,
    shutdown_tx: broadcast::Sender<()>,
}

/// Shared server state
struct ServerState {
    status: DaemonStatus,
    start_time: std::time::Instant,
}

/// What each client handler needs
#[derive(Clone)]
struct ClientContext {
    state: Arc<RwLock<ServerState>>,
    control_tx: mpsc::Sender<ControlCommand>,
    /// Source of push notifications for subscribed clients
    events: Option<broadcast::Sender<StateEvent>>,
    /// Answers voice listings
    gateway: Option<Arc<AiGateway>>,
}

impl Server {
    /// Create a new IPC server forwarding commands to `control_tx`
    pub fn new(socket_path: &Path, control_tx: mpsc::Sender<ControlCommand>) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(RwLock::new(ServerState {
            status: DaemonStatus::default(),
            start_time: std::time::Instant::now(),
        }));

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            context: ClientContext {
                state,
                control_tx,
                events: None,
                gateway: None,
            },
            shutdown_tx,
        })
    }

    /// Create a new IPC server that pushes session events to subscribers
    pub fn with_events(
        socket_path: &Path,
        control_tx: mpsc::Sender<ControlCommand>,
        events: broadcast::Sender<StateEvent>,
    ) -> Result<Self> {
        let mut server = Self::new(socket_path, control_tx)?;
        server.context.events = Some(events);
        Ok(server)
    }

    /// Answer `ListVoices` from `gateway`
    pub fn with_gateway(mut self, gateway: Arc<AiGateway>) -> Self {
        self.context.gateway = Some(gateway);
        self
    }

    /// Update the session state reported by `GetStatus`
    pub async fn set_state(&self, state: SessionState) {
        let mut server_state = self.context.state.write().await;
        let old_state = server_state.status.state;
        server_state.status.state = state;

        if old_state != state {
            debug!(from = %old_state, to = %state, "IPC server: state updated");
        }
    }

    /// Update the provider reported by `GetStatus`
    pub async fn set_provider(&self, provider: ProviderKind) {
        self.context.state.write().await.status.provider = provider;
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let context = self.context.clone();
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, context) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(stream: UnixStream, context: ClientContext) -> Result<()> {
        let (reader, mut writer) = stream.into_split();

        // Requests are read on their own task so a pushed notification never
        // interrupts a partially read message
        let (request_tx, mut request_rx) = mpsc::channel::<Request>(8);
        let reader_task = tokio::spawn(Self::read_requests(reader, request_tx));

        let mut subscription: Option<broadcast::Receiver<StateEvent>> = None;

        let result = loop {
            tokio::select! {
                request = request_rx.recv() => {
                    let Some(request) = request else {
                        debug!("client disconnected");
                        break Ok(());
                    };
                    debug!(?request, "received request");

                    let (response, subscribe) = Self::process_request(request, &context).await;
                    if subscribe && subscription.is_none() {
                        subscription = context.events.as_ref().map(|events| events.subscribe());
                        debug!("client subscribed to notifications");
                    }

                    if let Err(e) = Self::send_message(&mut writer, &response).await {
                        break Err(e);
                    }
                }
                Some(event) = Self::next_event(&mut subscription) => {
                    if let Err(e) = Self::send_message(&mut writer, &Notification::Event { event }).await {
                        break Err(e);
                    }
                }
            }
        };

        reader_task.abort();
        result
    }

    /// Read length-prefixed requests until EOF
    async fn read_requests<R>(mut reader: R, request_tx: mpsc::Sender<Request>) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut len_buf = [0u8; 4];

        loop {
            // Read message length (4-byte little-endian)
            match reader.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_MESSAGE_LEN {
                warn!(len, "message too large, disconnecting");
                return Ok(());
            }

            // Read message body
            let mut msg_buf = vec![0u8; len];
            reader.read_exact(&mut msg_buf).await?;

            let request: Request = match serde_json::from_slice(&msg_buf) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "failed to parse request, disconnecting");
                    return Ok(());
                }
            };

            if request_tx.send(request).await.is_err() {
                return Ok(());
            }
        }
    }

    /// Next event for a subscribed client; pending forever when not subscribed
    async fn next_event(
        subscription: &mut Option<broadcast::Receiver<StateEvent>>,
    ) -> Option<StateEvent> {
        let Some(events) = subscription else {
            return std::future::pending().await;
        };
        loop {
            match events.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged, notifications skipped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    *subscription = None;
                    return None;
                }
            }
        }
    }

    /// Send a length-prefixed JSON message
    async fn send_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
    where
        W: AsyncWrite + Unpin,
        T: serde::Serialize,
    {
        let msg_bytes = serde_json::to_vec(msg)?;
        let msg_len = (msg_bytes.len() as u32).to_le_bytes();

        writer.write_all(&msg_len).await?;
        writer.write_all(&msg_bytes).await?;

        Ok(())
    }

    /// Process a request and return a response
    /// Returns (Response, should_subscribe)
    async fn process_request(request: Request, context: &ClientContext) -> (Response, bool) {
        match request {
            Request::Ping => (Response::Pong, false),

            Request::GetStatus => {
                let mut state = context.state.write().await;
                state.status.uptime_secs = state.start_time.elapsed().as_secs();
                (Response::Status(state.status.clone()), false)
            }

            Request::Enable => (Self::forward(ControlCommand::Enable, context), false),

            Request::Disable => (Self::forward(ControlCommand::Disable, context), false),

            Request::SwitchProvider { provider } => (
                Self::forward(ControlCommand::SwitchProvider(provider), context),
                false,
            ),

            Request::Subscribe => (Response::Subscribed, true),

            Request::ListVoices => (Self::list_voices(context).await, false),
        }
    }

    async fn list_voices(context: &ClientContext) -> Response {
        let Some(gateway) = &context.gateway else {
            return Response::Error {
                code: "unavailable".into(),
                message: "voice backend is not attached".into(),
            };
        };
        match gateway.list_voices().await {
            Ok(voices) => Response::Voices { voices },
            Err(e) => {
                warn!(error = %e, "voice listing failed");
                let code = if e.is_configuration() {
                    "not_configured"
                } else {
                    "voice_backend"
                };
                Response::Error {
                    code: code.into(),
                    message: e.to_string(),
                }
            }
        }
    }

    /// Queue a command for the session without waiting on it
    fn forward(command: ControlCommand, context: &ClientContext) -> Response {
        match context.control_tx.try_send(command) {
            Ok(()) => {
                info!(?command, "session command via IPC");
                Response::Accepted
            }
            Err(mpsc::error::TrySendError::Full(_)) => Response::Error {
                code: "busy".into(),
                message: "session is busy, try again".into(),
            },
            Err(mpsc::error::TrySendError::Closed(_)) => Response::Error {
                code: "unavailable".into(),
                message: "session is not running".into(),
            },
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn send<T: serde::Serialize>(stream: &mut UnixStream, msg: &T) {
        let bytes = serde_json::to_vec(msg).unwrap();
        stream.write_all(&(bytes.len() as u32).to_le_bytes()).await.unwrap();
        stream.write_all(&bytes).await.unwrap();
    }

    async fn receive(stream: &mut UnixStream) -> serde_json::Value {
        let mut len = [0u8; 4];
        stream.read_exact(&mut len).await.unwrap();
        let mut body = vec![0u8; u32::from_le_bytes(len) as usize];
        stream.read_exact(&mut body).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_requests_and_notifications() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("daemon.sock");
        let (control_tx, mut control_rx) = mpsc::channel(4);
        let (event_tx, _) = broadcast::channel(16);

        let server = Arc::new(Server::with_events(&socket, control_tx, event_tx.clone()).unwrap());
        server.set_state(SessionState::WakeArmed).await;
        tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.run().await }
        });

        let mut client = UnixStream::connect(&socket).await.unwrap();

        send(&mut client, &Request::Ping).await;
        assert_eq!(receive(&mut client).await["type"], "pong");

        send(&mut client, &Request::GetStatus).await;
        let status = receive(&mut client).await;
        assert_eq!(status["state"], "wake_armed");
        assert_eq!(status["provider"], "openai");

        send(&mut client, &Request::SwitchProvider { provider: ProviderKind::Letta }).await;
        assert_eq!(receive(&mut client).await["type"], "accepted");
        assert_eq!(
            control_rx.recv().await,
            Some(ControlCommand::SwitchProvider(ProviderKind::Letta))
        );

        send(&mut client, &Request::Subscribe).await;
        assert_eq!(receive(&mut client).await["type"], "subscribed");
        event_tx.send(StateEvent::ListeningStarted).unwrap();
        let note = receive(&mut client).await;
        assert_eq!(note["type"], "event");
        assert_eq!(note["event"]["type"], "listening_started");

        server.shutdown().await;
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn test_list_voices_through_gateway() {
        use crate::gateway::{Credentials, HttpClientFactory, ProviderDescriptor, VoiceDescriptor};
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let backend = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/voices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "voices": [{"id": "v1", "name": "Ada", "language": "en", "gender": "female"}]
            })))
            .mount(&backend)
            .await;

        let gateway = |api_key: &str| {
            Arc::new(AiGateway::new(
                Arc::new(HttpClientFactory::new().unwrap()),
                ProviderDescriptor::new(ProviderKind::OpenAi, Credentials::default(), "", ""),
                VoiceDescriptor {
                    api_key: api_key.into(),
                    base_url: backend.uri(),
                    voice_id: "default".into(),
                    output_format: "pcm_s16le".into(),
                },
            ))
        };

        let dir = tempfile::tempdir().unwrap();
        let (control_tx, _control_rx) = mpsc::channel(1);

        let socket = dir.path().join("voices.sock");
        let server = Arc::new(
            Server::new(&socket, control_tx.clone())
                .unwrap()
                .with_gateway(gateway("voice-key")),
        );
        tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.run().await }
        });
        let mut client = UnixStream::connect(&socket).await.unwrap();
        send(&mut client, &Request::ListVoices).await;
        let response = receive(&mut client).await;
        assert_eq!(response["type"], "voices");
        assert_eq!(response["voices"][0]["name"], "Ada");

        let socket = dir.path().join("unconfigured.sock");
        let server = Arc::new(Server::new(&socket, control_tx).unwrap().with_gateway(gateway("")));
        tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.run().await }
        });
        let mut client = UnixStream::connect(&socket).await.unwrap();
        send(&mut client, &Request::ListVoices).await;
        let response = receive(&mut client).await;
        assert_eq!(response["type"], "error");
        assert_eq!(response["code"], "not_configured");
    }

    #[tokio::test]
    async fn test_command_rejected_when_session_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("daemon.sock");
        let (control_tx, control_rx) = mpsc::channel(1);
        drop(control_rx);

        let server = Arc::new(Server::new(&socket, control_tx).unwrap());
        tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.run().await }
        });

        let mut client = UnixStream::connect(&socket).await.unwrap();
        send(&mut client, &Request::Enable).await;
        let response = receive(&mut client).await;
        assert_eq!(response["type"], "error");
        assert_eq!(response["code"], "unavailable");
    }
}
