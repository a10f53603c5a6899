//! Chat client abstraction and construction
//!
//! The gateway never names a concrete backend: it asks a [`ClientFactory`]
//! to build a client from the bound descriptor on first use.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::context::ChatMessage;
use super::letta::LettaClient;
use super::openai::OpenAiClient;
use super::provider::{ProviderDescriptor, ProviderKind};
use super::voice::{VoiceClient, VoiceDescriptor, VoiceSynthesis};

/// Connect timeout for backend calls
const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound for a whole request, streaming included
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// A constructed chat backend
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Which provider this client talks to
    fn kind(&self) -> ProviderKind;

    /// Whole-response dispatch
    async fn send(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Streaming dispatch; `on_chunk` receives content deltas in order
    async fn stream(
        &self,
        messages: &[ChatMessage],
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<()>;

    /// Whether the backend streams natively
    fn supports_streaming(&self) -> bool {
        true
    }

    /// Whether the credentials are complete
    fn is_configured(&self) -> bool;
}

/// Builds clients from descriptors
pub trait ClientFactory: Send + Sync {
    /// Build a chat client, or fail with a configuration error when the
    /// provider cannot serve chat
    fn chat_client(&self, descriptor: &ProviderDescriptor) -> Result<Arc<dyn ChatClient>>;

    /// Build the voice synthesis client
    fn voice_client(&self, descriptor: &VoiceDescriptor) -> Result<Arc<dyn VoiceSynthesis>>;
}

/// Factory for the real HTTP backends, sharing one connection pool
#[derive(Debug, Clone)]
pub struct HttpClientFactory {
    http: reqwest::Client,
}

impl HttpClientFactory {
    /// Create a factory with the default timeouts
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

impl ClientFactory for HttpClientFactory {
    fn chat_client(&self, descriptor: &ProviderDescriptor) -> Result<Arc<dyn ChatClient>> {
        match descriptor.kind {
            ProviderKind::OpenAi | ProviderKind::OpenCodeZen => {
                Ok(Arc::new(OpenAiClient::new(self.http.clone(), descriptor)))
            }
            ProviderKind::Letta => Ok(Arc::new(LettaClient::new(self.http.clone(), descriptor))),
            ProviderKind::LocalInference => Err(Error::Configuration(
                "on-device inference is not available; select a remote chat provider".into(),
            )),
            ProviderKind::Cartesia => Err(Error::Configuration(
                "cartesia is a voice-only provider and cannot answer chat".into(),
            )),
        }
    }

    fn voice_client(&self, descriptor: &VoiceDescriptor) -> Result<Arc<dyn VoiceSynthesis>> {
        Ok(Arc::new(VoiceClient::new(self.http.clone(), descriptor)))
    }
}

/// Map a non-2xx response to a transport error, keeping the backend's message
pub(crate) async fn status_error(provider: &str, response: reqwest::Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or(body);
    Error::Transport(format!("{provider} HTTP {}: {message}", status.as_u16()))
}
