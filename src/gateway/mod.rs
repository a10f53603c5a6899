//! AI dispatch gateway
//!
//! Provider-agnostic front for the chat backends and the voice backend.
//! Clients are built lazily from the bound descriptor and reused until the
//! next provider switch. A dispatch holds its own handle to the client, so
//! switching never touches a call already in flight.

mod client;
mod context;
mod letta;
mod openai;
mod provider;
mod sse;
mod voice;

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub use client::{ChatClient, ClientFactory, HttpClientFactory};
pub use context::{
    build_messages, ChatMessage, ConversationTurn, ConversationWindow, Role,
    CONTEXT_WINDOW_TURNS, SYSTEM_PROMPT,
};
pub use letta::LettaClient;
pub use openai::{OpenAiClient, MAX_TOKENS, TEMPERATURE};
pub use provider::{Credentials, ProviderDescriptor, ProviderKind};
pub use sse::{DeltaDecoder, StreamItem};
pub use voice::{SynthesisRequest, Voice, VoiceClient, VoiceDescriptor, VoiceSynthesis};

/// A completed dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Provider that produced the text
    pub provider: ProviderKind,
    pub text: String,
}

struct ChatBinding {
    descriptor: ProviderDescriptor,
    client: Option<Arc<dyn ChatClient>>,
}

struct VoiceBinding {
    descriptor: VoiceDescriptor,
    client: Option<Arc<dyn VoiceSynthesis>>,
}

pub struct AiGateway {
    factory: Arc<dyn ClientFactory>,
    chat: Mutex<ChatBinding>,
    voice: Mutex<VoiceBinding>,
}

impl AiGateway {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        descriptor: ProviderDescriptor,
        voice: VoiceDescriptor,
    ) -> Self {
        Self {
            factory,
            chat: Mutex::new(ChatBinding {
                descriptor,
                client: None,
            }),
            voice: Mutex::new(VoiceBinding {
                descriptor: voice,
                client: None,
            }),
        }
    }

    pub fn active_provider(&self) -> ProviderKind {
        self.chat.lock().descriptor.kind
    }

    /// Whether the bound chat provider has complete credentials
    pub fn is_configured(&self) -> bool {
        let chat = self.chat.lock();
        chat.descriptor.configured && chat.descriptor.kind.supports_chat()
    }

    /// Rebind future dispatches to `descriptor`
    pub fn switch_provider(&self, descriptor: ProviderDescriptor) {
        let mut chat = self.chat.lock();
        info!(
            from = %chat.descriptor.kind,
            to = %descriptor.kind,
            configured = descriptor.configured,
            "chat provider switched"
        );
        chat.descriptor = descriptor;
        chat.client = None;
    }

    /// Rebind the voice backend; the client is rebuilt on next use
    pub fn set_voice(&self, descriptor: VoiceDescriptor) {
        let mut voice = self.voice.lock();
        if voice.descriptor != descriptor {
            voice.descriptor = descriptor;
            voice.client = None;
        }
    }

    fn bound_client(&self) -> Result<Arc<dyn ChatClient>> {
        let mut chat = self.chat.lock();
        if let Some(client) = &chat.client {
            return Ok(Arc::clone(client));
        }

        let descriptor = &chat.descriptor;
        if !descriptor.kind.supports_chat() {
            return Err(Error::Configuration(format!(
                "{} cannot serve chat requests",
                descriptor.kind
            )));
        }
        if !descriptor.configured {
            return Err(Error::Configuration(format!(
                "{} is not configured",
                descriptor.kind
            )));
        }

        let client = self.factory.chat_client(descriptor)?;
        debug!(provider = %descriptor.kind, "chat client initialized");
        chat.client = Some(Arc::clone(&client));
        Ok(client)
    }

    fn bound_voice(&self) -> Result<Arc<dyn VoiceSynthesis>> {
        let mut voice = self.voice.lock();
        if let Some(client) = &voice.client {
            return Ok(Arc::clone(client));
        }
        if !voice.descriptor.is_configured() {
            return Err(Error::Configuration("voice synthesis is not configured".into()));
        }

        let client = self.factory.voice_client(&voice.descriptor)?;
        debug!("voice client initialized");
        voice.client = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Whole-response dispatch of `turns`, the last being the current one
    pub async fn send(&self, turns: &[ConversationTurn]) -> Result<String> {
        let client = self.bound_client()?;
        let messages = build_messages(turns);
        debug!(provider = %client.kind(), messages = messages.len(), "dispatching");
        client.send(&messages).await
    }

    /// Streaming dispatch; `on_chunk` receives deltas in arrival order
    pub async fn stream(
        &self,
        turns: &[ConversationTurn],
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<()> {
        let client = self.bound_client()?;
        let messages = build_messages(turns);
        debug!(provider = %client.kind(), messages = messages.len(), "dispatching streamed");
        client.stream(&messages, on_chunk).await
    }

    /// Dispatch and collect the reply, streaming when the backend can
    pub async fn respond(&self, turns: &[ConversationTurn]) -> Result<Reply> {
        let client = self.bound_client()?;
        let provider = client.kind();
        let messages = build_messages(turns);

        let text = if client.supports_streaming() {
            let mut text = String::new();
            client
                .stream(&messages, &mut |chunk: &str| text.push_str(chunk))
                .await?;
            if text.trim().is_empty() {
                return Err(Error::Transport(format!("empty streamed response from {provider}")));
            }
            text
        } else {
            client.send(&messages).await?
        };

        debug!(provider = %provider, chars = text.len(), "reply received");
        Ok(Reply { provider, text })
    }

    /// Remote synthesis, independent of the chat provider
    pub async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
        let client = self.bound_voice()?;
        client.synthesize(request).await
    }

    pub async fn list_voices(&self) -> Result<Vec<Voice>> {
        let client = self.bound_voice()?;
        client.list_voices().await
    }
}
