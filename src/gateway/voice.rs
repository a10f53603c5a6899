//! Remote voice synthesis backend
//!
//! Independent of the chat provider: it has its own credential and is
//! initialized separately on first use.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::client::status_error;
use super::provider::redact;

/// Text to be spoken
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub text: String,
    pub language_tag: String,
    pub voice_id: Option<String>,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>, language_tag: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language_tag: language_tag.into(),
            voice_id: None,
        }
    }
}

/// A voice offered by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub id: String,
    pub name: String,
    pub language: String,
    pub gender: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Connection details for the voice backend
#[derive(Clone, PartialEq)]
pub struct VoiceDescriptor {
    pub api_key: String,
    pub base_url: String,
    /// Voice used when a request names none
    pub voice_id: String,
    pub output_format: String,
}

impl VoiceDescriptor {
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

impl std::fmt::Debug for VoiceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceDescriptor")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("voice_id", &self.voice_id)
            .field("output_format", &self.output_format)
            .finish()
    }
}

/// Remote text-to-speech returning raw audio
#[async_trait]
pub trait VoiceSynthesis: Send + Sync {
    /// Synthesize `request` with the configured voice when it names none
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>>;

    /// Voices available to this account
    async fn list_voices(&self) -> Result<Vec<Voice>>;

    fn is_configured(&self) -> bool;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeBody<'a> {
    text: &'a str,
    voice_id: &'a str,
    language: &'a str,
    output_format: &'a str,
}

#[derive(Deserialize)]
struct VoicesResponse {
    #[serde(default)]
    voices: Vec<Voice>,
}

/// HTTP client for `POST /tts/synthesize` and `GET /voices`
pub struct VoiceClient {
    http: reqwest::Client,
    descriptor: VoiceDescriptor,
    base_url: String,
}

impl VoiceClient {
    pub fn new(http: reqwest::Client, descriptor: &VoiceDescriptor) -> Self {
        info!(base_url = %descriptor.base_url, voice = %descriptor.voice_id, "voice client configured");
        Self {
            http,
            base_url: descriptor.base_url.trim_end_matches('/').to_string(),
            descriptor: descriptor.clone(),
        }
    }
}

#[async_trait]
impl VoiceSynthesis for VoiceClient {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
        let voice_id = request
            .voice_id
            .as_deref()
            .unwrap_or(&self.descriptor.voice_id);

        let response = self
            .http
            .post(format!("{}/tts/synthesize", self.base_url))
            .header("X-API-Key", &self.descriptor.api_key)
            .json(&SynthesizeBody {
                text: &request.text,
                voice_id,
                language: &request.language_tag,
                output_format: &self.descriptor.output_format,
            })
            .send()
            .await
            .map_err(|e| Error::Transport(format!("voice request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(status_error("voice", response).await);
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("voice body read failed: {e}")))?;
        if audio.is_empty() {
            return Err(Error::Transport("empty audio from voice backend".into()));
        }

        debug!(bytes = audio.len(), "voice synthesized");
        Ok(audio.to_vec())
    }

    async fn list_voices(&self) -> Result<Vec<Voice>> {
        let response = self
            .http
            .get(format!("{}/voices", self.base_url))
            .header("X-API-Key", &self.descriptor.api_key)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("voice list request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(status_error("voice", response).await);
        }

        let voices: VoicesResponse = response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("voice list malformed: {e}")))?;
        Ok(voices.voices)
    }

    fn is_configured(&self) -> bool {
        self.descriptor.is_configured()
    }
}
