//! Speech synthesis sink
//!
//! Two backends in fixed precedence: the remote voice service (raw audio
//! played through [`AudioOutput`]) and the local synthesizer (plays
//! internally, reports lifecycle events only). Remote failures fall back to
//! the local backend without surfacing to the caller.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::audio::{AudioOutput, Playback};
use crate::error::{Error, Result};
use crate::gateway::{AiGateway, SynthesisRequest};

/// Capacity of the synthesis lifecycle channel
pub const TTS_CHANNEL_CAPACITY: usize = 32;

/// Lifecycle of one utterance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TtsEvent {
    Started { id: String },
    Completed { id: String },
    Error { id: String, reason: String },
}

impl TtsEvent {
    pub fn id(&self) -> &str {
        match self {
            TtsEvent::Started { id } | TtsEvent::Completed { id } | TtsEvent::Error { id, .. } => id,
        }
    }
}

/// On-device synthesizer
///
/// Implementations report progress for `utterance_id` as [`TtsEvent`]s on
/// the channel they were built with. Starting a new utterance interrupts
/// the current one.
pub trait LocalSynthesizer: Send + Sync {
    /// Queue `request` for speaking at `speed` (1.0 = normal rate)
    fn speak(&self, request: &SynthesisRequest, speed: f32, utterance_id: &str) -> Result<()>;

    /// Halt speaking. Idempotent, emits nothing.
    fn stop(&self);
}

/// Regional voice used by the local synthesizer for a language tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceLocale {
    Bengali,
    UsEnglish,
    BritishEnglish,
}

impl VoiceLocale {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "bn" | "bn-BD" => VoiceLocale::Bengali,
            "en-GB" => VoiceLocale::BritishEnglish,
            _ => VoiceLocale::UsEnglish,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            VoiceLocale::Bengali => "bn-BD",
            VoiceLocale::UsEnglish => "en-US",
            VoiceLocale::BritishEnglish => "en-GB",
        }
    }
}

/// Remote-first synthesis with local fallback
pub struct SynthesisSink {
    local: Arc<dyn LocalSynthesizer>,
    gateway: Arc<AiGateway>,
    output: Arc<AudioOutput>,
    events: mpsc::Sender<TtsEvent>,
    sample_rate: u32,
}

impl SynthesisSink {
    pub fn new(
        local: Arc<dyn LocalSynthesizer>,
        gateway: Arc<AiGateway>,
        output: Arc<AudioOutput>,
        events: mpsc::Sender<TtsEvent>,
        sample_rate: u32,
    ) -> Self {
        Self {
            local,
            gateway,
            output,
            events,
            sample_rate,
        }
    }

    /// New utterance identifier
    pub fn next_utterance_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Speak through the local backend
    pub fn speak(&self, request: &SynthesisRequest, speed: f32, utterance_id: &str) -> Result<()> {
        debug!(utterance_id, chars = request.text.len(), "local synthesis");
        self.local.speak(request, speed, utterance_id)
    }

    /// Speak through the remote backend, falling back to the local one.
    ///
    /// Only a failure of both backends is returned.
    pub async fn synthesize_and_play(
        &self,
        request: &SynthesisRequest,
        speed: f32,
        utterance_id: &str,
    ) -> Result<()> {
        let remote = match self.gateway.synthesize(request).await {
            Ok(audio) if audio.len() < 2 => Error::Transport("empty audio payload".into()),
            Ok(audio) => {
                self.emit(TtsEvent::Started {
                    id: utterance_id.to_string(),
                });
                match self.output.play(&audio, self.sample_rate).await {
                    Ok(Playback::Finished) => {
                        self.emit(TtsEvent::Completed {
                            id: utterance_id.to_string(),
                        });
                        return Ok(());
                    }
                    Ok(Playback::Stopped) => {
                        debug!(utterance_id, "remote playback stopped");
                        return Ok(());
                    }
                    Err(e) => e,
                }
            }
            Err(e) => e,
        };

        if remote.is_configuration() {
            debug!(utterance_id, "remote synthesis not configured, using local");
        } else {
            warn!(utterance_id, error = %remote, "remote synthesis failed, using local");
        }

        self.speak(request, speed, utterance_id)
            .map_err(|local| Error::Synthesis(format!("remote: {remote}; local: {local}")))
    }

    /// Halt whichever backend is active
    pub fn stop(&self) {
        self.output.stop();
        self.local.stop();
    }

    fn emit(&self, event: TtsEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!(error = %e, "synthesis event dropped");
        }
    }
}
