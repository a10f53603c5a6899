//! Session orchestration
//!
//! One event loop per device owns the session state, the microphone and the
//! speaker. Every asynchronous source (recognition, dispatch results,
//! synthesis lifecycle, timers) is funnelled into a single bounded channel
//! and handled in arrival order.

mod session;

use std::sync::Arc;
use std::time::Duration;

use crate::config::SettingsSource;
use crate::error::Result;
use crate::gateway::{AiGateway, ProviderKind, Reply};
use crate::history::ConversationSink;
use crate::speech::{SynthesisSink, TtsEvent};
use crate::transcript::{TranscriptEvent, TranscriptSource};

pub use session::Orchestrator;

/// Capacity of the merged session event channel
pub const SESSION_CHANNEL_CAPACITY: usize = 64;

/// Pause between the acknowledgment and opening capture
pub const ACKNOWLEDGMENT_PAUSE: Duration = Duration::from_millis(1000);

/// Delay before wake detection resumes after a reply in continuous mode
pub const CONTINUOUS_RESUME_DELAY: Duration = Duration::from_millis(2000);

/// Fixed part of the time allowed for one utterance to finish
pub const SPEECH_DEADLINE_BASE: Duration = Duration::from_secs(20);

/// Additional time allowed per spoken word at normal rate
pub const SPEECH_DEADLINE_PER_WORD: Duration = Duration::from_millis(500);

/// Spoken when no chat provider can serve the request
pub const CONFIGURATION_APOLOGY: &str =
    "Sorry, no AI provider is configured. Please add an API key in settings.";

/// Spoken when the chat provider fails
pub const DISPATCH_APOLOGY: &str = "Sorry, I encountered an error. Please try again.";

/// External requests to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Enable,
    Disable,
    SwitchProvider(ProviderKind),
}

/// Fixed delays owned by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    /// Reopen recognition after a non-fatal error
    RestartRecognition,
    /// Open capture after the acknowledgment
    StartCapture,
    /// Resume wake detection after a reply (continuous mode)
    ResumeWakeDetection,
    /// Give up on an utterance whose completion never arrived
    SpeechDeadline,
}

/// How long `text` may take to speak at `speed` before it is abandoned
pub fn speech_deadline(text: &str, speed: f32) -> Duration {
    let words = text.split_whitespace().count() as u32;
    SPEECH_DEADLINE_BASE + (SPEECH_DEADLINE_PER_WORD * words).div_f32(speed.max(0.1))
}

/// Everything the event loop consumes
#[derive(Debug)]
pub enum SessionEvent {
    /// Event from the microphone session opened as `generation`
    Transcript {
        generation: u64,
        event: TranscriptEvent,
    },
    Speech(TtsEvent),
    DispatchFinished { seq: u64, result: Result<Reply> },
    TimerElapsed { epoch: u64, timer: Timer },
}

/// Collaborators injected at startup
pub struct Collaborators {
    pub transcripts: Box<dyn TranscriptSource>,
    pub sink: Arc<SynthesisSink>,
    pub gateway: Arc<AiGateway>,
    pub settings: Arc<dyn SettingsSource>,
    pub history: Arc<dyn ConversationSink>,
}
