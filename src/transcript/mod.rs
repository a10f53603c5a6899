//! Transcript source contract
//!
//! A transcript source wraps a microphone-driven recognition engine and
//! pushes [`TranscriptEvent`]s onto a bounded channel. The orchestrator is
//! the only caller allowed to start or stop it.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

/// Capacity of the per-session transcript event channel
pub const TRANSCRIPT_CHANNEL_CAPACITY: usize = 32;

/// Lifecycle and result events from one recognition session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEvent {
    /// Engine ready for speech
    Ready,
    /// User started speaking
    SpeechStarted,
    /// In-progress hypothesis
    Partial { text: String },
    /// Settled result
    Final {
        text: String,
        confidence: f32,
        alternatives: Vec<String>,
    },
    /// User stopped speaking
    SpeechEnded,
    /// Engine error
    Error { reason: String },
}

impl TranscriptEvent {
    /// Text carried by a partial or final result
    pub fn text(&self) -> Option<&str> {
        match self {
            TranscriptEvent::Partial { text } | TranscriptEvent::Final { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// Classified recognition failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionFault {
    NoMatch,
    Timeout,
    Busy,
    Network,
    Permission,
    Other,
}

impl RecognitionFault {
    /// Classify an engine error reason.
    ///
    /// Engines report both symbolic codes (`ERROR_INSUFFICIENT_PERMISSIONS`)
    /// and human-readable messages ("Insufficient permissions").
    pub fn classify(reason: &str) -> Self {
        let reason = reason.to_lowercase();
        if reason.contains("permission") || reason.contains("not authorized") {
            Self::Permission
        } else if reason.contains("no match") || reason.contains("no_match") || reason.contains("no results") {
            Self::NoMatch
        } else if reason.contains("timeout") || reason.contains("no speech") {
            Self::Timeout
        } else if reason.contains("busy") {
            Self::Busy
        } else if reason.contains("network") || reason.contains("server") {
            Self::Network
        } else {
            Self::Other
        }
    }

    /// Permission failures end the session; everything else is retried
    pub fn is_fatal(self) -> bool {
        self == Self::Permission
    }
}

/// Microphone-driven recognition engine
///
/// Events are delivered in emission order. After [`stop`](Self::stop) the
/// source may still deliver late events; callers must drop them.
pub trait TranscriptSource: Send {
    /// Open a recognition session and return its event stream
    fn start(&mut self, language: &str) -> Result<mpsc::Receiver<TranscriptEvent>>;

    /// Stop the current session. Idempotent, safe when not started.
    fn stop(&mut self);

    /// Release all resources permanently
    fn destroy(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_errors_are_fatal() {
        for reason in [
            "ERROR_INSUFFICIENT_PERMISSIONS",
            "Insufficient permissions",
            "microphone permission denied",
        ] {
            let fault = RecognitionFault::classify(reason);
            assert_eq!(fault, RecognitionFault::Permission, "{reason}");
            assert!(fault.is_fatal());
        }
    }

    #[test]
    fn test_transient_errors_are_not_fatal() {
        assert_eq!(RecognitionFault::classify("No match found"), RecognitionFault::NoMatch);
        assert_eq!(RecognitionFault::classify("ERROR_SPEECH_TIMEOUT"), RecognitionFault::Timeout);
        assert_eq!(RecognitionFault::classify("RecognitionService busy"), RecognitionFault::Busy);
        assert_eq!(RecognitionFault::classify("Network error"), RecognitionFault::Network);
        assert!(!RecognitionFault::classify("Audio recording error").is_fatal());
    }

    #[test]
    fn test_event_text() {
        let partial = TranscriptEvent::Partial { text: "hey".into() };
        assert_eq!(partial.text(), Some("hey"));
        assert_eq!(TranscriptEvent::Ready.text(), None);
    }
}
