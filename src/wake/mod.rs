//! Wake phrase detection
//!
//! Matches normalized transcripts against the configured wake phrases and
//! turns the transcript stream into a debounced wake pulse. The detector
//! never touches the microphone itself: it tells the orchestrator what to
//! do next through [`WakeAction`].

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::transcript::{RecognitionFault, TranscriptEvent};

/// Re-detection inside this window after a pulse is suppressed
pub const WAKE_DEBOUNCE: Duration = Duration::from_millis(2000);

/// Delay before reopening recognition after a non-fatal error
pub const RECOGNITION_RESTART_DELAY: Duration = Duration::from_millis(1000);

/// What the session should do after a transcript event in wake mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeAction {
    /// Nothing to do
    None,
    /// Wake pulse for the matched phrase
    Wake { phrase: String },
    /// Recognition session settled without a wake phrase; reopen it
    Rearm,
    /// Non-fatal error; reopen recognition after the delay
    RestartAfter(Duration),
    /// Permission failure; stop detection for good
    Fatal { reason: String },
}

/// Detects wake phrases in transcripts
#[derive(Debug, Clone)]
pub struct WakeWordDetector {
    wake_phrases: Vec<String>,
    last_pulse: Option<Instant>,
}

impl WakeWordDetector {
    /// Create a detector for the given phrases (e.g. "hey maya")
    pub fn new<I, S>(wake_phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut detector = Self {
            wake_phrases: Vec::new(),
            last_pulse: None,
        };
        detector.set_phrases(wake_phrases);
        detector
    }

    /// Replace the configured phrases
    pub fn set_phrases<I, S>(&mut self, wake_phrases: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.wake_phrases = wake_phrases
            .into_iter()
            .map(|p| normalize(p.as_ref()))
            .filter(|p| !p.is_empty())
            .collect();

        debug!(wake_phrases = ?self.wake_phrases, "wake phrases configured");
    }

    /// The normalized phrases
    pub fn wake_phrases(&self) -> &[String] {
        &self.wake_phrases
    }

    /// First configured phrase contained in `text`, if any
    pub fn find_phrase(&self, text: &str) -> Option<&str> {
        let normalized = normalize(text);
        self.wake_phrases
            .iter()
            .find(|phrase| normalized.contains(phrase.as_str()))
            .map(String::as_str)
    }

    /// Feed one transcript event observed at `now`
    pub fn observe(&mut self, event: &TranscriptEvent, now: Instant) -> WakeAction {
        match event {
            TranscriptEvent::Partial { text } => match self.check(text, now) {
                Some(phrase) => WakeAction::Wake { phrase },
                None => WakeAction::None,
            },
            TranscriptEvent::Final { text, .. } => {
                if let Some(phrase) = self.check(text, now) {
                    WakeAction::Wake { phrase }
                } else if self.find_phrase(text).is_some() {
                    // Final for an utterance whose partial already pulsed
                    WakeAction::None
                } else {
                    WakeAction::Rearm
                }
            }
            TranscriptEvent::Error { reason } => {
                if RecognitionFault::classify(reason).is_fatal() {
                    WakeAction::Fatal {
                        reason: reason.clone(),
                    }
                } else {
                    debug!(%reason, "recognition error during wake detection");
                    WakeAction::RestartAfter(RECOGNITION_RESTART_DELAY)
                }
            }
            TranscriptEvent::Ready | TranscriptEvent::SpeechStarted | TranscriptEvent::SpeechEnded => {
                WakeAction::None
            }
        }
    }

    /// Forget the last pulse
    pub fn reset(&mut self) {
        self.last_pulse = None;
    }

    fn check(&mut self, text: &str, now: Instant) -> Option<String> {
        let phrase = self.find_phrase(text)?.to_string();

        if let Some(last) = self.last_pulse {
            if now.saturating_duration_since(last) < WAKE_DEBOUNCE {
                trace!(%phrase, "wake phrase suppressed by debounce");
                return None;
            }
        }

        info!(%phrase, "wake phrase detected");
        self.last_pulse = Some(now);
        Some(phrase)
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}
