//! Events module for session transitions
//!
//! Structured events broadcast to the control surface: state entry/exit,
//! wake pulses, transcripts, replies and faults.

use serde::{Deserialize, Serialize};

use crate::gateway::ProviderKind;
use crate::state::SessionState;

/// Events emitted by the session during transitions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    /// Microphone armed for wake phrase detection
    WakeArmed,

    /// A wake phrase was heard
    WakeDetected {
        /// The configured phrase that matched
        phrase: String,
    },

    /// Capture of the follow-up utterance started
    ListeningStarted,

    /// Listening ended (final transcript or error)
    ListeningFinished {
        /// Duration in milliseconds spent listening
        duration_ms: u64,
    },

    /// Recognized speech
    Transcript { text: String, is_final: bool },

    /// Utterance handed to the chat provider
    DispatchStarted,

    /// Chat provider returned or failed
    DispatchFinished {
        /// Duration in milliseconds spent waiting for the provider
        duration_ms: u64,
    },

    /// Reply text received from the provider
    Reply { provider: ProviderKind, text: String },

    /// Speech output started
    SpeakingStarted,

    /// Speech output finished
    SpeakingFinished {
        /// Duration in milliseconds spent speaking
        duration_ms: u64,
    },

    /// Session returned to Idle
    SessionIdle,

    /// Active chat provider changed
    ProviderSwitched { provider: ProviderKind },

    /// Terminal failure; the session has been disabled
    Fault { reason: String },
}

impl StateEvent {
    /// The state whose entry this event announces
    pub fn entered_state(&self) -> Option<SessionState> {
        match self {
            StateEvent::SessionIdle => Some(SessionState::Idle),
            StateEvent::WakeArmed => Some(SessionState::WakeArmed),
            StateEvent::ListeningStarted => Some(SessionState::ActiveListening),
            StateEvent::DispatchStarted => Some(SessionState::Dispatching),
            StateEvent::SpeakingStarted => Some(SessionState::Speaking),
            _ => None,
        }
    }
}

impl std::fmt::Display for StateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateEvent::WakeArmed => write!(f, "WAKE_ARMED"),
            StateEvent::WakeDetected { phrase } => write!(f, "WAKE_DETECTED ({phrase})"),
            StateEvent::ListeningStarted => write!(f, "LISTENING_STARTED"),
            StateEvent::ListeningFinished { duration_ms } => {
                write!(f, "LISTENING_FINISHED ({duration_ms}ms)")
            }
            StateEvent::Transcript { is_final, .. } => {
                write!(f, "TRANSCRIPT (final={is_final})")
            }
            StateEvent::DispatchStarted => write!(f, "DISPATCH_STARTED"),
            StateEvent::DispatchFinished { duration_ms } => {
                write!(f, "DISPATCH_FINISHED ({duration_ms}ms)")
            }
            StateEvent::Reply { provider, .. } => write!(f, "REPLY ({provider})"),
            StateEvent::SpeakingStarted => write!(f, "SPEAKING_STARTED"),
            StateEvent::SpeakingFinished { duration_ms } => {
                write!(f, "SPEAKING_FINISHED ({duration_ms}ms)")
            }
            StateEvent::SessionIdle => write!(f, "SESSION_IDLE"),
            StateEvent::ProviderSwitched { provider } => {
                write!(f, "PROVIDER_SWITCHED ({provider})")
            }
            StateEvent::Fault { reason } => write!(f, "FAULT ({reason})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = StateEvent::SpeakingFinished { duration_ms: 1500 };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("speaking_finished"));
        assert!(json.contains("1500"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"wake_detected","phrase":"hey maya"}"#;
        let event: StateEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, StateEvent::WakeDetected { phrase } if phrase == "hey maya"));
    }

    #[test]
    fn test_entry_events_map_to_states() {
        assert_eq!(StateEvent::WakeArmed.entered_state(), Some(SessionState::WakeArmed));
        assert_eq!(StateEvent::SessionIdle.entered_state(), Some(SessionState::Idle));
        assert_eq!(
            StateEvent::SpeakingFinished { duration_ms: 3 }.entered_state(),
            None
        );
    }

    #[test]
    fn test_display_names_provider() {
        let event = StateEvent::ProviderSwitched {
            provider: ProviderKind::Letta,
        };
        assert_eq!(event.to_string(), "PROVIDER_SWITCHED (letta)");
    }
}
