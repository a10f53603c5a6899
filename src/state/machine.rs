//! Core session state machine
//!
//! Handles transitions between Idle, WakeArmed, ActiveListening,
//! Dispatching and Speaking based on session triggers.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::events::StateEvent;

/// The five possible states of a voice session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Session disabled, no resource held
    #[default]
    Idle,
    /// Microphone open, waiting for a wake phrase
    WakeArmed,
    /// Wake phrase heard, capturing the follow-up utterance
    ActiveListening,
    /// Utterance sent to the chat provider, waiting for a reply
    Dispatching,
    /// Reply (or apology) being spoken
    Speaking,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::WakeArmed => write!(f, "WakeArmed"),
            SessionState::ActiveListening => write!(f, "ActiveListening"),
            SessionState::Dispatching => write!(f, "Dispatching"),
            SessionState::Speaking => write!(f, "Speaking"),
        }
    }
}

/// Inputs that may move the session to another state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Session switched on
    Enable,
    /// Wake signal pulse
    WakeDetected,
    /// A non-empty final transcript arrived while listening
    FinalTranscript,
    /// Recognition failed; `fatal` for permission/authorization failures
    RecognitionFailed { fatal: bool },
    /// Dispatch produced a reply or failed
    DispatchFinished,
    /// Speech completed or errored
    SpeechFinished { continuous: bool },
    /// Session switched off
    Disable,
}

/// The state machine that owns the session state
pub struct SessionMachine {
    /// Current state
    state: SessionState,
    /// Time when current non-Idle state was entered
    state_entered_at: Option<Instant>,
    /// Channel for emitting state events
    event_tx: broadcast::Sender<StateEvent>,
}

impl SessionMachine {
    /// Create a new state machine in Idle
    pub fn new(event_tx: broadcast::Sender<StateEvent>) -> Self {
        Self {
            state: SessionState::Idle,
            state_entered_at: None,
            event_tx,
        }
    }

    /// Get the current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Apply a trigger. Returns `true` if the state changed.
    pub fn fire(&mut self, trigger: Trigger) -> bool {
        match compute_next_state(self.state, trigger) {
            Some(next) if next != self.state => {
                self.transition_to(next);
                true
            }
            Some(_) => false,
            None => {
                warn!(state = %self.state, ?trigger, "trigger ignored in current state");
                false
            }
        }
    }

    /// Perform a state transition
    fn transition_to(&mut self, new_state: SessionState) {
        let old_state = self.state;
        let duration_ms = self
            .state_entered_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        info!(
            from = %old_state,
            to = %new_state,
            duration_ms = duration_ms,
            "session transition"
        );

        self.emit_exit_event(old_state, duration_ms);

        self.state = new_state;
        self.state_entered_at = if new_state != SessionState::Idle {
            Some(Instant::now())
        } else {
            None
        };

        self.emit_entry_event(new_state);
    }

    /// Emit an exit event for the given state
    fn emit_exit_event(&self, state: SessionState, duration_ms: u64) {
        let event = match state {
            SessionState::Idle | SessionState::WakeArmed => return,
            SessionState::ActiveListening => StateEvent::ListeningFinished { duration_ms },
            SessionState::Dispatching => StateEvent::DispatchFinished { duration_ms },
            SessionState::Speaking => StateEvent::SpeakingFinished { duration_ms },
        };

        debug!(?event, "emitting exit event");
        let _ = self.event_tx.send(event);
    }

    /// Emit an entry event for the given state
    fn emit_entry_event(&self, state: SessionState) {
        let event = match state {
            SessionState::Idle => StateEvent::SessionIdle,
            SessionState::WakeArmed => StateEvent::WakeArmed,
            SessionState::ActiveListening => StateEvent::ListeningStarted,
            SessionState::Dispatching => StateEvent::DispatchStarted,
            SessionState::Speaking => StateEvent::SpeakingStarted,
        };

        debug!(?event, "emitting entry event");
        let _ = self.event_tx.send(event);
    }
}

/// Compute the next state, or `None` when the trigger is not valid here.
///
/// `Disable` is accepted from every state.
pub fn compute_next_state(state: SessionState, trigger: Trigger) -> Option<SessionState> {
    if trigger == Trigger::Disable {
        return Some(SessionState::Idle);
    }

    match state {
        SessionState::Idle => compute_from_idle(trigger),
        SessionState::WakeArmed => compute_from_wake_armed(trigger),
        SessionState::ActiveListening => compute_from_listening(trigger),
        SessionState::Dispatching => compute_from_dispatching(trigger),
        SessionState::Speaking => compute_from_speaking(trigger),
    }
}

fn compute_from_idle(trigger: Trigger) -> Option<SessionState> {
    match trigger {
        Trigger::Enable => Some(SessionState::WakeArmed),
        _ => None,
    }
}

fn compute_from_wake_armed(trigger: Trigger) -> Option<SessionState> {
    match trigger {
        Trigger::Enable => Some(SessionState::WakeArmed),
        Trigger::WakeDetected => Some(SessionState::ActiveListening),
        Trigger::RecognitionFailed { fatal: true } => Some(SessionState::Idle),
        Trigger::RecognitionFailed { fatal: false } => Some(SessionState::WakeArmed),
        _ => None,
    }
}

fn compute_from_listening(trigger: Trigger) -> Option<SessionState> {
    match trigger {
        Trigger::FinalTranscript => Some(SessionState::Dispatching),
        Trigger::RecognitionFailed { fatal: true } => Some(SessionState::Idle),
        Trigger::RecognitionFailed { fatal: false } => Some(SessionState::WakeArmed),
        _ => None,
    }
}

fn compute_from_dispatching(trigger: Trigger) -> Option<SessionState> {
    match trigger {
        Trigger::DispatchFinished => Some(SessionState::Speaking),
        _ => None,
    }
}

fn compute_from_speaking(trigger: Trigger) -> Option<SessionState> {
    match trigger {
        Trigger::SpeechFinished { continuous: true } => Some(SessionState::WakeArmed),
        Trigger::SpeechFinished { continuous: false } => Some(SessionState::Idle),
        _ => None,
    }
}
