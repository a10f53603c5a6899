//! Session state machine
//!
//! Provides an explicit state machine with five states:
//! - Idle: session disabled, microphone and speaker released
//! - WakeArmed: microphone open for wake phrase detection
//! - ActiveListening: capturing the follow-up utterance
//! - Dispatching: waiting on the chat provider
//! - Speaking: reply playback in progress

mod machine;

pub use machine::{compute_next_state, SessionMachine, SessionState, Trigger};
