//! maya-daemon: wake-word voice assistant session core
//!
//! Detects a spoken wake phrase, captures the follow-up utterance, sends it
//! to one of several interchangeable chat providers and speaks the reply,
//! optionally looping back to wake detection.

pub mod audio;
pub mod config;
pub mod console;
pub mod error;
pub mod events;
pub mod gateway;
pub mod history;
pub mod ipc;
pub mod lifecycle;
pub mod orchestrator;
pub mod speech;
pub mod state;
pub mod transcript;
pub mod wake;

pub use error::{Error, Result};
