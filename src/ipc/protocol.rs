//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::StateEvent;
use crate::gateway::{ProviderKind, Voice};
use crate::state::SessionState;

/// Requests from a control client to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon status
    GetStatus,

    /// Arm wake detection
    Enable,

    /// Stop listening and speaking, return to idle
    Disable,

    /// Bind future dispatches to another chat provider
    SwitchProvider { provider: ProviderKind },

    /// Ping to check connectivity
    Ping,

    /// Subscribe to state change notifications
    Subscribe,

    /// List the voices offered by the voice backend
    ListVoices,
}

/// Responses from daemon to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Command queued for the session
    Accepted,

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Voices offered by the voice backend
    Voices { voices: Vec<Voice> },

    /// Error response
    Error { code: String, message: String },
}

/// Push notification from daemon to subscribed clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Session event occurred
    Event { event: StateEvent },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Current session state
    pub state: SessionState,

    /// Chat provider future dispatches go to
    pub provider: ProviderKind,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: SessionState::default(),
            provider: ProviderKind::default(),
            uptime_secs: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = Request::SwitchProvider {
            provider: ProviderKind::OpenCodeZen,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("switch_provider"));
        assert!(json.contains("opencode_zen"));

        let parsed: Request = serde_json::from_str(r#"{"type":"enable"}"#).unwrap();
        assert!(matches!(parsed, Request::Enable));
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::Status(DaemonStatus::default());
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("status"));
        assert!(json.contains("\"state\":\"idle\""));
    }

    #[test]
    fn test_notification_keeps_event_tag() {
        let note = Notification::Event {
            event: StateEvent::WakeDetected {
                phrase: "hey maya".into(),
            },
        };
        let json = serde_json::to_value(&note).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["event"]["type"], "wake_detected");
    }
}
