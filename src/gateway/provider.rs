//! Provider descriptors
//!
//! A descriptor names one chat backend and carries everything needed to
//! build a client for it. Exactly one descriptor is bound at a time.

use serde::{Deserialize, Serialize};

/// Interchangeable backends known to the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProviderKind {
    /// OpenAI chat completions
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    /// Letta agent messages API
    #[serde(rename = "letta")]
    Letta,
    /// OpenCode Zen, OpenAI-compatible
    #[serde(rename = "opencode_zen")]
    OpenCodeZen,
    /// On-device inference (not available in this daemon)
    #[serde(rename = "local")]
    LocalInference,
    /// Cartesia, voice synthesis only
    #[serde(rename = "cartesia")]
    Cartesia,
}

impl ProviderKind {
    /// Stable lowercase name, as used in config and persistence records
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Letta => "letta",
            ProviderKind::OpenCodeZen => "opencode_zen",
            ProviderKind::LocalInference => "local",
            ProviderKind::Cartesia => "cartesia",
        }
    }

    /// Whether this backend can answer chat requests at all
    pub fn supports_chat(self) -> bool {
        !matches!(self, ProviderKind::Cartesia)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "letta" => Ok(ProviderKind::Letta),
            "opencode_zen" | "opencode-zen" | "opencode" => Ok(ProviderKind::OpenCodeZen),
            "local" | "llama_local" | "local_inference" => Ok(ProviderKind::LocalInference),
            "cartesia" => Ok(ProviderKind::Cartesia),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Secrets needed to talk to a backend
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    /// Agent identifier (Letta)
    pub agent_id: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &redact(&self.api_key))
            .field("agent_id", &self.agent_id)
            .finish()
    }
}

/// Everything needed to bind one chat provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderDescriptor {
    pub kind: ProviderKind,
    pub credentials: Credentials,
    pub base_url: String,
    pub model: String,
    /// Whether the credentials are complete for this kind
    pub configured: bool,
}

impl ProviderDescriptor {
    /// Build a descriptor, deriving `configured` from the credentials
    pub fn new(
        kind: ProviderKind,
        credentials: Credentials,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let configured = credentials_complete(kind, &credentials);
        Self {
            kind,
            credentials,
            base_url: base_url.into(),
            model: model.into(),
            configured,
        }
    }
}

fn credentials_complete(kind: ProviderKind, credentials: &Credentials) -> bool {
    let has_key = !credentials.api_key.trim().is_empty();
    match kind {
        ProviderKind::OpenAi | ProviderKind::OpenCodeZen => has_key,
        ProviderKind::Letta => {
            has_key
                && credentials
                    .agent_id
                    .as_deref()
                    .is_some_and(|id| !id.trim().is_empty())
        }
        ProviderKind::LocalInference | ProviderKind::Cartesia => false,
    }
}

/// Mask a secret for logs
pub(crate) fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}
