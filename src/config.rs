//! Configuration loading and management
//!
//! Paths come from the environment; user settings come from `config.toml`
//! with credential overrides from `MAYA_*` variables.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::gateway::{Credentials, ProviderDescriptor, ProviderKind, VoiceDescriptor};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENAI_MODEL: &str = "gpt-4";
const LETTA_BASE_URL: &str = "https://api.letta.com";
const OPENCODE_BASE_URL: &str = "https://api.opencode.dev/v1";
const OPENCODE_MODEL: &str = "opencode-zen";
const VOICE_BASE_URL: &str = "https://api.cartesia.ai/v1";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// User settings file
    pub settings_path: PathBuf,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("maya");

        let socket_path = data_dir.join("daemon.sock");
        let settings_path = std::env::var_os("MAYA_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("config.toml"));

        Ok(Self {
            socket_path,
            data_dir,
            settings_path,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }

    /// Read the settings file and apply environment overrides
    pub fn load_settings(&self) -> Result<Settings> {
        let mut settings = Settings::load_from(&self.settings_path)?;
        settings.apply_overrides(|key| std::env::var(key).ok());
        Ok(settings)
    }

    pub fn conversation_log_path(&self) -> PathBuf {
        self.data_dir.join("conversations.jsonl")
    }

    pub fn playback_path(&self) -> PathBuf {
        self.data_dir.join("playback.wav")
    }
}

/// User-facing settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub assistant: AssistantSettings,
    pub providers: ProviderSettings,
    pub voice: VoiceSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantSettings {
    pub wake_phrases: Vec<String>,
    /// Re-arm wake detection after every response
    pub continuous_listening: bool,
    /// Speak replies aloud
    pub tts_enabled: bool,
    pub language: String,
    pub speech_rate: f32,
    /// Spoken after a wake phrase
    pub acknowledgment: String,
    pub active_provider: ProviderKind,
    pub enable_on_start: bool,
    pub conversation_id: String,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            wake_phrases: vec!["hey maya".into(), "maya".into(), "ok maya".into()],
            continuous_listening: false,
            tts_enabled: true,
            language: "en-US".into(),
            speech_rate: 1.0,
            acknowledgment: "Yes?".into(),
            active_provider: ProviderKind::OpenAi,
            enable_on_start: true,
            conversation_id: "default".into(),
        }
    }
}

/// One chat endpoint; unset URL and model fall back to the provider's defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSettings {
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub agent_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub openai: EndpointSettings,
    pub letta: EndpointSettings,
    pub opencode_zen: EndpointSettings,
    pub local_model_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    pub api_key: String,
    pub base_url: String,
    pub voice_id: String,
    pub output_format: String,
    pub sample_rate: u32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: VOICE_BASE_URL.into(),
            voice_id: "default".into(),
            output_format: "pcm_s16le".into(),
            sample_rate: crate::audio::DEFAULT_SAMPLE_RATE,
        }
    }
}

impl Settings {
    /// Parse `path`, or return defaults when it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("invalid settings in {}", path.display()))
    }

    /// Apply credential overrides looked up by variable name
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = lookup("MAYA_PROVIDER") {
            match provider.parse() {
                Ok(kind) => self.assistant.active_provider = kind,
                Err(e) => tracing::warn!(error = %e, "ignoring MAYA_PROVIDER"),
            }
        }
        if let Some(key) = lookup("MAYA_OPENAI_API_KEY") {
            self.providers.openai.api_key = key;
        }
        if let Some(key) = lookup("MAYA_LETTA_API_KEY") {
            self.providers.letta.api_key = key;
        }
        if let Some(agent) = lookup("MAYA_LETTA_AGENT_ID") {
            self.providers.letta.agent_id = Some(agent);
        }
        if let Some(key) = lookup("MAYA_OPENCODE_API_KEY") {
            self.providers.opencode_zen.api_key = key;
        }
        if let Some(key) = lookup("MAYA_VOICE_API_KEY") {
            self.voice.api_key = key;
        }
    }

    /// Descriptor for `kind` built from these settings
    pub fn descriptor_for(&self, kind: ProviderKind) -> ProviderDescriptor {
        let endpoint = |e: &EndpointSettings, base: &str, model: &str| {
            ProviderDescriptor::new(
                kind,
                Credentials {
                    api_key: e.api_key.clone(),
                    agent_id: e.agent_id.clone(),
                },
                e.base_url.clone().unwrap_or_else(|| base.to_string()),
                e.model.clone().unwrap_or_else(|| model.to_string()),
            )
        };

        match kind {
            ProviderKind::OpenAi => endpoint(&self.providers.openai, OPENAI_BASE_URL, OPENAI_MODEL),
            ProviderKind::Letta => endpoint(&self.providers.letta, LETTA_BASE_URL, ""),
            ProviderKind::OpenCodeZen => {
                endpoint(&self.providers.opencode_zen, OPENCODE_BASE_URL, OPENCODE_MODEL)
            }
            ProviderKind::LocalInference => ProviderDescriptor::new(
                kind,
                Credentials::default(),
                self.providers
                    .local_model_path
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                "",
            ),
            ProviderKind::Cartesia => ProviderDescriptor::new(
                kind,
                Credentials {
                    api_key: self.voice.api_key.clone(),
                    agent_id: None,
                },
                self.voice.base_url.clone(),
                "",
            ),
        }
    }

    pub fn active_descriptor(&self) -> ProviderDescriptor {
        self.descriptor_for(self.assistant.active_provider)
    }

    pub fn voice_descriptor(&self) -> VoiceDescriptor {
        VoiceDescriptor {
            api_key: self.voice.api_key.clone(),
            base_url: self.voice.base_url.clone(),
            voice_id: self.voice.voice_id.clone(),
            output_format: self.voice.output_format.clone(),
        }
    }
}

/// Read-only view of the current settings, sampled at each transition
pub trait SettingsSource: Send + Sync {
    fn snapshot(&self) -> Settings;
}

impl SettingsSource for watch::Receiver<Settings> {
    fn snapshot(&self) -> Settings {
        self.borrow().clone()
    }
}

impl SettingsSource for Settings {
    fn snapshot(&self) -> Settings {
        self.clone()
    }
}
