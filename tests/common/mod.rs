//! Scripted collaborators for driving a whole session from tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use maya_daemon::audio::{AudioOutput, PlaybackDevice};
use maya_daemon::config::Settings;
use maya_daemon::error::{Error, Result};
use maya_daemon::events::StateEvent;
use maya_daemon::gateway::{
    AiGateway, ChatClient, ChatMessage, ClientFactory, HttpClientFactory, ProviderDescriptor,
    ProviderKind, SynthesisRequest, VoiceDescriptor, VoiceSynthesis,
};
use maya_daemon::history::{ConversationSink, TurnRecord};
use maya_daemon::orchestrator::{Collaborators, ControlCommand, Orchestrator};
use maya_daemon::speech::{LocalSynthesizer, SynthesisSink, TtsEvent};
use maya_daemon::transcript::{TranscriptEvent, TranscriptSource};

/// Transcript source whose sessions are handed to the test as they open
pub struct ScriptedMic {
    opened: mpsc::UnboundedSender<mpsc::Sender<TranscriptEvent>>,
    active: Option<mpsc::Sender<TranscriptEvent>>,
}

impl ScriptedMic {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<mpsc::Sender<TranscriptEvent>>) {
        let (opened, sessions) = mpsc::unbounded_channel();
        (
            Self {
                opened,
                active: None,
            },
            sessions,
        )
    }
}

impl TranscriptSource for ScriptedMic {
    fn start(&mut self, _language: &str) -> Result<mpsc::Receiver<TranscriptEvent>> {
        let (tx, rx) = mpsc::channel(8);
        self.active = Some(tx.clone());
        let _ = self.opened.send(tx);
        Ok(rx)
    }

    fn stop(&mut self) {
        self.active = None;
    }

    fn destroy(&mut self) {
        self.stop();
    }
}

/// Local synthesizer that records what it was asked to say and finishes
/// every utterance immediately
pub struct RecordingSynthesizer {
    events: mpsc::Sender<TtsEvent>,
    pub spoken: Arc<Mutex<Vec<String>>>,
}

impl RecordingSynthesizer {
    pub fn new(events: mpsc::Sender<TtsEvent>) -> Self {
        Self {
            events,
            spoken: Arc::default(),
        }
    }
}

impl LocalSynthesizer for RecordingSynthesizer {
    fn speak(&self, request: &SynthesisRequest, _speed: f32, utterance_id: &str) -> Result<()> {
        self.spoken.lock().push(request.text.clone());
        let id = utterance_id.to_string();
        let _ = self.events.try_send(TtsEvent::Started { id: id.clone() });
        let _ = self.events.try_send(TtsEvent::Completed { id });
        Ok(())
    }

    fn stop(&self) {}
}

pub struct NullDevice;

#[async_trait]
impl PlaybackDevice for NullDevice {
    async fn render(&self, _samples: &[i16], _sample_rate: u32) -> Result<()> {
        Ok(())
    }
}

/// Chat backend with a canned outcome that records every request
pub struct ScriptedChat {
    reply: std::result::Result<String, String>,
    /// When set, every reply waits for one permit
    gate: Option<Arc<Notify>>,
    pub requests: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
}

impl ScriptedChat {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.into()),
            gate: None,
            requests: Arc::default(),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            reply: Err(reason.into()),
            gate: None,
            requests: Arc::default(),
        }
    }

    /// Replies with `text` only once `gate` is notified
    pub fn gated(text: &str, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::replying(text)
        }
    }
}

#[async_trait]
impl ChatClient for ScriptedChat {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn send(&self, messages: &[ChatMessage]) -> Result<String> {
        self.requests.lock().push(messages.to_vec());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.reply.clone().map_err(Error::Transport)
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<()> {
        let text = self.send(messages).await?;
        for word in text.split_inclusive(' ') {
            on_chunk(word);
        }
        Ok(())
    }

    fn is_configured(&self) -> bool {
        true
    }
}

/// Hands out one scripted chat client and real HTTP voice clients
pub struct ScriptedFactory {
    chat: Arc<ScriptedChat>,
    voice: HttpClientFactory,
    pub built: Arc<Mutex<usize>>,
}

impl ScriptedFactory {
    pub fn new(chat: ScriptedChat) -> Result<Self> {
        Ok(Self {
            chat: Arc::new(chat),
            voice: HttpClientFactory::new()?,
            built: Arc::default(),
        })
    }

    pub fn requests(&self) -> Arc<Mutex<Vec<Vec<ChatMessage>>>> {
        Arc::clone(&self.chat.requests)
    }
}

impl ClientFactory for ScriptedFactory {
    fn chat_client(&self, _descriptor: &ProviderDescriptor) -> Result<Arc<dyn ChatClient>> {
        *self.built.lock() += 1;
        Ok(Arc::clone(&self.chat) as Arc<dyn ChatClient>)
    }

    fn voice_client(&self, descriptor: &VoiceDescriptor) -> Result<Arc<dyn VoiceSynthesis>> {
        self.voice.voice_client(descriptor)
    }
}

/// Keeps every recorded turn
#[derive(Default)]
pub struct RecordingHistory {
    pub records: Arc<Mutex<Vec<TurnRecord>>>,
}

impl ConversationSink for RecordingHistory {
    fn record(&self, record: TurnRecord) {
        self.records.lock().push(record);
    }
}

/// Settings with a usable OpenAI key
pub fn configured_settings() -> Settings {
    let mut settings = Settings::default();
    settings.providers.openai.api_key = "sk-test".into();
    settings
}

/// A running session wired to scripted collaborators
pub struct Harness {
    pub control: mpsc::Sender<ControlCommand>,
    pub events: broadcast::Receiver<StateEvent>,
    pub sessions: mpsc::UnboundedReceiver<mpsc::Sender<TranscriptEvent>>,
    pub spoken: Arc<Mutex<Vec<String>>>,
    pub history: Arc<Mutex<Vec<TurnRecord>>>,
    pub shutdown: CancellationToken,
    pub task: JoinHandle<()>,
}

impl Harness {
    pub fn start(settings: Settings, factory: Arc<dyn ClientFactory>) -> Self {
        let (mic, sessions) = ScriptedMic::new();
        let (tts_tx, tts_rx) = mpsc::channel(32);
        let (state_tx, events) = broadcast::channel(64);
        let (control, control_rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();

        let gateway = Arc::new(AiGateway::new(
            factory,
            settings.active_descriptor(),
            settings.voice_descriptor(),
        ));
        let local = RecordingSynthesizer::new(tts_tx.clone());
        let spoken = Arc::clone(&local.spoken);
        let sink = Arc::new(SynthesisSink::new(
            Arc::new(local),
            Arc::clone(&gateway),
            Arc::new(AudioOutput::new(Arc::new(NullDevice))),
            tts_tx,
            settings.voice.sample_rate,
        ));

        let recorder = RecordingHistory::default();
        let history = Arc::clone(&recorder.records);

        let orchestrator = Orchestrator::new(
            Collaborators {
                transcripts: Box::new(mic),
                sink,
                gateway,
                settings: Arc::new(settings),
                history: Arc::new(recorder),
            },
            state_tx,
            tts_rx,
            shutdown.clone(),
        );
        let task = tokio::spawn(orchestrator.run(control_rx));

        Self {
            control,
            events,
            sessions,
            spoken,
            history,
            shutdown,
            task,
        }
    }

    /// Wait for the next recognition session the orchestrator opens
    pub async fn next_session(&mut self) -> mpsc::Sender<TranscriptEvent> {
        tokio::time::timeout(Duration::from_secs(30), self.sessions.recv())
            .await
            .expect("no recognition session opened")
            .expect("transcript source dropped")
    }

    /// Skip events until one matches, returning it
    pub async fn wait_for<F>(&mut self, mut matches: F) -> StateEvent
    where
        F: FnMut(&StateEvent) -> bool,
    {
        let wait = async {
            loop {
                match self.events.recv().await {
                    Ok(event) if matches(&event) => return event,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(30), wait)
            .await
            .expect("expected session event never arrived")
    }

    /// Speak into an open session: wake with `wake`, then ask `utterance`
    pub async fn wake_and_ask(&mut self, wake: &str, utterance: &str) {
        let armed = self.next_session().await;
        armed
            .send(TranscriptEvent::Partial { text: wake.into() })
            .await
            .expect("wake session closed");

        let capture = self.next_session().await;
        capture
            .send(TranscriptEvent::Final {
                text: utterance.into(),
                confidence: 0.9,
                alternatives: Vec::new(),
            })
            .await
            .expect("capture session closed");
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().clone()
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
    }
}
