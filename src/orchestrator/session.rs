//! The session event loop

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{Settings, SettingsSource};
use crate::error::{Error, Result};
use crate::events::StateEvent;
use crate::gateway::{
    AiGateway, ConversationTurn, ConversationWindow, ProviderKind, Reply, SynthesisRequest,
};
use crate::history::{ConversationSink, TurnRecord};
use crate::speech::{SynthesisSink, TtsEvent};
use crate::state::{SessionMachine, SessionState, Trigger};
use crate::transcript::{RecognitionFault, TranscriptEvent, TranscriptSource};
use crate::wake::{WakeAction, WakeWordDetector, RECOGNITION_RESTART_DELAY};

use super::{
    speech_deadline, Collaborators, ControlCommand, SessionEvent, Timer, ACKNOWLEDGMENT_PAUSE,
    CONFIGURATION_APOLOGY, CONTINUOUS_RESUME_DELAY, DISPATCH_APOLOGY, SESSION_CHANNEL_CAPACITY,
};

/// Single authority over session state and the exclusive devices
pub struct Orchestrator {
    machine: SessionMachine,
    state_tx: broadcast::Sender<StateEvent>,

    transcripts: Box<dyn TranscriptSource>,
    sink: Arc<SynthesisSink>,
    gateway: Arc<AiGateway>,
    settings: Arc<dyn SettingsSource>,
    history: Arc<dyn ConversationSink>,

    wake: WakeWordDetector,
    window: ConversationWindow,
    /// Settings sampled at the last relevant transition
    current: Settings,

    session_tx: mpsc::Sender<SessionEvent>,
    session_rx: Option<mpsc::Receiver<SessionEvent>>,
    tts_rx: Option<mpsc::Receiver<TtsEvent>>,

    shutdown: CancellationToken,
    /// Child of `shutdown`, replaced on every teardown
    scope: CancellationToken,

    mic_open: bool,
    mic_generation: u64,
    dispatch_seq: u64,
    timer_epoch: u64,
    pending_ack: Option<String>,
    current_utterance: Option<String>,
}

impl Orchestrator {
    pub fn new(
        collaborators: Collaborators,
        state_tx: broadcast::Sender<StateEvent>,
        tts_rx: mpsc::Receiver<TtsEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        let Collaborators {
            transcripts,
            sink,
            gateway,
            settings,
            history,
        } = collaborators;

        let current = settings.snapshot();
        let (session_tx, session_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);

        Self {
            machine: SessionMachine::new(state_tx.clone()),
            state_tx,
            transcripts,
            sink,
            gateway,
            settings,
            history,
            wake: WakeWordDetector::new(&current.assistant.wake_phrases),
            window: ConversationWindow::new(),
            current,
            session_tx,
            session_rx: Some(session_rx),
            tts_rx: Some(tts_rx),
            scope: shutdown.child_token(),
            shutdown,
            mic_open: false,
            mic_generation: 0,
            dispatch_seq: 0,
            timer_epoch: 0,
            pending_ack: None,
            current_utterance: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    /// Run until shutdown, then tear down and release the transcript source
    pub async fn run(mut self, mut control_rx: mpsc::Receiver<ControlCommand>) {
        let Some(mut session_rx) = self.session_rx.take() else {
            warn!("orchestrator already ran");
            return;
        };
        if let Some(tts_rx) = self.tts_rx.take() {
            self.forward_speech_events(tts_rx);
        }

        info!("session orchestrator started");
        let shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(command) = control_rx.recv() => self.handle_command(command),
                Some(event) = session_rx.recv() => self.handle_event(event),
                else => break,
            }
        }

        self.disable();
        self.transcripts.destroy();
        info!("session orchestrator stopped");
    }

    fn forward_speech_events(&self, mut tts_rx: mpsc::Receiver<TtsEvent>) {
        let tx = self.session_tx.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = tts_rx.recv() => match event {
                        Some(event) => {
                            if let Err(e) = tx.try_send(SessionEvent::Speech(event)) {
                                warn!(error = %e, "speech event dropped");
                            }
                        }
                        None => break,
                    },
                }
            }
        });
    }

    pub(crate) fn handle_command(&mut self, command: ControlCommand) {
        debug!(?command, state = %self.state(), "control command");
        match command {
            ControlCommand::Enable => self.enable(),
            ControlCommand::Disable => self.disable(),
            ControlCommand::SwitchProvider(kind) => {
                let descriptor = self.settings.snapshot().descriptor_for(kind);
                self.gateway.switch_provider(descriptor);
                self.emit(StateEvent::ProviderSwitched { provider: kind });
            }
        }
    }

    pub(crate) fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Transcript { generation, event } => {
                if generation != self.mic_generation || !self.mic_open {
                    trace!(generation, current = self.mic_generation, "stale transcript dropped");
                    return;
                }
                self.on_transcript(event);
            }
            SessionEvent::Speech(event) => self.on_speech(event),
            SessionEvent::DispatchFinished { seq, result } => {
                if seq != self.dispatch_seq || self.state() != SessionState::Dispatching {
                    info!(seq, current = self.dispatch_seq, state = %self.state(), "discarding stale dispatch result");
                    return;
                }
                self.on_dispatch_finished(result);
            }
            SessionEvent::TimerElapsed { epoch, timer } => {
                if epoch != self.timer_epoch {
                    trace!(?timer, "stale timer dropped");
                    return;
                }
                self.on_timer(timer);
            }
        }
    }

    fn enable(&mut self) {
        self.refresh_settings();
        if self.state() != SessionState::Idle {
            debug!(state = %self.state(), "session already enabled");
            return;
        }
        if self.fire(Trigger::Enable) {
            self.open_microphone();
        }
    }

    /// Tear everything down and go Idle. Safe to repeat.
    fn disable(&mut self) {
        self.teardown();
        self.dispatch_seq += 1;
        self.fire(Trigger::Disable);
    }

    fn teardown(&mut self) {
        self.close_microphone();
        self.sink.stop();
        self.wake.reset();
        self.scope.cancel();
        self.scope = self.shutdown.child_token();
        self.pending_ack = None;
        self.current_utterance = None;
        self.timer_epoch += 1;
    }

    fn fire(&mut self, trigger: Trigger) -> bool {
        let changed = self.machine.fire(trigger);
        if changed {
            self.timer_epoch += 1;
        }
        changed
    }

    fn emit(&self, event: StateEvent) {
        let _ = self.state_tx.send(event);
    }

    fn refresh_settings(&mut self) {
        let settings = self.settings.snapshot();

        let descriptor = settings.active_descriptor();
        if descriptor != self.current.active_descriptor() {
            let provider = descriptor.kind;
            self.gateway.switch_provider(descriptor);
            self.emit(StateEvent::ProviderSwitched { provider });
        }
        self.gateway.set_voice(settings.voice_descriptor());
        if settings.assistant.wake_phrases != self.current.assistant.wake_phrases {
            self.wake.set_phrases(&settings.assistant.wake_phrases);
        }

        self.current = settings;
    }

    fn open_microphone(&mut self) {
        self.close_microphone();
        let generation = self.mic_generation;

        let mut rx = match self.transcripts.start(&self.current.assistant.language) {
            Ok(rx) => rx,
            Err(e) => {
                warn!(error = %e, "failed to open recognition");
                self.on_recognition_error(e);
                return;
            }
        };
        self.mic_open = true;
        debug!(generation, state = %self.state(), "microphone opened");

        let tx = self.session_tx.clone();
        let scope = self.scope.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = scope.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => {
                            if let Err(e) = tx.try_send(SessionEvent::Transcript { generation, event }) {
                                warn!(error = %e, "transcript event dropped");
                            }
                        }
                        None => break,
                    },
                }
            }
        });
    }

    /// Stop recognition; events from the closed session are dropped from now on
    fn close_microphone(&mut self) {
        if self.mic_open {
            self.transcripts.stop();
            self.mic_open = false;
            debug!(generation = self.mic_generation, "microphone closed");
        }
        self.mic_generation += 1;
    }

    fn schedule(&mut self, timer: Timer, delay: Duration) {
        self.timer_epoch += 1;
        let epoch = self.timer_epoch;
        let tx = self.session_tx.clone();
        let scope = self.scope.clone();

        trace!(?timer, delay_ms = delay.as_millis() as u64, "timer scheduled");
        tokio::spawn(async move {
            tokio::select! {
                _ = scope.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(SessionEvent::TimerElapsed { epoch, timer }).await;
                }
            }
        });
    }

    fn on_transcript(&mut self, event: TranscriptEvent) {
        match self.state() {
            SessionState::WakeArmed => self.on_wake_transcript(event),
            SessionState::ActiveListening => self.on_capture_transcript(event),
            state => trace!(%state, "transcript ignored"),
        }
    }

    fn on_wake_transcript(&mut self, event: TranscriptEvent) {
        match self.wake.observe(&event, Instant::now()) {
            WakeAction::None => {}
            WakeAction::Wake { phrase } => {
                self.close_microphone();
                self.emit(StateEvent::WakeDetected { phrase });
                if self.fire(Trigger::WakeDetected) {
                    self.acknowledge();
                }
            }
            WakeAction::Rearm => self.open_microphone(),
            WakeAction::RestartAfter(delay) => {
                self.close_microphone();
                self.schedule(Timer::RestartRecognition, delay);
            }
            WakeAction::Fatal { reason } => self.fail(reason),
        }
    }

    /// Speak the acknowledgment on the local backend; capture opens after it
    fn acknowledge(&mut self) {
        let id = SynthesisSink::next_utterance_id();
        let request = SynthesisRequest::new(
            self.current.assistant.acknowledgment.clone(),
            self.current.assistant.language.clone(),
        );

        let speed = self.current.assistant.speech_rate;
        match self.sink.speak(&request, speed, &id) {
            Ok(()) => {
                self.pending_ack = Some(id);
                self.schedule(Timer::SpeechDeadline, speech_deadline(&request.text, speed));
            }
            Err(e) => {
                warn!(error = %e, "acknowledgment failed");
                self.schedule(Timer::StartCapture, ACKNOWLEDGMENT_PAUSE);
            }
        }
    }

    fn on_capture_transcript(&mut self, event: TranscriptEvent) {
        match event {
            TranscriptEvent::Partial { text } => {
                self.emit(StateEvent::Transcript {
                    text,
                    is_final: false,
                });
            }
            TranscriptEvent::Final { text, .. } => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    self.on_recognition_error(Error::Recognition("no speech recognized".into()));
                    return;
                }
                self.close_microphone();
                self.emit(StateEvent::Transcript {
                    text: text.clone(),
                    is_final: true,
                });
                if self.fire(Trigger::FinalTranscript) {
                    self.dispatch(text);
                }
            }
            TranscriptEvent::Error { reason } => {
                self.on_recognition_error(Error::Recognition(reason))
            }
            TranscriptEvent::Ready | TranscriptEvent::SpeechStarted | TranscriptEvent::SpeechEnded => {}
        }
    }

    fn on_recognition_error(&mut self, error: Error) {
        let reason = match error {
            Error::Recognition(reason) => reason,
            other => other.to_string(),
        };
        let fault = RecognitionFault::classify(&reason);
        if fault.is_fatal() {
            self.fail(reason);
            return;
        }

        warn!(%reason, ?fault, state = %self.state(), "recognition error, re-arming");
        self.close_microphone();
        self.fire(Trigger::RecognitionFailed { fatal: false });
        if self.state() == SessionState::WakeArmed {
            self.schedule(Timer::RestartRecognition, RECOGNITION_RESTART_DELAY);
        }
    }

    /// Terminal failure: report it and go Idle without restarting
    fn fail(&mut self, reason: String) {
        warn!(%reason, "recognition failed permanently, disabling session");
        self.teardown();
        self.emit(StateEvent::Fault { reason });
        self.fire(Trigger::RecognitionFailed { fatal: true });
    }

    fn dispatch(&mut self, text: String) {
        self.refresh_settings();

        let turn = ConversationTurn::user(text);
        let context = self.window.context_with(&turn);
        self.record(&turn, true, self.gateway.active_provider());
        self.window.push(turn);

        self.dispatch_seq += 1;
        let seq = self.dispatch_seq;
        let gateway = Arc::clone(&self.gateway);
        let tx = self.session_tx.clone();

        debug!(seq, turns = context.len(), "dispatch started");
        tokio::spawn(async move {
            let result = gateway.respond(&context).await;
            if tx.send(SessionEvent::DispatchFinished { seq, result }).await.is_err() {
                debug!(seq, "session closed before dispatch finished");
            }
        });
    }

    fn on_dispatch_finished(&mut self, result: Result<Reply>) {
        if !self.fire(Trigger::DispatchFinished) {
            return;
        }

        match result {
            Ok(reply) => {
                let turn = ConversationTurn::assistant(reply.text.clone());
                self.record(&turn, false, reply.provider);
                self.window.push(turn);
                self.emit(StateEvent::Reply {
                    provider: reply.provider,
                    text: reply.text.clone(),
                });

                if self.current.assistant.tts_enabled {
                    self.say(reply.text);
                } else {
                    debug!("speech disabled, reply not spoken");
                    self.finish_speaking();
                }
            }
            Err(e) => {
                warn!(error = %e, "dispatch failed");
                let apology = if e.is_configuration() {
                    CONFIGURATION_APOLOGY
                } else {
                    DISPATCH_APOLOGY
                };
                self.say(apology.to_string());
            }
        }
    }

    fn record(&self, turn: &ConversationTurn, is_from_user: bool, provider: ProviderKind) {
        self.history.record(TurnRecord {
            conversation_id: self.current.assistant.conversation_id.clone(),
            content: turn.content.clone(),
            is_from_user,
            timestamp: turn.timestamp,
            provider,
        });
    }

    /// Speak `text` remote-first; lifecycle events come back as `Speech`
    fn say(&mut self, text: String) {
        let id = SynthesisSink::next_utterance_id();
        self.current_utterance = Some(id.clone());

        let request = SynthesisRequest::new(text, self.current.assistant.language.clone());
        let speed = self.current.assistant.speech_rate;
        self.schedule(Timer::SpeechDeadline, speech_deadline(&request.text, speed));
        let sink = Arc::clone(&self.sink);
        let tx = self.session_tx.clone();
        let scope = self.scope.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = scope.cancelled() => {}
                spoken = sink.synthesize_and_play(&request, speed, &id) => {
                    if let Err(e) = spoken {
                        let reason = e.to_string();
                        let _ = tx.send(SessionEvent::Speech(TtsEvent::Error { id, reason })).await;
                    }
                }
            }
        });
    }

    fn on_speech(&mut self, event: TtsEvent) {
        let id = event.id();

        if self.pending_ack.as_deref() == Some(id) {
            match event {
                TtsEvent::Started { .. } => {}
                TtsEvent::Completed { .. } | TtsEvent::Error { .. } => {
                    self.pending_ack = None;
                    self.schedule(Timer::StartCapture, ACKNOWLEDGMENT_PAUSE);
                }
            }
            return;
        }

        if self.current_utterance.as_deref() != Some(id) || self.state() != SessionState::Speaking {
            trace!(id, "speech event for stale utterance dropped");
            return;
        }

        match event {
            TtsEvent::Started { .. } => debug!("speaking"),
            TtsEvent::Completed { .. } => {
                self.current_utterance = None;
                self.finish_speaking();
            }
            TtsEvent::Error { reason, .. } => {
                warn!(%reason, "speech failed");
                self.current_utterance = None;
                self.finish_speaking();
            }
        }
    }

    fn finish_speaking(&mut self) {
        let continuous = self.settings.snapshot().assistant.continuous_listening;
        if !continuous {
            self.teardown();
        }
        self.fire(Trigger::SpeechFinished { continuous });
        if continuous && self.state() == SessionState::WakeArmed {
            self.schedule(Timer::ResumeWakeDetection, CONTINUOUS_RESUME_DELAY);
        }
    }

    fn on_timer(&mut self, timer: Timer) {
        match (timer, self.state()) {
            (Timer::RestartRecognition | Timer::ResumeWakeDetection, SessionState::WakeArmed)
            | (Timer::StartCapture, SessionState::ActiveListening) => {
                if !self.mic_open {
                    self.open_microphone();
                }
            }
            (Timer::SpeechDeadline, SessionState::ActiveListening) if self.pending_ack.is_some() => {
                warn!("acknowledgment never completed, opening capture");
                self.abandon_speech();
                self.pending_ack = None;
                self.open_microphone();
            }
            (Timer::SpeechDeadline, SessionState::Speaking) if self.current_utterance.is_some() => {
                warn!("reply never completed, abandoning it");
                self.abandon_speech();
                self.current_utterance = None;
                self.finish_speaking();
            }
            (timer, state) => trace!(?timer, %state, "timer no longer applies"),
        }
    }

    /// Silence the speaker and drop any synthesis still in progress
    fn abandon_speech(&mut self) {
        self.sink.stop();
        self.scope.cancel();
        self.scope = self.shutdown.child_token();
    }
}
