//! Console collaborators for running the daemon without audio hardware
//!
//! Typed lines stand in for recognized speech and utterances are printed
//! instead of spoken.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;
use crate::gateway::SynthesisRequest;
use crate::speech::{LocalSynthesizer, TtsEvent, VoiceLocale};
use crate::transcript::{TranscriptEvent, TranscriptSource, TRANSCRIPT_CHANNEL_CAPACITY};

/// Simulated speaking time per word at normal rate
const WORD_DURATION: Duration = Duration::from_millis(300);

type ActiveSender = Arc<Mutex<Option<mpsc::Sender<TranscriptEvent>>>>;

/// Reads one utterance per line.
///
/// Each line becomes `Partial` then `Final`. A line starting with `!` is
/// reported as a recognition error with the rest of the line as reason.
/// Lines typed while no session is open are discarded.
pub struct StdinTranscriptSource {
    active: ActiveSender,
    reader: Option<JoinHandle<()>>,
}

impl StdinTranscriptSource {
    pub fn spawn() -> Self {
        Self::spawn_with(tokio::io::stdin())
    }

    pub fn spawn_with<R>(input: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let active: ActiveSender = Arc::new(Mutex::new(None));
        let reader = tokio::spawn(read_lines(input, Arc::clone(&active)));
        Self {
            active,
            reader: Some(reader),
        }
    }
}

async fn read_lines<R>(input: R, active: ActiveSender)
where
    R: AsyncRead + Unpin + Send,
{
    let mut lines = BufReader::new(input).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "failed to read transcript input");
                break;
            }
        };

        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        let Some(tx) = active.lock().clone() else {
            debug!("no recognition session open, line discarded");
            continue;
        };

        let events = match text.strip_prefix('!') {
            Some(reason) => vec![TranscriptEvent::Error {
                reason: reason.trim().to_string(),
            }],
            None => vec![
                TranscriptEvent::SpeechStarted,
                TranscriptEvent::Partial { text: text.to_string() },
                TranscriptEvent::SpeechEnded,
                TranscriptEvent::Final {
                    text: text.to_string(),
                    confidence: 1.0,
                    alternatives: vec![text.to_string()],
                },
            ],
        };
        for event in events {
            if let Err(e) = tx.try_send(event) {
                warn!(error = %e, "transcript event dropped");
            }
        }
    }
    debug!("transcript input closed");
}

impl TranscriptSource for StdinTranscriptSource {
    fn start(&mut self, _language: &str) -> Result<mpsc::Receiver<TranscriptEvent>> {
        let (tx, rx) = mpsc::channel(TRANSCRIPT_CHANNEL_CAPACITY);
        let _ = tx.try_send(TranscriptEvent::Ready);
        *self.active.lock() = Some(tx);
        Ok(rx)
    }

    fn stop(&mut self) {
        self.active.lock().take();
    }

    fn destroy(&mut self) {
        self.stop();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Prints utterances and reports them finished after a rate-scaled pause
pub struct ConsoleSynthesizer {
    events: mpsc::Sender<TtsEvent>,
    current: Mutex<Option<CancellationToken>>,
}

impl ConsoleSynthesizer {
    pub fn new(events: mpsc::Sender<TtsEvent>) -> Self {
        Self {
            events,
            current: Mutex::new(None),
        }
    }
}

impl LocalSynthesizer for ConsoleSynthesizer {
    fn speak(&self, request: &SynthesisRequest, speed: f32, utterance_id: &str) -> Result<()> {
        let cancel = CancellationToken::new();
        if let Some(previous) = self.current.lock().replace(cancel.clone()) {
            previous.cancel();
        }

        let locale = VoiceLocale::from_tag(&request.language_tag);
        println!("[maya {}] {}", locale.tag(), request.text);

        let words = request.text.split_whitespace().count().max(1) as u32;
        let duration = (WORD_DURATION * words).div_f32(speed.max(0.1));
        let events = self.events.clone();
        let id = utterance_id.to_string();

        tokio::spawn(async move {
            let _ = events.try_send(TtsEvent::Started { id: id.clone() });
            tokio::select! {
                _ = cancel.cancelled() => debug!(id, "utterance interrupted"),
                _ = tokio::time::sleep(duration) => {
                    let _ = events.try_send(TtsEvent::Completed { id });
                }
            }
        });
        Ok(())
    }

    fn stop(&self) {
        if let Some(current) = self.current.lock().take() {
            current.cancel();
        }
    }
}
