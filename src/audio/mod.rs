//! Audio output
//!
//! [`AudioOutput`] owns the output device for the duration of one playback.
//! Starting a playback stops the previous one before anything is rendered.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Sample rate of remote synthesis output
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// A physical (or emulated) output device for mono PCM16
#[async_trait]
pub trait PlaybackDevice: Send + Sync {
    /// Render the whole buffer, returning when it has been played
    async fn render(&self, samples: &[i16], sample_rate: u32) -> Result<()>;
}

/// How a playback ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Playback {
    Finished,
    Stopped,
}

struct Current {
    id: u64,
    cancel: CancellationToken,
}

/// Exclusive owner of the output device
pub struct AudioOutput {
    device: Arc<dyn PlaybackDevice>,
    current: Mutex<Option<Current>>,
    next_id: AtomicU64,
}

impl AudioOutput {
    pub fn new(device: Arc<dyn PlaybackDevice>) -> Self {
        Self {
            device,
            current: Mutex::new(None),
            next_id: AtomicU64::new(0),
        }
    }

    /// Play little-endian PCM16 mono bytes, stopping any current playback
    pub async fn play(&self, audio: &[u8], sample_rate: u32) -> Result<Playback> {
        let samples = decode_pcm16(audio)?;

        let cancel = CancellationToken::new();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(previous) = self.current.lock().replace(Current {
            id,
            cancel: cancel.clone(),
        }) {
            debug!(previous = previous.id, "stopping previous playback");
            previous.cancel.cancel();
        }

        debug!(id, samples = samples.len(), sample_rate, "playback started");
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(Playback::Stopped),
            rendered = self.device.render(&samples, sample_rate) => rendered.map(|_| Playback::Finished),
        };

        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|c| c.id == id) {
            *current = None;
        }
        drop(current);

        debug!(id, ?outcome, "playback ended");
        outcome
    }

    /// Stop the current playback, if any
    pub fn stop(&self) {
        if let Some(current) = self.current.lock().take() {
            debug!(id = current.id, "playback stopped");
            current.cancel.cancel();
        }
    }
}

fn decode_pcm16(audio: &[u8]) -> Result<Vec<i16>> {
    if audio.len() < 2 {
        return Err(Error::Audio("audio buffer holds no samples".into()));
    }
    Ok(audio
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Device that writes each playback to a WAV file
pub struct WavFileDevice {
    path: PathBuf,
}

impl WavFileDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PlaybackDevice for WavFileDevice {
    async fn render(&self, samples: &[i16], sample_rate: u32) -> Result<()> {
        let path = self.path.clone();
        let samples = samples.to_vec();
        let count = samples.len();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let spec = hound::WavSpec {
                channels: 1,
                sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let mut writer = hound::WavWriter::create(&path, spec)
                .map_err(|e| Error::Audio(format!("failed to open {}: {e}", path.display())))?;
            for sample in samples {
                writer
                    .write_sample(sample)
                    .map_err(|e| Error::Audio(format!("failed to write sample: {e}")))?;
            }
            writer
                .finalize()
                .map_err(|e| Error::Audio(format!("failed to finalize wav: {e}")))
        })
        .await
        .map_err(|e| Error::Audio(format!("playback task failed: {e}")))??;

        info!(path = %self.path.display(), samples = count, "playback written");
        Ok(())
    }
}
