//! Voice synthesis and playback for the interviewer's lines.
//!
//! [`VoiceSynthesisPlayer::speak`] hands back a [`PlaybackCompletion`] that
//! resolves exactly once, when the line is done: played to the end, failed, or
//! stopped. Failures never escape as errors; the conversation carries on
//! without audio. Only one line plays at a time: speaking again stops and
//! releases whatever was playing before.

use crate::error::VoiceResult;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Backend that turns text into encoded audio (MP3/WAV).
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Return empty bytes to skip playback.
    async fn synthesize(&self, text: &str, voice: &str) -> VoiceResult<Vec<u8>>;
}

/// Output device for encoded audio.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play to the end. Returns early (with `Ok`) if [`AudioSink::stop`] is called.
    async fn play(&self, audio: Vec<u8>) -> VoiceResult<()>;
    /// Halt whatever is playing right now.
    fn stop(&self);
}

/// Synthesizer that produces no audio. Lines are still "spoken", silently.
#[derive(Debug, Default)]
pub struct PlaceholderTts;

#[async_trait]
impl SpeechSynthesizer for PlaceholderTts {
    async fn synthesize(&self, _text: &str, _voice: &str) -> VoiceResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// Discards audio and completes immediately.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    async fn play(&self, audio: Vec<u8>) -> VoiceResult<()> {
        debug!(bytes = audio.len(), "NullSink: discarding audio");
        Ok(())
    }

    fn stop(&self) {}
}

/// How a spoken line ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Finished,
    /// Synthesis or playback failed; treated as an immediate finish.
    Failed(String),
    Stopped,
}

/// Resolves when the line started by [`VoiceSynthesisPlayer::speak`] is over.
///
/// `Unpin`, so `&mut completion` can be polled from a `select!` loop.
#[derive(Debug)]
pub struct PlaybackCompletion {
    rx: oneshot::Receiver<PlaybackOutcome>,
}

impl Future for PlaybackCompletion {
    type Output = PlaybackOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the playback task was aborted.
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(PlaybackOutcome::Stopped))
    }
}

pub struct VoiceSynthesisPlayer {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Arc<dyn AudioSink>,
    voice: String,
    tail: Duration,
    current: Option<JoinHandle<()>>,
}

impl VoiceSynthesisPlayer {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Arc<dyn AudioSink>,
        voice: impl Into<String>,
    ) -> Self {
        Self {
            synthesizer,
            sink,
            voice: voice.into(),
            tail: Duration::ZERO,
            current: None,
        }
    }

    /// Keep the speaker for `tail` after the device reports the end of a line.
    pub fn with_tail(mut self, tail: Duration) -> Self {
        self.tail = tail;
        self
    }

    /// Synthesize `text` and play it. Any previous line is stopped first.
    ///
    /// Must be called inside a tokio runtime.
    pub fn speak(&mut self, text: &str) -> PlaybackCompletion {
        self.stop();

        let (tx, rx) = oneshot::channel();
        let synthesizer = Arc::clone(&self.synthesizer);
        let sink = Arc::clone(&self.sink);
        let voice = self.voice.clone();
        let tail = self.tail;
        let text = text.trim().to_string();

        self.current = Some(tokio::spawn(async move {
            let outcome = match play_line(synthesizer.as_ref(), sink.as_ref(), &text, &voice).await {
                Ok(true) => {
                    tokio::time::sleep(tail).await;
                    PlaybackOutcome::Finished
                }
                Ok(false) => PlaybackOutcome::Finished,
                Err(e) => {
                    warn!(error = %e, "speech playback failed, continuing without audio");
                    PlaybackOutcome::Failed(e.to_string())
                }
            };
            let _ = tx.send(outcome);
        }));

        PlaybackCompletion { rx }
    }

    /// Halt playback now. The pending completion resolves as `Stopped`.
    pub fn stop(&mut self) {
        if let Some(handle) = self.current.take() {
            if !handle.is_finished() {
                handle.abort();
                self.sink.stop();
                info!("playback stopped");
            }
        }
    }
}

impl Drop for VoiceSynthesisPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Returns whether any audio was actually played.
async fn play_line(
    synthesizer: &dyn SpeechSynthesizer,
    sink: &dyn AudioSink,
    text: &str,
    voice: &str,
) -> VoiceResult<bool> {
    if text.is_empty() {
        return Ok(false);
    }
    let audio = synthesizer.synthesize(text, voice).await?;
    if audio.is_empty() {
        debug!("synthesizer returned no audio");
        return Ok(false);
    }
    debug!(bytes = audio.len(), voice, "playing synthesized line");
    sink.play(audio).await?;
    Ok(true)
}
