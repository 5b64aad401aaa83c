//! Speech capture: a continuous recognition session over a platform recognizer.
//!
//! The recognizer itself sits behind [`RecognitionProvider`]. The session adds
//! what the coordinator relies on:
//!
//! - `start()` twice is logged and ignored, never an error.
//! - `stop()` is graceful: buffered results still arrive, then `SessionEnd`.
//! - `abort()` is authoritative: every event produced by the aborted run is
//!   dropped, even if the recognizer keeps talking.
//!
//! Every run gets a generation number and every event carries the generation
//! of the run that produced it, so late events from an old run can never leak
//! into a new turn.

use crate::error::{CaptureErrorKind, VoiceResult};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Something the recognizer reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// Live hypothesis; replaced by the next interim or final.
    Interim(String),
    /// Settled fragment of the utterance.
    Final(String),
    Error(CaptureErrorKind),
    /// The recognition run is over (after `stop()`, or on its own).
    SessionEnd,
}

type Tagged = (u64, CaptureEvent);

/// Where a provider delivers events for one recognition run.
#[derive(Debug, Clone)]
pub struct CaptureSink {
    generation: u64,
    tx: mpsc::UnboundedSender<Tagged>,
}

impl CaptureSink {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver an event. Returns `false` once the session is gone.
    pub fn emit(&self, event: CaptureEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }

    pub fn interim(&self, text: impl Into<String>) -> bool {
        self.emit(CaptureEvent::Interim(text.into()))
    }

    pub fn final_text(&self, text: impl Into<String>) -> bool {
        self.emit(CaptureEvent::Final(text.into()))
    }

    pub fn error(&self, kind: CaptureErrorKind) -> bool {
        self.emit(CaptureEvent::Error(kind))
    }

    pub fn end(&self) -> bool {
        self.emit(CaptureEvent::SessionEnd)
    }
}

/// Platform speech recognizer.
///
/// `start` begins a run that reports through `sink` until `stop` or `abort`.
/// Implementations do not need to filter anything after `abort`; the session
/// does that.
pub trait RecognitionProvider: Send {
    fn start(&mut self, sink: CaptureSink) -> VoiceResult<()>;
    fn stop(&mut self);
    fn abort(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    Idle,
    Running,
    /// `stop()` was requested; waiting for `SessionEnd`.
    Stopping,
}

pub struct SpeechCaptureSession {
    provider: Box<dyn RecognitionProvider>,
    tx: mpsc::UnboundedSender<Tagged>,
    rx: mpsc::UnboundedReceiver<Tagged>,
    generation: u64,
    status: CaptureStatus,
}

impl SpeechCaptureSession {
    pub fn new(provider: Box<dyn RecognitionProvider>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            provider,
            tx,
            rx,
            generation: 0,
            status: CaptureStatus::Idle,
        }
    }

    pub fn status(&self) -> CaptureStatus {
        self.status
    }

    /// True while the microphone is held: running or draining after `stop()`.
    pub fn is_active(&self) -> bool {
        self.status != CaptureStatus::Idle
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Begin continuous recognition.
    ///
    /// Already started is not an error: it is logged and ignored. A provider
    /// failure (device missing, permission denied) is returned and leaves
    /// the session idle.
    pub fn start(&mut self) -> VoiceResult<()> {
        if self.status != CaptureStatus::Idle {
            warn!(generation = self.generation, status = ?self.status, "capture already started");
            return Ok(());
        }
        self.generation += 1;
        let sink = CaptureSink {
            generation: self.generation,
            tx: self.tx.clone(),
        };
        self.provider.start(sink)?;
        self.status = CaptureStatus::Running;
        info!(generation = self.generation, "capture started");
        Ok(())
    }

    /// Ask the recognizer to finish; results already heard still arrive.
    pub fn stop(&mut self) {
        if self.status == CaptureStatus::Running {
            self.provider.stop();
            self.status = CaptureStatus::Stopping;
            debug!(generation = self.generation, "capture stopping");
        }
    }

    /// Hard stop. Nothing from the current run is admitted afterwards.
    pub fn abort(&mut self) {
        if self.status == CaptureStatus::Idle {
            return;
        }
        self.provider.abort();
        // Retire the run's generation so its in-flight events are stale.
        self.generation += 1;
        self.status = CaptureStatus::Idle;
        info!(generation = self.generation, "capture aborted");
    }

    fn admit(&mut self, generation: u64, event: &CaptureEvent) -> bool {
        if generation != self.generation || self.status == CaptureStatus::Idle {
            debug!(
                generation,
                current = self.generation,
                ?event,
                "dropping stale capture event"
            );
            return false;
        }
        if *event == CaptureEvent::SessionEnd {
            self.status = CaptureStatus::Idle;
            debug!(generation, "capture session ended");
        }
        true
    }

    /// Next event of the current run. Pending while idle.
    ///
    /// Cancel-safe: built on `mpsc::Receiver::recv`.
    pub async fn next_event(&mut self) -> CaptureEvent {
        loop {
            // Keeps its own sender, so the channel never closes.
            let Some((generation, event)) = self.rx.recv().await else {
                std::future::pending::<()>().await;
                continue;
            };
            if self.admit(generation, &event) {
                return event;
            }
        }
    }
}

impl Drop for SpeechCaptureSession {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Producer side of a [`ChannelRecognizer`].
///
/// Fragments pushed while the recognizer is not running are discarded, the
/// same way a closed microphone hears nothing.
#[derive(Clone, Default)]
pub struct RecognizerFeed {
    active: Arc<Mutex<Option<CaptureSink>>>,
}

impl RecognizerFeed {
    fn with_sink<F: FnOnce(&CaptureSink) -> bool>(&self, f: F) -> bool {
        match self.active.lock() {
            Ok(guard) => guard.as_ref().map(f).unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Whether a recognition run is currently listening.
    pub fn is_listening(&self) -> bool {
        self.active.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    pub fn push_interim(&self, text: &str) -> bool {
        self.with_sink(|s| s.interim(text))
    }

    pub fn push_final(&self, text: &str) -> bool {
        self.with_sink(|s| s.final_text(text))
    }

    pub fn push_error(&self, kind: CaptureErrorKind) -> bool {
        self.with_sink(|s| s.error(kind))
    }

    /// The recognizer ended the run on its own.
    pub fn end(&self) -> bool {
        let sink = match self.active.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        sink.map(|s| s.end()).unwrap_or(false)
    }

    fn set(&self, sink: Option<CaptureSink>) {
        if let Ok(mut guard) = self.active.lock() {
            *guard = sink;
        }
    }

    fn take(&self) -> Option<CaptureSink> {
        self.active.lock().ok().and_then(|mut g| g.take())
    }
}

/// Recognizer fed from outside: a browser bridge, a terminal, a test.
pub struct ChannelRecognizer {
    feed: RecognizerFeed,
}

impl ChannelRecognizer {
    pub fn new() -> (Self, RecognizerFeed) {
        let feed = RecognizerFeed::default();
        (Self { feed: feed.clone() }, feed)
    }
}

impl RecognitionProvider for ChannelRecognizer {
    fn start(&mut self, sink: CaptureSink) -> VoiceResult<()> {
        self.feed.set(Some(sink));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(sink) = self.feed.take() {
            sink.end();
        }
    }

    fn abort(&mut self) {
        self.feed.set(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VoiceError;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next(session: &mut SpeechCaptureSession) -> Option<CaptureEvent> {
        timeout(Duration::from_millis(50), session.next_event()).await.ok()
    }

    #[tokio::test]
    async fn fragments_flow_while_running() {
        let (recognizer, feed) = ChannelRecognizer::new();
        let mut session = SpeechCaptureSession::new(Box::new(recognizer));

        assert!(!feed.push_final("ignored"), "mic is closed before start");
        session.start().unwrap();
        assert!(session.is_active());

        feed.push_interim("hel");
        feed.push_final("hello");
        assert_eq!(next(&mut session).await, Some(CaptureEvent::Interim("hel".into())));
        assert_eq!(next(&mut session).await, Some(CaptureEvent::Final("hello".into())));
    }

    #[tokio::test]
    async fn second_start_is_ignored() {
        let (recognizer, _feed) = ChannelRecognizer::new();
        let mut session = SpeechCaptureSession::new(Box::new(recognizer));
        session.start().unwrap();
        let generation = session.generation();
        session.start().unwrap();
        assert_eq!(session.generation(), generation);
    }

    #[tokio::test]
    async fn stop_delivers_buffered_results_then_ends() {
        let (recognizer, feed) = ChannelRecognizer::new();
        let mut session = SpeechCaptureSession::new(Box::new(recognizer));
        session.start().unwrap();
        feed.push_final("last words");
        session.stop();
        assert_eq!(session.status(), CaptureStatus::Stopping);

        assert_eq!(next(&mut session).await, Some(CaptureEvent::Final("last words".into())));
        assert_eq!(next(&mut session).await, Some(CaptureEvent::SessionEnd));
        assert_eq!(session.status(), CaptureStatus::Idle);
        assert!(!feed.is_listening());
    }

    #[tokio::test]
    async fn abort_drops_everything_in_flight() {
        let (recognizer, feed) = ChannelRecognizer::new();
        let mut session = SpeechCaptureSession::new(Box::new(recognizer));
        session.start().unwrap();
        feed.push_final("too late");
        session.abort();
        session.abort();

        assert_eq!(next(&mut session).await, None);
        assert!(!feed.push_final("after abort"));
    }

    /// A recognizer that ignores abort and keeps emitting.
    struct Stubborn {
        sink: Arc<Mutex<Option<CaptureSink>>>,
    }

    impl RecognitionProvider for Stubborn {
        fn start(&mut self, sink: CaptureSink) -> VoiceResult<()> {
            *self.sink.lock().unwrap() = Some(sink);
            Ok(())
        }
        fn stop(&mut self) {}
        fn abort(&mut self) {}
    }

    #[tokio::test]
    async fn late_events_from_an_old_run_are_stale() {
        let sink = Arc::new(Mutex::new(None));
        let mut session = SpeechCaptureSession::new(Box::new(Stubborn { sink: sink.clone() }));
        session.start().unwrap();
        let old = sink.lock().unwrap().clone().unwrap();
        session.abort();
        session.start().unwrap();

        old.final_text("from the previous turn");
        let current = sink.lock().unwrap().clone().unwrap();
        current.final_text("fresh");
        assert_eq!(next(&mut session).await, Some(CaptureEvent::Final("fresh".into())));
    }

    struct Denied;

    impl RecognitionProvider for Denied {
        fn start(&mut self, _sink: CaptureSink) -> VoiceResult<()> {
            Err(VoiceError::Capture(CaptureErrorKind::NotAllowed))
        }
        fn stop(&mut self) {}
        fn abort(&mut self) {}
    }

    #[tokio::test]
    async fn provider_failure_leaves_session_idle() {
        let mut session = SpeechCaptureSession::new(Box::new(Denied));
        assert!(session.start().is_err());
        assert!(!session.is_active());
    }
}
