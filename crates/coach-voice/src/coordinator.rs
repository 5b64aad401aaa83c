//! The turn-taking coordinator: one actor task per interview session.
//!
//! The actor owns the microphone (the [`SpeechCaptureSession`]), the speaker
//! (the [`VoiceSynthesisPlayer`]) and the conversation (the
//! [`ExchangeOrchestrator`]). Everything that can happen, such as a command
//! from the UI, a recognizer fragment, a dialogue reply, the end of playback
//! or the silence deadline, is collected in one `select!` and handled in
//! order, so no two handlers ever run at once.
//!
//! ```text
//!          start                 playback done               silence / send now
//!   Idle ────────▶ AgentSpeaking ──────────────▶ Listening ────────────────────▶ Processing
//!    ▲                │   ▲                        ▲                              │    │
//!    └─ opening fails ┘   └──────── reply ready ───┼──────────────────────────────┘    │
//!                                                  └──────── reply failed ─────────────┘
//!   closing line played / shutdown / device failure ──▶ Ended
//! ```
//!
//! The microphone is only open in `Listening` and the speaker is only used
//! in `AgentSpeaking`. Both are checked on every published snapshot.

use crate::capture::{CaptureEvent, RecognitionProvider, SpeechCaptureSession};
use crate::config::VoiceConfig;
use crate::conversation::Turn;
use crate::debounce::SilenceDebouncer;
use crate::error::{CaptureErrorKind, VoiceError, VoiceResult};
use crate::exchange::{DialogueClient, ExchangeFuture, ExchangeKind, ExchangeOrchestrator, ExchangeOutcome};
use crate::player::{AudioSink, PlaybackCompletion, PlaybackOutcome, SpeechSynthesizer, VoiceSynthesisPlayer};
use crate::utterance::UtteranceBuffer;
use serde::Serialize;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 256;

/// Which party holds the devices. Exactly one value at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    Idle,
    /// Fetching or playing an agent line; the speaker is ours, the mic is closed.
    AgentSpeaking,
    /// The mic is open and the debouncer is collecting the user's turn.
    Listening,
    /// A dialogue request is in flight; both devices are closed.
    Processing,
    Ended,
}

impl CoordinatorState {
    pub fn can_transition_to(self, next: CoordinatorState) -> bool {
        use CoordinatorState::*;
        matches!(
            (self, next),
            (Idle, AgentSpeaking)
                | (AgentSpeaking, Listening)
                | (AgentSpeaking, Processing)
                | (AgentSpeaking, Idle)
                | (Listening, Processing)
                | (Processing, AgentSpeaking)
                | (Processing, Listening)
                | (Idle | AgentSpeaking | Listening | Processing, Ended)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The closing line was played.
    Completed,
    /// Torn down on request without a closing exchange.
    Shutdown,
    /// The microphone kept failing.
    DeviceFailure,
}

/// What the UI renders. Published on every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinatorSnapshot {
    pub state: CoordinatorState,
    pub mic_active: bool,
    pub speaker_active: bool,
    pub request_in_flight: bool,
    /// The single user-visible error, if any.
    pub banner: Option<String>,
    pub turns: usize,
}

impl Default for CoordinatorSnapshot {
    fn default() -> Self {
        Self {
            state: CoordinatorState::Idle,
            mic_active: false,
            speaker_active: false,
            request_in_flight: false,
            banner: None,
            turns: 0,
        }
    }
}

/// Notifications for the UI, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: CoordinatorState,
        to: CoordinatorState,
    },
    /// Live transcript of the turn being spoken.
    Transcript { committed: String, interim: String },
    TurnAppended(Turn),
    Error(String),
    CloseRejected { user_turns: usize, required: usize },
    Ended(EndReason),
}

#[derive(Debug)]
enum Command {
    Start,
    SendNow,
    EndSession,
    Shutdown,
    Conversation(oneshot::Sender<Vec<Turn>>),
}

/// The external services one session talks to.
pub struct Collaborators {
    pub recognizer: Box<dyn RecognitionProvider>,
    pub dialogue: Arc<dyn DialogueClient>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub sink: Arc<dyn AudioSink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BannerSource {
    Capture,
    Exchange,
}

pub struct TurnCoordinator {
    session_id: Uuid,
    state: CoordinatorState,
    capture: SpeechCaptureSession,
    debouncer: SilenceDebouncer,
    buffer: UtteranceBuffer,
    player: VoiceSynthesisPlayer,
    exchange: ExchangeOrchestrator,
    request: Option<ExchangeFuture>,
    playback: Option<PlaybackCompletion>,
    /// What the current playback is saying.
    speaking: Option<ExchangeKind>,
    close_requested: bool,
    capture_failures: u32,
    /// Recognizer ends in a row with nothing heard in between.
    empty_ends: u32,
    max_capture_restarts: u32,
    restart_delay: Duration,
    restart_at: Option<Instant>,
    banner: Option<(BannerSource, String)>,
    events: broadcast::Sender<SessionEvent>,
    snapshot: watch::Sender<CoordinatorSnapshot>,
}

enum Event {
    Command(Command),
    HandleDropped,
    Capture(CaptureEvent),
    Reply(ExchangeOutcome),
    PlaybackDone(PlaybackOutcome),
    Silence,
    RestartCapture,
}

async fn next_reply(request: &mut Option<ExchangeFuture>) -> ExchangeOutcome {
    match request {
        Some(fut) => fut.as_mut().await,
        None => pending().await,
    }
}

async fn next_playback(playback: &mut Option<PlaybackCompletion>) -> PlaybackOutcome {
    match playback {
        Some(completion) => completion.await,
        None => pending().await,
    }
}

async fn restart_due(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}

impl TurnCoordinator {
    pub fn new(config: &VoiceConfig, parts: Collaborators) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (snapshot, _) = watch::channel(CoordinatorSnapshot::default());
        let player = VoiceSynthesisPlayer::new(parts.synthesizer, parts.sink, config.voice.clone())
            .with_tail(config.playback_tail());
        Self {
            session_id: Uuid::new_v4(),
            state: CoordinatorState::Idle,
            capture: SpeechCaptureSession::new(parts.recognizer),
            debouncer: SilenceDebouncer::new(config.silence_threshold()),
            buffer: UtteranceBuffer::new(),
            player,
            exchange: ExchangeOrchestrator::new(
                parts.dialogue,
                config.closing_message.clone(),
                config.min_user_turns_to_close,
            ),
            request: None,
            playback: None,
            speaking: None,
            close_requested: false,
            capture_failures: 0,
            empty_ends: 0,
            max_capture_restarts: config.max_capture_restarts,
            restart_delay: config.capture_restart_delay(),
            restart_at: None,
            banner: None,
            events,
            snapshot,
        }
    }

    /// Run the session on its own task.
    pub fn spawn(self) -> SessionHandle {
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let session_id = self.session_id;
        let snapshot = self.snapshot.subscribe();
        let events = self.events.clone();
        let span = info_span!("interview_session", id = %session_id);
        let task = tokio::spawn(self.run(rx).instrument(span));
        SessionHandle {
            session_id,
            commands,
            snapshot,
            events,
            task,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> Vec<Turn> {
        info!("interview session ready");
        self.publish();

        while self.state != CoordinatorState::Ended {
            let event = tokio::select! {
                biased;
                cmd = commands.recv() => match cmd {
                    Some(cmd) => Event::Command(cmd),
                    None => Event::HandleDropped,
                },
                ev = self.capture.next_event() => Event::Capture(ev),
                outcome = next_reply(&mut self.request) => Event::Reply(outcome),
                outcome = next_playback(&mut self.playback) => Event::PlaybackDone(outcome),
                _ = self.debouncer.elapsed() => Event::Silence,
                _ = restart_due(self.restart_at) => Event::RestartCapture,
            };

            match event {
                Event::Command(cmd) => self.on_command(cmd),
                Event::HandleDropped => {
                    debug!("all session handles dropped");
                    self.finish(EndReason::Shutdown);
                }
                Event::Capture(ev) => self.on_capture(ev),
                Event::Reply(outcome) => {
                    self.request = None;
                    self.on_reply(outcome);
                }
                Event::PlaybackDone(outcome) => {
                    self.playback = None;
                    self.on_playback_done(outcome);
                }
                Event::Silence => self.on_silence(),
                Event::RestartCapture => {
                    self.restart_at = None;
                    if self.state == CoordinatorState::Listening {
                        self.start_capture();
                    }
                }
            }
            self.publish();
        }

        info!(turns = self.exchange.log().len(), "interview session finished");
        self.exchange.log().turns().to_vec()
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start => self.start(),
            Command::SendNow => {
                if self.state != CoordinatorState::Listening {
                    debug!(state = ?self.state, "send-now ignored outside Listening");
                    return;
                }
                self.send_utterance(true);
            }
            Command::EndSession => self.end_session(),
            Command::Shutdown => self.finish(EndReason::Shutdown),
            Command::Conversation(reply) => {
                let _ = reply.send(self.exchange.log().turns().to_vec());
            }
        }
    }

    fn start(&mut self) {
        if self.state != CoordinatorState::Idle {
            debug!(state = ?self.state, "start ignored: session already running");
            return;
        }
        match self.exchange.begin_opening() {
            Ok(pending) => {
                self.request = Some(pending.dispatch());
                self.transition(CoordinatorState::AgentSpeaking);
            }
            Err(e) => self.surface(BannerSource::Exchange, &e),
        }
    }

    fn end_session(&mut self) {
        if self.close_requested || self.state == CoordinatorState::Ended {
            debug!("end-session ignored: already closing");
            return;
        }
        if !self.exchange.can_close() {
            let user_turns = self.exchange.user_turns();
            let required = self.exchange.min_user_turns_to_close();
            info!(user_turns, required, "close rejected: conversation too short");
            self.emit(SessionEvent::CloseRejected { user_turns, required });
            return;
        }
        self.close_requested = true;
        match self.state {
            CoordinatorState::Listening => {
                self.debouncer.cancel();
                self.capture.abort();
                self.buffer.clear();
                self.emit_transcript();
                self.begin_close();
            }
            // The in-flight reply or the current line finishes first.
            CoordinatorState::Processing | CoordinatorState::AgentSpeaking => {
                info!(state = ?self.state, "close requested, deferring until current step finishes");
            }
            CoordinatorState::Idle | CoordinatorState::Ended => {}
        }
    }

    fn begin_close(&mut self) {
        match self.exchange.begin_close() {
            Ok(pending) => {
                self.request = Some(pending.dispatch());
                if self.state != CoordinatorState::Processing {
                    self.transition(CoordinatorState::Processing);
                }
            }
            Err(e) => {
                self.surface(BannerSource::Exchange, &e);
                self.finish(EndReason::Completed);
            }
        }
    }

    fn on_silence(&mut self) {
        if !self.debouncer.fire() {
            return;
        }
        if self.state != CoordinatorState::Listening {
            debug!(state = ?self.state, "stale utterance-complete dropped");
            return;
        }
        self.send_utterance(false);
    }

    /// Drain the buffer and submit it, in the same step as entering Processing.
    fn send_utterance(&mut self, include_interim: bool) {
        self.debouncer.cancel();
        let text = if include_interim {
            self.buffer.display()
        } else {
            self.buffer.committed()
        };
        if text.trim().is_empty() {
            debug!("nothing to send");
            return;
        }
        if self.exchange.has_pending() {
            debug!("utterance dropped: a request is already in flight");
            return;
        }

        self.capture.abort();
        let text = self.buffer.drain(include_interim);
        self.emit_transcript();
        match self.exchange.begin_submit(&text) {
            Ok(pending) => {
                info!(chars = text.len(), forced = include_interim, "utterance complete, sending");
                self.request = Some(pending.dispatch());
                self.transition(CoordinatorState::Processing);
            }
            Err(e) => {
                self.surface(BannerSource::Exchange, &e);
                self.start_capture();
            }
        }
    }

    fn on_reply(&mut self, outcome: ExchangeOutcome) {
        let kind = outcome.kind;
        let before = self.exchange.log().len();
        let result = self.exchange.complete(outcome);
        if let Err(VoiceError::StaleToken(token)) = result {
            debug!(token, "stale dialogue reply dropped");
            return;
        }
        for turn in self.exchange.log().turns()[before..].to_vec() {
            self.emit(SessionEvent::TurnAppended(turn));
        }

        match (kind, result) {
            (ExchangeKind::Closing, Ok(reply)) => self.speak(ExchangeKind::Closing, &reply),
            (ExchangeKind::Closing, Err(e)) => {
                self.surface(BannerSource::Exchange, &e);
                self.finish(EndReason::Completed);
            }
            (_, _) if self.close_requested => {
                // The reply is logged but not spoken; the wrap-up comes next.
                self.begin_close();
            }
            (_, Ok(reply)) => {
                if matches!(self.banner, Some((BannerSource::Exchange, _))) {
                    self.banner = None;
                }
                self.speak(kind, &reply);
            }
            (ExchangeKind::Opening, Err(e)) => {
                self.surface(BannerSource::Exchange, &e);
                self.transition(CoordinatorState::Idle);
            }
            (ExchangeKind::Reply, Err(e)) => {
                self.surface(BannerSource::Exchange, &e);
                self.enter_listening();
            }
        }
    }

    fn speak(&mut self, kind: ExchangeKind, text: &str) {
        if self.state != CoordinatorState::AgentSpeaking {
            self.transition(CoordinatorState::AgentSpeaking);
        }
        self.speaking = Some(kind);
        self.playback = Some(self.player.speak(text));
    }

    fn on_playback_done(&mut self, outcome: PlaybackOutcome) {
        let spoke = self.speaking.take();
        debug!(?outcome, ?spoke, "agent line finished");
        if spoke == Some(ExchangeKind::Closing) {
            self.finish(EndReason::Completed);
        } else if self.close_requested {
            self.transition(CoordinatorState::Processing);
            self.begin_close();
        } else {
            self.enter_listening();
        }
    }

    fn enter_listening(&mut self) {
        self.transition(CoordinatorState::Listening);
        self.start_capture();
    }

    fn start_capture(&mut self) {
        debug_assert!(self.playback.is_none(), "microphone opened while the speaker is busy");
        match self.capture.start() {
            Ok(()) => {
                if matches!(self.banner, Some((BannerSource::Capture, _))) {
                    self.banner = None;
                }
            }
            Err(VoiceError::Capture(kind)) => self.capture_failed(kind),
            Err(e) => self.capture_failed(CaptureErrorKind::Other(e.to_string())),
        }
    }

    fn on_capture(&mut self, event: CaptureEvent) {
        if self.state != CoordinatorState::Listening {
            debug!(state = ?self.state, ?event, "capture event outside Listening dropped");
            return;
        }
        match event {
            CaptureEvent::Interim(text) => {
                if !text.trim().is_empty() {
                    self.empty_ends = 0;
                }
                self.buffer.set_interim(&text);
                self.emit_transcript();
            }
            CaptureEvent::Final(text) => {
                if text.trim().is_empty() {
                    return;
                }
                self.capture_failures = 0;
                self.empty_ends = 0;
                self.buffer.push_final(&text);
                self.debouncer.fragment_appended();
                self.emit_transcript();
            }
            CaptureEvent::Error(kind) if kind.is_soft() => {
                debug!(%kind, "soft capture error");
            }
            CaptureEvent::Error(kind) => {
                self.capture.abort();
                self.capture_failed(kind);
            }
            CaptureEvent::SessionEnd => {
                if self.restart_at.is_none() {
                    self.recognizer_ended();
                }
            }
        }
    }

    /// The recognizer stopped by itself. Restart after the usual delay, and
    /// give up when it keeps ending without hearing anything.
    fn recognizer_ended(&mut self) {
        self.empty_ends += 1;
        if self.empty_ends > self.max_capture_restarts {
            error!(ends = self.empty_ends, "recognizer keeps ending without input, ending session");
            let err = VoiceError::Capture(CaptureErrorKind::Other("speech recognition keeps stopping".to_string()));
            self.surface(BannerSource::Capture, &err);
            self.finish(EndReason::DeviceFailure);
            return;
        }
        debug!(
            ends = self.empty_ends,
            delay_ms = self.restart_delay.as_millis() as u64,
            "recognizer ended on its own, restarting"
        );
        self.restart_at = Some(Instant::now() + self.restart_delay);
    }

    fn capture_failed(&mut self, kind: CaptureErrorKind) {
        self.capture_failures += 1;
        let err = VoiceError::Capture(kind);
        self.surface(BannerSource::Capture, &err);
        if self.capture_failures > self.max_capture_restarts {
            error!(failures = self.capture_failures, "microphone keeps failing, ending session");
            self.finish(EndReason::DeviceFailure);
            return;
        }
        warn!(
            attempt = self.capture_failures,
            max = self.max_capture_restarts,
            delay_ms = self.restart_delay.as_millis() as u64,
            "restarting capture"
        );
        self.restart_at = Some(Instant::now() + self.restart_delay);
    }

    /// Release both devices, drop any in-flight request and stop for good.
    fn finish(&mut self, reason: EndReason) {
        if self.state == CoordinatorState::Ended {
            return;
        }
        self.player.stop();
        self.playback = None;
        self.speaking = None;
        self.capture.abort();
        self.debouncer.cancel();
        self.buffer.clear();
        self.request = None;
        self.exchange.cancel_pending();
        self.restart_at = None;
        self.transition(CoordinatorState::Ended);
        info!(?reason, "session ended");
        self.emit(SessionEvent::Ended(reason));
    }

    fn transition(&mut self, to: CoordinatorState) {
        let from = self.state;
        if !from.can_transition_to(to) {
            error!(?from, ?to, "illegal state transition");
            debug_assert!(false, "illegal state transition {:?} -> {:?}", from, to);
            return;
        }
        self.state = to;
        info!(?from, ?to, "state transition");
        self.emit(SessionEvent::StateChanged { from, to });
    }

    fn surface(&mut self, source: BannerSource, err: &VoiceError) {
        warn!(error = %err, "surfacing error");
        let message = err.to_string();
        self.banner = Some((source, message.clone()));
        self.emit(SessionEvent::Error(message));
    }

    fn emit_transcript(&self) {
        self.emit(SessionEvent::Transcript {
            committed: self.buffer.committed(),
            interim: self.buffer.interim().to_string(),
        });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        let next = CoordinatorSnapshot {
            state: self.state,
            mic_active: self.capture.is_active(),
            speaker_active: self.playback.is_some(),
            request_in_flight: self.exchange.has_pending(),
            banner: self.banner.as_ref().map(|(_, m)| m.clone()),
            turns: self.exchange.log().len(),
        };
        debug_assert!(!(next.mic_active && next.speaker_active), "mic and speaker both active");
        debug_assert!(!next.mic_active || next.state == CoordinatorState::Listening);
        debug_assert!(!next.speaker_active || next.state == CoordinatorState::AgentSpeaking);
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

/// Control surface of a running session.
pub struct SessionHandle {
    session_id: Uuid,
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<CoordinatorSnapshot>,
    events: broadcast::Sender<SessionEvent>,
    task: JoinHandle<Vec<Turn>>,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    async fn send(&self, cmd: Command) -> VoiceResult<()> {
        self.commands.send(cmd).await.map_err(|_| VoiceError::SessionClosed)
    }

    /// Fetch and play the opening line.
    pub async fn start(&self) -> VoiceResult<()> {
        self.send(Command::Start).await
    }

    /// Send what has been heard so far without waiting for silence.
    pub async fn send_now(&self) -> VoiceResult<()> {
        self.send(Command::SendNow).await
    }

    /// Ask the interviewer to wrap up. Rejected (see [`SessionEvent::CloseRejected`])
    /// while the conversation is too short.
    pub async fn end_session(&self) -> VoiceResult<()> {
        self.send(Command::EndSession).await
    }

    /// Release the devices and stop without a closing exchange.
    pub async fn shutdown(&self) -> VoiceResult<()> {
        self.send(Command::Shutdown).await
    }

    /// Copy of the conversation so far.
    pub async fn conversation(&self) -> VoiceResult<Vec<Turn>> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Conversation(tx)).await?;
        rx.await.map_err(|_| VoiceError::SessionClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<CoordinatorSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until the published snapshot satisfies `predicate`.
    pub async fn wait_for<F>(&self, mut predicate: F) -> VoiceResult<CoordinatorSnapshot>
    where
        F: FnMut(&CoordinatorSnapshot) -> bool,
    {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| VoiceError::SessionClosed)?;
        Ok(snapshot.clone())
    }

    pub async fn wait_for_state(&self, state: CoordinatorState) -> VoiceResult<CoordinatorSnapshot> {
        self.wait_for(|s| s.state == state).await
    }

    /// Wait for the session to end and take its conversation.
    ///
    /// This does not stop the session: a closing exchange already requested
    /// runs to the end. A session nobody ends keeps `join` waiting, so call
    /// [`SessionHandle::shutdown`] or [`SessionHandle::end_session`] first.
    pub async fn join(self) -> VoiceResult<Vec<Turn>> {
        self.task.await.map_err(|_| VoiceError::SessionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CoordinatorState::*;

    #[test]
    fn transition_table() {
        assert!(Idle.can_transition_to(AgentSpeaking));
        assert!(AgentSpeaking.can_transition_to(Listening));
        assert!(Listening.can_transition_to(Processing));
        assert!(Processing.can_transition_to(AgentSpeaking));
        assert!(Processing.can_transition_to(Listening));

        assert!(!Idle.can_transition_to(Listening));
        assert!(!Listening.can_transition_to(AgentSpeaking));
        assert!(!Processing.can_transition_to(Idle));
        for state in [Idle, AgentSpeaking, Listening, Processing, Ended] {
            assert!(!Ended.can_transition_to(state));
        }
        for state in [Idle, AgentSpeaking, Listening, Processing] {
            assert!(state.can_transition_to(Ended));
        }
    }

    #[test]
    fn snapshot_serializes_for_the_ui() {
        let json = serde_json::to_value(CoordinatorSnapshot::default()).unwrap();
        assert_eq!(json["state"], "idle");
        assert_eq!(json["mic_active"], false);
        assert!(json["banner"].is_null());
    }
}
