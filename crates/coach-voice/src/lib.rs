//! # Coach Voice - turn-taking for voice mock interviews
//!
//! A candidate talks to a synthesized interviewer. This crate makes sure the
//! two never talk over each other: the microphone and the speaker are never
//! open at the same time, every utterance is sent exactly once, and a slow or
//! failing network never scrambles the order of the conversation.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Turn Coordinator (actor)                  │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────┐  │
//! │  │ Speech       │→ │ Silence      │→ │ Exchange             │  │
//! │  │ Capture      │  │ Debouncer    │  │ Orchestrator         │  │
//! │  │ (recognizer) │  │ (2000ms)     │  │ (one request, log)   │  │
//! │  └──────────────┘  └──────────────┘  └──────────────────────┘  │
//! │         ▲                                       ↓              │
//! │         │   playback done           ┌──────────────────────┐   │
//! │         └───────────────────────────│ Voice Synthesis      │   │
//! │                                     │ Player (tts → sink)  │   │
//! │                                     └──────────────────────┘   │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Build a [`TurnCoordinator`] from a [`VoiceConfig`] and the session's
//! [`Collaborators`], then [`TurnCoordinator::spawn`] it and drive it through
//! the returned [`SessionHandle`].

pub mod api;
pub mod brief;
pub mod capture;
pub mod config;
pub mod conversation;
pub mod coordinator;
pub mod debounce;
pub mod error;
pub mod exchange;
pub mod openai;
pub mod player;
#[cfg(feature = "speaker")]
pub mod speaker;
pub mod utterance;

pub use api::CoachApiClient;
pub use brief::{InterviewBrief, ParStory};
pub use capture::{
    CaptureEvent, CaptureSink, CaptureStatus, ChannelRecognizer, RecognitionProvider, RecognizerFeed,
    SpeechCaptureSession,
};
pub use config::{ApiConfig, BackendKind, OpenAiConfig, VoiceConfig};
pub use conversation::{ConversationLog, Role, Turn};
pub use coordinator::{
    Collaborators, CoordinatorSnapshot, CoordinatorState, EndReason, SessionEvent, SessionHandle,
    TurnCoordinator,
};
pub use debounce::SilenceDebouncer;
pub use error::{CaptureErrorKind, VoiceError, VoiceResult};
pub use exchange::{
    DialogueClient, DialogueRequest, ExchangeKind, ExchangeOrchestrator, PendingRequestToken,
};
pub use openai::{OpenAiDialogue, OpenAiTts};
pub use player::{
    AudioSink, NullSink, PlaceholderTts, PlaybackCompletion, PlaybackOutcome, SpeechSynthesizer,
    VoiceSynthesisPlayer,
};
#[cfg(feature = "speaker")]
pub use speaker::RodioSink;
pub use utterance::UtteranceBuffer;
