//! Error types for the interview voice system

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur while running a voice interview session
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Speech capture error: {0}")]
    Capture(CaptureErrorKind),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("Endpoint returned {status}: {body}")]
    Endpoint { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("A dialogue request is already in flight")]
    RequestInFlight,

    #[error("Stale request token {0}")]
    StaleToken(u64),

    #[error("Turn order violated: {0}")]
    TurnOrder(String),

    #[error("Closing needs at least {required} user turns, have {have}")]
    CloseNotAllowed { have: usize, required: usize },

    #[error("Dialogue endpoint returned an empty reply")]
    EmptyReply,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session is no longer running")]
    SessionClosed,
}

impl VoiceError {
    /// Network-class failures: surfaced to the user, conversation left untouched.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            VoiceError::Endpoint { .. } | VoiceError::Transport(_) | VoiceError::EmptyReply
        )
    }
}

impl From<reqwest::Error> for VoiceError {
    fn from(err: reqwest::Error) -> Self {
        VoiceError::Transport(err.to_string())
    }
}

impl From<config::ConfigError> for VoiceError {
    fn from(err: config::ConfigError) -> Self {
        VoiceError::Config(err.to_string())
    }
}

/// Recognizer error codes, as reported by the platform speech recognizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureErrorKind {
    /// Recognition ran but heard nothing.
    NoSpeech,
    /// Recognition was aborted on purpose.
    Aborted,
    /// Microphone missing or unusable.
    AudioCapture,
    /// User denied microphone permission.
    NotAllowed,
    /// Platform refused the recognition service.
    ServiceNotAllowed,
    /// Recognizer backend unreachable.
    Network,
    LanguageNotSupported,
    Other(String),
}

impl CaptureErrorKind {
    /// Map a recognizer error code (`no-speech`, `not-allowed`, ...) to a kind.
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "no-speech" => CaptureErrorKind::NoSpeech,
            "aborted" => CaptureErrorKind::Aborted,
            "audio-capture" => CaptureErrorKind::AudioCapture,
            "not-allowed" => CaptureErrorKind::NotAllowed,
            "service-not-allowed" => CaptureErrorKind::ServiceNotAllowed,
            "network" => CaptureErrorKind::Network,
            "language-not-supported" => CaptureErrorKind::LanguageNotSupported,
            other => CaptureErrorKind::Other(other.to_string()),
        }
    }

    /// Soft errors are expected and never shown to the user.
    pub fn is_soft(&self) -> bool {
        matches!(self, CaptureErrorKind::NoSpeech | CaptureErrorKind::Aborted)
    }
}

impl std::fmt::Display for CaptureErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureErrorKind::NoSpeech => write!(f, "no speech detected"),
            CaptureErrorKind::Aborted => write!(f, "aborted"),
            CaptureErrorKind::AudioCapture => write!(f, "microphone unavailable"),
            CaptureErrorKind::NotAllowed => write!(f, "microphone permission denied"),
            CaptureErrorKind::ServiceNotAllowed => write!(f, "speech service not allowed"),
            CaptureErrorKind::Network => write!(f, "recognizer network failure"),
            CaptureErrorKind::LanguageNotSupported => write!(f, "language not supported"),
            CaptureErrorKind::Other(code) => write!(f, "{}", code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizer_codes_split_soft_and_hard() {
        assert!(CaptureErrorKind::from_code("no-speech").is_soft());
        assert!(CaptureErrorKind::from_code("aborted").is_soft());
        assert!(!CaptureErrorKind::from_code("not-allowed").is_soft());
        assert!(!CaptureErrorKind::from_code("audio-capture").is_soft());
        assert_eq!(
            CaptureErrorKind::from_code("bad-grammar"),
            CaptureErrorKind::Other("bad-grammar".to_string())
        );
    }

    #[test]
    fn network_class() {
        assert!(VoiceError::Endpoint { status: 502, body: String::new() }.is_network());
        assert!(VoiceError::EmptyReply.is_network());
        assert!(!VoiceError::RequestInFlight.is_network());
    }
}
