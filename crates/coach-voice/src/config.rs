//! Session configuration loaded from defaults, an optional TOML file and the environment.
//!
//! | Key | Default | Description |
//! |-----|---------|-------------|
//! | silence_threshold_ms | 2000 | Quiet period after the last final fragment before the utterance is sent. |
//! | playback_tail_ms | 500 | Wait after the speaker drains before the microphone may reopen. |
//! | capture_restart_delay_ms | 1000 | Backoff before restarting recognition after it ended or failed. |
//! | max_capture_restarts | 3 | Consecutive hard recognizer failures tolerated before the session ends. |
//! | voice | nova | Voice id passed to the synthesis endpoint. |
//! | closing_message | finaliza | Sentinel user message asking the interviewer to wrap up. |
//! | min_user_turns_to_close | 2 | User turns required before a closing exchange is allowed. |
//! | request_timeout_secs | 60 | HTTP timeout for dialogue and synthesis calls. |
//!
//! Environment overrides use the `COACH_VOICE` prefix with `__` as separator,
//! e.g. `COACH_VOICE__SILENCE_THRESHOLD_MS=1500` or `COACH_VOICE__API__ACCESS_TOKEN=...`.

use crate::brief::InterviewBrief;
use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config/voice.toml";

fn default_silence_threshold_ms() -> u64 {
    2000
}

fn default_playback_tail_ms() -> u64 {
    500
}

fn default_capture_restart_delay_ms() -> u64 {
    1000
}

fn default_max_capture_restarts() -> u32 {
    3
}

fn default_voice() -> String {
    "nova".to_string()
}

fn default_closing_message() -> String {
    "finaliza".to_string()
}

fn default_min_user_turns_to_close() -> usize {
    2
}

fn default_request_timeout_secs() -> u64 {
    60
}

/// Which remote services back the dialogue and synthesis contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// The coaching product's own interview API.
    #[default]
    Coach,
    /// An OpenAI-compatible API called directly.
    Openai,
}

/// Coaching backend endpoints (`/api/interviews/{id}/...`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL without trailing slash (e.g. https://coach.example.com).
    #[serde(default)]
    pub base_url: String,
    /// Interview preparation the mock interview belongs to.
    #[serde(default)]
    pub interview_id: String,
    /// Bearer token of the signed-in user.
    #[serde(default)]
    pub access_token: Option<String>,
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_tts_model() -> String {
    "tts-1".to_string()
}

/// OpenAI-compatible endpoints used by the direct backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_tts_model")]
    pub tts_model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            api_key: None,
            chat_model: default_chat_model(),
            tts_model: default_tts_model(),
        }
    }
}

/// Tuning and wiring for one interview session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(default = "default_silence_threshold_ms")]
    pub silence_threshold_ms: u64,
    #[serde(default = "default_playback_tail_ms")]
    pub playback_tail_ms: u64,
    #[serde(default = "default_capture_restart_delay_ms")]
    pub capture_restart_delay_ms: u64,
    #[serde(default = "default_max_capture_restarts")]
    pub max_capture_restarts: u32,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_closing_message")]
    pub closing_message: String,
    #[serde(default = "default_min_user_turns_to_close")]
    pub min_user_turns_to_close: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub brief: InterviewBrief,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            silence_threshold_ms: default_silence_threshold_ms(),
            playback_tail_ms: default_playback_tail_ms(),
            capture_restart_delay_ms: default_capture_restart_delay_ms(),
            max_capture_restarts: default_max_capture_restarts(),
            voice: default_voice(),
            closing_message: default_closing_message(),
            min_user_turns_to_close: default_min_user_turns_to_close(),
            request_timeout_secs: default_request_timeout_secs(),
            backend: BackendKind::default(),
            api: ApiConfig::default(),
            openai: OpenAiConfig::default(),
            brief: InterviewBrief::default(),
        }
    }
}

impl VoiceConfig {
    /// Load config. Precedence: env `COACH_VOICE__*` > file (`COACH_VOICE_CONFIG` or `config/voice.toml`) > defaults.
    pub fn load() -> VoiceResult<Self> {
        let path = std::env::var("COACH_VOICE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Same as [`VoiceConfig::load`] with an explicit file path; a missing file is skipped.
    pub fn load_from(path: &Path) -> VoiceResult<Self> {
        let builder = config::Config::builder();
        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix("COACH_VOICE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: VoiceConfig = built.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> VoiceResult<()> {
        if self.silence_threshold_ms == 0 {
            return Err(VoiceError::Config("silence_threshold_ms must be greater than zero".to_string()));
        }
        if self.voice.trim().is_empty() {
            return Err(VoiceError::Config("voice must not be empty".to_string()));
        }
        if self.closing_message.trim().is_empty() {
            return Err(VoiceError::Config("closing_message must not be empty".to_string()));
        }
        if self.min_user_turns_to_close == 0 {
            return Err(VoiceError::Config("min_user_turns_to_close must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn silence_threshold(&self) -> Duration {
        Duration::from_millis(self.silence_threshold_ms)
    }

    pub fn playback_tail(&self) -> Duration {
        Duration::from_millis(self.playback_tail_ms)
    }

    pub fn capture_restart_delay(&self) -> Duration {
        Duration::from_millis(self.capture_restart_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let c = VoiceConfig::default();
        assert_eq!(c.silence_threshold(), Duration::from_millis(2000));
        assert_eq!(c.playback_tail(), Duration::from_millis(500));
        assert_eq!(c.capture_restart_delay(), Duration::from_secs(1));
        assert_eq!(c.voice, "nova");
        assert_eq!(c.closing_message, "finaliza");
        assert_eq!(c.min_user_turns_to_close, 2);
        assert_eq!(c.backend, BackendKind::Coach);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
silence_threshold_ms = 1500
voice = "shimmer"
backend = "openai"

[api]
base_url = "http://localhost:3001"
interview_id = "prep-42"

[brief]
candidate_name = "Ana"
company = "Acme"
"#
        )
        .unwrap();

        let c = VoiceConfig::load_from(file.path()).unwrap();
        assert_eq!(c.silence_threshold_ms, 1500);
        assert_eq!(c.voice, "shimmer");
        assert_eq!(c.backend, BackendKind::Openai);
        assert_eq!(c.api.interview_id, "prep-42");
        assert_eq!(c.brief.company.as_deref(), Some("Acme"));
        // untouched keys keep their defaults
        assert_eq!(c.playback_tail_ms, 500);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let c = VoiceConfig::load_from(Path::new("does/not/exist.toml")).unwrap();
        assert_eq!(c.silence_threshold_ms, 2000);
    }

    #[test]
    fn rejects_zero_threshold() {
        let c = VoiceConfig {
            silence_threshold_ms: 0,
            ..Default::default()
        };
        assert!(matches!(c.validate(), Err(VoiceError::Config(_))));
    }
}
