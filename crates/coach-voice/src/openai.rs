//! Direct OpenAI-compatible backend: chat completions for the interviewer,
//! `/audio/speech` for its voice. Works against OpenAI, OpenRouter or any
//! server that speaks the same API.

use crate::api::check_status;
use crate::brief::InterviewBrief;
use crate::config::OpenAiConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::exchange::{DialogueClient, DialogueRequest};
use crate::player::SpeechSynthesizer;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 800;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

fn build_client(config: &OpenAiConfig, timeout: Duration) -> VoiceResult<(String, String, reqwest::Client)> {
    let api_key = config
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| VoiceError::Config("openai.api_key is required for the openai backend".to_string()))?
        .to_string();
    let base_url = config.base_url.trim().trim_end_matches('/').to_string();
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    Ok((base_url, api_key, client))
}

/// Interviewer persona on a chat-completions model.
#[derive(Debug, Clone)]
pub struct OpenAiDialogue {
    base_url: String,
    api_key: String,
    model: String,
    system_prompt: String,
    client: reqwest::Client,
}

impl OpenAiDialogue {
    /// `closing_message` is the sentinel the persona treats as "wrap up now".
    pub fn new(
        config: &OpenAiConfig,
        brief: &InterviewBrief,
        closing_message: &str,
        timeout: Duration,
    ) -> VoiceResult<Self> {
        let (base_url, api_key, client) = build_client(config, timeout)?;
        Ok(Self {
            base_url,
            api_key,
            model: config.chat_model.clone(),
            system_prompt: brief.system_prompt(closing_message),
            client,
        })
    }

    fn messages<'a>(&'a self, request: &'a DialogueRequest) -> Vec<ChatMessage<'a>> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(ChatMessage {
            role: "system",
            content: &self.system_prompt,
        });
        messages.extend(request.history.iter().map(|turn| ChatMessage {
            role: turn.role.as_chat_role(),
            content: &turn.text,
        }));
        if let Some(ref text) = request.user_text {
            messages.push(ChatMessage {
                role: "user",
                content: text,
            });
        }
        messages
    }
}

#[async_trait]
impl DialogueClient for OpenAiDialogue {
    #[instrument(skip(self, request), fields(model = %self.model, history = request.history.len()))]
    async fn converse(&self, request: &DialogueRequest) -> VoiceResult<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: self.messages(request),
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };
        let res = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let parsed: ChatResponse = check_status(res).await?.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        debug!(chars = text.len(), "chat completion received");
        Ok(text)
    }
}

/// Text-to-speech over `/audio/speech`.
#[derive(Debug, Clone)]
pub struct OpenAiTts {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiTts {
    pub fn new(config: &OpenAiConfig, timeout: Duration) -> VoiceResult<Self> {
        let (base_url, api_key, client) = build_client(config, timeout)?;
        Ok(Self {
            base_url,
            api_key,
            model: config.tts_model.clone(),
            client,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiTts {
    #[instrument(skip(self, text), fields(model = %self.model, chars = text.len()))]
    async fn synthesize(&self, text: &str, voice: &str) -> VoiceResult<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": voice,
        });
        let res = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let bytes = check_status(res).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Turn;

    fn config() -> OpenAiConfig {
        OpenAiConfig {
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let err = OpenAiTts::new(&OpenAiConfig::default(), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, VoiceError::Config(_)));
    }

    #[test]
    fn messages_start_with_persona_and_end_with_new_utterance() {
        let dialogue =
            OpenAiDialogue::new(&config(), &InterviewBrief::default(), "finaliza", Duration::from_secs(1)).unwrap();
        let request = DialogueRequest {
            history: vec![Turn::agent("Hi! Tell me about yourself.")],
            user_text: Some("I build payment systems.".to_string()),
        };
        let messages = dialogue.messages(&request);
        let roles: Vec<&str> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec!["system", "assistant", "user"]);
        assert_eq!(messages[2].content, "I build payment systems.");
        assert!(messages[0].content.contains("\"finaliza\""));
    }
}
