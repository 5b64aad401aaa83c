//! Client for the coaching product's interview API.
//!
//! One client serves both remote contracts of a session:
//! - dialogue: `POST {base}/api/interviews/{id}/ai-practice`
//! - speech:   `POST {base}/api/interviews/{id}/text-to-speech`
//!
//! The server owns the interviewer persona (it loads the interview
//! preparation, research and stories itself), so the client only ships the
//! conversation.

use crate::config::ApiConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::exchange::{DialogueClient, DialogueRequest};
use crate::player::SpeechSynthesizer;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Serialize)]
struct PracticeMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PracticeRequest<'a> {
    messages: Vec<PracticeMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_response: Option<&'a str>,
}

#[derive(Deserialize)]
struct PracticeResponse {
    response: String,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    voice: &'a str,
}

#[derive(Debug, Clone)]
pub struct CoachApiClient {
    base_url: String,
    interview_id: String,
    access_token: Option<String>,
    client: reqwest::Client,
}

impl CoachApiClient {
    pub fn new(config: &ApiConfig, timeout: Duration) -> VoiceResult<Self> {
        if config.base_url.trim().is_empty() {
            return Err(VoiceError::Config("api.base_url is required for the coach backend".to_string()));
        }
        if config.interview_id.trim().is_empty() {
            return Err(VoiceError::Config("api.interview_id is required for the coach backend".to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            interview_id: config.interview_id.trim().to_string(),
            access_token: config
                .access_token
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            client,
        })
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}/api/interviews/{}/{}", self.base_url, self.interview_id, action)
    }

    fn post(&self, action: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(self.endpoint(action));
        match self.access_token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Turn a non-2xx response into [`VoiceError::Endpoint`].
pub(crate) async fn check_status(res: reqwest::Response) -> VoiceResult<reqwest::Response> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status().as_u16();
    let body = res.text().await.unwrap_or_default();
    Err(VoiceError::Endpoint { status, body })
}

#[async_trait]
impl DialogueClient for CoachApiClient {
    #[instrument(skip(self, request), fields(history = request.history.len()))]
    async fn converse(&self, request: &DialogueRequest) -> VoiceResult<String> {
        let body = PracticeRequest {
            messages: request
                .history
                .iter()
                .map(|turn| PracticeMessage {
                    role: turn.role.as_chat_role(),
                    content: &turn.text,
                })
                .collect(),
            user_response: request.user_text.as_deref(),
        };
        let res = self.post("ai-practice").json(&body).send().await?;
        let parsed: PracticeResponse = check_status(res).await?.json().await?;
        debug!(chars = parsed.response.len(), "ai-practice reply received");
        Ok(parsed.response)
    }
}

#[async_trait]
impl SpeechSynthesizer for CoachApiClient {
    #[instrument(skip(self, text), fields(chars = text.len()))]
    async fn synthesize(&self, text: &str, voice: &str) -> VoiceResult<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let res = self
            .post("text-to-speech")
            .json(&SpeechRequest { text, voice })
            .send()
            .await?;
        let bytes = check_status(res).await?.bytes().await?;
        debug!(bytes = bytes.len(), "speech audio received");
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_base_url_and_interview() {
        let timeout = Duration::from_secs(5);
        assert!(CoachApiClient::new(&ApiConfig::default(), timeout).is_err());

        let config = ApiConfig {
            base_url: "https://coach.example.com/".to_string(),
            interview_id: "iv-42".to_string(),
            access_token: Some("  ".to_string()),
        };
        let client = CoachApiClient::new(&config, timeout).unwrap();
        assert_eq!(
            client.endpoint("ai-practice"),
            "https://coach.example.com/api/interviews/iv-42/ai-practice"
        );
        assert!(client.access_token.is_none());
    }

    #[test]
    fn opening_request_has_no_user_response() {
        let body = PracticeRequest {
            messages: Vec::new(),
            user_response: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({ "messages": [] }));
    }
}
