//! Exchange orchestration: one dialogue round-trip per user utterance.
//!
//! The orchestrator owns the [`ConversationLog`] and the single
//! [`PendingRequestToken`]. A request is *begun* (token issued, request built
//! from the log) and later *completed* (token returned, turns committed on
//! success). The split lets the coordinator await the network without holding
//! a borrow on the orchestrator, while the log only ever changes on success.

use crate::conversation::{ConversationLog, Turn};
use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything the dialogue endpoint needs to produce the next agent line.
#[derive(Debug, Clone)]
pub struct DialogueRequest {
    /// Full ordered history, not including `user_text`.
    pub history: Vec<Turn>,
    /// The new utterance; `None` when asking for the opening line.
    pub user_text: Option<String>,
}

/// Remote service that generates the interviewer's next line.
#[async_trait]
pub trait DialogueClient: Send + Sync {
    async fn converse(&self, request: &DialogueRequest) -> VoiceResult<String>;
}

/// What an exchange was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Opening,
    Reply,
    Closing,
}

/// Proof that the one allowed dialogue request is outstanding.
///
/// Not `Clone`: whoever holds it is the only party that can complete or
/// abandon the request.
#[derive(Debug, PartialEq, Eq)]
pub struct PendingRequestToken {
    id: u64,
}

/// Result of a finished request, handed back to [`ExchangeOrchestrator::complete`].
#[derive(Debug)]
pub struct ExchangeOutcome {
    pub token: PendingRequestToken,
    pub kind: ExchangeKind,
    pub user_text: Option<String>,
    pub result: VoiceResult<String>,
}

pub type ExchangeFuture = Pin<Box<dyn Future<Output = ExchangeOutcome> + Send>>;

/// A request that has been issued a token but not awaited yet.
pub struct PendingExchange {
    pub kind: ExchangeKind,
    token: PendingRequestToken,
    client: Arc<dyn DialogueClient>,
    request: DialogueRequest,
}

impl PendingExchange {
    /// Turn into a `'static` future that performs the call.
    pub fn dispatch(self) -> ExchangeFuture {
        let PendingExchange {
            kind,
            token,
            client,
            request,
        } = self;
        Box::pin(async move {
            let result = client.converse(&request).await.and_then(|reply| {
                let reply = reply.trim().to_string();
                if reply.is_empty() {
                    Err(VoiceError::EmptyReply)
                } else {
                    Ok(reply)
                }
            });
            ExchangeOutcome {
                token,
                kind,
                user_text: request.user_text,
                result,
            }
        })
    }
}

pub struct ExchangeOrchestrator {
    client: Arc<dyn DialogueClient>,
    log: ConversationLog,
    in_flight: Option<u64>,
    next_token: u64,
    closing_message: String,
    min_user_turns_to_close: usize,
}

impl ExchangeOrchestrator {
    pub fn new(
        client: Arc<dyn DialogueClient>,
        closing_message: impl Into<String>,
        min_user_turns_to_close: usize,
    ) -> Self {
        Self {
            client,
            log: ConversationLog::new(),
            in_flight: None,
            next_token: 0,
            closing_message: closing_message.into(),
            min_user_turns_to_close,
        }
    }

    /// Read-only view of the conversation.
    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn has_pending(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn user_turns(&self) -> usize {
        self.log.user_turns()
    }

    pub fn min_user_turns_to_close(&self) -> usize {
        self.min_user_turns_to_close
    }

    pub fn can_close(&self) -> bool {
        self.log.user_turns() >= self.min_user_turns_to_close
    }

    fn issue(&mut self, kind: ExchangeKind, user_text: Option<String>) -> VoiceResult<PendingExchange> {
        if self.in_flight.is_some() {
            warn!(?kind, "dialogue request rejected: another one is in flight");
            return Err(VoiceError::RequestInFlight);
        }
        self.next_token += 1;
        let id = self.next_token;
        self.in_flight = Some(id);
        debug!(token = id, ?kind, history = self.log.len(), "dialogue request issued");
        Ok(PendingExchange {
            kind,
            token: PendingRequestToken { id },
            client: Arc::clone(&self.client),
            request: DialogueRequest {
                history: self.log.turns().to_vec(),
                user_text,
            },
        })
    }

    /// Ask for the interviewer's opening line. Only valid on an empty log.
    pub fn begin_opening(&mut self) -> VoiceResult<PendingExchange> {
        if !self.log.is_empty() {
            return Err(VoiceError::TurnOrder("opening requested on a non-empty conversation".to_string()));
        }
        self.issue(ExchangeKind::Opening, None)
    }

    pub fn begin_submit(&mut self, text: &str) -> VoiceResult<PendingExchange> {
        let text = text.trim();
        if text.is_empty() {
            return Err(VoiceError::TurnOrder("empty utterance".to_string()));
        }
        if self.log.is_empty() {
            return Err(VoiceError::TurnOrder("user cannot speak before the opening line".to_string()));
        }
        self.issue(ExchangeKind::Reply, Some(text.to_string()))
    }

    pub fn begin_close(&mut self) -> VoiceResult<PendingExchange> {
        if !self.can_close() {
            return Err(VoiceError::CloseNotAllowed {
                have: self.log.user_turns(),
                required: self.min_user_turns_to_close,
            });
        }
        let sentinel = self.closing_message.clone();
        self.issue(ExchangeKind::Closing, Some(sentinel))
    }

    /// Return the token and commit the exchange if it succeeded.
    ///
    /// On failure the log is untouched and the error is passed through.
    pub fn complete(&mut self, outcome: ExchangeOutcome) -> VoiceResult<String> {
        let ExchangeOutcome {
            token,
            kind,
            user_text,
            result,
        } = outcome;
        if self.in_flight != Some(token.id) {
            return Err(VoiceError::StaleToken(token.id));
        }
        self.in_flight = None;

        let reply = result?;
        match user_text {
            None => self.log.append(Turn::agent(reply.clone()))?,
            Some(text) => self
                .log
                .append_exchange(Turn::user(text), Turn::agent(reply.clone()))?,
        }
        info!(?kind, turns = self.log.len(), chars = reply.len(), "exchange committed");
        Ok(reply)
    }

    /// Give the token back without committing anything.
    pub fn abandon(&mut self, token: PendingRequestToken) {
        if self.in_flight == Some(token.id) {
            debug!(token = token.id, "dialogue request abandoned");
            self.in_flight = None;
        }
    }

    /// Forget the outstanding request after its future was dropped.
    pub fn cancel_pending(&mut self) {
        if let Some(id) = self.in_flight.take() {
            debug!(token = id, "dialogue request cancelled");
        }
    }

    /// Fetch the opening line and log it.
    pub async fn open(&mut self) -> VoiceResult<String> {
        let pending = self.begin_opening()?;
        let outcome = pending.dispatch().await;
        self.complete(outcome)
    }

    /// Log `text` as the user's turn, send the whole conversation, log and return the reply.
    pub async fn submit_utterance(&mut self, text: &str) -> VoiceResult<String> {
        let pending = self.begin_submit(text)?;
        let outcome = pending.dispatch().await;
        self.complete(outcome)
    }

    /// Send the closing sentinel and return the interviewer's wrap-up.
    pub async fn end_conversation(&mut self) -> VoiceResult<String> {
        let pending = self.begin_close()?;
        let outcome = pending.dispatch().await;
        self.complete(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;
    use std::sync::Mutex;

    /// Replies from a script; records every request it sees.
    struct ScriptedDialogue {
        replies: Mutex<Vec<VoiceResult<String>>>,
        seen: Mutex<Vec<DialogueRequest>>,
    }

    impl ScriptedDialogue {
        fn new(replies: Vec<VoiceResult<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl DialogueClient for ScriptedDialogue {
        async fn converse(&self, request: &DialogueRequest) -> VoiceResult<String> {
            self.seen.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok("Go on.".to_string()))
        }
    }

    fn orchestrator(client: Arc<ScriptedDialogue>) -> ExchangeOrchestrator {
        ExchangeOrchestrator::new(client, "finaliza", 2)
    }

    #[tokio::test]
    async fn submit_sends_history_and_commits_both_turns() {
        let client = ScriptedDialogue::new(vec![
            Ok("Hi! Tell me about yourself.".to_string()),
            Ok("Great, what drives you?".to_string()),
        ]);
        let mut ex = orchestrator(Arc::clone(&client));

        ex.open().await.unwrap();
        let reply = ex.submit_utterance("  I lead a platform team ").await.unwrap();
        assert_eq!(reply, "Great, what drives you?");

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].history.is_empty());
        assert_eq!(seen[0].user_text, None);
        assert_eq!(seen[1].history.len(), 1);
        assert_eq!(seen[1].user_text.as_deref(), Some("I lead a platform team"));

        let roles: Vec<Role> = ex.log().turns().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::Agent, Role::User, Role::Agent]);
        assert!(!ex.has_pending());
    }

    #[tokio::test]
    async fn failure_leaves_log_unchanged_and_clears_token() {
        let client = ScriptedDialogue::new(vec![
            Ok("Hello!".to_string()),
            Err(VoiceError::Endpoint {
                status: 500,
                body: "boom".to_string(),
            }),
            Ok("Welcome back.".to_string()),
        ]);
        let mut ex = orchestrator(client);
        ex.open().await.unwrap();

        let err = ex.submit_utterance("first try").await.unwrap_err();
        assert!(err.is_network());
        assert_eq!(ex.log().len(), 1);
        assert!(!ex.has_pending());

        // retry is safe
        ex.submit_utterance("first try").await.unwrap();
        assert_eq!(ex.log().len(), 3);
    }

    #[tokio::test]
    async fn blank_reply_is_not_logged() {
        let client = ScriptedDialogue::new(vec![Ok("Hello!".to_string()), Ok("   ".to_string())]);
        let mut ex = orchestrator(client);
        ex.open().await.unwrap();
        assert!(matches!(ex.submit_utterance("hi").await, Err(VoiceError::EmptyReply)));
        assert_eq!(ex.log().len(), 1);
    }

    #[test]
    fn second_request_is_rejected_while_one_is_pending() {
        let client = ScriptedDialogue::new(vec![]);
        let mut ex = orchestrator(client);
        let first = ex.begin_opening().unwrap();
        assert!(matches!(ex.begin_opening(), Err(VoiceError::RequestInFlight)));
        assert!(ex.has_pending());

        ex.abandon(first.token);
        assert!(!ex.has_pending());
        assert!(ex.begin_opening().is_ok());
    }

    #[tokio::test]
    async fn stale_token_is_refused() {
        let client = ScriptedDialogue::new(vec![Ok("Hello!".to_string())]);
        let mut ex = orchestrator(client);
        let first = ex.begin_opening().unwrap();
        let outcome = first.dispatch().await;
        // token given back out of band, then a new request issued
        ex.abandon(PendingRequestToken { id: outcome.token.id });
        let _second = ex.begin_opening().unwrap();
        assert!(matches!(ex.complete(outcome), Err(VoiceError::StaleToken(1))));
        assert!(ex.log().is_empty());
    }

    #[tokio::test]
    async fn closing_requires_two_user_turns() {
        let client = ScriptedDialogue::new(vec![Ok("Hello!".to_string()), Ok("Nice.".to_string())]);
        let mut ex = orchestrator(Arc::clone(&client));
        ex.open().await.unwrap();
        ex.submit_utterance("one").await.unwrap();

        let err = ex.end_conversation().await.unwrap_err();
        assert!(matches!(err, VoiceError::CloseNotAllowed { have: 1, required: 2 }));
        assert!(!ex.has_pending());

        ex.submit_utterance("two").await.unwrap();
        ex.end_conversation().await.unwrap();
        let last_user = &client.seen.lock().unwrap()[3];
        assert_eq!(last_user.user_text.as_deref(), Some("finaliza"));
        assert_eq!(ex.log().len(), 7);
    }
}
