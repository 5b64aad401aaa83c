//! Silence debouncing: decide when the candidate has finished speaking.
//!
//! Every final transcript fragment pushes the deadline out by the quiet
//! period. When the deadline passes without a new fragment the utterance is
//! complete. The debouncer only keeps time; the words live in
//! [`crate::utterance::UtteranceBuffer`].

use std::future::pending;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

#[derive(Debug)]
pub struct SilenceDebouncer {
    quiet_period: Duration,
    deadline: Option<Instant>,
}

impl SilenceDebouncer {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            deadline: None,
        }
    }

    /// Restart the quiet period from now.
    pub fn fragment_appended(&mut self) {
        self.deadline = Some(Instant::now() + self.quiet_period);
    }

    /// Drop any pending deadline. A cancelled timer never fires.
    pub fn cancel(&mut self) {
        if self.deadline.take().is_some() {
            debug!("silence timer cancelled");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves once the armed deadline passes; pending forever while disarmed.
    ///
    /// Cancel-safe: it only reads the deadline, so it can sit in a `select!`
    /// and be recreated every loop iteration.
    pub async fn elapsed(&self) {
        match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => pending::<()>().await,
        }
    }

    /// Consume an elapsed deadline. Returns `true` exactly once per quiet period.
    pub fn fire(&mut self) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
