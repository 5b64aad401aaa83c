//! Accumulates the transcript of the candidate's current turn.

/// Fragments of the turn in progress. Drained exactly once per send.
#[derive(Debug, Default, Clone)]
pub struct UtteranceBuffer {
    finals: Vec<String>,
    interim: String,
}

impl UtteranceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_final(&mut self, fragment: &str) {
        let fragment = fragment.trim();
        self.interim.clear();
        if !fragment.is_empty() {
            self.finals.push(fragment.to_string());
        }
    }

    /// Replace the live, not-yet-final hypothesis.
    pub fn set_interim(&mut self, text: &str) {
        self.interim = text.trim().to_string();
    }

    /// Final fragments joined with single spaces.
    pub fn committed(&self) -> String {
        self.finals.join(" ")
    }

    pub fn interim(&self) -> &str {
        &self.interim
    }

    /// Committed text plus the interim tail, as shown to the user.
    pub fn display(&self) -> String {
        let committed = self.committed();
        match (committed.is_empty(), self.interim.is_empty()) {
            (_, true) => committed,
            (true, false) => self.interim.clone(),
            (false, false) => format!("{} {}", committed, self.interim),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.finals.is_empty() && self.interim.is_empty()
    }

    /// Take the utterance and leave the buffer empty.
    ///
    /// `include_interim` is used for forced sends, where whatever the user
    /// sees on screen is what gets sent.
    pub fn drain(&mut self, include_interim: bool) -> String {
        let text = if include_interim {
            self.display()
        } else {
            self.committed()
        };
        self.clear();
        text
    }

    pub fn clear(&mut self) {
        self.finals.clear();
        self.interim.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_join_with_spaces() {
        let mut b = UtteranceBuffer::new();
        b.push_final("Hel");
        b.set_interim("lo th");
        assert_eq!(b.display(), "Hel lo th");
        b.push_final(" lo, there ");
        assert_eq!(b.interim(), "");
        assert_eq!(b.committed(), "Hel lo, there");
    }

    #[test]
    fn drain_empties_the_buffer() {
        let mut b = UtteranceBuffer::new();
        b.push_final("one");
        b.set_interim("two");
        assert_eq!(b.drain(false), "one");
        assert!(b.is_empty());
        assert_eq!(b.drain(true), "");

        b.set_interim("only interim");
        assert_eq!(b.drain(true), "only interim");
    }
}
