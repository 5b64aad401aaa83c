//! Interview brief: what the interviewer persona knows about the role and the candidate.
//!
//! Only the direct OpenAI-compatible backend needs this; the coaching backend
//! builds its own persona server-side from the stored interview preparation.

use serde::{Deserialize, Serialize};

/// Snippets of company research are cut to this many characters in the prompt.
const RESEARCH_SNIPPET_CHARS: usize = 200;

/// A Problem/Actions/Result story from the candidate's experience.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParStory {
    pub role_company: String,
    #[serde(default)]
    pub year: Option<String>,
    pub problem: String,
    pub actions: String,
    pub result: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterviewBrief {
    #[serde(default)]
    pub candidate_name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub interviewer_name: Option<String>,
    #[serde(default)]
    pub interviewer_role: Option<String>,
    #[serde(default)]
    pub interviewer_background: Option<String>,
    #[serde(default)]
    pub company_news: Option<String>,
    #[serde(default)]
    pub company_culture: Option<String>,
    #[serde(default)]
    pub industry_trends: Option<String>,
    #[serde(default)]
    pub stories: Vec<ParStory>,
}

fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= RESEARCH_SNIPPET_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(RESEARCH_SNIPPET_CHARS).collect();
    format!("{}...", cut)
}

/// "a Staff Engineer", "an Engineering Manager".
fn with_article(noun: &str) -> String {
    let noun = noun.trim();
    let vowel = noun
        .chars()
        .next()
        .map(|c| "aeiou".contains(c.to_ascii_lowercase()))
        .unwrap_or(false);
    format!("{} {}", if vowel { "an" } else { "a" }, noun)
}

impl InterviewBrief {
    fn candidate(&self) -> &str {
        self.candidate_name.as_deref().unwrap_or("there")
    }

    fn interviewer(&self) -> &str {
        self.interviewer_name.as_deref().unwrap_or("Jon")
    }

    /// System prompt for a short, conversational mock interview. The
    /// candidate asks for the wrap-up by saying `closing_message`.
    pub fn system_prompt(&self, closing_message: &str) -> String {
        let candidate = self.candidate();
        let interviewer = self.interviewer();
        let company = self.company.as_deref().unwrap_or("the company");
        let position = self.position.as_deref().unwrap_or("Not specified");
        let opening_role = self
            .position
            .as_deref()
            .map(|p| format!("the {} role", p))
            .unwrap_or_else(|| "the position".to_string());
        let role = self
            .interviewer_role
            .as_deref()
            .map(with_article)
            .unwrap_or_else(|| "an interviewer".to_string());

        let mut prompt = format!(
            "You are {interviewer}, {role} at {company}. You are running a friendly mock interview \
             with {candidate} for {opening_role}.\n\nCONTEXT:\n- Position: {position}\n- Company: {company}\n"
        );

        for (label, value) in [
            ("Recent company news", &self.company_news),
            ("Company culture", &self.company_culture),
            ("Industry trends", &self.industry_trends),
        ] {
            if let Some(v) = value.as_deref().filter(|v| !v.trim().is_empty()) {
                prompt.push_str(&format!("- {}: {}\n", label, snippet(v)));
            }
        }

        if let Some(background) = self.interviewer_background.as_deref() {
            prompt.push_str(&format!("\nABOUT YOU: {}\n", background.trim()));
        }

        if !self.stories.is_empty() {
            prompt.push_str("\nCANDIDATE EXPERIENCE (PAR stories):\n");
            for (idx, story) in self.stories.iter().enumerate() {
                prompt.push_str(&format!(
                    "{}. {} ({}): Problem: {} | Actions: {} | Result: {}\n",
                    idx + 1,
                    story.role_company,
                    story.year.as_deref().unwrap_or("N/A"),
                    story.problem,
                    story.actions,
                    story.result
                ));
            }
        }

        prompt.push_str(&format!(
            "\nSTYLE:\n- Warm and natural, like a colleague over coffee.\n- At most two sentences per reply, \
             one question at a time, no lists.\n- React to what the candidate actually says and ask about \
             their stories with \"Tell me about a time when...\".\n\nOPENING: greet {candidate}, introduce \
             yourself as {interviewer} and ask them to say a bit about themselves.\n\nCLOSING: when the \
             candidate says \"{closing_message}\" or after 6-8 exchanges, wrap up with one or two strengths and one \
             thing to work on."
        ));
        prompt
    }
}
