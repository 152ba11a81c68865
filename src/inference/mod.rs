//! Text completion seam and the persona prompt.

pub mod gemini;

pub use gemini::GeminiClient;

use async_trait::async_trait;
use std::fmt;

#[derive(Debug)]
pub enum InferenceError {
    Http(String),
    Api(String),
    Parse(String),
    Empty,
}

impl fmt::Display for InferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferenceError::Http(e) => write!(f, "HTTP error: {e}"),
            InferenceError::Api(e) => write!(f, "API error: {e}"),
            InferenceError::Parse(e) => write!(f, "Parse error: {e}"),
            InferenceError::Empty => write!(f, "Empty response"),
        }
    }
}

impl std::error::Error for InferenceError {}

/// A page a grounded answer was drawn from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub title: String,
    pub uri: String,
}

/// Answer to a web-grounded question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchAnswer {
    pub text: String,
    pub sources: Vec<Source>,
}

#[async_trait]
pub trait Inference: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, InferenceError>;

    /// Answer `prompt` with a web search, listing the pages used.
    async fn search(&self, prompt: &str) -> Result<SearchAnswer, InferenceError>;
}

const DEFAULT_IDENTITY: &str = "You are Gatekeeper, the assistant who keeps watch over this group chat. \
     When introducing yourself, say that you are Gatekeeper, the chat's gatekeeper.";

/// Persona preamble followed by the user's question.
pub fn build_prompt(personality: Option<&str>, question: &str) -> String {
    let identity = personality.unwrap_or(DEFAULT_IDENTITY);
    format!(
        "{identity}\n\
         Always answer in English unless the user explicitly asks for another language, \
         even when the question itself is written in another language. \
         Keep answers clear, concise and friendly, suited to a chat. \
         If you are unsure about something, say so.\n\n\
         User question: {question}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_ends_with_question() {
        let prompt = build_prompt(None, "what is rust?");
        assert!(prompt.starts_with(DEFAULT_IDENTITY));
        assert!(prompt.ends_with("User question: what is rust?"));
    }

    #[test]
    fn test_prompt_introduces_gatekeeper_and_defaults_to_english() {
        let prompt = build_prompt(None, "ازيك؟");
        assert!(prompt.contains("say that you are Gatekeeper"));
        assert!(prompt.contains("Always answer in English unless the user explicitly asks"));

        // The language rule survives a custom personality
        let custom = build_prompt(Some("You are Borai."), "hi");
        assert!(custom.contains("Always answer in English"));
    }

    #[test]
    fn test_personality_replaces_identity() {
        let prompt = build_prompt(Some("You are Borai, the server gatekeeper."), "hi");
        assert!(prompt.starts_with("You are Borai"));
        assert!(!prompt.contains(DEFAULT_IDENTITY));
    }
}
