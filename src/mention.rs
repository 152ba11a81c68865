//! Answering questions addressed to the bot.

use std::sync::Arc;

use regex::Regex;
use tracing::{error, info, warn};

use crate::context::BotContext;
use crate::gateway::{chunk_escaped, MESSAGE_LIMIT};
use crate::inference::build_prompt;

pub const GREETING: &str =
    "Hi! I'm Gatekeeper. Ask me a question and I'll help you with an AI-generated response!";
pub const UNAVAILABLE: &str =
    "Sorry, I couldn't generate a response right now. Please try again later.";
pub const CRASHED: &str = "Sorry, something went wrong. Please try again later.";

/// Case-insensitive `@botname`, not matching longer names.
fn mention_pattern(bot_username: &str) -> Option<Regex> {
    if bot_username.is_empty() {
        return None;
    }
    let pattern = format!(r"(?i)@{}\b", regex::escape(bot_username));
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!("Mention pattern for @{} invalid: {}", bot_username, e);
            None
        }
    }
}

/// Whether a message is meant for the bot: any private message, an
/// `@mention` of it, or a reply to one of its messages.
pub fn is_addressed(text: &str, bot_username: &str, is_private: bool, replies_to_bot: bool) -> bool {
    is_private
        || replies_to_bot
        || mention_pattern(bot_username).is_some_and(|re| re.is_match(text))
}

/// The question with every `@botname` removed.
pub fn extract_question(text: &str, bot_username: &str) -> String {
    match mention_pattern(bot_username) {
        Some(re) => re.replace_all(text, "").trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// Reply chunks (HTML) for a message addressed to the bot.
pub async fn answer(ctx: &BotContext, channel_id: i64, text: &str) -> Vec<String> {
    let question = extract_question(text, &ctx.bot_username);
    if question.is_empty() {
        return vec![GREETING.to_string()];
    }

    let Some(inference) = ctx.inference.as_ref().map(Arc::clone) else {
        warn!("Question in {} but no inference backend configured", channel_id);
        return vec![UNAVAILABLE.to_string()];
    };

    ctx.gateway.indicate_typing(channel_id).await;

    let preview: String = question.chars().take(100).collect();
    info!("💬 Question in {}: \"{}\"", channel_id, preview);

    let prompt = build_prompt(ctx.config.personality.as_deref(), &question);
    let timeout = ctx.config.inference_timeout;
    // Completion runs off the handler task; only this handler awaits it
    let handle = tokio::spawn(async move {
        tokio::time::timeout(timeout, inference.complete(&prompt)).await
    });

    match handle.await {
        Ok(Ok(Ok(response))) => chunk_escaped(&response, MESSAGE_LIMIT),
        Ok(Ok(Err(e))) => {
            warn!("Completion failed: {}", e);
            vec![UNAVAILABLE.to_string()]
        }
        Ok(Err(_)) => {
            warn!("Completion timed out after {}s", timeout.as_secs());
            vec![UNAVAILABLE.to_string()]
        }
        Err(e) => {
            error!("Completion task crashed: {}", e);
            vec![CRASHED.to_string()]
        }
    }
}
