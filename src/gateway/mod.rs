//! Chat gateway seam.
//!
//! The schedulers and the notification dispatcher only see the [`Gateway`]
//! trait; the Telegram implementation lives in [`telegram`].

pub mod telegram;

pub use telegram::TelegramGateway;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use teloxide::utils::html;

/// Telegram's hard limit on message length, in characters.
pub const MESSAGE_LIMIT: usize = 4096;

/// A resolved chat user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub username: Option<String>,
    pub display_name: String,
    pub is_bot: bool,
}

impl Identity {
    /// HTML link that notifies the user when posted in a group.
    pub fn mention(&self) -> String {
        format!(
            "<a href=\"tg://user?id={}\">{}</a>",
            self.user_id,
            html::escape(&self.display_name)
        )
    }
}

/// Delivery failures, split by what the caller can do about them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The recipient refuses messages from the bot (blocked it, never
    /// started a private chat, or is deactivated).
    PermissionDenied(String),
    /// Chat or user does not exist or the bot is no longer in it.
    NotFound(String),
    Timeout(Duration),
    Api(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermissionDenied(e) => write!(f, "permission denied: {e}"),
            Self::NotFound(e) => write!(f, "not found: {e}"),
            Self::Timeout(d) => write!(f, "timed out after {}s", d.as_secs()),
            Self::Api(e) => write!(f, "API error: {e}"),
        }
    }
}

impl std::error::Error for GatewayError {}

/// Outbound operations the core needs from the chat platform.
///
/// Message content is HTML; callers escape user-provided text.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn send_to_channel(&self, channel_id: i64, content: &str) -> Result<(), GatewayError>;

    /// Private message. Fails with [`GatewayError::PermissionDenied`] when the
    /// recipient does not accept messages from the bot.
    async fn send_direct(&self, user_id: i64, content: &str) -> Result<(), GatewayError>;

    /// Whether the bot can still post into `channel_id`.
    async fn channel_exists(&self, channel_id: i64) -> Result<bool, GatewayError>;

    /// Look `user_id` up in `chats`, then in every configured chat; first
    /// chat where they are present wins.
    async fn resolve_member(&self, user_id: i64, chats: &[i64]) -> Option<Identity>;

    /// Round-trip time of a trivial request.
    async fn ping(&self) -> Result<Duration, GatewayError>;

    async fn indicate_typing(&self, _channel_id: i64) {}
}

/// Split HTML `text` into chunks of at most `limit` characters.
///
/// Breaks between lines where possible, so markup that stays within one line
/// is never cut. A single line longer than `limit` is split between tags and
/// entities, never inside one.
pub fn chunk_message(text: &str, limit: usize) -> Vec<String> {
    if text.is_empty() || limit == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len <= limit {
            current.push_str(line);
            current_len += line_len;
            continue;
        }
        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len <= limit {
            current.push_str(line);
            current_len = line_len;
            continue;
        }
        for atom in markup_atoms(line, limit) {
            let atom_len = atom.chars().count();
            if current_len + atom_len > limit && !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            current.push_str(atom);
            current_len += atom_len;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Longest entity accepted, as in `&#x1F600;`.
const MAX_ENTITY_LEN: usize = 10;

/// Split HTML into whole elements that fit in `limit`, lone tags, entities
/// and single characters.
fn markup_atoms(line: &str, limit: usize) -> Vec<&str> {
    let mut atoms = Vec::new();
    let mut rest = line;
    while let Some(c) = rest.chars().next() {
        let end = match c {
            '<' => rest
                .find('>')
                .map(|close| element_end(rest, close, limit).unwrap_or(close + 1)),
            '&' => rest.find(';').filter(|&i| i <= MAX_ENTITY_LEN).map(|i| i + 1),
            _ => None,
        }
        .unwrap_or(c.len_utf8());
        let (atom, tail) = rest.split_at(end);
        atoms.push(atom);
        rest = tail;
    }
    atoms
}

/// End of the element opened at the start of `rest`, if it fits in `limit`.
fn element_end(rest: &str, open_end: usize, limit: usize) -> Option<usize> {
    let tag = &rest[1..open_end];
    if tag.starts_with('/') {
        return None;
    }
    let name = tag.split_whitespace().next()?;
    let closing = format!("</{name}>");
    let end = rest.find(&closing)? + closing.len();
    (rest[..end].chars().count() <= limit).then_some(end)
}

/// HTML-escape plain `text` and split it into chunks of at most `limit`
/// characters without cutting an entity in half.
pub fn chunk_escaped(text: &str, limit: usize) -> Vec<String> {
    if text.is_empty() || limit == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    let mut buf = [0u8; 4];

    for c in text.chars() {
        let piece = match c {
            '&' => "&amp;",
            '<' => "&lt;",
            '>' => "&gt;",
            _ => &*c.encode_utf8(&mut buf),
        };
        let piece_len = piece.chars().count();
        if current_len + piece_len > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push_str(piece);
        current_len += piece_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_short_message() {
        assert_eq!(chunk_message("hello", 10), vec!["hello".to_string()]);
        assert!(chunk_message("", 10).is_empty());
    }

    #[test]
    fn test_chunk_respects_char_boundaries() {
        let text = "ä".repeat(25);
        let chunks = chunk_message(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 10);
        assert_eq!(chunks[2].chars().count(), 5);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_chunk_prefers_line_breaks() {
        let text = "<b>#1</b>: one\n<b>#2</b>: two\n<b>#3</b>: three";
        let chunks = chunk_message(text, 32);
        assert_eq!(chunks, vec!["<b>#1</b>: one\n<b>#2</b>: two\n", "<b>#3</b>: three"]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 32));
    }

    #[test]
    fn test_chunk_long_line_keeps_markup_whole() {
        let line = "<b>09:00:</b> Tom &amp; Jerry &lt;3";
        assert_eq!(
            chunk_message(line, 16),
            vec!["<b>09:00:</b> To", "m &amp; Jerry ", "&lt;3"]
        );

        // Element too long for one chunk: only its tags stay whole
        let chunks = chunk_message(line, 6);
        assert_eq!(chunks, vec!["<b>09:", "00:", "</b> T", "om ", "&amp; ", "Jerry ", "&lt;3"]);
    }

    #[test]
    fn test_markup_atoms() {
        assert_eq!(markup_atoms("a<b>&amp;é</b>", 3), vec!["a", "<b>", "&amp;", "é", "</b>"]);
        assert_eq!(markup_atoms("<i>hi</i>!", 9), vec!["<i>hi</i>", "!"]);
        assert_eq!(
            markup_atoms("<a href=\"x\">y</a>", 20),
            vec!["<a href=\"x\">y</a>"]
        );
        // No terminator within reach: a plain ampersand
        assert_eq!(markup_atoms("& far far away;", 20).len(), 15);
    }

    #[test]
    fn test_chunk_escaped_keeps_entities_whole() {
        let chunks = chunk_escaped("a<b>&c", 5);
        assert_eq!(chunks, vec!["a&lt;", "b&gt;", "&amp;", "c"]);
        assert!(chunk_escaped("", 5).is_empty());
    }

    #[test]
    fn test_mention_escapes_name() {
        let identity = Identity {
            user_id: 42,
            username: None,
            display_name: "<b>Eve</b>".to_string(),
            is_bot: false,
        };
        assert_eq!(
            identity.mention(),
            "<a href=\"tg://user?id=42\">&lt;b&gt;Eve&lt;/b&gt;</a>"
        );
    }
}
