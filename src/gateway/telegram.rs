//! Telegram gateway using teloxide.

use async_trait::async_trait;
use std::future::IntoFuture;
use std::time::{Duration, Instant};

use teloxide::prelude::*;
use teloxide::types::{ChatAction, ChatMemberKind, ParseMode, User};
use teloxide::{ApiError, RequestError};
use tracing::{debug, warn};

use super::{Gateway, GatewayError, Identity};

/// Telegram implementation of [`Gateway`]. Every request is bounded by
/// `timeout`.
pub struct TelegramGateway {
    bot: Bot,
    known_chats: Vec<ChatId>,
    timeout: Duration,
}

impl TelegramGateway {
    pub fn new(bot: Bot, known_chats: Vec<ChatId>, timeout: Duration) -> Self {
        Self { bot, known_chats, timeout }
    }

    async fn timed<T, F>(&self, request: F) -> Result<T, GatewayError>
    where
        F: IntoFuture<Output = Result<T, RequestError>>,
    {
        match tokio::time::timeout(self.timeout, request.into_future()).await {
            Ok(result) => result.map_err(classify),
            Err(_) => Err(GatewayError::Timeout(self.timeout)),
        }
    }
}

/// Build an [`Identity`] from a Telegram user.
pub fn identity_of(user: &User) -> Identity {
    Identity {
        user_id: user.id.0 as i64,
        username: user.username.clone(),
        display_name: user.full_name(),
        is_bot: user.is_bot,
    }
}

fn classify(err: RequestError) -> GatewayError {
    match err {
        RequestError::Api(
            ApiError::BotBlocked
            | ApiError::CantInitiateConversation
            | ApiError::CantTalkWithBots
            | ApiError::UserDeactivated,
        ) => GatewayError::PermissionDenied(err.to_string()),
        RequestError::Api(
            ApiError::ChatNotFound
            | ApiError::UserNotFound
            | ApiError::BotKicked
            | ApiError::BotKickedFromSupergroup,
        ) => GatewayError::NotFound(err.to_string()),
        other => GatewayError::Api(other.to_string()),
    }
}

/// `chats` followed by the configured chats not already among them.
fn lookup_order(chats: &[i64], known_chats: &[ChatId]) -> Vec<ChatId> {
    let mut order: Vec<ChatId> = chats.iter().copied().map(ChatId).collect();
    for chat in known_chats {
        if !order.contains(chat) {
            order.push(*chat);
        }
    }
    order
}

#[async_trait]
impl Gateway for TelegramGateway {
    async fn send_to_channel(&self, channel_id: i64, content: &str) -> Result<(), GatewayError> {
        let request = self
            .bot
            .send_message(ChatId(channel_id), content)
            .parse_mode(ParseMode::Html);
        self.timed(request).await.map(|msg| {
            debug!("Sent msg {} to chat {}", msg.id, channel_id);
        })
    }

    async fn send_direct(&self, user_id: i64, content: &str) -> Result<(), GatewayError> {
        // A private chat shares its id with the user
        let request = self
            .bot
            .send_message(ChatId(user_id), content)
            .parse_mode(ParseMode::Html);
        self.timed(request).await.map(|_| ())
    }

    async fn channel_exists(&self, channel_id: i64) -> Result<bool, GatewayError> {
        match self.timed(self.bot.get_chat(ChatId(channel_id))).await {
            Ok(_) => Ok(true),
            Err(GatewayError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn resolve_member(&self, user_id: i64, chats: &[i64]) -> Option<Identity> {
        let user = UserId(user_id as u64);
        for chat in lookup_order(chats, &self.known_chats) {
            match self.timed(self.bot.get_chat_member(chat, user)).await {
                Ok(member) => {
                    if matches!(member.kind, ChatMemberKind::Left | ChatMemberKind::Banned(_)) {
                        continue;
                    }
                    return Some(identity_of(&member.user));
                }
                Err(GatewayError::NotFound(_)) => continue,
                Err(e) => {
                    warn!("Member lookup for {} in chat {} failed: {}", user_id, chat, e);
                }
            }
        }
        None
    }

    async fn ping(&self) -> Result<Duration, GatewayError> {
        let started = Instant::now();
        self.timed(self.bot.get_me()).await?;
        Ok(started.elapsed())
    }

    async fn indicate_typing(&self, channel_id: i64) {
        let request = self.bot.send_chat_action(ChatId(channel_id), ChatAction::Typing);
        if let Err(e) = self.timed(request).await {
            debug!("Typing indicator failed in {}: {}", channel_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_chats_searched_before_configured_ones() {
        let order = lookup_order(&[-2, -1], &[ChatId(-1), ChatId(-3)]);
        assert_eq!(order, vec![ChatId(-2), ChatId(-1), ChatId(-3)]);
        assert!(lookup_order(&[], &[]).is_empty());
    }
}
