//! Shared test doubles: an in-memory gateway and a scripted inference backend.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveTime;
use teloxide::types::UserId;

use gatekeeper::config::Config;
use gatekeeper::context::BotContext;
use gatekeeper::gateway::{Gateway, GatewayError, Identity};
use gatekeeper::inference::{Inference, InferenceError, SearchAnswer, Source};
use gatekeeper::store::Store;

pub const BOT_ID: i64 = 9000;
pub const BOT_USERNAME: &str = "gatekeeper_bot";
pub const OWNER_ID: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Channel { channel_id: i64, content: String },
    Direct { user_id: i64, content: String },
}

/// Records every send. Failure modes are opted into per user or chat.
#[derive(Default)]
pub struct MockGateway {
    sent: Mutex<Vec<Sent>>,
    members: Mutex<HashMap<i64, Identity>>,
    refusing_dm: Mutex<HashSet<i64>>,
    broken_dm: Mutex<HashSet<i64>>,
    missing_channels: Mutex<HashSet<i64>>,
    failing_channels: Mutex<HashSet<i64>>,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_member(&self, user_id: i64, display_name: &str) {
        self.members
            .lock()
            .unwrap()
            .insert(user_id, identity(user_id, display_name));
    }

    /// Direct messages to `user_id` fail with permission denied.
    pub fn refuse_dm(&self, user_id: i64) {
        self.refusing_dm.lock().unwrap().insert(user_id);
    }

    /// Direct messages to `user_id` fail with a generic API error.
    pub fn break_dm(&self, user_id: i64) {
        self.broken_dm.lock().unwrap().insert(user_id);
    }

    pub fn remove_channel(&self, channel_id: i64) {
        self.missing_channels.lock().unwrap().insert(channel_id);
    }

    /// Sends to `channel_id` fail, but the channel still exists.
    pub fn fail_channel(&self, channel_id: i64) {
        self.failing_channels.lock().unwrap().insert(channel_id);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn channel_messages(&self, channel_id: i64) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Channel { channel_id: id, content } if id == channel_id => Some(content),
                _ => None,
            })
            .collect()
    }

    pub fn direct_messages(&self, user_id: i64) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Direct { user_id: id, content } if id == user_id => Some(content),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn send_to_channel(&self, channel_id: i64, content: &str) -> Result<(), GatewayError> {
        if self.missing_channels.lock().unwrap().contains(&channel_id) {
            return Err(GatewayError::NotFound(format!("chat {channel_id}")));
        }
        if self.failing_channels.lock().unwrap().contains(&channel_id) {
            return Err(GatewayError::Api("Bad Request: not enough rights".into()));
        }
        self.sent.lock().unwrap().push(Sent::Channel {
            channel_id,
            content: content.to_string(),
        });
        Ok(())
    }

    async fn send_direct(&self, user_id: i64, content: &str) -> Result<(), GatewayError> {
        if self.refusing_dm.lock().unwrap().contains(&user_id) {
            return Err(GatewayError::PermissionDenied("bot was blocked by the user".into()));
        }
        if self.broken_dm.lock().unwrap().contains(&user_id) {
            return Err(GatewayError::Api("Internal Server Error".into()));
        }
        self.sent.lock().unwrap().push(Sent::Direct {
            user_id,
            content: content.to_string(),
        });
        Ok(())
    }

    async fn channel_exists(&self, channel_id: i64) -> Result<bool, GatewayError> {
        Ok(!self.missing_channels.lock().unwrap().contains(&channel_id))
    }

    async fn resolve_member(&self, user_id: i64, _chats: &[i64]) -> Option<Identity> {
        self.members.lock().unwrap().get(&user_id).cloned()
    }

    async fn ping(&self) -> Result<Duration, GatewayError> {
        Ok(Duration::from_millis(42))
    }
}

/// Replies with a fixed text (and sources, for searches), fails, or stalls.
pub enum MockInference {
    Reply(String),
    Grounded(String, Vec<Source>),
    Fail,
    Stall(Duration),
}

#[async_trait]
impl Inference for MockInference {
    async fn complete(&self, prompt: &str) -> Result<String, InferenceError> {
        self.search(prompt).await.map(|answer| answer.text)
    }

    async fn search(&self, prompt: &str) -> Result<SearchAnswer, InferenceError> {
        match self {
            MockInference::Reply(text) => {
                assert!(prompt.contains("User question:"));
                Ok(SearchAnswer { text: text.clone(), sources: Vec::new() })
            }
            MockInference::Grounded(text, sources) => {
                assert!(prompt.contains("User question:"));
                Ok(SearchAnswer { text: text.clone(), sources: sources.clone() })
            }
            MockInference::Fail => Err(InferenceError::Api("503 Service Unavailable".into())),
            MockInference::Stall(d) => {
                tokio::time::sleep(*d).await;
                Ok(SearchAnswer { text: "too late".to_string(), sources: Vec::new() })
            }
        }
    }
}

pub fn identity(user_id: i64, display_name: &str) -> Identity {
    Identity {
        user_id,
        username: Some(display_name.to_lowercase()),
        display_name: display_name.to_string(),
        is_bot: false,
    }
}

pub fn test_config(data_dir: &Path) -> Config {
    Config {
        owner_ids: vec![UserId(OWNER_ID as u64)],
        telegram_bot_token: "123456789:test".to_string(),
        gemini_api_key: None,
        gemini_model: "gemini-2.5-flash".to_string(),
        known_chats: Vec::new(),
        log_chat_id: None,
        data_dir: data_dir.to_path_buf(),
        timezone: chrono_tz::Africa::Cairo,
        digest_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
        reminder_poll_interval: Duration::from_secs(60),
        digest_buffer: Duration::from_secs(65),
        digest_send_delay: Duration::ZERO,
        digest_max_lines: 10,
        gateway_timeout: Duration::from_secs(15),
        inference_timeout: Duration::from_secs(5),
        personality: None,
    }
}

pub async fn store(data_dir: &Path) -> Arc<Store> {
    let store = Store::new(data_dir);
    store.initialize().await.unwrap();
    Arc::new(store)
}

pub async fn context(
    config: Config,
    gateway: Arc<MockGateway>,
    inference: Option<Arc<dyn Inference>>,
) -> BotContext {
    let store = store(&config.data_dir).await;
    BotContext::new(
        Arc::new(config),
        store,
        gateway,
        inference,
        BOT_ID,
        BOT_USERNAME.to_string(),
    )
}
