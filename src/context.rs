//! Shared services handed to every command and mention handler.

use std::sync::Arc;

use crate::config::Config;
use crate::gateway::Gateway;
use crate::inference::Inference;
use crate::schedule::{DigestScheduler, DigestSettings};
use crate::store::Store;

pub struct BotContext {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub gateway: Arc<dyn Gateway>,
    /// None when no Gemini key is configured.
    pub inference: Option<Arc<dyn Inference>>,
    /// Also used by `/digest` to run a digest on demand.
    pub digest: Arc<DigestScheduler>,
    pub bot_user_id: i64,
    pub bot_username: String,
}

impl BotContext {
    pub fn new(
        config: Arc<Config>,
        store: Arc<Store>,
        gateway: Arc<dyn Gateway>,
        inference: Option<Arc<dyn Inference>>,
        bot_user_id: i64,
        bot_username: String,
    ) -> Self {
        let digest = Arc::new(DigestScheduler::new(
            Arc::clone(&store),
            Arc::clone(&gateway),
            digest_settings(&config),
        ));
        Self {
            config,
            store,
            gateway,
            inference,
            digest,
            bot_user_id,
            bot_username,
        }
    }
}

pub fn digest_settings(config: &Config) -> DigestSettings {
    DigestSettings {
        zone: config.timezone,
        at: config.digest_time,
        buffer: config.digest_buffer,
        send_delay: config.digest_send_delay,
        max_lines: config.digest_max_lines,
    }
}
