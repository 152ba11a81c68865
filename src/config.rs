use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use teloxide::types::{ChatId, UserId};

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Unknown IANA timezone name.
    InvalidTimezone { name: String },
    /// Digest time is not `HH:MM`.
    InvalidDigestTime { value: String, source: chrono::ParseError },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::InvalidTimezone { name } => write!(f, "unknown timezone '{}'", name),
            Self::InvalidDigestTime { value, source } => {
                write!(f, "invalid digest_time '{}' (expected HH:MM): {}", value, source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::InvalidDigestTime { source, .. } => Some(source),
            Self::InvalidTimezone { .. } | Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    owner_ids: Vec<u64>,
    telegram_bot_token: String,
    /// Gemini API key for mention answering. Empty disables inference.
    #[serde(default)]
    gemini_api_key: String,
    #[serde(default = "default_gemini_model")]
    gemini_model: String,
    /// Chats searched (in order) when resolving a user's display identity.
    #[serde(default)]
    known_chats: Vec<i64>,
    log_chat_id: Option<i64>,
    /// Directory for the databases and logs. Defaults to current directory.
    data_dir: Option<String>,
    /// IANA zone used for schedule input and the daily digest.
    #[serde(default = "default_timezone")]
    timezone: String,
    /// Local time of the daily digest, `HH:MM`.
    #[serde(default = "default_digest_time")]
    digest_time: String,
    #[serde(default = "default_reminder_poll_secs")]
    reminder_poll_secs: u64,
    #[serde(default = "default_digest_buffer_secs")]
    digest_buffer_secs: u64,
    #[serde(default = "default_digest_send_delay_ms")]
    digest_send_delay_ms: u64,
    #[serde(default = "default_digest_max_lines")]
    digest_max_lines: usize,
    #[serde(default = "default_gateway_timeout_secs")]
    gateway_timeout_secs: u64,
    #[serde(default = "default_inference_timeout_secs")]
    inference_timeout_secs: u64,
    /// Custom identity for the persona preamble.
    personality: Option<String>,
}

fn default_gemini_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_timezone() -> String {
    "Africa/Cairo".to_string()
}

fn default_digest_time() -> String {
    "12:00".to_string()
}

fn default_reminder_poll_secs() -> u64 {
    60
}

fn default_digest_buffer_secs() -> u64 {
    65
}

fn default_digest_send_delay_ms() -> u64 {
    1000
}

fn default_digest_max_lines() -> usize {
    10
}

fn default_gateway_timeout_secs() -> u64 {
    15
}

fn default_inference_timeout_secs() -> u64 {
    60
}

pub struct Config {
    /// Owner IDs. Owners may trigger the digest manually.
    pub owner_ids: Vec<UserId>,
    pub telegram_bot_token: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub known_chats: Vec<ChatId>,
    pub log_chat_id: Option<ChatId>,
    /// Directory for the databases and logs.
    pub data_dir: PathBuf,
    pub timezone: Tz,
    pub digest_time: NaiveTime,
    pub reminder_poll_interval: Duration,
    pub digest_buffer: Duration,
    pub digest_send_delay: Duration,
    pub digest_max_lines: usize,
    pub gateway_timeout: Duration,
    pub inference_timeout: Duration,
    pub personality: Option<String>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        if file.owner_ids.is_empty() {
            return Err(ConfigError::Validation("owner_ids must contain at least one owner ID".into()));
        }
        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into()
            ));
        }
        if file.reminder_poll_secs == 0 {
            return Err(ConfigError::Validation("reminder_poll_secs must be greater than zero".into()));
        }
        if file.digest_max_lines == 0 {
            return Err(ConfigError::Validation("digest_max_lines must be greater than zero".into()));
        }

        let timezone: Tz = file
            .timezone
            .parse()
            .map_err(|_| ConfigError::InvalidTimezone { name: file.timezone.clone() })?;
        let digest_time = NaiveTime::parse_from_str(file.digest_time.trim(), "%H:%M")
            .map_err(|e| ConfigError::InvalidDigestTime { value: file.digest_time.clone(), source: e })?;

        let gemini_api_key = Some(file.gemini_api_key).filter(|k| !k.trim().is_empty());
        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            owner_ids: file.owner_ids.into_iter().map(UserId).collect(),
            telegram_bot_token: file.telegram_bot_token,
            gemini_api_key,
            gemini_model: file.gemini_model,
            known_chats: file.known_chats.into_iter().map(ChatId).collect(),
            log_chat_id: file.log_chat_id.map(ChatId),
            data_dir,
            timezone,
            digest_time,
            reminder_poll_interval: Duration::from_secs(file.reminder_poll_secs),
            digest_buffer: Duration::from_secs(file.digest_buffer_secs),
            digest_send_delay: Duration::from_millis(file.digest_send_delay_ms),
            digest_max_lines: file.digest_max_lines,
            gateway_timeout: Duration::from_secs(file.gateway_timeout_secs),
            inference_timeout: Duration::from_secs(file.inference_timeout_secs),
            personality: file.personality.filter(|p| !p.trim().is_empty()),
        })
    }

    pub fn is_owner(&self, user_id: UserId) -> bool {
        self.owner_ids.contains(&user_id)
    }
}
