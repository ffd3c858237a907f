use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use teloxide::types::ChatId;
use tracing_subscriber::EnvFilter;

use crate::archive::{AttachmentPolicy, ArchiverSettings};

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
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
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

/// Environment variable overriding `telegram_bot_token`.
pub const ENV_BOT_TOKEN: &str = "BOT_TOKEN";
/// Environment variable overriding `drive_folder_id`.
pub const ENV_DRIVE_FOLDER_ID: &str = "DRIVE_FOLDER_ID";

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    telegram_bot_token: String,
    /// Service-account key JSON for Drive.
    #[serde(default = "default_credentials_file")]
    credentials_file: String,
    /// Folder that holds all order folders. Unset = drive root.
    drive_folder_id: Option<String>,
    /// Make every uploaded file readable by anyone with the link.
    #[serde(default)]
    share_publicly: bool,
    #[serde(default)]
    attachment_policy: AttachmentPolicy,
    /// Only handle messages from these chats (empty = all).
    #[serde(default)]
    allowed_chats: Vec<i64>,
    log_chat_id: Option<i64>,
    /// Default tracing filter when `RUST_LOG` is unset, e.g. "info" or "order_archiver=debug".
    #[serde(default = "default_log_level")]
    log_level: String,
    /// Directory for logs. Defaults to current directory.
    data_dir: Option<String>,
    /// Where attachments are staged during transfer. Defaults to the OS temp dir.
    temp_dir: Option<String>,
}

fn default_credentials_file() -> String {
    "credentials.json".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

pub struct Config {
    pub telegram_bot_token: String,
    pub credentials_file: PathBuf,
    pub drive_folder_id: Option<String>,
    pub share_publicly: bool,
    pub attachment_policy: AttachmentPolicy,
    pub allowed_chats: HashSet<ChatId>,
    pub log_chat_id: Option<ChatId>,
    pub log_level: String,
    /// Directory for state files (logs).
    pub data_dir: PathBuf,
    pub temp_dir: PathBuf,
}

impl Config {
    /// Load from `path`, letting `BOT_TOKEN` and `DRIVE_FOLDER_ID` override the file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    pub fn load_with_env<P, F>(path: P, env: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile { path: path.to_path_buf(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: path.to_path_buf(), source: e })?;

        let env_nonempty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let telegram_bot_token = env_nonempty(ENV_BOT_TOKEN).unwrap_or(file.telegram_bot_token);
        if telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into()
            ));
        }

        if file.credentials_file.trim().is_empty() {
            return Err(ConfigError::Validation("credentials_file must not be empty".into()));
        }

        let drive_folder_id = env_nonempty(ENV_DRIVE_FOLDER_ID)
            .or(file.drive_folder_id)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        if let Err(e) = EnvFilter::try_new(&file.log_level) {
            return Err(ConfigError::Validation(format!(
                "log_level '{}' is not a valid filter: {e}",
                file.log_level
            )));
        }

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let temp_dir = file
            .temp_dir
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);

        Ok(Self {
            telegram_bot_token,
            credentials_file: PathBuf::from(file.credentials_file),
            drive_folder_id,
            share_publicly: file.share_publicly,
            attachment_policy: file.attachment_policy,
            allowed_chats: file.allowed_chats.into_iter().map(ChatId).collect(),
            log_chat_id: file.log_chat_id.map(ChatId),
            log_level: file.log_level,
            data_dir,
            temp_dir,
        })
    }

    pub fn is_allowed_chat(&self, chat_id: ChatId) -> bool {
        self.allowed_chats.is_empty() || self.allowed_chats.contains(&chat_id)
    }

    /// Filter for the stdout and file log layers. `RUST_LOG` wins over `log_level`.
    pub fn log_filter(&self) -> EnvFilter {
        log_filter_for(std::env::var(EnvFilter::DEFAULT_ENV).ok(), &self.log_level)
    }

    /// Settings handed to the archiver.
    pub fn archiver_settings(&self) -> ArchiverSettings {
        ArchiverSettings {
            parent_folder_id: self.drive_folder_id.clone(),
            share_publicly: self.share_publicly,
            attachment_policy: self.attachment_policy,
            temp_dir: self.temp_dir.clone(),
        }
    }
}

fn log_filter_for(rust_log: Option<String>, log_level: &str) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(log_level))
}
