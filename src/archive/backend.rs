//! Interfaces the archiver calls through: remote storage and chat transport.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;

/// A folder-type item returned by a storage query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveItem {
    pub id: String,
    pub name: String,
}

/// Errors from the storage backend.
#[derive(Debug)]
pub enum DriveError {
    /// Request could not be sent or the connection failed.
    Http(String),
    /// Backend answered with a non-success status.
    Api { status: u16, body: String },
    /// Response body was not what we expected.
    Parse(String),
    /// Could not obtain an access token.
    Auth(String),
    /// Local file could not be read.
    Io(std::io::Error),
}

impl fmt::Display for DriveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(e) => write!(f, "HTTP error: {e}"),
            Self::Api { status, body } => write!(f, "API error {status}: {body}"),
            Self::Parse(e) => write!(f, "parse error: {e}"),
            Self::Auth(e) => write!(f, "auth error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for DriveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DriveError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Remote file storage holding one folder per order code.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Non-trashed folders named exactly `name` under `parent` (or the root).
    async fn find_folders(&self, name: &str, parent: Option<&str>) -> Result<Vec<DriveItem>, DriveError>;

    /// Create a folder and return its id.
    async fn create_folder(&self, name: &str, parent: Option<&str>) -> Result<String, DriveError>;

    /// Upload a local file into `folder_id` and return the new item id.
    async fn upload_file(&self, local_path: &Path, name: &str, folder_id: &str) -> Result<String, DriveError>;

    /// Grant anonymous read access to an item.
    async fn share_publicly(&self, item_id: &str) -> Result<(), DriveError>;
}

/// Chat side: fetch attachment bytes, send replies.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Download the file behind `file_id` into `dest`, returning the byte count.
    async fn download(&self, file_id: &str, dest: &Path) -> Result<u64, String>;

    /// Reply to a message; returns the id of the sent message.
    async fn reply(&self, chat_id: i64, message_id: i64, text: &str) -> Result<i64, String>;
}
