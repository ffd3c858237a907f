//! Order archiving - copies media from order messages into per-order Drive folders.

pub mod attachment;
pub mod auth;
pub mod backend;
pub mod code;
pub mod drive;
pub mod folder;
pub mod pipeline;
pub mod report;
pub mod telegram;
pub mod transfer;


pub use attachment::{AttachmentPolicy, InboundMessage};
pub use auth::ServiceAccountAuth;
pub use backend::{ChatTransport, StorageBackend};
pub use drive::DriveClient;
pub use pipeline::{ArchiveError, Archiver, ArchiverSettings, Outcome};
pub use telegram::{inbound_from_telegram, TelegramClient};
