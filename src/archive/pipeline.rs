//! Per-message driver: code -> attachments -> folder -> transfers -> reply.
//!
//! Attachments are collected before the folder is resolved, so a message that
//! carries a code but no media never touches storage and leaves no empty folder.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::archive::attachment::{collect, AttachmentPolicy, InboundMessage};
use crate::archive::backend::{ChatTransport, DriveError, StorageBackend};
use crate::archive::code::{extract_order_code, searchable_text, OrderCode};
use crate::archive::folder::FolderResolver;
use crate::archive::report::report;
use crate::archive::transfer::{TransferOrchestrator, UploadSummary};

/// Settings the archiver is built with. The caller fills these in from its
/// own configuration.
#[derive(Debug, Clone)]
pub struct ArchiverSettings {
    /// Folder holding all order folders; `None` means the drive root.
    pub parent_folder_id: Option<String>,
    pub share_publicly: bool,
    pub attachment_policy: AttachmentPolicy,
    pub temp_dir: PathBuf,
}

/// Errors that abort a whole message.
#[derive(Debug)]
pub enum ArchiveError {
    FolderResolution { code: OrderCode, source: DriveError },
}

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FolderResolution { code, source } => {
                write!(f, "failed to resolve folder for {code}: {source}")
            }
        }
    }
}

impl std::error::Error for ArchiveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::FolderResolution { source, .. } => Some(source),
        }
    }
}

/// How a message was handled.
#[derive(Debug)]
pub enum Outcome {
    /// No order code in the message.
    NoCode,
    /// A code, but nothing we know how to archive.
    NoAttachments { code: OrderCode },
    /// Transfers ran. `reply_id` is set when a summary was sent.
    Archived {
        code: OrderCode,
        summary: UploadSummary,
        reply_id: Option<i64>,
    },
}

/// Archives order media from chat messages into per-order folders.
pub struct Archiver {
    chat: Arc<dyn ChatTransport>,
    storage: Arc<dyn StorageBackend>,
    resolver: FolderResolver,
    orchestrator: TransferOrchestrator,
    policy: AttachmentPolicy,
}

impl Archiver {
    pub fn new(chat: Arc<dyn ChatTransport>, storage: Arc<dyn StorageBackend>, settings: ArchiverSettings) -> Self {
        Self {
            chat,
            storage,
            resolver: FolderResolver::new(settings.parent_folder_id),
            orchestrator: TransferOrchestrator::new(settings.temp_dir, settings.share_publicly),
            policy: settings.attachment_policy,
        }
    }

    /// Handle one inbound message from start to finish.
    pub async fn process(&self, msg: &InboundMessage) -> Result<Outcome, ArchiveError> {
        let text = searchable_text(msg.caption.as_deref(), msg.text.as_deref());
        let Some(code) = extract_order_code(text) else {
            debug!("No order code in message {}", msg.message_id);
            return Ok(Outcome::NoCode);
        };

        let attachments = collect(msg, &code, self.policy);
        if attachments.is_empty() {
            debug!("Order {} in message {} has no media", code, msg.message_id);
            return Ok(Outcome::NoAttachments { code });
        }

        info!("📦 Order {}: {} attachment(s)", code, attachments.len());

        let folder = match self.resolver.resolve(self.storage.as_ref(), &code).await {
            Ok(folder) => folder,
            Err(source) => {
                error!("Folder resolution failed for {}: {}", code, source);
                return Err(ArchiveError::FolderResolution { code, source });
            }
        };

        let summary = self
            .orchestrator
            .run(self.chat.as_ref(), self.storage.as_ref(), &attachments, &folder)
            .await;

        info!(
            "Order {}: {}/{} uploaded to {}",
            code,
            summary.success_count,
            attachments.len(),
            summary.folder_link
        );

        let reply_id = match report(self.chat.as_ref(), msg.chat_id, msg.message_id, &code, &summary).await {
            Ok(id) => id,
            Err(e) => {
                warn!("Summary reply for {} not sent: {}", code, e);
                None
            }
        };

        Ok(Outcome::Archived { code, summary, reply_id })
    }
}
