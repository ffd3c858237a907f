//! Per-attachment transfer loop: chat -> temp file -> storage.

use std::fmt;
use std::path::{Path, PathBuf};

use tempfile::{Builder, TempPath};
use tracing::{info, warn};

use crate::archive::attachment::Attachment;
use crate::archive::backend::{ChatTransport, DriveError, StorageBackend};
use crate::archive::drive::file_view_link;
use crate::archive::folder::FolderHandle;

/// Why a single attachment was not archived.
#[derive(Debug)]
pub enum TransferError {
    /// Could not create the local temp file.
    TempFile(std::io::Error),
    /// Fetching the bytes from the chat transport failed.
    Retrieval(String),
    /// The storage backend rejected the upload.
    Upload(DriveError),
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TempFile(e) => write!(f, "temp file error: {e}"),
            Self::Retrieval(e) => write!(f, "retrieval failed: {e}"),
            Self::Upload(e) => write!(f, "upload failed: {e}"),
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TempFile(e) => Some(e),
            Self::Upload(e) => Some(e),
            Self::Retrieval(_) => None,
        }
    }
}

/// Outcome for one attachment.
#[derive(Debug)]
pub enum TransferResult {
    Uploaded { file_name: String, link: String },
    Failed { file_name: String, error: TransferError },
}

impl TransferResult {
    pub fn link(&self) -> Option<&str> {
        match self {
            Self::Uploaded { link, .. } => Some(link),
            Self::Failed { .. } => None,
        }
    }
}

/// What a message's transfer loop achieved.
#[derive(Debug)]
pub struct UploadSummary {
    pub success_count: usize,
    pub folder_link: String,
    pub results: Vec<TransferResult>,
}

/// Moves attachments into a folder one after another.
pub struct TransferOrchestrator {
    temp_dir: PathBuf,
    share_publicly: bool,
}

impl TransferOrchestrator {
    pub fn new(temp_dir: PathBuf, share_publicly: bool) -> Self {
        Self { temp_dir, share_publicly }
    }

    /// Transfer every attachment in order. A failed attachment is logged and
    /// skipped; it never stops the rest of the batch.
    pub async fn run(
        &self,
        chat: &dyn ChatTransport,
        storage: &dyn StorageBackend,
        attachments: &[Attachment],
        folder: &FolderHandle,
    ) -> UploadSummary {
        let mut results = Vec::with_capacity(attachments.len());

        for attachment in attachments {
            let file_name = attachment.file_name.clone();
            match self.transfer(chat, storage, attachment, folder).await {
                Ok(link) => results.push(TransferResult::Uploaded { file_name, link }),
                Err(error) => {
                    warn!("❌ Failed to archive {:?} {}: {}", attachment.kind, file_name, error);
                    results.push(TransferResult::Failed { file_name, error });
                }
            }
        }

        UploadSummary {
            success_count: results.iter().filter(|r| r.link().is_some()).count(),
            folder_link: folder.link(),
            results,
        }
    }

    async fn transfer(
        &self,
        chat: &dyn ChatTransport,
        storage: &dyn StorageBackend,
        attachment: &Attachment,
        folder: &FolderHandle,
    ) -> Result<String, TransferError> {
        let local = self.acquire(&attachment.file_name).map_err(TransferError::TempFile)?;
        let outcome = self.fetch_and_upload(chat, storage, attachment, folder, &local).await;
        release(local);
        outcome
    }

    /// Reserve a temp path; the file is removed when the returned guard drops.
    /// Only the extension of `file_name` reaches the local path, so long
    /// document names cannot overflow the filesystem's name limit.
    fn acquire(&self, file_name: &str) -> std::io::Result<TempPath> {
        let suffix = local_suffix(file_name);
        Ok(Builder::new()
            .prefix("order-")
            .suffix(&suffix)
            .tempfile_in(&self.temp_dir)?
            .into_temp_path())
    }

    async fn fetch_and_upload(
        &self,
        chat: &dyn ChatTransport,
        storage: &dyn StorageBackend,
        attachment: &Attachment,
        folder: &FolderHandle,
        local: &Path,
    ) -> Result<String, TransferError> {
        chat.download(&attachment.file_id, local)
            .await
            .map_err(TransferError::Retrieval)?;

        let file_id = storage
            .upload_file(local, &attachment.file_name, &folder.id)
            .await
            .map_err(TransferError::Upload)?;

        if self.share_publicly
            && let Err(e) = storage.share_publicly(&file_id).await
        {
            warn!("Could not share {} publicly: {}", attachment.file_name, e);
        }

        let link = file_view_link(&file_id);
        info!("✅ {} -> {}", attachment.file_name, link);
        Ok(link)
    }
}

fn release(local: TempPath) {
    let path = local.to_path_buf();
    if let Err(e) = local.close() {
        warn!("Failed to remove temp file {}: {}", path.display(), e);
    }
}

/// Longest extension kept on a temp file name.
const MAX_LOCAL_EXT: usize = 16;

/// `.ext` taken from `file_name`, reduced to ASCII alphanumerics; empty if none.
fn local_suffix(file_name: &str) -> String {
    let ext: String = Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy())
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(MAX_LOCAL_EXT)
        .collect();
    if ext.is_empty() { ext } else { format!(".{ext}") }
}
