//! Maps an order code to its folder in the storage backend.

use tracing::info;

use crate::archive::backend::{DriveError, StorageBackend};
use crate::archive::code::OrderCode;
use crate::archive::drive::folder_link;

/// Opaque id of a remote folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderHandle {
    pub id: String,
}

impl FolderHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Link opening the folder in the Drive UI.
    pub fn link(&self) -> String {
        folder_link(&self.id)
    }
}

/// Finds or creates the folder for an order code.
///
/// Nothing is cached: every call asks the backend, so folders created by an
/// earlier process are found again after a restart. Two overlapping calls for
/// the same code may both miss and both create; that is tolerated.
pub struct FolderResolver {
    parent: Option<String>,
}

impl FolderResolver {
    pub fn new(parent: Option<String>) -> Self {
        Self { parent }
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub async fn resolve(
        &self,
        storage: &dyn StorageBackend,
        code: &OrderCode,
    ) -> Result<FolderHandle, DriveError> {
        let existing = storage.find_folders(code.as_str(), self.parent()).await?;

        if let Some(first) = existing.into_iter().next() {
            info!("📁 Reusing folder {} ({}) for {}", first.name, first.id, code);
            return Ok(FolderHandle::new(first.id));
        }

        let id = storage.create_folder(code.as_str(), self.parent()).await?;
        info!("📁 Created folder {} for {}", id, code);
        Ok(FolderHandle::new(id))
    }
}
