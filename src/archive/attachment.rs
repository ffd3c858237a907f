//! Inbound message model and attachment collection.

use serde::Deserialize;

use crate::archive::code::OrderCode;

/// A document attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub file_id: String,
    pub file_name: Option<String>,
}

/// Transport-neutral view of an inbound chat message.
#[derive(Debug, Clone, Default)]
pub struct InboundMessage {
    pub chat_id: i64,
    pub message_id: i64,
    pub caption: Option<String>,
    pub text: Option<String>,
    /// File ids of every size variant of an attached photo, in transport order.
    pub photos: Vec<String>,
    pub video: Option<String>,
    pub document: Option<DocumentRef>,
}

impl InboundMessage {
    pub fn has_media(&self) -> bool {
        !self.photos.is_empty() || self.video.is_some() || self.document.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Photo,
    Video,
    Document,
}

/// One transferable unit of media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub file_id: String,
    /// Name given to the uploaded file.
    pub file_name: String,
}

/// Which media kinds of a message get archived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentPolicy {
    /// Only the first kind present, checked as photo, video, document.
    #[default]
    FirstKind,
    /// Every kind present, in photo, video, document order.
    Independent,
}

/// Enumerate the attachments of `msg` to archive under `code`.
pub fn collect(msg: &InboundMessage, code: &OrderCode, policy: AttachmentPolicy) -> Vec<Attachment> {
    let mut out = Vec::new();

    if !msg.photos.is_empty() {
        out.extend(msg.photos.iter().enumerate().map(|(i, file_id)| Attachment {
            kind: AttachmentKind::Photo,
            file_id: file_id.clone(),
            file_name: format!("{code}_{i}.jpg"),
        }));
        if policy == AttachmentPolicy::FirstKind {
            return out;
        }
    }

    if let Some(ref file_id) = msg.video {
        out.push(Attachment {
            kind: AttachmentKind::Video,
            file_id: file_id.clone(),
            file_name: format!("{code}.mp4"),
        });
        if policy == AttachmentPolicy::FirstKind {
            return out;
        }
    }

    if let Some(ref doc) = msg.document {
        let file_name = doc
            .file_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{code}.dat"));
        out.push(Attachment {
            kind: AttachmentKind::Document,
            file_id: doc.file_id.clone(),
            file_name,
        });
    }

    out
}
