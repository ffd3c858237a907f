//! Telegram transport using teloxide.

use std::path::Path;

use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, MessageId, ReplyParameters};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::archive::attachment::{DocumentRef, InboundMessage};
use crate::archive::backend::ChatTransport;

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn download(&self, file_id: &str, dest: &Path) -> Result<u64, String> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(|e| format!("Failed to get file info: {e}"))?;

        let mut out = tokio::fs::File::create(dest)
            .await
            .map_err(|e| format!("Failed to open {}: {e}", dest.display()))?;

        self.bot
            .download_file(&file.path, &mut out)
            .await
            .map_err(|e| format!("Failed to download file: {e}"))?;

        out.flush()
            .await
            .map_err(|e| format!("Failed to flush {}: {e}", dest.display()))?;

        let size = out
            .metadata()
            .await
            .map(|m| m.len())
            .map_err(|e| format!("Failed to stat {}: {e}", dest.display()))?;

        debug!("📥 Downloaded {} ({} bytes)", file_id, size);
        Ok(size)
    }

    async fn reply(&self, chat_id: i64, message_id: i64, text: &str) -> Result<i64, String> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .reply_parameters(ReplyParameters::new(MessageId(message_id as i32)))
            .await
            .map(|msg| msg.id.0 as i64)
            .map_err(|e| {
                let msg = format!("Failed to send: {e}");
                warn!("{}", msg);
                msg
            })
    }
}

/// Convert a teloxide message to the transport-neutral form.
pub fn inbound_from_telegram(msg: &Message) -> InboundMessage {
    let photos = msg
        .photo()
        .map(|sizes| sizes.iter().map(|p| p.file.id.0.clone()).collect())
        .unwrap_or_default();

    InboundMessage {
        chat_id: msg.chat.id.0,
        message_id: msg.id.0 as i64,
        caption: msg.caption().map(str::to_string),
        text: msg.text().map(str::to_string),
        photos,
        video: msg.video().map(|v| v.file.id.0.clone()),
        document: msg.document().map(|d| DocumentRef {
            file_id: d.file.id.0.clone(),
            file_name: d.file_name.clone(),
        }),
    }
}
