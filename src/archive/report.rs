//! Summary reply sent back to the chat.

use tracing::info;

use crate::archive::backend::ChatTransport;
use crate::archive::code::OrderCode;
use crate::archive::transfer::UploadSummary;

/// Text of the summary reply.
pub fn format_summary(code: &OrderCode, success_count: usize, folder_link: &str) -> String {
    format!("📦 Mã đơn: {code}\n✅ Đã upload {success_count} file vào thư mục:\n{folder_link}")
}

/// Reply to the originating message. Stays silent when nothing was uploaded.
///
/// Returns the id of the sent reply, or `None` when no reply was due.
pub async fn report(
    chat: &dyn ChatTransport,
    chat_id: i64,
    message_id: i64,
    code: &OrderCode,
    summary: &UploadSummary,
) -> Result<Option<i64>, String> {
    if summary.success_count == 0 {
        info!("Nothing uploaded for {}, no reply", code);
        return Ok(None);
    }

    let text = format_summary(code, summary.success_count, &summary.folder_link);
    chat.reply(chat_id, message_id, &text).await.map(Some)
}
