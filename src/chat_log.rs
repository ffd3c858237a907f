//! Tracing layer that mirrors log lines into a Telegram chat.
//!
//! WARN and ERROR go out at once; INFO is batched and flushed periodically.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// Telegram rejects messages above 4096 chars.
const MAX_MESSAGE_CHARS: usize = 4000;

/// Flush INFO lines early once this many are waiting.
const MAX_BATCH: usize = 50;

#[derive(Debug, PartialEq, Eq)]
enum LogLine {
    Urgent(String),
    Batched(String),
}

fn classify(level: Level, message: String) -> Option<LogLine> {
    if level == Level::ERROR {
        Some(LogLine::Urgent(format!("❌ {message}")))
    } else if level == Level::WARN {
        Some(LogLine::Urgent(format!("⚠️ {message}")))
    } else if level == Level::INFO {
        Some(LogLine::Batched(message))
    } else {
        None
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}...")
}

pub struct ChatLogLayer {
    tx: mpsc::UnboundedSender<LogLine>,
}

impl ChatLogLayer {
    /// Spawn the sender task. Must be called inside a tokio runtime.
    pub fn new(bot: Bot, chat_id: ChatId, flush_every: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogLine>();

        tokio::spawn(async move {
            let mut pending: Vec<String> = Vec::new();
            let mut ticker = tokio::time::interval(flush_every);

            loop {
                tokio::select! {
                    line = rx.recv() => match line {
                        Some(LogLine::Urgent(text)) => send(&bot, chat_id, &text).await,
                        Some(LogLine::Batched(text)) => {
                            pending.push(text);
                            if pending.len() >= MAX_BATCH {
                                flush(&bot, chat_id, &mut pending).await;
                            }
                        }
                        None => {
                            flush(&bot, chat_id, &mut pending).await;
                            break;
                        }
                    },
                    _ = ticker.tick() => flush(&bot, chat_id, &mut pending).await,
                }
            }
        });

        Self { tx }
    }
}

async fn send(bot: &Bot, chat_id: ChatId, text: &str) {
    let text = truncate_chars(text, MAX_MESSAGE_CHARS);
    if let Err(e) = bot.send_message(chat_id, text).await {
        // Can't use tracing here without feeding the layer back into itself.
        eprintln!("Failed to send log to Telegram: {e}");
    }
}

async fn flush(bot: &Bot, chat_id: ChatId, pending: &mut Vec<String>) {
    if pending.is_empty() {
        return;
    }
    let combined = pending.join("\n");
    pending.clear();
    send(bot, chat_id, &combined).await;
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message.push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for ChatLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::INFO {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        if let Some(line) = classify(level, visitor.message)
            && self.tx.send(line).is_err()
        {
            eprintln!("Log channel closed, message dropped");
        }
    }
}
