use std::sync::Arc;
use std::time::Duration;

use teloxide::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use order_archiver::archive::{
    inbound_from_telegram, Archiver, DriveClient, Outcome, ServiceAccountAuth, TelegramClient,
};
use order_archiver::chat_log::ChatLogLayer;
use order_archiver::config::Config;

struct BotState {
    config: Config,
    archiver: Archiver,
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "order-archiver.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    let log_dir = config.data_dir.join("logs");
    let log_file = match std::fs::create_dir_all(&log_dir).and_then(|_| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join("order-archiver.log"))
    }) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Cannot open log file in {}: {e}", log_dir.display());
            std::process::exit(1);
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(config.log_filter()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(config.log_filter()),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        let chat_layer = ChatLogLayer::new(bot.clone(), log_chat_id, Duration::from_secs(5));
        registry.with(chat_layer).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting order-archiver...");
    info!("Loaded config from {config_path} (log level {})", config.log_level);
    match config.drive_folder_id {
        Some(ref id) => info!("Order folders go under {id}"),
        None => info!("Order folders go under the drive root"),
    }
    info!("Attachment policy: {:?}, public links: {}", config.attachment_policy, config.share_publicly);

    let auth = match ServiceAccountAuth::load(&config.credentials_file) {
        Ok(auth) => auth,
        Err(e) => {
            error!("Failed to load credentials from {}: {e}", config.credentials_file.display());
            std::process::exit(1);
        }
    };
    info!("Drive service account: {}", auth.client_email());

    if let Err(e) = std::fs::create_dir_all(&config.temp_dir) {
        warn!("Cannot create temp dir {}: {e}", config.temp_dir.display());
    }

    let archiver = Archiver::new(
        Arc::new(TelegramClient::new(bot.clone())),
        Arc::new(DriveClient::new(auth)),
        config.archiver_settings(),
    );
    let state = Arc::new(BotState { config, archiver });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        // One key for every update: messages are handled strictly one at a time.
        .distribution_function(|_| Some(()))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_message(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    if !state.config.is_allowed_chat(msg.chat.id) {
        return Ok(());
    }

    let inbound = inbound_from_telegram(&msg);
    if !inbound.has_media() && inbound.caption.is_none() && inbound.text.is_none() {
        return Ok(());
    }

    match state.archiver.process(&inbound).await {
        Ok(Outcome::Archived { code, summary, reply_id }) => {
            info!(
                "Message {} in chat {}: order {} done ({} ok, replied: {})",
                msg.id,
                msg.chat.id,
                code,
                summary.success_count,
                reply_id.is_some()
            );
        }
        Ok(_) => {}
        Err(e) => warn!("Message {} in chat {} dropped: {e}", msg.id, msg.chat.id),
    }

    Ok(())
}
