use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::{ChatKind, ChatMemberStatus, ChatMemberUpdated, ParseMode, ReplyParameters};
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use gatekeeper::commands::{self, Command, Invocation};
use gatekeeper::config::Config;
use gatekeeper::context::BotContext;
use gatekeeper::gateway::telegram::identity_of;
use gatekeeper::gateway::{chunk_message, Gateway, TelegramGateway, MESSAGE_LIMIT};
use gatekeeper::inference::{GeminiClient, Inference};
use gatekeeper::mention;
use gatekeeper::schedule::{shutdown_channel, ReminderScheduler};
use gatekeeper::store::{MemberStatus, Store};
use gatekeeper::telegram_log::ChatLogLayer;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "gatekeeper.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);
    let gateway: Arc<dyn Gateway> = Arc::new(TelegramGateway::new(
        bot.clone(),
        config.known_chats.clone(),
        config.gateway_timeout,
    ));

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("gatekeeper.log"))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Error: failed to open log file in {}: {e}", log_dir.display());
            std::process::exit(1);
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        let chat_layer = ChatLogLayer::new(Arc::clone(&gateway), log_chat_id.0);
        registry.with(chat_layer).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting gatekeeper...");
    info!("Loaded config from {config_path}");
    info!("Owner IDs: {:?}", config.owner_ids);
    info!("Timezone: {}, digest at {}", config.timezone, config.digest_time.format("%H:%M"));

    let store = Arc::new(Store::new(&config.data_dir));
    if let Err(e) = store.initialize().await {
        error!("Failed to initialize store in {}: {e}", config.data_dir.display());
        std::process::exit(1);
    }

    let inference: Option<Arc<dyn Inference>> = match &config.gemini_api_key {
        Some(key) => match GeminiClient::new(
            key.clone(),
            config.gemini_model.clone(),
            config.inference_timeout,
        ) {
            Ok(client) => {
                info!("Gemini enabled ({})", config.gemini_model);
                Some(Arc::new(client) as Arc<dyn Inference>)
            }
            Err(e) => {
                warn!("Gemini disabled: {e}");
                None
            }
        },
        None => {
            info!("Gemini disabled (no gemini_api_key)");
            None
        }
    };

    let (bot_user_id, bot_username) = match bot.get_me().await {
        Ok(me) => {
            info!("Bot user ID: {}, username: @{}", me.id, me.username());
            (me.id.0 as i64, me.username().to_string())
        }
        Err(e) => {
            warn!("Failed to get bot info: {e}");
            (0, String::new())
        }
    };

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to register commands: {e}");
    }

    let ctx = Arc::new(BotContext::new(
        Arc::clone(&config),
        store,
        gateway,
        inference,
        bot_user_id,
        bot_username,
    ));

    let (trigger, shutdown) = shutdown_channel();
    let reminders = Arc::new(ReminderScheduler::new(
        Arc::clone(&ctx.store),
        Arc::clone(&ctx.gateway),
        config.reminder_poll_interval,
    ));
    let reminder_task = tokio::spawn(reminders.run(shutdown.clone()));
    let digest_task = tokio::spawn(Arc::clone(&ctx.digest).run(shutdown));

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_new_message))
        .branch(Update::filter_chat_member().endpoint(handle_chat_member));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![ctx])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Shutting down, waiting for schedulers...");
    trigger.trigger();
    let (reminder_result, digest_result) = tokio::join!(reminder_task, digest_task);
    for (name, result) in [("reminder", reminder_result), ("digest", digest_result)] {
        if let Err(e) = result {
            error!("{name} scheduler ended abnormally: {e}");
        }
    }
    info!("👋 Bye");
}

async fn handle_new_message(bot: Bot, msg: Message, ctx: Arc<BotContext>) -> ResponseResult<()> {
    let is_group = matches!(msg.chat.kind, ChatKind::Public(_));
    let is_private = matches!(msg.chat.kind, ChatKind::Private(_));

    let user = match msg.from {
        Some(ref u) => u,
        None => return Ok(()),
    };

    if is_group
        && let Err(e) = ctx.store.record_member(msg.chat.id.0, &identity_of(user)).await
    {
        warn!("Failed to record member {} in {}: {e}", user.id, msg.chat.id);
    }

    let text = match msg.text() {
        Some(t) => t,
        None => return Ok(()),
    };

    let replied_to = msg.reply_to_message().and_then(|reply| reply.from.as_ref());

    if let Ok(cmd) = Command::parse(text, &ctx.bot_username) {
        let invocation = Invocation {
            user_id: user.id.0 as i64,
            channel_id: msg.chat.id.0,
            reply_to: replied_to.map(identity_of),
        };
        let reply = commands::execute(&ctx, cmd, &invocation).await;
        send_reply(&bot, &msg, chunk_message(&reply, MESSAGE_LIMIT)).await;
        return Ok(());
    }

    if !is_private && !is_group {
        return Ok(());
    }

    let replies_to_bot = replied_to.is_some_and(|u| u.id.0 as i64 == ctx.bot_user_id);
    if !mention::is_addressed(text, &ctx.bot_username, is_private, replies_to_bot) {
        return Ok(());
    }

    let username = user.username.as_deref().unwrap_or(&user.first_name);
    info!("📨 Message for the bot from {} ({})", username, user.id);

    let chunks = mention::answer(&ctx, msg.chat.id.0, text).await;
    send_reply(&bot, &msg, chunks).await;

    Ok(())
}

/// First chunk as a reply to `msg`, the rest as follow-ups.
async fn send_reply(bot: &Bot, msg: &Message, chunks: Vec<String>) {
    for (i, chunk) in chunks.into_iter().enumerate() {
        let request = bot
            .send_message(msg.chat.id, chunk)
            .parse_mode(ParseMode::Html);
        let result = if i == 0 {
            request.reply_parameters(ReplyParameters::new(msg.id)).await
        } else {
            request.await
        };
        if let Err(e) = result {
            warn!("Failed to reply in {}: {e}", msg.chat.id);
            return;
        }
    }
}

async fn handle_chat_member(update: ChatMemberUpdated, ctx: Arc<BotContext>) -> ResponseResult<()> {
    let chat_id = update.chat.id.0;
    let user = &update.new_chat_member.user;
    let user_id = user.id.0 as i64;

    let result = match update.new_chat_member.status() {
        ChatMemberStatus::Member | ChatMemberStatus::Administrator | ChatMemberStatus::Owner => {
            if matches!(update.old_chat_member.status(), ChatMemberStatus::Left | ChatMemberStatus::Banned) {
                info!("👋 Member joined: {} ({})", user.first_name, user_id);
            }
            ctx.store.record_member(chat_id, &identity_of(user)).await
        }
        ChatMemberStatus::Left => {
            info!("👋 Member left: {} ({})", user.first_name, user_id);
            ctx.store.set_member_status(chat_id, user_id, MemberStatus::Left).await
        }
        ChatMemberStatus::Banned => {
            info!("🚫 Member banned: {} ({})", user.first_name, user_id);
            ctx.store.set_member_status(chat_id, user_id, MemberStatus::Banned).await
        }
        _ => Ok(()),
    };

    if let Err(e) = result {
        warn!("Failed to update roster for {} in {}: {e}", user_id, chat_id);
    }

    Ok(())
}
