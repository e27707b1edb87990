use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use proxyshop_api::commerce::CommerceService;
use proxyshop_api::db;
use proxyshop_bot::config::BotConfig;
use proxyshop_bot::handlers::{schema, BotDeps};
use proxyshop_bot::notifier::NotificationDispatcher;
use proxyshop_bot::pending::PendingReplies;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proxyshop_bot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting proxyshop bot");

    let config = BotConfig::from_env()?;
    let db_pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database connection established");

    let commerce = CommerceService::new(db_pool, config.referral_bonus_percent);
    let bot = Bot::new(&config.bot_token);
    let payment_bot = match &config.payment_bot_token {
        Some(token) => Bot::new(token),
        None => bot.clone(),
    };

    let dispatcher = NotificationDispatcher::new(
        bot.clone(),
        commerce.clone(),
        config.admin_chat_id,
        Duration::from_secs(config.notification_poll_secs),
    );
    tokio::spawn(async move {
        if let Err(e) = dispatcher.start().await {
            tracing::error!("Notification dispatcher stopped: {}", e);
        }
    });

    let deps = BotDeps {
        commerce,
        config: Arc::new(config),
        pending: PendingReplies::new(),
        payment_bot,
    };

    tracing::info!("Bot is polling for updates");
    Dispatcher::builder(bot, schema(deps))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
