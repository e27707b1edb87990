//! Subscription gate run before menu messages and callbacks.

use proxyshop_api::commerce::TelegramIdentity;
use proxyshop_api::models::User;
use teloxide::prelude::*;
use teloxide::types::{ParseMode, Recipient};

use crate::handlers::BotDeps;
use crate::{keyboards, messages, routes};

pub fn identity(from: &teloxide::types::User) -> TelegramIdentity {
    TelegramIdentity {
        chat_id: from.id.0 as i64,
        username: from.username.clone(),
        full_name: Some(from.full_name()).filter(|n| !n.trim().is_empty()),
    }
}

/// Registers the user and checks channel membership. Returns the user when
/// the gate passes; failures are logged and block the update.
pub async fn is_subscribed_user(
    bot: &Bot,
    deps: &BotDeps,
    from: &teloxide::types::User,
    text: Option<&str>,
) -> Option<User> {
    match check(bot, deps, from, text).await {
        Ok(user) => user,
        Err(e) => {
            tracing::error!("Subscription check failed for {}: {}", from.id.0, e);
            None
        }
    }
}

async fn check(
    bot: &Bot,
    deps: &BotDeps,
    from: &teloxide::types::User,
    text: Option<&str>,
) -> anyhow::Result<Option<User>> {
    let referral = match text.and_then(routes::parse_referral) {
        Some(referral_id) => deps.commerce.get_user(referral_id).await?,
        None => None,
    };

    let user = deps.commerce.add_or_get_user(&identity(from), referral.as_ref()).await?;

    let channel = match deps.config.channel.as_deref() {
        Some(channel) if user.force_join_channel => channel,
        _ => return Ok(Some(user)),
    };

    let member = bot
        .get_chat_member(Recipient::ChannelUsername(format!("@{}", channel)), from.id)
        .await?;
    if member.kind.is_privileged() || member.kind.is_member() {
        return Ok(Some(user));
    }

    tracing::debug!("User {} is not a member of @{}", from.id.0, channel);
    bot.send_message(ChatId::from(from.id), messages::please_subscribe(&deps.config.admin_user_name))
        .parse_mode(ParseMode::Html)
        .reply_markup(keyboards::channel_menu(&deps.config.channel_url))
        .await?;

    Ok(None)
}
