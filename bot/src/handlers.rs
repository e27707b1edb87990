//! Dispatcher schema and the message and callback handlers.

use std::sync::Arc;

use chrono::Utc;
use proxyshop_api::commerce::{self, CommerceError, CommerceService};
use proxyshop_api::models::{Account, User};
use proxyshop_api::subscription::subscription_url;
use proxyshop_api::utils::{format_price, jalali_date, readable_size_short};
use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{ForceReply, InlineKeyboardMarkup, InputFile, MessageId, ParseMode, ReplyMarkup};

use crate::config::BotConfig;
use crate::filters::{identity, is_subscribed_user};
use crate::pending::{PendingPrompt, PendingReplies};
use crate::routes::{CallbackAction, MessageRoute};
use crate::{captions, keyboards, messages};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type HandlerResult = Result<(), HandlerError>;

/// Shared state injected into every handler
#[derive(Clone)]
pub struct BotDeps {
    pub commerce: CommerceService,
    pub config: Arc<BotConfig>,
    pub pending: PendingReplies,
    /// Bot that delivers payment receipts to the admin
    pub payment_bot: Bot,
}

impl BotDeps {
    fn admin_chat(&self) -> ChatId {
        ChatId(self.config.admin_chat_id)
    }
}

pub fn schema(deps: BotDeps) -> UpdateHandler<HandlerError> {
    dptree::entry()
        .branch(web_app_data_handler())
        .branch(receipt_handler(deps.clone()))
        .branch(reply_handler(deps.clone()))
        .branch(message_handler(deps.clone()))
        .branch(callback_handler(deps))
}

fn web_app_data_handler() -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| msg.web_app_data().is_some())
        .endpoint(|bot: Bot, msg: Message| async move { handle_web_app_data(&bot, &msg).await })
}

fn receipt_handler(deps: BotDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| msg.photo().is_some() || msg.document().is_some())
        .endpoint(move |bot: Bot, msg: Message| {
            let deps = deps.clone();
            async move { handle_receipt(&bot, &deps, &msg).await }
        })
}

fn reply_handler(deps: BotDeps) -> UpdateHandler<HandlerError> {
    let pending = deps.pending.clone();
    Update::filter_message()
        .filter_async(move |msg: Message| {
            let pending = pending.clone();
            async move {
                match (msg.reply_to_message(), msg.text()) {
                    (Some(prompt), Some(_)) => pending.contains(prompt.id.0, msg.chat.id.0).await,
                    _ => false,
                }
            }
        })
        .endpoint(move |bot: Bot, msg: Message| {
            let deps = deps.clone();
            async move { handle_reply(&bot, &deps, &msg).await }
        })
}

fn message_handler(deps: BotDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| msg.text().is_some())
        .endpoint(move |bot: Bot, msg: Message| {
            let deps = deps.clone();
            async move {
                let Some(from) = msg.from.as_ref() else {
                    return Ok(());
                };
                let text = msg.text().unwrap_or_default();
                let Some(user) = is_subscribed_user(&bot, &deps, from, Some(text)).await else {
                    return Ok(());
                };
                handle_message(&bot, &deps, &msg, &user, MessageRoute::from_text(text)).await
            }
        })
}

/// Every callback gets answered unless its handler already did so
fn needs_answer(outcome: &Result<bool, HandlerError>) -> bool {
    !matches!(outcome, Ok(true))
}

fn callback_handler(deps: BotDeps) -> UpdateHandler<HandlerError> {
    Update::filter_callback_query().endpoint(move |bot: Bot, q: CallbackQuery| {
        let deps = deps.clone();
        async move {
            let action = CallbackAction::parse(q.data.as_deref().unwrap_or_default());

            let outcome = match is_subscribed_user(&bot, &deps, &q.from, None).await {
                Some(user) => handle_callback(&bot, &deps, &q, &user, action).await,
                None => Ok(false),
            };

            if needs_answer(&outcome) {
                if let Err(e) = bot.answer_callback_query(q.id.clone()).await {
                    tracing::debug!("Failed to answer callback query: {}", e);
                }
            }
            outcome.map(|_| ())
        }
    })
}

// ============================================================================
// Messages
// ============================================================================

async fn send_html(bot: &Bot, chat_id: ChatId, text: impl Into<String>) -> Result<Message, teloxide::RequestError> {
    bot.send_message(chat_id, text).parse_mode(ParseMode::Html).await
}

async fn send_with(
    bot: &Bot,
    chat_id: ChatId,
    text: impl Into<String>,
    markup: impl Into<ReplyMarkup>,
) -> Result<Message, teloxide::RequestError> {
    bot.send_message(chat_id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(markup)
        .await
}

async fn handle_web_app_data(bot: &Bot, msg: &Message) -> HandlerResult {
    if let Some(data) = msg.web_app_data() {
        tracing::info!("Web app data from chat {}: {}", msg.chat.id.0, data.data);
    }
    bot.send_message(msg.chat.id, "Thank you!").await?;
    Ok(())
}

async fn handle_message(bot: &Bot, deps: &BotDeps, msg: &Message, user: &User, route: MessageRoute) -> HandlerResult {
    let chat_id = msg.chat.id;
    let config = &deps.config;

    match route {
        MessageRoute::Game => match keyboards::game(&config.web_app_url) {
            Some(markup) => {
                send_with(bot, chat_id, "Play!", markup).await?;
            }
            None => tracing::warn!("WEB_APP_URL is not a valid URL: {}", config.web_app_url),
        },
        MessageRoute::Welcome | MessageRoute::Support => {
            send_welcome(bot, deps, chat_id).await?;
        }
        MessageRoute::Help => {
            send_with(bot, chat_id, messages::USAGE_HELP_MESSAGE, keyboards::help_links(&config.help_links)).await?;
        }
        MessageRoute::PriceList => {
            send_html(bot, chat_id, messages::PRICE_LIST).await?;
        }
        MessageRoute::MyProfile => {
            let referral_count = deps.commerce.referral_count(user).await?;
            let text = messages::my_profile(
                user.id,
                &config.bot_user_name,
                &user.display_name(),
                &user.balance_readable().unwrap_or_else(|| "0".to_string()),
                referral_count,
            );
            send_html(bot, chat_id, text).await?;
        }
        MessageRoute::Payment => {
            let payment_accounts = deps.commerce.available_payment_accounts().await?;
            let text = if payment_accounts.is_empty() {
                messages::no_bank_card_available(&config.admin_user_name)
            } else {
                messages::CARD_PAYMENT_MESSAGE.to_string()
            };
            send_with(bot, chat_id, text, keyboards::payment_card_step_0(&payment_accounts)).await?;
        }
        MessageRoute::MyServices => {
            send_account_list(bot, deps, chat_id, user).await?;
        }
        MessageRoute::GetTestService => {
            get_test_service(bot, deps, chat_id, user).await?;
        }
        MessageRoute::BuyOrRechargeService => {
            send_service_menu(bot, deps, chat_id).await?;
        }
        MessageRoute::Unknown => {
            tracing::debug!("Unhandled message from chat {}", chat_id.0);
        }
    }

    Ok(())
}

async fn send_welcome(bot: &Bot, deps: &BotDeps, chat_id: ChatId) -> Result<Message, teloxide::RequestError> {
    let text = messages::welcome(&deps.config.admin_user_name, &deps.config.channel_url);
    send_with(bot, chat_id, text, keyboards::main_menu()).await
}

async fn send_account_list(bot: &Bot, deps: &BotDeps, chat_id: ChatId, user: &User) -> HandlerResult {
    let accounts = deps.commerce.user_accounts(user).await?;
    if accounts.is_empty() {
        send_html(bot, chat_id, messages::NO_ACCOUNT_MESSAGE).await?;
    } else {
        send_with(bot, chat_id, messages::ACCOUNT_LIST_MESSAGE, keyboards::my_accounts(&accounts)).await?;
    }
    Ok(())
}

async fn send_service_menu(bot: &Bot, deps: &BotDeps, chat_id: ChatId) -> HandlerResult {
    let services = deps.commerce.available_services().await?;
    if services.is_empty() {
        send_html(bot, chat_id, messages::BUY_OR_RECHARGE_SERVICE).await?;
    } else {
        send_with(
            bot,
            chat_id,
            messages::BUY_OR_RECHARGE_SERVICE,
            keyboards::buy_or_recharge_services(&services),
        )
        .await?;
    }
    Ok(())
}

async fn get_test_service(bot: &Bot, deps: &BotDeps, chat_id: ChatId, user: &User) -> HandlerResult {
    let config = &deps.config;
    let allowed = deps
        .commerce
        .allow_to_get_new_test_service(user, config.test_service_id, config.test_account_interval_days)
        .await?;

    if !allowed || config.test_service_id <= 0 {
        send_html(bot, chat_id, messages::get_test_service_not_allowed(config.test_account_interval_days)).await?;
        return Ok(());
    }

    let full_name = user.display_name();
    match deps
        .commerce
        .place_paid_order(user.telegram_chat_id, 0, config.test_service_id)
        .await
    {
        Ok(order) => {
            tracing::info!("Test order {} placed for chat {}", order.id, user.telegram_chat_id);
            send_with(bot, chat_id, messages::GET_TEST_SERVICE_SUCCESS, keyboards::main_menu()).await?;
            send_html(
                bot,
                deps.admin_chat(),
                messages::get_test_service_admin_alert(user.telegram_chat_id, &full_name),
            )
            .await?;
        }
        Err(e) => {
            tracing::error!("Failed to place test order for chat {}: {}", user.telegram_chat_id, e);
            send_html(
                bot,
                deps.admin_chat(),
                messages::get_test_service_error_admin_alert(user.telegram_chat_id, &full_name),
            )
            .await?;
        }
    }

    Ok(())
}

// ============================================================================
// Receipts and replies
// ============================================================================

/// Telegram file ids belong to the bot that received them, so the receipt
/// is downloaded and uploaded again through the payment bot.
async fn relay_receipt(bot: &Bot, deps: &BotDeps, msg: &Message, caption: String) -> HandlerResult {
    let (file_id, file_name) = if let Some(photos) = msg.photo() {
        let largest = photos
            .iter()
            .max_by_key(|p| p.width * p.height)
            .ok_or("Photo message without sizes")?;
        (largest.file.id.clone(), "receipt.jpg".to_string())
    } else if let Some(document) = msg.document() {
        let name = document.file_name.clone().unwrap_or_else(|| "receipt".to_string());
        (document.file.id.clone(), name)
    } else {
        return Err("Receipt without a photo or document".into());
    };

    let file = bot.get_file(file_id).await?;
    let mut content = Vec::new();
    bot.download_file(&file.path, &mut content).await?;
    let input = InputFile::memory(content).file_name(file_name);

    if msg.photo().is_some() {
        deps.payment_bot
            .send_photo(deps.admin_chat(), input)
            .caption(caption)
            .parse_mode(ParseMode::Html)
            .await?;
    } else {
        deps.payment_bot
            .send_document(deps.admin_chat(), input)
            .caption(caption)
            .parse_mode(ParseMode::Html)
            .await?;
    }

    Ok(())
}

async fn handle_receipt(bot: &Bot, deps: &BotDeps, msg: &Message) -> HandlerResult {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let who = identity(from);
    let full_name = who.full_name.clone().unwrap_or_default();

    let history = deps.commerce.user_payment_history(who.chat_id).await.unwrap_or_else(|e| {
        tracing::warn!("Failed to load payment history for {}: {}", who.chat_id, e);
        String::new()
    });
    let mut caption = messages::payment_receipt_detail(
        who.chat_id,
        &full_name,
        who.username.as_deref().unwrap_or("-"),
        msg.caption().unwrap_or_default(),
    );
    caption.push_str(&proxyshop_api::utils::sanitize_html(&history));

    match relay_receipt(bot, deps, msg, caption).await {
        Ok(()) => {
            tracing::info!("Payment receipt from {} sent to admin", who.chat_id);
            send_with(bot, msg.chat.id, messages::GET_PAYMENT_RECEIPT_SUCCESS, keyboards::main_menu()).await?;
        }
        Err(e) => {
            tracing::error!("Failed to relay payment receipt from {}: {}", who.chat_id, e);
            send_html(bot, msg.chat.id, messages::GET_PAYMENT_RECEIPT_ERROR).await?;
            let notice = messages::payment_receipt_error_admin(&full_name, who.chat_id);
            if let Err(e) = send_html(bot, deps.admin_chat(), notice).await {
                tracing::error!("Failed to notify admin about receipt from {}: {}", who.chat_id, e);
            }
            if let Err(e) = bot.forward_message(deps.admin_chat(), msg.chat.id, msg.id).await {
                tracing::error!("Failed to forward receipt from {}: {}", who.chat_id, e);
            }
        }
    }

    Ok(())
}

async fn handle_reply(bot: &Bot, deps: &BotDeps, msg: &Message) -> HandlerResult {
    let (Some(prompt_msg), Some(text)) = (msg.reply_to_message(), msg.text()) else {
        return Ok(());
    };
    let chat_id = msg.chat.id;
    let Some(prompt) = deps.pending.take(prompt_msg.id.0, chat_id.0).await else {
        return Ok(());
    };

    match prompt {
        PendingPrompt::ChangeServiceName { account_id } => {
            match deps
                .commerce
                .update_account_user_title(chat_id.0, account_id, text)
                .await
            {
                Ok(account) => {
                    tracing::info!("Account {} renamed by chat {}", account.id, chat_id.0);
                    send_with(bot, chat_id, messages::CHANGE_SERVICE_NAME_SUCCESS, keyboards::main_menu()).await?;
                }
                Err(CommerceError::Database(e)) => return Err(e.into()),
                Err(e) => {
                    tracing::warn!("Rename of account {} rejected: {}", account_id, e);
                    send_html(bot, chat_id, messages::CHANGE_SERVICE_NAME_ERROR).await?;
                }
            }
        }
        PendingPrompt::PaymentReceipt { account_id } => {
            // Text instead of a receipt photo; ask again
            let prompt = PendingPrompt::PaymentReceipt { account_id };
            ask_for_reply(bot, deps, chat_id, messages::GET_PAYMENT_RECEIPT_MESSAGE, prompt).await?;
        }
    }

    Ok(())
}

async fn ask_for_reply(bot: &Bot, deps: &BotDeps, chat_id: ChatId, text: &str, prompt: PendingPrompt) -> HandlerResult {
    let sent = send_with(bot, chat_id, text, ForceReply::new()).await?;
    deps.pending.track(sent.id.0, chat_id.0, prompt).await;
    Ok(())
}

// ============================================================================
// Callbacks
// ============================================================================

/// Chat and message a callback button belongs to
struct Origin {
    chat_id: ChatId,
    message_id: Option<MessageId>,
}

impl Origin {
    fn of(q: &CallbackQuery) -> Self {
        match q.message.as_ref() {
            Some(m) => Self {
                chat_id: m.chat().id,
                message_id: Some(m.id()),
            },
            None => Self {
                chat_id: ChatId::from(q.from.id),
                message_id: None,
            },
        }
    }

    async fn delete(&self, bot: &Bot) {
        if let Some(message_id) = self.message_id {
            if let Err(e) = bot.delete_message(self.chat_id, message_id).await {
                tracing::debug!("Failed to delete message {}: {}", message_id.0, e);
            }
        }
    }

    /// Edits the button's message in place, or sends a new one when it is gone
    async fn edit(
        &self,
        bot: &Bot,
        text: impl Into<String>,
        markup: Option<InlineKeyboardMarkup>,
    ) -> Result<(), teloxide::RequestError> {
        match self.message_id {
            Some(message_id) => {
                let request = bot
                    .edit_message_text(self.chat_id, message_id, text)
                    .parse_mode(ParseMode::Html);
                match markup {
                    Some(markup) => request.reply_markup(markup).await?,
                    None => request.await?,
                };
            }
            None => {
                let request = bot.send_message(self.chat_id, text).parse_mode(ParseMode::Html);
                match markup {
                    Some(markup) => request.reply_markup(markup).await?,
                    None => request.await?,
                };
            }
        }
        Ok(())
    }
}

async fn owned_account(deps: &BotDeps, user: &User, account_id: i64) -> Result<Option<Account>, CommerceError> {
    let account = deps.commerce.get_account(account_id).await?;
    Ok(account.filter(|a| a.user_id == user.id))
}

/// Reflects the enable flag only; expiry and traffic are shown separately
fn state_caption(account: &Account) -> &'static str {
    if account.enable {
        captions::ENABLE
    } else {
        captions::DISABLE
    }
}

fn limit_caption(account: &Account) -> String {
    if account.data_limit > 0 {
        readable_size_short(account.data_limit)
    } else {
        "Unlimited".to_string()
    }
}

fn expiry_caption(account: &Account) -> String {
    account
        .expired_at
        .map(jalali_date)
        .unwrap_or_else(|| "Unlimited".to_string())
}

async fn handle_callback(
    bot: &Bot,
    deps: &BotDeps,
    q: &CallbackQuery,
    user: &User,
    action: CallbackAction,
) -> Result<bool, HandlerError> {
    let origin = Origin::of(q);
    let config = &deps.config;

    match action {
        CallbackAction::GetPaymentReceipt { account_id } => {
            ask_for_reply(
                bot,
                deps,
                origin.chat_id,
                messages::GET_PAYMENT_RECEIPT_MESSAGE,
                PendingPrompt::PaymentReceipt { account_id },
            )
            .await?;
        }
        CallbackAction::PaymentCardStep1 { payment_account_id } => {
            match deps.commerce.get_payment_account(payment_account_id).await? {
                Some(account) if account.enable => {
                    let text = messages::payment(
                        &config.channel_url,
                        &user.balance_readable().unwrap_or_else(|| "0".to_string()),
                        &messages::card_description(&account),
                        &config.admin_user_name,
                    );
                    origin
                        .edit(bot, text, Some(keyboards::payment_card_step_1(account.id)))
                        .await?;
                }
                _ => {
                    origin
                        .edit(bot, messages::no_bank_card_available(&config.admin_user_name), None)
                        .await?;
                }
            }
        }
        CallbackAction::MyServices => {
            origin.delete(bot).await;
            send_account_list(bot, deps, origin.chat_id, user).await?;
        }
        CallbackAction::GetTestService => {
            get_test_service(bot, deps, origin.chat_id, user).await?;
        }
        CallbackAction::BuyOrRechargeService => {
            origin.delete(bot).await;
            send_service_menu(bot, deps, origin.chat_id).await?;
        }
        CallbackAction::MainMenu => {
            origin.delete(bot).await;
            send_welcome(bot, deps, origin.chat_id).await?;
        }
        CallbackAction::OnlinePayment => {
            bot.answer_callback_query(q.id.clone())
                .text(messages::ONLINE_PAYMENT_IS_DISABLED)
                .show_alert(true)
                .await?;
            return Ok(true);
        }
        CallbackAction::RechargeService1 { account_id } => {
            if let Some(account) = owned_account(deps, user, account_id).await? {
                let services = deps.commerce.available_services().await?;
                let detail = commerce::service_detail(&account, Utc::now());
                origin
                    .edit(
                        bot,
                        messages::recharge_service_help(&detail),
                        Some(keyboards::available_services(&services, account.id)),
                    )
                    .await?;
            }
        }
        CallbackAction::RechargeService => {
            let accounts = deps.commerce.user_accounts(user).await?;
            if accounts.is_empty() {
                origin.edit(bot, messages::NO_ACCOUNT_MESSAGE, None).await?;
            } else {
                origin
                    .edit(
                        bot,
                        messages::SELECT_ACCOUNT_TO_RECHARGE_MESSAGE,
                        Some(keyboards::select_account_to_recharge(&accounts)),
                    )
                    .await?;
            }
        }
        CallbackAction::BuyServiceStep1 { service_id, account_id } => {
            if let Some(service) = deps.commerce.get_service(service_id).await? {
                origin
                    .edit(
                        bot,
                        messages::buy_new_service_confirmation(&service.name, &service.price_readable()),
                        Some(keyboards::buy_service_step_1(service.id, account_id)),
                    )
                    .await?;
            }
        }
        CallbackAction::BuyServiceStep2 { service_id, account_id } => {
            let text = match deps
                .commerce
                .place_paid_order(user.telegram_chat_id, account_id, service_id)
                .await
            {
                Ok(order) if account_id > 0 => messages::recharge_service_final(order.id),
                Ok(order) => messages::buy_new_service_final(order.id),
                Err(CommerceError::MaxOpenOrder) | Err(CommerceError::MaxPendingOrder) => {
                    messages::new_order_max_open_orders(commerce::MAX_OPEN_ORDERS)
                }
                Err(CommerceError::NoEnoughBalance { balance, .. }) => {
                    messages::new_order_no_enough_balance(&format_price(balance))
                }
                Err(e) => return Err(e.into()),
            };
            origin.edit(bot, text, None).await?;
        }
        CallbackAction::BuyService => {
            let services = deps.commerce.available_services().await?;
            origin
                .edit(
                    bot,
                    messages::BUY_NEW_SERVICE_HELP,
                    Some(keyboards::available_services(&services, 0)),
                )
                .await?;
        }
        CallbackAction::ChangeServiceName { account_id } => {
            if owned_account(deps, user, account_id).await?.is_some() {
                ask_for_reply(
                    bot,
                    deps,
                    origin.chat_id,
                    messages::PLEASE_ENTER_NEW_SERVICE_NAME,
                    PendingPrompt::ChangeServiceName { account_id },
                )
                .await?;
            }
        }
        CallbackAction::QrCode { account_id } => {
            if let Some(account) = owned_account(deps, user, account_id).await? {
                let caption = captions::account_list_item(
                    &limit_caption(&account),
                    &expiry_caption(&account),
                    state_caption(&account),
                );
                let url = subscription_url(&config.subscription_base_url, &account.uuid);
                send_html(bot, origin.chat_id, format!("{}\n\n<code>{}</code>", caption, url)).await?;
            }
        }
        CallbackAction::AccountDetail { account_id } => {
            if let Some(account) = owned_account(deps, user, account_id).await? {
                let reserved = deps.commerce.reserved_order(account.id).await?;
                let reserved_title = reserved
                    .as_ref()
                    .map(|o| o.title.clone())
                    .unwrap_or_else(|| messages::NO_RESERVED_SERVICE.to_string());
                let usage = account
                    .traffic_usage_percent()
                    .map(|p| format!("{:.2}%", p))
                    .unwrap_or_else(|| "Unlimited".to_string());
                let text = messages::my_account(
                    &account,
                    state_caption(&account),
                    &reserved_title,
                    &expiry_caption(&account),
                    &usage,
                    &subscription_url(&config.subscription_base_url, &account.uuid),
                );
                let markup = keyboards::my_account(&account, reserved.is_some());
                if let Err(e) = origin.edit(bot, text, Some(markup)).await {
                    tracing::warn!("Failed to show account {}: {}", account.id, e);
                }
            }
        }
        CallbackAction::UserInfo => {
            let data = q.data.as_deref().unwrap_or_default();
            origin
                .edit(
                    bot,
                    proxyshop_api::utils::sanitize_html(data),
                    Some(keyboards::back_to_main_menu()),
                )
                .await?;
        }
        CallbackAction::Unknown => {
            tracing::debug!("Unknown callback data: {:?}", q.data);
        }
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn account(data_limit: i64, used_traffic: i64) -> Account {
        Account {
            id: 1,
            user_id: 1,
            service_id: 1,
            uuid: Uuid::new_v4(),
            email: "1_1".to_string(),
            service_title: None,
            user_title: None,
            data_limit,
            used_traffic,
            expired_at: None,
            enable: true,
            created_at: Utc::now(),
            modified_at: Utc::now(),
        }
    }

    #[test]
    fn test_unlimited_captions() {
        let acc = account(0, 10);
        assert_eq!(limit_caption(&acc), "Unlimited");
        assert_eq!(expiry_caption(&acc), "Unlimited");
        assert_eq!(state_caption(&acc), captions::ENABLE);
    }

    #[test]
    fn test_callback_answered_unless_handler_did() {
        // Gate blocked or regular action
        assert!(needs_answer(&Ok(false)));
        // Online payment shows its own alert
        assert!(!needs_answer(&Ok(true)));
        assert!(needs_answer(&Err("request failed".into())));
    }

    #[test]
    fn test_state_follows_enable_flag() {
        let mut acc = account(1024, 1024);
        acc.expired_at = Some(Utc::now() - chrono::Duration::days(1));
        assert_eq!(state_caption(&acc), captions::ENABLE);

        acc.enable = false;
        assert_eq!(state_caption(&acc), captions::DISABLE);
    }

    #[test]
    fn test_limit_caption_is_rounded() {
        let acc = account(1536 * 1024 * 1024, 0);
        assert_eq!(limit_caption(&acc), readable_size_short(acc.data_limit));
        assert!(!limit_caption(&acc).contains('.'));
    }
}
