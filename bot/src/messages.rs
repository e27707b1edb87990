//! Chat texts, all rendered in Telegram HTML parse mode.
//!
//! Values that come from users or admins are escaped before they are
//! interpolated.

use proxyshop_api::models::{Account, PaymentAccount};
use proxyshop_api::utils::sanitize_html;

pub const USAGE_HELP_MESSAGE: &str = "<b>How to connect</b>\n\n\
1. Buy a service or take the free test from the main menu.\n\
2. Open <b>My services</b> and copy the subscription link of your account.\n\
3. Import the link into a v2ray compatible client and refresh it from time to time.\n\n\
Setup guides for every platform are linked below.";

pub const PRICE_LIST: &str = "<b>Price list</b>\n\n\
Prices depend on traffic and duration. Open <b>Buy or recharge</b> to see the plans that are on sale right now.";

pub const CARD_PAYMENT_MESSAGE: &str = "<b>Card to card payment</b>\n\n\
Pick one of the cards below, transfer the amount and send us a photo of the receipt.";

pub const NO_ACCOUNT_MESSAGE: &str = "You do not have any service yet.";
pub const ACCOUNT_LIST_MESSAGE: &str = "<b>Your services</b>\nSelect one to see its details.";
pub const SELECT_ACCOUNT_TO_RECHARGE_MESSAGE: &str = "Which service do you want to recharge?";

pub const GET_TEST_SERVICE_SUCCESS: &str = "🎁 Your test service is being created. \
It will show up in <b>My services</b> in a moment.";

pub const BUY_OR_RECHARGE_SERVICE: &str = "<b>Buy or recharge</b>\n\n\
Choose a plan below. Recharging keeps your subscription link unchanged.";
pub const BUY_NEW_SERVICE_HELP: &str = "<b>Available plans</b>\nSelect the plan you want to buy.";
pub const ONLINE_PAYMENT_IS_DISABLED: &str = "Online payment is disabled at the moment.";

pub const GET_PAYMENT_RECEIPT_MESSAGE: &str = "Please send the photo of your payment receipt as a reply to this message.";
pub const GET_PAYMENT_RECEIPT_SUCCESS: &str = "✅ Your receipt was sent. Your wallet is charged once it is verified.";
pub const GET_PAYMENT_RECEIPT_ERROR: &str = "❌ Sending your receipt failed. Please try again or contact support.";

pub const PLEASE_ENTER_NEW_SERVICE_NAME: &str = "Send the new name of this service as a reply to this message.";
pub const CHANGE_SERVICE_NAME_SUCCESS: &str = "✅ Service name changed.";
pub const CHANGE_SERVICE_NAME_ERROR: &str = "❌ That name can not be used. Please try another one.";
pub const NO_RESERVED_SERVICE: &str = "No reserved service";

pub fn welcome(admin_id: &str, channel_url: &str) -> String {
    format!(
        "👋 Welcome!\n\n\
         Fast and stable proxy subscriptions, delivered right here in Telegram.\n\n\
         📢 News: {}\n\
         🆘 Support: @{}",
        channel_url, admin_id
    )
}

pub fn please_subscribe(admin_id: &str) -> String {
    format!(
        "To use the bot please join our channel first, then press the button below.\n\nSupport: @{}",
        admin_id
    )
}

pub fn my_profile(user_id: i64, bot_user_name: &str, full_name: &str, balance: &str, referral_count: i64) -> String {
    format!(
        "<b>My profile</b>\n\n\
         🆔 User id: <code>{}</code>\n\
         👤 Name: {}\n\
         💰 Balance: {}\n\
         👥 Invited users: {}\n\n\
         🔗 Referral link:\nhttps://t.me/{}?start={}",
        user_id,
        sanitize_html(full_name),
        balance,
        referral_count,
        bot_user_name,
        user_id
    )
}

pub fn no_bank_card_available(admin_id: &str) -> String {
    format!("No bank card is available right now. Please contact @{}.", admin_id)
}

pub fn card_description(account: &PaymentAccount) -> String {
    let field = |v: &Option<String>| v.as_deref().map(sanitize_html).unwrap_or_else(|| "-".to_string());
    format!(
        "{}\n💳 Card: <code>{}</code>\n🏦 Account: <code>{}</code>\n🔢 Shaba: <code>{}</code>\n🏛 Bank: {}\n👤 Owner: {}",
        field(&account.payment_notice),
        sanitize_html(&account.card_number),
        field(&account.account_number),
        field(&account.shaba),
        field(&account.bank_name),
        field(&account.owner_family)
    )
}

pub fn payment(channel_url: &str, balance: &str, card_description: &str, admin_id: &str) -> String {
    format!(
        "<b>Wallet charge</b>\n\n\
         💰 Current balance: {}\n\n\
         {}\n\n\
         After the transfer press <b>Send receipt</b> and reply with the receipt photo.\n\
         📢 {}\n🆘 @{}",
        balance, card_description, channel_url, admin_id
    )
}

pub fn get_test_service_admin_alert(chat_id: i64, full_name: &str) -> String {
    format!(
        "#test_service\nUser {} <code>{}</code> took a test service.",
        sanitize_html(full_name),
        chat_id
    )
}

pub fn get_test_service_error_admin_alert(chat_id: i64, full_name: &str) -> String {
    format!(
        "#error #test_service\nCreating a test service for {} <code>{}</code> failed.",
        sanitize_html(full_name),
        chat_id
    )
}

pub fn get_test_service_not_allowed(days: i64) -> String {
    format!("You can take one test service every {} days.", days)
}

pub fn recharge_service_help(service_detail: &str) -> String {
    format!(
        "<b>Recharge</b>\n\n<pre>{}</pre>\n\nSelect the plan to apply when the current one runs out.",
        sanitize_html(service_detail)
    )
}

pub fn buy_new_service_confirmation(name: &str, price: &str) -> String {
    format!(
        "You are buying <b>{}</b> for <b>{}</b>.\nThe price is paid from your wallet. Confirm?",
        sanitize_html(name),
        price
    )
}

pub fn recharge_service_final(order_id: i64) -> String {
    format!(
        "✅ Order #{} is paid. The plan is applied to your service once the current period ends.",
        order_id
    )
}

pub fn buy_new_service_final(order_id: i64) -> String {
    format!(
        "✅ Order #{} is paid. Your new service will appear in <b>My services</b> shortly.",
        order_id
    )
}

pub fn new_order_max_open_orders(total: i64) -> String {
    format!(
        "You already have {} unfinished order. Please wait until it is processed.",
        total
    )
}

pub fn new_order_no_enough_balance(balance: &str) -> String {
    format!(
        "Your balance ({}) is not enough for this plan. Please charge your wallet from <b>Payment</b>.",
        balance
    )
}

pub fn payment_receipt_detail(chat_id: i64, full_name: &str, username: &str, caption: &str) -> String {
    format!(
        "#receipt\n👤 {}\n🆔 <code>{}</code>\n@{}\n📝 {}\n\n",
        sanitize_html(full_name),
        chat_id,
        sanitize_html(username),
        sanitize_html(caption)
    )
}

pub fn payment_receipt_error_admin(full_name: &str, chat_id: i64) -> String {
    format!(
        "#error Forwarding a payment receipt from {} <code>{}</code> failed.",
        sanitize_html(full_name),
        chat_id
    )
}

/// Full account card shown by the account detail callback
pub fn my_account(
    account: &Account,
    state: &str,
    reserved_service: &str,
    expired_at: &str,
    usage_percent: &str,
    subscription_url: &str,
) -> String {
    let text = |v: &Option<String>| v.as_deref().map(sanitize_html).unwrap_or_else(|| "-".to_string());
    format!(
        "<b>Service details</b>\n\n\
         Status: {}\n\
         📧 Email: <code>{}</code>\n\
         📦 Plan: {}\n\
         🏷 Name: {}\n\
         🔖 Reserved: {}\n\
         ⏳ Expires: {}\n\
         📊 Used: {} of {} ({})\n\n\
         🔗 Subscription link:\n<code>{}</code>",
        state,
        sanitize_html(&account.email),
        text(&account.service_title),
        text(&account.user_title),
        sanitize_html(reserved_service),
        expired_at,
        proxyshop_api::utils::readable_size(account.used_traffic),
        proxyshop_api::utils::readable_size(account.data_limit),
        usage_percent,
        subscription_url
    )
}
