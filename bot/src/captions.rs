// Button labels. Reply-keyboard labels double as message routes.

pub const HELP: &str = "📚 Help";
pub const PRICE_LIST: &str = "💰 Price list";
pub const MY_PROFILE: &str = "👤 My profile";
pub const SUPPORT: &str = "🆘 Support";
pub const PAYMENT: &str = "💳 Payment";
pub const MY_SERVICES: &str = "🛍 My services";
pub const GET_TEST_SERVICE: &str = "🎁 Free test";
pub const BUY_OR_RECHARGE_SERVICE: &str = "🛒 Buy or recharge";

pub const ENABLE: &str = "✅ Enabled";
pub const DISABLE: &str = "❌ Disabled";

pub const MAIN_MENU: &str = "🏠 Main menu";
pub const BACK: &str = "🔙 Back";
pub const BUY_NEW_SERVICE: &str = "🆕 Buy new service";
pub const RECHARGE_SERVICE: &str = "🔋 Recharge service";
pub const CONFIRM: &str = "✅ Confirm";
pub const CANCEL: &str = "❌ Cancel";
pub const SEND_RECEIPT: &str = "🧾 Send receipt";
pub const ONLINE_PAYMENT: &str = "🌐 Online payment";
pub const CHANGE_NAME: &str = "✏️ Rename";
pub const QRCODE: &str = "📷 QR code";
pub const RECHARGE: &str = "🔋 Recharge";
pub const JOIN_CHANNEL: &str = "📢 Join channel";
pub const CHECK_MEMBERSHIP: &str = "🔄 I joined";
pub const USER_INFO: &str = "ℹ️ User info";

/// Caption under an account's subscription link
pub fn account_list_item(data_limit: &str, expired_at: &str, state: &str) -> String {
    format!("📦 {}\n⏳ {}\n{}", data_limit, expired_at, state)
}

/// Service button label: name and readable price
pub fn service_item(name: &str, price: &str) -> String {
    format!("{} | {}", name, price)
}
