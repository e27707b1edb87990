//! Bot keyboards.
//!
//! Inline keyboards are described with the shared [`Keyboard`] model and
//! laid out by [`KeyboardFactory`], then converted to teloxide markup.

use proxyshop_api::keyboard::{Keyboard, KeyboardFactory, KeyboardRows};
use proxyshop_api::models::{Account, PaymentAccount, Service};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup, WebAppInfo};

use crate::captions;

/// Telegram rejects callback data longer than this many bytes
pub const MAX_CALLBACK_DATA_BYTES: usize = 64;

/// Callback data for a button, falling back to the label and cut to the
/// byte limit on a char boundary
fn callback_payload(k: &Keyboard) -> String {
    let data = k.callback_data.as_deref().unwrap_or(&k.text);
    let mut end = data.len().min(MAX_CALLBACK_DATA_BYTES);
    while !data.is_char_boundary(end) {
        end -= 1;
    }
    data[..end].to_string()
}

/// URL buttons need a valid absolute URL; anything else becomes a
/// callback button whose data falls back to the label
pub fn inline_markup(rows: &KeyboardRows) -> InlineKeyboardMarkup {
    let rows = rows.iter().map(|row| {
        row.iter()
            .map(|k| match k.url.as_deref().and_then(|u| url::Url::parse(u).ok()) {
                Some(url) => InlineKeyboardButton::url(k.text.clone(), url),
                None => InlineKeyboardButton::callback(k.text.clone(), callback_payload(k)),
            })
            .collect::<Vec<_>>()
    });
    InlineKeyboardMarkup::new(rows)
}

fn layout(buttons: &[Keyboard]) -> InlineKeyboardMarkup {
    inline_markup(&KeyboardFactory::from_keyboard(buttons))
}

pub fn main_menu() -> KeyboardMarkup {
    let rows = [
        [captions::BUY_OR_RECHARGE_SERVICE, captions::MY_SERVICES],
        [captions::PAYMENT, captions::GET_TEST_SERVICE],
        [captions::MY_PROFILE, captions::PRICE_LIST],
        [captions::HELP, captions::SUPPORT],
    ];
    KeyboardMarkup::new(rows.map(|row| row.map(KeyboardButton::new))).resize_keyboard()
}

pub fn channel_menu(channel_url: &str) -> InlineKeyboardMarkup {
    layout(&[
        Keyboard::url(captions::JOIN_CHANNEL, channel_url),
        Keyboard::callback(captions::CHECK_MEMBERSHIP, "main_menu:"),
    ])
}

pub fn back_to_main_menu() -> InlineKeyboardMarkup {
    layout(&[Keyboard::callback(captions::MAIN_MENU, "main_menu:")])
}

pub fn help_links(links: &[(String, String)]) -> InlineKeyboardMarkup {
    let mut buttons: Vec<Keyboard> = links.iter().map(|(title, url)| Keyboard::url(title, url)).collect();
    buttons.push(Keyboard::callback(captions::USER_INFO, "user_info"));
    layout(&buttons)
}

pub fn game(web_app_url: &str) -> Option<InlineKeyboardMarkup> {
    let url = url::Url::parse(web_app_url).ok()?;
    Some(InlineKeyboardMarkup::new([[InlineKeyboardButton::web_app(
        "Lets go!",
        WebAppInfo { url },
    )]]))
}

pub fn payment_card_step_0(payment_accounts: &[PaymentAccount]) -> InlineKeyboardMarkup {
    let mut buttons: Vec<Keyboard> = payment_accounts
        .iter()
        .map(|p| {
            let label = p.bank_name.clone().unwrap_or_else(|| p.card_number.clone());
            Keyboard::callback(format!("💳 {}", label), format!("payment_card_step_1:{}", p.id))
        })
        .collect();
    buttons.push(Keyboard::callback(captions::ONLINE_PAYMENT, "online_payment:"));
    buttons.push(Keyboard::callback(captions::MAIN_MENU, "main_menu:"));
    layout(&buttons)
}

pub fn payment_card_step_1(account_id: i64) -> InlineKeyboardMarkup {
    layout(&[
        Keyboard::callback(captions::SEND_RECEIPT, format!("get_payment_receipt:{}", account_id)),
        Keyboard::callback(captions::BACK, "main_menu:"),
    ])
}

pub fn my_accounts(accounts: &[Account]) -> InlineKeyboardMarkup {
    let mut buttons: Vec<Keyboard> = accounts
        .iter()
        .map(|a| Keyboard::callback(a.display_title(), format!("account_detail:{}", a.id)))
        .collect();
    buttons.push(Keyboard::callback(captions::BUY_NEW_SERVICE, "buy_service:"));
    buttons.push(Keyboard::callback(captions::MAIN_MENU, "main_menu:"));
    layout(&buttons)
}

pub fn select_account_to_recharge(accounts: &[Account]) -> InlineKeyboardMarkup {
    let mut buttons: Vec<Keyboard> = accounts
        .iter()
        .map(|a| Keyboard::callback(a.display_title(), format!("recharge_service_1:{}", a.id)))
        .collect();
    buttons.push(Keyboard::callback(captions::BACK, "buy_or_recharge_service:"));
    layout(&buttons)
}

pub fn buy_or_recharge_services(available_services: &[Service]) -> InlineKeyboardMarkup {
    let mut buttons = vec![
        Keyboard::callback(captions::BUY_NEW_SERVICE, "buy_service:"),
        Keyboard::callback(captions::RECHARGE_SERVICE, "recharge_service:"),
    ];
    buttons.extend(available_services.iter().map(|s| {
        Keyboard::callback(
            captions::service_item(&s.name, &s.price_readable()),
            format!("buy_service_step_1:{}:0", s.id),
        )
    }));
    buttons.push(Keyboard::callback(captions::GET_TEST_SERVICE, "get_test_service:"));
    buttons.push(Keyboard::callback(captions::MAIN_MENU, "main_menu:"));
    layout(&buttons)
}

/// Plans to buy; `account_id` 0 buys a new account, otherwise recharges it
pub fn available_services(available_services: &[Service], account_id: i64) -> InlineKeyboardMarkup {
    let mut buttons: Vec<Keyboard> = available_services
        .iter()
        .map(|s| {
            Keyboard::callback(
                captions::service_item(&s.name, &s.price_readable()),
                format!("buy_service_step_1:{}:{}", s.id, account_id),
            )
        })
        .collect();
    buttons.push(Keyboard::callback(captions::MAIN_MENU, "main_menu:"));
    layout(&buttons)
}

pub fn buy_service_step_1(service_id: i64, account_id: i64) -> InlineKeyboardMarkup {
    layout(&[
        Keyboard::callback(captions::CONFIRM, format!("buy_service_step_2:{}:{}", service_id, account_id)),
        Keyboard::callback(captions::CANCEL, "main_menu:"),
    ])
}

/// Recharging is hidden while a reserved order is waiting
pub fn my_account(account: &Account, has_reserved_service: bool) -> InlineKeyboardMarkup {
    let mut buttons = vec![
        Keyboard::callback(captions::QRCODE, format!("qrcode:{}", account.id)),
        Keyboard::callback(captions::CHANGE_NAME, format!("change_service_name:{}", account.id)),
    ];
    if !has_reserved_service {
        buttons.push(Keyboard::callback(captions::RECHARGE, format!("recharge_service_1:{}", account.id)));
    }
    buttons.push(Keyboard::callback(captions::BACK, "my_services:"));
    layout(&buttons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use teloxide::types::InlineKeyboardButtonKind;
    use uuid::Uuid;

    fn account(id: i64) -> Account {
        Account {
            id,
            user_id: 1,
            service_id: 1,
            uuid: Uuid::new_v4(),
            email: format!("1_{}", id),
            service_title: Some("30 Days".to_string()),
            user_title: None,
            data_limit: 0,
            used_traffic: 0,
            expired_at: None,
            enable: true,
            created_at: Utc::now(),
            modified_at: Utc::now(),
        }
    }

    fn callback_data(markup: &InlineKeyboardMarkup) -> Vec<String> {
        markup
            .inline_keyboard
            .iter()
            .flatten()
            .filter_map(|b| match &b.kind {
                InlineKeyboardButtonKind::CallbackData(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_inline_markup_conversion() {
        let rows = KeyboardFactory::from_keyboard(&[
            Keyboard::url("Site", "https://example.com"),
            Keyboard::url("Broken", "not a url"),
            Keyboard {
                text: "Plain".to_string(),
                callback_data: None,
                url: None,
            },
        ]);
        let markup = inline_markup(&rows);

        assert_eq!(markup.inline_keyboard.len(), 2);
        assert_eq!(markup.inline_keyboard[0].len(), 2);
        assert!(matches!(markup.inline_keyboard[0][0].kind, InlineKeyboardButtonKind::Url(_)));
        assert_eq!(callback_data(&markup), vec!["Broken".to_string(), "Plain".to_string()]);
    }

    #[test]
    fn test_long_callback_data_is_truncated() {
        let label = "🎁".repeat(20);
        let rows = KeyboardFactory::from_keyboard(&[
            Keyboard {
                text: label.clone(),
                callback_data: None,
                url: None,
            },
            Keyboard::callback("Short", "my_services:"),
        ]);
        let data = callback_data(&inline_markup(&rows));

        assert!(data[0].len() <= MAX_CALLBACK_DATA_BYTES);
        assert_eq!(data[0], "🎁".repeat(16));
        assert_eq!(data[1], "my_services:");
    }

    #[test]
    fn test_my_account_hides_recharge_when_reserved() {
        let acc = account(5);
        let free = callback_data(&my_account(&acc, false));
        assert!(free.contains(&"recharge_service_1:5".to_string()));

        let reserved = callback_data(&my_account(&acc, true));
        assert!(!reserved.iter().any(|d| d.starts_with("recharge_service_1:")));
        assert!(reserved.contains(&"qrcode:5".to_string()));
    }

    #[test]
    fn test_service_keyboards_bind_account() {
        let service = Service {
            id: 3,
            name: "30 Days".to_string(),
            price: 120_000,
            duration_days: 30,
            data_limit: 0,
            is_test: false,
            enable: true,
            sort_order: 0,
            created_at: Utc::now(),
            modified_at: Utc::now(),
        };

        let data = callback_data(&available_services(&[service], 9));
        assert_eq!(data[0], "buy_service_step_1:3:9");

        let confirm = callback_data(&buy_service_step_1(3, 9));
        assert_eq!(confirm[0], "buy_service_step_2:3:9");
    }

    #[test]
    fn test_main_menu_layout() {
        let menu = main_menu();
        assert_eq!(menu.keyboard.len(), 4);
        assert!(menu.keyboard.iter().all(|row| row.len() == 2));
    }
}
