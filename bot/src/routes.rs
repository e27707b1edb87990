//! Dispatch tables for text messages and callback data.

use crate::captions;

/// What a plain text message asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRoute {
    Game,
    /// `/start` and `/help`
    Welcome,
    Help,
    PriceList,
    MyProfile,
    Support,
    Payment,
    MyServices,
    GetTestService,
    BuyOrRechargeService,
    Unknown,
}

/// Command name without the leading slash or a `@botname` suffix
fn command_name(text: &str) -> Option<&str> {
    let word = text.strip_prefix('/')?.split_whitespace().next()?;
    Some(word.split('@').next().unwrap_or(word))
}

impl MessageRoute {
    pub fn from_text(text: &str) -> Self {
        match command_name(text) {
            Some("game") => return Self::Game,
            Some("start") | Some("help") => return Self::Welcome,
            Some(_) => return Self::Unknown,
            None => {}
        }

        // Reply keyboard labels, matched anywhere in the text
        let table = [
            (captions::HELP, Self::Help),
            (captions::PRICE_LIST, Self::PriceList),
            (captions::MY_PROFILE, Self::MyProfile),
            (captions::SUPPORT, Self::Support),
            (captions::PAYMENT, Self::Payment),
            (captions::MY_SERVICES, Self::MyServices),
            (captions::GET_TEST_SERVICE, Self::GetTestService),
            (captions::BUY_OR_RECHARGE_SERVICE, Self::BuyOrRechargeService),
        ];
        table
            .iter()
            .find(|(caption, _)| text.contains(caption))
            .map(|(_, route)| *route)
            .unwrap_or(Self::Unknown)
    }
}

/// Referrer id from `/start <id>`; only exactly two space separated parts count
pub fn parse_referral(text: &str) -> Option<i64> {
    if !text.starts_with("/start") {
        return None;
    }
    let parts: Vec<&str> = text.split(' ').collect();
    match parts.as_slice() {
        [_, code] => code.parse().ok(),
        _ => None,
    }
}

/// Parsed inline button payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    GetPaymentReceipt { account_id: i64 },
    PaymentCardStep1 { payment_account_id: i64 },
    MyServices,
    GetTestService,
    BuyOrRechargeService,
    MainMenu,
    OnlinePayment,
    RechargeService1 { account_id: i64 },
    RechargeService,
    BuyServiceStep1 { service_id: i64, account_id: i64 },
    BuyServiceStep2 { service_id: i64, account_id: i64 },
    BuyService,
    ChangeServiceName { account_id: i64 },
    QrCode { account_id: i64 },
    AccountDetail { account_id: i64 },
    UserInfo,
    Unknown,
}

fn id_arg(rest: &str) -> Option<i64> {
    rest.split(':').next()?.trim().parse().ok()
}

fn service_and_account(rest: &str) -> Option<(i64, i64)> {
    let mut parts = rest.split(':');
    let service_id = parts.next()?.trim().parse().ok()?;
    let account_id = parts.next().map(|a| a.trim().parse::<i64>()).transpose().ok()?.unwrap_or(0);
    Some((service_id, account_id))
}

impl CallbackAction {
    /// Prefixes are checked in a fixed order, so `recharge_service_1:` wins
    /// over `recharge_service` and `buy_service_step_*:` over `buy_service`.
    pub fn parse(data: &str) -> Self {
        use CallbackAction::*;

        let with = |prefix: &str| data.strip_prefix(prefix);

        let action = if let Some(rest) = with("get_payment_receipt:") {
            id_arg(rest).map(|account_id| GetPaymentReceipt { account_id })
        } else if let Some(rest) = with("payment_card_step_1:") {
            id_arg(rest).map(|payment_account_id| PaymentCardStep1 { payment_account_id })
        } else if data.starts_with("my_services:") {
            Some(MyServices)
        } else if data.starts_with("get_test_service:") {
            Some(GetTestService)
        } else if data.starts_with("buy_or_recharge_service:") {
            Some(BuyOrRechargeService)
        } else if data.starts_with("main_menu:") {
            Some(MainMenu)
        } else if data.starts_with("online_payment:") {
            Some(OnlinePayment)
        } else if let Some(rest) = with("recharge_service_1:") {
            id_arg(rest).map(|account_id| RechargeService1 { account_id })
        } else if data.starts_with("recharge_service") {
            Some(RechargeService)
        } else if let Some(rest) = with("buy_service_step_1:") {
            service_and_account(rest).map(|(service_id, account_id)| BuyServiceStep1 { service_id, account_id })
        } else if let Some(rest) = with("buy_service_step_2:") {
            service_and_account(rest).map(|(service_id, account_id)| BuyServiceStep2 { service_id, account_id })
        } else if data.starts_with("buy_service") {
            Some(BuyService)
        } else if let Some(rest) = with("change_service_name:") {
            id_arg(rest).map(|account_id| ChangeServiceName { account_id })
        } else if let Some(rest) = with("qrcode:") {
            id_arg(rest).map(|account_id| QrCode { account_id })
        } else if let Some(rest) = with("account_detail:") {
            id_arg(rest).map(|account_id| AccountDetail { account_id })
        } else if data == "user_info" {
            Some(UserInfo)
        } else {
            None
        };

        action.unwrap_or(Unknown)
    }
}
