use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use strum::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;

use crate::models::{Account, Order};
use crate::utils::{format_price, readable_size, sanitize_html};

// ============================================================================
// Enums
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString, AsRefStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationEngine {
    #[default]
    Telegram,
    Email,
    Sms,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString, AsRefStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationStatus {
    #[default]
    Pending,
    Canceled,
    Failed,
    Sent,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationType {
    Payment,
    Order,
    Transaction,
    General,
    Account,
    UsedTraffic,
    ExpireTime,
}

impl_text_column!(NotificationEngine);
impl_text_column!(NotificationStatus);
impl_text_column!(NotificationType);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown notification level {0}")]
pub struct UnknownLevel(pub i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, EnumIter)]
#[serde(into = "i32", try_from = "i32")]
pub enum NotificationUsedTrafficLevel {
    FiftyPercent = 50,
    EightyPercent = 80,
    NinetyFivePercent = 95,
    FullPercentUsed = 100,
}

impl From<NotificationUsedTrafficLevel> for i32 {
    fn from(level: NotificationUsedTrafficLevel) -> Self {
        level as i32
    }
}

impl TryFrom<i32> for NotificationUsedTrafficLevel {
    type Error = UnknownLevel;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            50 => Ok(Self::FiftyPercent),
            80 => Ok(Self::EightyPercent),
            95 => Ok(Self::NinetyFivePercent),
            100 => Ok(Self::FullPercentUsed),
            other => Err(UnknownLevel(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, EnumIter)]
#[serde(into = "i32", try_from = "i32")]
pub enum NotificationExpireTimeLevel {
    ThirtyDay = 1,
    SevenDay = 2,
    ThreeDay = 3,
    OneDay = 4,
    Expired = 5,
}

impl From<NotificationExpireTimeLevel> for i32 {
    fn from(level: NotificationExpireTimeLevel) -> Self {
        level as i32
    }
}

impl TryFrom<i32> for NotificationExpireTimeLevel {
    type Error = UnknownLevel;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::ThirtyDay),
            2 => Ok(Self::SevenDay),
            3 => Ok(Self::ThreeDay),
            4 => Ok(Self::OneDay),
            5 => Ok(Self::Expired),
            other => Err(UnknownLevel(other)),
        }
    }
}

impl NotificationExpireTimeLevel {
    /// Remaining-time window for each bucket; `Expired` has none
    fn window(self) -> Option<Duration> {
        match self {
            Self::ThirtyDay => Some(Duration::days(30)),
            Self::SevenDay => Some(Duration::days(7)),
            Self::ThreeDay => Some(Duration::days(3)),
            Self::OneDay => Some(Duration::days(1)),
            Self::Expired => None,
        }
    }
}

/// Highest usage threshold reached, `None` for unlimited or under 50%
pub fn used_traffic_level(used: i64, limit: i64) -> Option<NotificationUsedTrafficLevel> {
    if limit <= 0 {
        return None;
    }
    let percent = used as f64 / limit as f64 * 100.0;

    [
        NotificationUsedTrafficLevel::FullPercentUsed,
        NotificationUsedTrafficLevel::NinetyFivePercent,
        NotificationUsedTrafficLevel::EightyPercent,
        NotificationUsedTrafficLevel::FiftyPercent,
    ]
    .into_iter()
    .find(|level| percent >= i32::from(*level) as f64)
}

/// Tightest expiry bucket containing the remaining time
pub fn expire_time_level(
    expired_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<NotificationExpireTimeLevel> {
    let expired_at = expired_at?;
    if now >= expired_at {
        return Some(NotificationExpireTimeLevel::Expired);
    }
    let remaining = expired_at - now;

    [
        NotificationExpireTimeLevel::OneDay,
        NotificationExpireTimeLevel::ThreeDay,
        NotificationExpireTimeLevel::SevenDay,
        NotificationExpireTimeLevel::ThirtyDay,
    ]
    .into_iter()
    .find(|level| level.window().map(|w| remaining <= w).unwrap_or(false))
}

// ============================================================================
// Keyboard field validation
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("The keyboard field contains invalid JSON")]
    InvalidKeyboardJson,
    #[error("Keyboard must be a valid JSON string or object")]
    InvalidKeyboardType,
}

/// Normalize the incoming `keyboard` value to decoded JSON or nothing
pub fn validate_keyboard(value: Option<Value>) -> Result<Option<Value>, ValidationError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v @ (Value::Object(_) | Value::Array(_))) => Ok(Some(v)),
        Some(Value::String(s)) => {
            if s.trim().is_empty() {
                return Ok(None);
            }
            serde_json::from_str(&s)
                .map(Some)
                .map_err(|_| ValidationError::InvalidKeyboardJson)
        }
        Some(_) => Err(ValidationError::InvalidKeyboardType),
    }
}

// ============================================================================
// Schemas
// ============================================================================

/// Row in the `notifications` table
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub account_id: Option<i64>,
    pub level: i32,
    pub message: Option<String>,
    pub details: Option<String>,
    pub keyboard: Option<String>,
    pub photo_url: Option<String>,
    pub approve: bool,
    pub send_to_admin: bool,
    pub engine: NotificationEngine,
    pub status: NotificationStatus,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub notification_type: NotificationType,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Notification {
    /// Message followed by its details, as delivered to the chat
    pub fn text(&self) -> String {
        match (self.message.as_deref(), self.details.as_deref()) {
            (Some(m), Some(d)) if !d.is_empty() => format!("{}\n\n{}", m, d),
            (Some(m), _) => m.to_string(),
            (None, Some(d)) => d.to_string(),
            (None, None) => String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationBase {
    pub user_id: i64,
    #[serde(default)]
    pub account_id: Option<i64>,
    pub level: i32,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub keyboard: Option<Value>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub approve: bool,
    #[serde(default)]
    pub send_to_admin: bool,
    #[serde(default)]
    pub engine: NotificationEngine,
    #[serde(default)]
    pub status: NotificationStatus,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
}

impl NotificationBase {
    pub fn new(user_id: i64, notification_type: NotificationType, message: impl Into<String>) -> Self {
        Self {
            user_id,
            account_id: None,
            level: 0,
            message: Some(message.into()),
            details: None,
            keyboard: None,
            photo_url: None,
            approve: false,
            send_to_admin: false,
            engine: NotificationEngine::default(),
            status: NotificationStatus::default(),
            notification_type,
        }
    }

    pub fn validate(mut self) -> Result<Self, ValidationError> {
        self.keyboard = validate_keyboard(self.keyboard.take())?;
        Ok(self)
    }

    /// Keyboard as stored in the TEXT column
    pub fn keyboard_text(&self) -> Option<String> {
        self.keyboard.as_ref().map(Value::to_string)
    }
}

pub type NotificationCreate = NotificationBase;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationModify {
    pub id: i64,
    #[serde(flatten)]
    pub base: NotificationBase,
}

impl NotificationModify {
    pub fn validate(self) -> Result<Self, ValidationError> {
        Ok(Self {
            id: self.id,
            base: self.base.validate()?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationResponse {
    pub id: i64,
    pub user_id: Option<i64>,
    pub account_id: Option<i64>,
    pub level: i32,
    pub message: Option<String>,
    pub details: Option<String>,
    pub keyboard: Option<Value>,
    pub photo_url: Option<String>,
    pub approve: bool,
    pub send_to_admin: bool,
    pub engine: NotificationEngine,
    pub status: NotificationStatus,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl From<Notification> for NotificationResponse {
    fn from(n: Notification) -> Self {
        // Broken stored JSON is reported as no keyboard
        let keyboard = n
            .keyboard
            .as_deref()
            .and_then(|s| serde_json::from_str::<Value>(s).ok());

        Self {
            id: n.id,
            user_id: Some(n.user_id),
            account_id: n.account_id,
            level: n.level,
            message: n.message,
            details: n.details,
            keyboard,
            photo_url: n.photo_url,
            approve: n.approve,
            send_to_admin: n.send_to_admin,
            engine: n.engine,
            status: n.status,
            notification_type: n.notification_type,
            created_at: n.created_at,
            modified_at: n.modified_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsResponse {
    pub notifications: Vec<NotificationResponse>,
    pub total: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationQuery {
    pub user_id: Option<i64>,
    pub status: Option<NotificationStatus>,
    #[serde(rename = "type")]
    pub notification_type: Option<NotificationType>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// ============================================================================
// System notifications (auto-approved)
// ============================================================================

fn system(user_id: i64, notification_type: NotificationType, message: String) -> NotificationCreate {
    NotificationBase {
        approve: true,
        ..NotificationBase::new(user_id, notification_type, message)
    }
}

pub fn order_completed(order: &Order, account: &Account) -> NotificationCreate {
    let mut n = system(
        order.user_id,
        NotificationType::Order,
        format!("✅ Your order #{} ({}) is ready.", order.id, sanitize_html(&order.title)),
    );
    n.account_id = Some(account.id);
    n.details = Some(format!(
        "Account: {}\nTraffic: {}",
        sanitize_html(&account.display_title()),
        if account.data_limit > 0 {
            readable_size(account.data_limit)
        } else {
            "Unlimited".to_string()
        }
    ));
    n
}

pub fn balance_recharged(user_id: i64, amount: i64, balance: i64) -> NotificationCreate {
    let mut n = system(
        user_id,
        NotificationType::Payment,
        format!("💰 {} has been added to your wallet.", format_price(amount)),
    );
    n.details = Some(format!("Balance: {}", format_price(balance)));
    n
}

pub fn referral_bonus(referrer_id: i64, bonus: i64) -> NotificationCreate {
    system(
        referrer_id,
        NotificationType::Transaction,
        format!("🎁 You received a referral bonus of {}.", format_price(bonus)),
    )
}

pub fn used_traffic(account: &Account, level: NotificationUsedTrafficLevel) -> NotificationCreate {
    let title = sanitize_html(&account.display_title());
    let message = match level {
        NotificationUsedTrafficLevel::FullPercentUsed => {
            format!("⛔️ All traffic of \"{}\" has been used.", title)
        }
        _ => format!("⚠️ {}% of the traffic of \"{}\" has been used.", i32::from(level), title),
    };
    let mut n = system(account.user_id, NotificationType::UsedTraffic, message);
    n.account_id = Some(account.id);
    n.level = level.into();
    n.details = Some(format!(
        "{} / {}",
        readable_size(account.used_traffic),
        readable_size(account.data_limit)
    ));
    n
}

pub fn expire_time(account: &Account, level: NotificationExpireTimeLevel) -> NotificationCreate {
    let when = match level {
        NotificationExpireTimeLevel::ThirtyDay => "in less than 30 days",
        NotificationExpireTimeLevel::SevenDay => "in less than 7 days",
        NotificationExpireTimeLevel::ThreeDay => "in less than 3 days",
        NotificationExpireTimeLevel::OneDay => "within a day",
        NotificationExpireTimeLevel::Expired => "now",
    };
    let title = sanitize_html(&account.display_title());
    let message = if level == NotificationExpireTimeLevel::Expired {
        format!("⛔️ \"{}\" has expired.", title)
    } else {
        format!("⏳ \"{}\" expires {}.", title, when)
    };
    let mut n = system(account.user_id, NotificationType::ExpireTime, message);
    n.account_id = Some(account.id);
    n.level = level.into();
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn row(keyboard: Option<&str>) -> Notification {
        Notification {
            id: 9,
            user_id: 1,
            account_id: None,
            level: 0,
            message: Some("hello".to_string()),
            details: None,
            keyboard: keyboard.map(str::to_string),
            photo_url: None,
            approve: true,
            send_to_admin: false,
            engine: NotificationEngine::Telegram,
            status: NotificationStatus::Pending,
            notification_type: NotificationType::General,
            created_at: Utc::now(),
            modified_at: Utc::now(),
        }
    }

    #[test]
    fn test_validate_keyboard_cases() {
        assert_eq!(validate_keyboard(None), Ok(None));
        assert_eq!(validate_keyboard(Some(Value::Null)), Ok(None));
        assert_eq!(validate_keyboard(Some(json!("   "))), Ok(None));
        assert_eq!(
            validate_keyboard(Some(json!([{"text": "a"}]))),
            Ok(Some(json!([{"text": "a"}])))
        );
        assert_eq!(validate_keyboard(Some(json!({"k": 1}))), Ok(Some(json!({"k": 1}))));
        assert_eq!(
            validate_keyboard(Some(json!(r#"[{"text": "b"}]"#))),
            Ok(Some(json!([{"text": "b"}])))
        );
    }

    #[test]
    fn test_validate_keyboard_errors() {
        let err = validate_keyboard(Some(json!("{oops"))).unwrap_err();
        assert_eq!(err.to_string(), "The keyboard field contains invalid JSON");

        let err = validate_keyboard(Some(json!(42))).unwrap_err();
        assert_eq!(err.to_string(), "Keyboard must be a valid JSON string or object");
        assert!(validate_keyboard(Some(json!(true))).is_err());
    }

    #[test]
    fn test_create_defaults_from_json() {
        let create: NotificationCreate =
            serde_json::from_value(json!({"user_id": 5, "level": 0, "type": "general"})).unwrap();
        assert_eq!(create.engine, NotificationEngine::Telegram);
        assert_eq!(create.status, NotificationStatus::Pending);
        assert!(!create.approve);
        assert!(!create.send_to_admin);
        assert!(create.keyboard.is_none());
    }

    #[test]
    fn test_modify_flattens_base() {
        let modify: NotificationModify = serde_json::from_value(json!({
            "id": 3, "user_id": 5, "level": 0, "type": "general", "approve": true,
            "keyboard": "[{\"text\": \"x\"}]"
        }))
        .unwrap();
        let modify = modify.validate().unwrap();
        assert_eq!(modify.id, 3);
        assert!(modify.base.approve);
        assert_eq!(modify.base.keyboard_text().as_deref(), Some(r#"[{"text":"x"}]"#));
    }

    #[test]
    fn test_response_decodes_stored_keyboard() {
        let resp = NotificationResponse::from(row(Some(r#"[{"text":"a"}]"#)));
        assert_eq!(resp.keyboard, Some(json!([{"text": "a"}])));

        let resp = NotificationResponse::from(row(Some("not json")));
        assert_eq!(resp.keyboard, None);

        let json = serde_json::to_value(NotificationResponse::from(row(None))).unwrap();
        assert_eq!(json["type"], "general");
    }

    #[test]
    fn test_notification_text_joins_details() {
        let mut n = row(None);
        assert_eq!(n.text(), "hello");
        n.details = Some("more".to_string());
        assert_eq!(n.text(), "hello\n\nmore");
    }

    #[test]
    fn test_level_serialization_is_numeric() {
        assert_eq!(serde_json::to_string(&NotificationUsedTrafficLevel::EightyPercent).unwrap(), "80");
        assert_eq!(serde_json::to_string(&NotificationExpireTimeLevel::Expired).unwrap(), "5");
        assert!(serde_json::from_str::<NotificationExpireTimeLevel>("9").is_err());
        assert_eq!(
            serde_json::from_str::<NotificationUsedTrafficLevel>("95").unwrap(),
            NotificationUsedTrafficLevel::NinetyFivePercent
        );
    }

    #[test]
    fn test_used_traffic_level() {
        assert_eq!(used_traffic_level(10, 0), None);
        assert_eq!(used_traffic_level(49, 100), None);
        assert_eq!(used_traffic_level(50, 100), Some(NotificationUsedTrafficLevel::FiftyPercent));
        assert_eq!(used_traffic_level(94, 100), Some(NotificationUsedTrafficLevel::EightyPercent));
        assert_eq!(used_traffic_level(95, 100), Some(NotificationUsedTrafficLevel::NinetyFivePercent));
        assert_eq!(used_traffic_level(250, 100), Some(NotificationUsedTrafficLevel::FullPercentUsed));
    }

    #[test]
    fn test_expire_time_level() {
        let now = Utc::now();
        assert_eq!(expire_time_level(None, now), None);
        assert_eq!(expire_time_level(Some(now + Duration::days(45)), now), None);
        assert_eq!(
            expire_time_level(Some(now + Duration::days(20)), now),
            Some(NotificationExpireTimeLevel::ThirtyDay)
        );
        assert_eq!(
            expire_time_level(Some(now + Duration::days(5)), now),
            Some(NotificationExpireTimeLevel::SevenDay)
        );
        assert_eq!(
            expire_time_level(Some(now + Duration::hours(60)), now),
            Some(NotificationExpireTimeLevel::ThreeDay)
        );
        assert_eq!(
            expire_time_level(Some(now + Duration::hours(3)), now),
            Some(NotificationExpireTimeLevel::OneDay)
        );
        assert_eq!(expire_time_level(Some(now), now), Some(NotificationExpireTimeLevel::Expired));
        assert_eq!(
            expire_time_level(Some(now - Duration::days(2)), now),
            Some(NotificationExpireTimeLevel::Expired)
        );
    }

    #[test]
    fn test_balance_recharged_is_auto_approved() {
        let n = balance_recharged(4, 250_000, 300_000);
        assert!(n.approve);
        assert_eq!(n.notification_type, NotificationType::Payment);
        assert_eq!(n.details.as_deref(), Some("Balance: 300,000"));
    }

    fn titled_account(user_title: &str) -> Account {
        Account {
            id: 5,
            user_id: 1,
            service_id: 2,
            uuid: uuid::Uuid::new_v4(),
            email: "1_10".to_string(),
            service_title: Some("30 Days".to_string()),
            user_title: Some(user_title.to_string()),
            data_limit: 1024,
            used_traffic: 1024,
            expired_at: Some(Utc::now() - Duration::days(1)),
            enable: true,
            created_at: Utc::now(),
            modified_at: Utc::now(),
        }
    }

    #[test]
    fn test_account_titles_are_html_escaped() {
        let account = titled_account("Tom & Jerry <vip>");
        let order = Order {
            id: 10,
            user_id: 1,
            account_id: 5,
            service_id: 2,
            title: "<b>Gold</b>".to_string(),
            total: 100_000,
            status: crate::models::OrderStatus::Completed,
            is_test: false,
            created_at: Utc::now(),
            modified_at: Utc::now(),
        };

        let texts = [
            used_traffic(&account, NotificationUsedTrafficLevel::FullPercentUsed).message,
            expire_time(&account, NotificationExpireTimeLevel::Expired).message,
            order_completed(&order, &account).details,
        ];
        for text in texts {
            let text = text.unwrap();
            assert!(text.contains("Tom &amp; Jerry &lt;vip&gt;"), "{}", text);
            assert!(!text.contains("<vip>"));
        }

        let message = order_completed(&order, &account).message.unwrap();
        assert!(message.contains("&lt;b&gt;Gold&lt;/b&gt;"));
        assert!(!message.contains("<b>"));
    }

    proptest! {
        #[test]
        fn test_used_level_monotonic(limit in 1i64..1_000_000_000, a in 0i64..2_000_000_000, b in 0i64..2_000_000_000) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(used_traffic_level(lo, limit) <= used_traffic_level(hi, limit));
        }

        #[test]
        fn test_expire_level_tightens_as_time_passes(secs_a in 0i64..5_000_000, secs_b in 0i64..5_000_000) {
            let now = Utc::now();
            let (near, far) = if secs_a <= secs_b { (secs_a, secs_b) } else { (secs_b, secs_a) };
            let near_level = expire_time_level(Some(now + Duration::seconds(near)), now);
            let far_level = expire_time_level(Some(now + Duration::seconds(far)), now);
            prop_assert!(near_level >= far_level);
        }
    }
}
