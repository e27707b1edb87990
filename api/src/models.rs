use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use strum::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;
use validator::Validate;

/// Maps a string-valued enum onto a TEXT/VARCHAR column.
macro_rules! impl_text_column {
    ($ty:ty) => {
        impl sqlx::Type<sqlx::Postgres> for $ty {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <&str as sqlx::Type<sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
                <&str as sqlx::Type<sqlx::Postgres>>::compatible(ty)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $ty {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let text = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
                Ok(text.parse()?)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Postgres> for $ty {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> sqlx::encode::IsNull {
                <&str as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.as_ref(), buf)
            }
        }
    };
}

// ============================================================================
// Commerce enums
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString, AsRefStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Open,
    Pending,
    Paid,
    Completed,
    Canceled,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionKind {
    Recharge,
    Purchase,
    Refund,
    Referral,
}

impl_text_column!(OrderStatus);
impl_text_column!(TransactionKind);

// ============================================================================
// Inbound enums
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString, AsRefStr, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InboundSecurity {
    #[default]
    Default,
    None,
    Tls,
    Reality,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString, AsRefStr, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InboundNetwork {
    Tcp,
    #[default]
    Ws,
    Grpc,
    Http,
    HttpUpgrade,
    SplitHttp,
    Kcp,
    Quic,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString, AsRefStr, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InboundFingerPrint {
    #[default]
    Default,
    None,
    Chrome,
    Firefox,
    Safari,
    Ios,
    Android,
    Edge,
    #[serde(rename = "360")]
    #[strum(serialize = "360")]
    Browser360,
    Qq,
    Random,
    Randomized,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString, AsRefStr, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InboundType {
    #[default]
    Default,
    Vmess,
    Vless,
    Trojan,
    Shadowsocks,
}

impl_text_column!(InboundSecurity);
impl_text_column!(InboundNetwork);
impl_text_column!(InboundFingerPrint);
impl_text_column!(InboundType);

/// JSON-encoded list of strings stored in a TEXT column
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonList(pub Vec<String>);

impl JsonList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn join(&self, sep: &str) -> String {
        self.0.join(sep)
    }
}

impl From<Vec<String>> for JsonList {
    fn from(items: Vec<String>) -> Self {
        Self(items)
    }
}

impl sqlx::Type<sqlx::Postgres> for JsonList {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for JsonList {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let text = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self(serde_json::from_str(text)?))
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for JsonList {
    fn encode_by_ref(&self, buf: &mut sqlx::postgres::PgArgumentBuffer) -> sqlx::encode::IsNull {
        let text = serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_string());
        <String as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&text, buf)
    }
}

// ============================================================================
// Row models
// ============================================================================

/// Telegram user with a wallet balance
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub telegram_chat_id: i64,
    pub telegram_username: Option<String>,
    pub full_name: Option<String>,
    pub balance: i64,
    pub referral_user_id: Option<i64>,
    pub force_join_channel: bool,
    pub enable: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl User {
    /// Balance with thousands separators, `None` when the wallet is empty
    pub fn balance_readable(&self) -> Option<String> {
        (self.balance != 0).then(|| crate::utils::format_price(self.balance))
    }

    pub fn display_name(&self) -> String {
        self.full_name
            .clone()
            .or_else(|| self.telegram_username.clone())
            .unwrap_or_else(|| self.telegram_chat_id.to_string())
    }
}

/// Admin panel login
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Admin {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Sellable service plan
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub price: i64,
    pub duration_days: i32,
    pub data_limit: i64,
    pub is_test: bool,
    pub enable: bool,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Service {
    pub fn price_readable(&self) -> String {
        crate::utils::format_price(self.price)
    }
}

/// Provisioned proxy subscription
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: i64,
    pub user_id: i64,
    pub service_id: i64,
    pub uuid: Uuid,
    pub email: String,
    pub service_title: Option<String>,
    pub user_title: Option<String>,
    pub data_limit: i64,
    pub used_traffic: i64,
    pub expired_at: Option<DateTime<Utc>>,
    pub enable: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Account {
    /// Percent of the traffic limit used, `None` for unlimited accounts
    pub fn traffic_usage_percent(&self) -> Option<f64> {
        if self.data_limit <= 0 {
            return None;
        }
        let percent = self.used_traffic as f64 / self.data_limit as f64 * 100.0;
        Some((percent * 100.0).round() / 100.0)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expired_at.map(|at| at <= now).unwrap_or(false)
    }

    pub fn is_exhausted(&self) -> bool {
        self.data_limit > 0 && self.used_traffic >= self.data_limit
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.enable && !self.is_expired(now) && !self.is_exhausted()
    }

    /// Title shown in account lists: the user's own name first
    pub fn display_title(&self) -> String {
        self.user_title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.service_title.clone())
            .unwrap_or_else(|| self.email.clone())
    }
}

/// Purchase or recharge of a service
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub account_id: i64,
    pub service_id: i64,
    pub title: String,
    pub total: i64,
    pub status: OrderStatus,
    pub is_test: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Wallet ledger entry
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub id: i64,
    pub user_id: i64,
    pub order_id: Option<i64>,
    pub amount: i64,
    pub balance_after: i64,
    pub kind: TransactionKind,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Bank card offered for manual card-to-card payments
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentAccount {
    pub id: i64,
    pub card_number: String,
    pub account_number: Option<String>,
    pub shaba: Option<String>,
    pub bank_name: Option<String>,
    pub owner_family: Option<String>,
    pub payment_notice: Option<String>,
    pub enable: bool,
    pub created_at: DateTime<Utc>,
}

/// Proxy server inbound (xray inbound tag)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Inbound {
    pub id: i64,
    pub remark: String,
    pub key: String,
    pub protocol: String,
    pub port: i32,
    pub enable: bool,
    pub develop: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Client-facing connection settings for an inbound
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InboundConfig {
    pub id: i64,
    pub inbound_id: Option<i64>,
    pub remark: Option<String>,
    pub port: Option<i32>,
    pub domain: Option<String>,
    pub host: Option<String>,
    pub sni: Option<String>,
    pub address: Option<String>,
    pub path: Option<String>,
    pub pbk: Option<String>,
    pub sid: Option<String>,
    pub spx: Option<String>,
    pub enable: bool,
    pub develop: bool,
    pub finger_print: InboundFingerPrint,
    pub security: InboundSecurity,
    pub network: InboundNetwork,
    pub alpns: Option<JsonList>,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub config_type: InboundType,
    pub config_mode: String,
    pub extra: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl InboundConfig {
    /// Protocol used for the share link; `default` defers to the inbound
    pub fn effective_type(&self, inbound: Option<&Inbound>) -> InboundType {
        if self.config_type != InboundType::Default {
            return self.config_type;
        }
        inbound
            .and_then(|i| i.protocol.to_lowercase().parse::<InboundType>().ok())
            .filter(|t| *t != InboundType::Default)
            .unwrap_or(InboundType::Vless)
    }

    /// Whether accounts should see this config in their subscription
    pub fn is_published(&self, inbound: Option<&Inbound>) -> bool {
        self.enable && !self.develop && inbound.map(|i| i.enable && !i.develop).unwrap_or(true)
    }
}

// ============================================================================
// DTOs for admin API requests/responses
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AdminLoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AdminLoginResponse {
    pub token: String,
    pub expires_in: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct InboundRequest {
    #[validate(length(min = 1, max = 128))]
    pub remark: String,
    #[validate(length(min = 1, max = 128))]
    pub key: String,
    #[validate(length(min = 1, max = 32))]
    pub protocol: String,
    #[validate(range(min = 1, max = 65535))]
    pub port: i32,
    pub enable: Option<bool>,
    pub develop: Option<bool>,
}

/// Body for creating an inbound config; omitted enums take their defaults
#[derive(Debug, Default, Deserialize, Validate)]
pub struct InboundConfigCreate {
    pub inbound_id: Option<i64>,
    #[validate(length(max = 128))]
    pub remark: Option<String>,
    #[validate(range(min = 1, max = 65535))]
    pub port: Option<i32>,
    #[validate(length(max = 128))]
    pub domain: Option<String>,
    #[validate(length(max = 128))]
    pub host: Option<String>,
    #[validate(length(max = 128))]
    pub sni: Option<String>,
    #[validate(length(max = 128))]
    pub address: Option<String>,
    #[validate(length(max = 400))]
    pub path: Option<String>,
    #[validate(length(max = 400))]
    pub pbk: Option<String>,
    #[validate(length(max = 400))]
    pub sid: Option<String>,
    #[validate(length(max = 400))]
    pub spx: Option<String>,
    pub enable: Option<bool>,
    pub develop: Option<bool>,
    pub finger_print: Option<InboundFingerPrint>,
    pub security: Option<InboundSecurity>,
    pub network: Option<InboundNetwork>,
    pub alpns: Option<Vec<String>>,
    #[serde(rename = "type")]
    pub config_type: Option<InboundType>,
    #[validate(length(min = 1, max = 128))]
    pub config_mode: Option<String>,
    #[validate(length(max = 2048), custom = "crate::utils::validate_json_text")]
    pub extra: Option<String>,
}

/// Partial update; only present fields are written
pub type InboundConfigUpdate = InboundConfigCreate;

#[derive(Debug, Deserialize, Validate)]
pub struct ServiceRequest {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[validate(range(min = 0))]
    pub price: i64,
    #[validate(range(min = 1, max = 3650))]
    pub duration_days: i32,
    #[validate(range(min = 0))]
    pub data_limit: i64,
    pub is_test: Option<bool>,
    pub enable: Option<bool>,
    pub sort_order: Option<i32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PaymentAccountRequest {
    #[validate(length(min = 1, max = 32), custom = "crate::utils::validate_card_number")]
    pub card_number: String,
    #[validate(length(max = 64))]
    pub account_number: Option<String>,
    #[validate(length(max = 64))]
    pub shaba: Option<String>,
    #[validate(length(max = 128))]
    pub bank_name: Option<String>,
    #[validate(length(max = 128))]
    pub owner_family: Option<String>,
    pub payment_notice: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RechargeRequest {
    pub amount: i64,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PageQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 500)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

#[derive(Debug, Deserialize)]
pub struct OrderQuery {
    pub account_id: Option<i64>,
    pub status: Option<OrderStatus>,
    pub limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;
    use strum::IntoEnumIterator;

    fn account(data_limit: i64, used_traffic: i64, expired_at: Option<DateTime<Utc>>) -> Account {
        Account {
            id: 1,
            user_id: 1,
            service_id: 1,
            uuid: Uuid::new_v4(),
            email: "1_42".to_string(),
            service_title: Some("30 Days / 50GB".to_string()),
            user_title: None,
            data_limit,
            used_traffic,
            expired_at,
            enable: true,
            created_at: Utc::now(),
            modified_at: Utc::now(),
        }
    }

    fn inbound(protocol: &str) -> Inbound {
        Inbound {
            id: 1,
            remark: "DE".to_string(),
            key: "vless-ws".to_string(),
            protocol: protocol.to_string(),
            port: 443,
            enable: true,
            develop: false,
            created_at: Utc::now(),
            modified_at: Utc::now(),
        }
    }

    fn config(config_type: InboundType) -> InboundConfig {
        InboundConfig {
            id: 1,
            inbound_id: Some(1),
            remark: Some("Germany".to_string()),
            port: None,
            domain: Some("de.example.com".to_string()),
            host: None,
            sni: None,
            address: None,
            path: Some("/ws".to_string()),
            pbk: None,
            sid: None,
            spx: None,
            enable: true,
            develop: false,
            finger_print: InboundFingerPrint::Default,
            security: InboundSecurity::Default,
            network: InboundNetwork::Ws,
            alpns: None,
            config_type,
            config_mode: "auto".to_string(),
            extra: None,
            created_at: Utc::now(),
            modified_at: Utc::now(),
        }
    }

    #[test]
    fn test_inbound_enum_defaults_match_schema() {
        assert_eq!(InboundFingerPrint::default().as_ref(), "default");
        assert_eq!(InboundSecurity::default().as_ref(), "default");
        assert_eq!(InboundNetwork::default().as_ref(), "ws");
        assert_eq!(InboundType::default().as_ref(), "default");
        assert_eq!(OrderStatus::default(), OrderStatus::Open);
    }

    #[test]
    fn test_fingerprint_360_serializes_as_number_string() {
        assert_eq!(InboundFingerPrint::Browser360.to_string(), "360");
        assert_eq!("360".parse::<InboundFingerPrint>().unwrap(), InboundFingerPrint::Browser360);
        let json = serde_json::to_string(&InboundFingerPrint::Browser360).unwrap();
        assert_eq!(json, "\"360\"");
    }

    #[test]
    fn test_enum_serde_and_strum_agree() {
        for status in OrderStatus::iter() {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status));
        }
        for network in InboundNetwork::iter() {
            let json = serde_json::to_string(&network).unwrap();
            assert_eq!(json, format!("\"{}\"", network));
        }
        for fp in InboundFingerPrint::iter() {
            let json = serde_json::to_string(&fp).unwrap();
            assert_eq!(json, format!("\"{}\"", fp));
        }
    }

    #[test]
    fn test_json_list_serializes_transparently() {
        let alpns = JsonList(vec!["h2".to_string(), "http/1.1".to_string()]);
        assert_eq!(serde_json::to_string(&alpns).unwrap(), r#"["h2","http/1.1"]"#);
        assert_eq!(alpns.join(","), "h2,http/1.1");
    }

    #[test]
    fn test_traffic_usage_percent() {
        assert_eq!(account(0, 500, None).traffic_usage_percent(), None);
        assert_eq!(account(1000, 500, None).traffic_usage_percent(), Some(50.0));
        assert_eq!(account(3000, 1000, None).traffic_usage_percent(), Some(33.33));
    }

    #[test]
    fn test_account_activity() {
        let now = Utc::now();
        assert!(account(0, 10_000, None).is_active(now));
        assert!(!account(100, 100, None).is_active(now));
        assert!(!account(100, 0, Some(now - Duration::hours(1))).is_active(now));
        assert!(account(100, 0, Some(now + Duration::hours(1))).is_active(now));

        let mut disabled = account(100, 0, None);
        disabled.enable = false;
        assert!(!disabled.is_active(now));
    }

    #[test]
    fn test_account_display_title_prefers_user_title() {
        let mut acc = account(0, 0, None);
        assert_eq!(acc.display_title(), "30 Days / 50GB");
        acc.user_title = Some("Phone".to_string());
        assert_eq!(acc.display_title(), "Phone");
        acc.user_title = Some("  ".to_string());
        assert_eq!(acc.display_title(), "30 Days / 50GB");
    }

    #[test]
    fn test_effective_type_falls_back_to_inbound_protocol() {
        assert_eq!(config(InboundType::Trojan).effective_type(Some(&inbound("vmess"))), InboundType::Trojan);
        assert_eq!(config(InboundType::Default).effective_type(Some(&inbound("VMESS"))), InboundType::Vmess);
        assert_eq!(config(InboundType::Default).effective_type(Some(&inbound("wireguard"))), InboundType::Vless);
        assert_eq!(config(InboundType::Default).effective_type(None), InboundType::Vless);
    }

    #[test]
    fn test_config_published_only_when_enabled_and_live() {
        let live = inbound("vless");
        let mut dev = inbound("vless");
        dev.develop = true;

        assert!(config(InboundType::Vless).is_published(Some(&live)));
        assert!(config(InboundType::Vless).is_published(None));
        assert!(!config(InboundType::Vless).is_published(Some(&dev)));

        let mut disabled = config(InboundType::Vless);
        disabled.enable = false;
        assert!(!disabled.is_published(Some(&live)));
    }

    #[test]
    fn test_inbound_config_type_field_renamed_in_json() {
        let json = serde_json::to_value(config(InboundType::Vless)).unwrap();
        assert_eq!(json["type"], "vless");
        assert!(json.get("config_type").is_none());
    }

    #[test]
    fn test_inbound_config_create_validation() {
        let ok = InboundConfigCreate {
            remark: Some("DE".to_string()),
            port: Some(443),
            extra: Some(r#"{"mux": true}"#.to_string()),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let bad_port = InboundConfigCreate {
            port: Some(70000),
            ..Default::default()
        };
        assert!(bad_port.validate().is_err());

        let long_sni = InboundConfigCreate {
            sni: Some("a".repeat(129)),
            ..Default::default()
        };
        assert!(long_sni.validate().is_err());

        let bad_extra = InboundConfigCreate {
            extra: Some("{not json".to_string()),
            ..Default::default()
        };
        assert!(bad_extra.validate().is_err());
    }

    #[test]
    fn test_page_query_bounds() {
        let q = PageQuery { limit: Some(10_000), offset: Some(-5) };
        assert_eq!(q.limit(), 500);
        assert_eq!(q.offset(), 0);
        let q = PageQuery { limit: None, offset: None };
        assert_eq!(q.limit(), 50);
    }

    proptest! {
        #[test]
        fn test_usage_percent_bounded_by_ratio(
            limit in 1i64..=1_000_000_000_000i64,
            used in 0i64..=1_000_000_000_000i64,
        ) {
            let acc = account(limit, used, None);
            let percent = acc.traffic_usage_percent().unwrap();
            prop_assert!(percent >= 0.0);
            prop_assert_eq!(acc.is_exhausted(), used >= limit);
        }
    }
}
