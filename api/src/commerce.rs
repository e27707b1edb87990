//! Wallet, order placement and account provisioning.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::cache::RedisCache;
use crate::db;
use crate::models::{Account, Order, OrderStatus, PaymentAccount, Service, TransactionKind, User};
use crate::notification;
use crate::utils::{format_price, jalali_date, readable_size, sanitize_string};

pub const MAX_OPEN_ORDERS: i64 = 1;
pub const MAX_PENDING_ORDERS: i64 = 1;

/// Transactions shown in the admin receipt caption
const PAYMENT_HISTORY_LEN: i64 = 5;
const USER_TITLE_MAX_LEN: usize = 128;

#[derive(Debug, Error)]
pub enum CommerceError {
    #[error("Maximum number of open orders reached")]
    MaxOpenOrder,

    #[error("Maximum number of pending orders reached")]
    MaxPendingOrder,

    #[error("Not enough balance: {balance} < {price}")]
    NoEnoughBalance { balance: i64, price: i64 },

    #[error("Service not found")]
    ServiceNotFound,

    #[error("Service is disabled")]
    ServiceDisabled,

    #[error("Account not found")]
    AccountNotFound,

    #[error("Account does not belong to this user")]
    AccountNotOwned,

    #[error("User not found")]
    UserNotFound,

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Invalid account title")]
    InvalidTitle,

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl From<sqlx::Error> for CommerceError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.into())
    }
}

pub type CommerceResult<T> = std::result::Result<T, CommerceError>;

/// Telegram identity of the person talking to the bot
#[derive(Debug, Clone)]
pub struct TelegramIdentity {
    pub chat_id: i64,
    pub username: Option<String>,
    pub full_name: Option<String>,
}

/// Order limits, evaluated in order: open orders, pending orders, balance
pub fn check_order_limits(open: i64, pending: i64, balance: i64, price: i64) -> CommerceResult<()> {
    if open >= MAX_OPEN_ORDERS {
        return Err(CommerceError::MaxOpenOrder);
    }
    if pending >= MAX_PENDING_ORDERS {
        return Err(CommerceError::MaxPendingOrder);
    }
    if balance < price {
        return Err(CommerceError::NoEnoughBalance { balance, price });
    }
    Ok(())
}

pub fn referral_bonus(amount: i64, percent: i64) -> i64 {
    amount.saturating_mul(percent.clamp(0, 100)) / 100
}

/// One-paragraph summary of an account for chat messages
pub fn service_detail(account: &Account, now: DateTime<Utc>) -> String {
    let limit = if account.data_limit > 0 {
        readable_size(account.data_limit)
    } else {
        "Unlimited".to_string()
    };
    let expiry = account
        .expired_at
        .map(jalali_date)
        .unwrap_or_else(|| "Unlimited".to_string());
    let state = if account.is_active(now) { "active" } else { "inactive" };

    format!(
        "{}\nTraffic: {} / {}\nExpires: {}\nStatus: {}",
        account.display_title(),
        readable_size(account.used_traffic),
        limit,
        expiry,
        state
    )
}

/// Email used as the proxy client identifier
pub fn account_email(user_id: i64, order_id: i64) -> String {
    format!("{}_{}", user_id, order_id)
}

pub fn expiry_from(service: &Service, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    (service.duration_days > 0).then(|| now + Duration::days(service.duration_days as i64))
}

#[derive(Clone)]
pub struct CommerceService {
    pool: PgPool,
    referral_bonus_percent: i64,
}

impl CommerceService {
    pub fn new(pool: PgPool, referral_bonus_percent: i64) -> Self {
        Self {
            pool,
            referral_bonus_percent,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ========================================================================
    // Users
    // ========================================================================

    pub async fn add_or_get_user(
        &self,
        identity: &TelegramIdentity,
        referral: Option<&User>,
    ) -> CommerceResult<User> {
        let referral_user_id = referral
            .filter(|r| r.telegram_chat_id != identity.chat_id)
            .map(|r| r.id);

        let user = db::upsert_telegram_user(
            &self.pool,
            identity.chat_id,
            identity.username.as_deref(),
            identity.full_name.as_deref(),
            referral_user_id,
        )
        .await?;

        Ok(user)
    }

    pub async fn get_user(&self, user_id: i64) -> CommerceResult<Option<User>> {
        Ok(db::get_user_by_id(&self.pool, user_id).await?)
    }

    pub async fn get_user_by_chat_id(&self, chat_id: i64) -> CommerceResult<Option<User>> {
        Ok(db::get_user_by_chat_id(&self.pool, chat_id).await?)
    }

    pub async fn referral_count(&self, user: &User) -> CommerceResult<i64> {
        Ok(db::count_referrals(&self.pool, user.id).await?)
    }

    // ========================================================================
    // Catalogue
    // ========================================================================

    pub async fn available_services(&self) -> CommerceResult<Vec<Service>> {
        Ok(db::list_available_services(&self.pool).await?)
    }

    pub async fn get_service(&self, service_id: i64) -> CommerceResult<Option<Service>> {
        Ok(db::get_service_by_id(&self.pool, service_id).await?)
    }

    pub async fn available_payment_accounts(&self) -> CommerceResult<Vec<PaymentAccount>> {
        Ok(db::list_enabled_payment_accounts(&self.pool).await?)
    }

    pub async fn get_payment_account(&self, id: i64) -> CommerceResult<Option<PaymentAccount>> {
        Ok(db::get_payment_account_by_id(&self.pool, id).await?)
    }

    // ========================================================================
    // Accounts
    // ========================================================================

    pub async fn get_account(&self, account_id: i64) -> CommerceResult<Option<Account>> {
        Ok(db::get_account_by_id(&self.pool, account_id).await?)
    }

    pub async fn user_accounts(&self, user: &User) -> CommerceResult<Vec<Account>> {
        Ok(db::list_accounts_by_user(&self.pool, user.id).await?)
    }

    /// Rename an account on behalf of its owner
    pub async fn update_account_user_title(
        &self,
        chat_id: i64,
        account_id: i64,
        title: &str,
    ) -> CommerceResult<Account> {
        let user = self.get_user_by_chat_id(chat_id).await?.ok_or(CommerceError::UserNotFound)?;
        let account = self.get_account(account_id).await?.ok_or(CommerceError::AccountNotFound)?;
        if account.user_id != user.id {
            return Err(CommerceError::AccountNotOwned);
        }

        let title = sanitize_string(title.trim(), USER_TITLE_MAX_LEN).map_err(|_| CommerceError::InvalidTitle)?;
        if title.is_empty() {
            return Err(CommerceError::InvalidTitle);
        }
        Ok(db::update_account_user_title(&self.pool, account.id, &title).await?)
    }

    // ========================================================================
    // Orders
    // ========================================================================

    /// Charge the wallet and record a paid order. Provisioning picks it up later.
    pub async fn place_paid_order(&self, chat_id: i64, account_id: i64, service_id: i64) -> CommerceResult<Order> {
        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE telegram_chat_id = $1 FOR UPDATE")
            .bind(chat_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(CommerceError::UserNotFound)?;

        let service = sqlx::query_as::<_, Service>("SELECT * FROM services WHERE id = $1")
            .bind(service_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(CommerceError::ServiceNotFound)?;
        if !service.enable {
            return Err(CommerceError::ServiceDisabled);
        }

        if account_id > 0 {
            let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
                .bind(account_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(CommerceError::AccountNotFound)?;
            if account.user_id != user.id {
                return Err(CommerceError::AccountNotOwned);
            }
        }

        let open = db::count_user_orders_by_status(&mut *tx, user.id, OrderStatus::Open).await?;
        let pending = db::count_user_orders_by_status(&mut *tx, user.id, OrderStatus::Pending).await?;
        check_order_limits(open, pending, user.balance, service.price)?;

        let balance_after = user.balance - service.price;
        sqlx::query("UPDATE users SET balance = $2, modified_at = NOW() WHERE id = $1")
            .bind(user.id)
            .bind(balance_after)
            .execute(&mut *tx)
            .await?;

        let order = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (user_id, account_id, service_id, title, total, status, is_test)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(user.id)
        .bind(account_id.max(0))
        .bind(service.id)
        .bind(&service.name)
        .bind(service.price)
        .bind(OrderStatus::Paid)
        .bind(service.is_test)
        .fetch_one(&mut *tx)
        .await?;

        let description = format!("Order #{}: {}", order.id, service.name);
        db::create_transaction(
            &mut *tx,
            user.id,
            Some(order.id),
            -service.price,
            balance_after,
            TransactionKind::Purchase,
            Some(&description),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            "User {} placed order {} for service {} (account {})",
            user.id,
            order.id,
            service.id,
            account_id
        );

        Ok(order)
    }

    /// True when the user has not taken the test service within the interval
    pub async fn allow_to_get_new_test_service(
        &self,
        user: &User,
        test_service_id: i64,
        interval_days: i64,
    ) -> CommerceResult<bool> {
        let since = Utc::now() - Duration::days(interval_days);
        let taken = db::has_order_for_service_since(&self.pool, user.id, test_service_id, since).await?;
        Ok(!taken)
    }

    pub async fn orders(
        &self,
        account_id: Option<i64>,
        status: Option<OrderStatus>,
        limit: i64,
    ) -> CommerceResult<Vec<Order>> {
        Ok(db::list_orders(&self.pool, account_id, status, limit).await?)
    }

    /// Newest paid order still waiting on an active account
    pub async fn reserved_order(&self, account_id: i64) -> CommerceResult<Option<Order>> {
        let orders = self.orders(Some(account_id), Some(OrderStatus::Paid), 1).await?;
        Ok(orders.into_iter().next())
    }

    // ========================================================================
    // Wallet
    // ========================================================================

    /// Credit a verified payment. The first recharge also pays the referrer.
    pub async fn recharge_balance(&self, user_id: i64, amount: i64, description: Option<&str>) -> CommerceResult<User> {
        if amount <= 0 {
            return Err(CommerceError::InvalidAmount);
        }

        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(CommerceError::UserNotFound)?;

        let first_recharge =
            db::count_user_transactions_by_kind(&mut *tx, user.id, TransactionKind::Recharge).await? == 0;

        let updated = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET balance = balance + $2, modified_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(user.id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await?;

        db::create_transaction(
            &mut *tx,
            updated.id,
            None,
            amount,
            updated.balance,
            TransactionKind::Recharge,
            description,
        )
        .await?;
        db::create_notification(
            &mut *tx,
            &notification::balance_recharged(updated.id, amount, updated.balance),
        )
        .await?;

        if let Some(referrer_id) = user.referral_user_id.filter(|id| first_recharge && *id != user.id) {
            let bonus = referral_bonus(amount, self.referral_bonus_percent);
            if bonus > 0 {
                let referrer = sqlx::query_as::<_, User>(
                    r#"
                    UPDATE users
                    SET balance = balance + $2, modified_at = NOW()
                    WHERE id = $1
                    RETURNING *
                    "#,
                )
                .bind(referrer_id)
                .bind(bonus)
                .fetch_optional(&mut *tx)
                .await?;

                if let Some(referrer) = referrer {
                    let note = format!("Referral bonus from user {}", user.id);
                    db::create_transaction(
                        &mut *tx,
                        referrer.id,
                        None,
                        bonus,
                        referrer.balance,
                        TransactionKind::Referral,
                        Some(&note),
                    )
                    .await?;
                    db::create_notification(&mut *tx, &notification::referral_bonus(referrer.id, bonus)).await?;
                    tracing::info!("Referral bonus {} credited to user {}", bonus, referrer.id);
                }
            }
        }

        tx.commit().await?;

        tracing::info!("Recharged user {} by {}", updated.id, amount);
        Ok(updated)
    }

    /// Recent wallet activity formatted for the admin receipt caption
    pub async fn user_payment_history(&self, chat_id: i64) -> CommerceResult<String> {
        let Some(user) = self.get_user_by_chat_id(chat_id).await? else {
            return Ok(String::new());
        };
        let transactions = db::list_user_transactions(&self.pool, user.id, PAYMENT_HISTORY_LEN).await?;

        let mut lines = vec![format!("Balance: {}", format_price(user.balance))];
        if transactions.is_empty() {
            lines.push("No transactions".to_string());
        }
        for t in transactions {
            lines.push(format!(
                "{} {} {} ({})",
                jalali_date(t.created_at),
                t.kind,
                format_price(t.amount),
                t.description.unwrap_or_default()
            ));
        }

        Ok(lines.join("\n"))
    }
}

// ============================================================================
// Provisioning
// ============================================================================

/// What to do with a paid order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioning {
    CreateAccount,
    RechargeAccount,
    /// Keep the order paid until the current period runs out
    Reserve,
    /// The account to recharge no longer exists
    Cancel,
}

pub fn plan_provisioning(order: &Order, account: Option<&Account>, now: DateTime<Utc>) -> Provisioning {
    match (order.account_id, account) {
        (0, _) => Provisioning::CreateAccount,
        (_, None) => Provisioning::Cancel,
        (_, Some(account)) if account.is_active(now) => Provisioning::Reserve,
        (_, Some(_)) => Provisioning::RechargeAccount,
    }
}

/// Background worker turning paid orders into accounts
pub struct OrderProcessor {
    pool: PgPool,
    cache: RedisCache,
    interval: std::time::Duration,
    batch_size: i64,
}

impl OrderProcessor {
    pub fn new(pool: PgPool, cache: RedisCache, interval: std::time::Duration) -> Self {
        Self {
            pool,
            cache,
            interval,
            batch_size: 50,
        }
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        tracing::info!("Starting order processor...");

        loop {
            match self.process_batch().await {
                Ok(count) if count > 0 => tracing::debug!("Provisioned {} orders", count),
                Ok(_) => {}
                Err(e) => tracing::error!("Error processing paid orders: {}", e),
            }

            tokio::time::sleep(self.interval).await;
        }
    }

    /// Returns the number of completed orders
    pub async fn process_batch(&self) -> anyhow::Result<usize> {
        let orders = db::list_paid_orders(&self.pool, self.batch_size).await?;
        let mut completed = 0;

        for order in orders {
            match self.provision(&order).await {
                Ok(Some(account)) => {
                    completed += 1;
                    if let Err(e) = self.cache.invalidate_subscription(&account.uuid).await {
                        tracing::warn!("Failed to invalidate subscription cache: {}", e);
                    }
                    if let Err(e) = self.cache.publish_account_update(account.id, account.uuid, "provisioned").await {
                        tracing::warn!("Failed to publish account update: {}", e);
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::error!("Failed to provision order {}: {}", order.id, e),
            }
        }

        Ok(completed)
    }

    /// Completes the order unless it has to stay reserved
    async fn provision(&self, order: &Order) -> anyhow::Result<Option<Account>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        // Another worker may have completed it already
        let locked = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 AND status = 'paid' FOR UPDATE")
            .bind(order.id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(order) = locked else {
            return Ok(None);
        };

        let service = sqlx::query_as::<_, Service>("SELECT * FROM services WHERE id = $1")
            .bind(order.service_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Service {} not found", order.service_id))?;

        let existing = if order.account_id > 0 {
            sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1 FOR UPDATE")
                .bind(order.account_id)
                .fetch_optional(&mut *tx)
                .await?
        } else {
            None
        };

        let account = match plan_provisioning(&order, existing.as_ref(), now) {
            Provisioning::Reserve => return Ok(None),
            Provisioning::Cancel => {
                db::update_order_status(&mut *tx, order.id, OrderStatus::Canceled).await?;
                tx.commit().await?;
                tracing::warn!("Order {} canceled, account {} not found", order.id, order.account_id);
                return Ok(None);
            }
            Provisioning::CreateAccount => {
                sqlx::query_as::<_, Account>(
                    r#"
                    INSERT INTO accounts
                        (user_id, service_id, uuid, email, service_title, data_limit, expired_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    RETURNING *
                    "#,
                )
                .bind(order.user_id)
                .bind(service.id)
                .bind(Uuid::new_v4())
                .bind(account_email(order.user_id, order.id))
                .bind(&service.name)
                .bind(service.data_limit)
                .bind(expiry_from(&service, now))
                .fetch_one(&mut *tx)
                .await?
            }
            Provisioning::RechargeAccount => {
                sqlx::query_as::<_, Account>(
                    r#"
                    UPDATE accounts
                    SET service_id = $2, service_title = $3, data_limit = $4, used_traffic = 0,
                        expired_at = $5, enable = TRUE, modified_at = NOW()
                    WHERE id = $1
                    RETURNING *
                    "#,
                )
                .bind(order.account_id)
                .bind(service.id)
                .bind(&service.name)
                .bind(service.data_limit)
                .bind(expiry_from(&service, now))
                .fetch_one(&mut *tx)
                .await?
            }
        };

        let order = sqlx::query_as::<_, Order>(
            r#"
            UPDATE orders
            SET status = 'completed', account_id = $2, modified_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(order.id)
        .bind(account.id)
        .fetch_one(&mut *tx)
        .await?;

        db::create_notification(&mut *tx, &notification::order_completed(&order, &account)).await?;

        tx.commit().await?;

        tracing::info!("Order {} completed with account {}", order.id, account.id);
        Ok(Some(account))
    }
}
