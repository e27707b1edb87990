use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgExecutor, PgPool};
use uuid::Uuid;

use crate::models::{
    Account, Admin, Inbound, InboundConfig, InboundConfigCreate, InboundConfigUpdate, InboundRequest, Order,
    OrderStatus, PaymentAccount, PaymentAccountRequest, Service, ServiceRequest, Transaction, TransactionKind,
    User,
};
use crate::notification::{
    Notification, NotificationCreate, NotificationEngine, NotificationModify, NotificationQuery,
    NotificationStatus, NotificationType,
};

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Apply the embedded schema migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ============================================================================
// User Operations
// ============================================================================

/// Insert a Telegram user or refresh the name of an existing one.
/// The referrer is only written on first insert.
pub async fn upsert_telegram_user(
    pool: &PgPool,
    telegram_chat_id: i64,
    telegram_username: Option<&str>,
    full_name: Option<&str>,
    referral_user_id: Option<i64>,
) -> Result<User> {
    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (telegram_chat_id, telegram_username, full_name, referral_user_id)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (telegram_chat_id) DO UPDATE
        SET telegram_username = EXCLUDED.telegram_username,
            full_name = EXCLUDED.full_name,
            modified_at = NOW()
        RETURNING *
        "#,
    )
    .bind(telegram_chat_id)
    .bind(telegram_username)
    .bind(full_name)
    .bind(referral_user_id)
    .fetch_one(pool)
    .await?;

    Ok(user)
}

pub async fn get_user_by_id(pool: &PgPool, user_id: i64) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    Ok(user)
}

pub async fn get_user_by_chat_id(pool: &PgPool, telegram_chat_id: i64) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE telegram_chat_id = $1")
        .bind(telegram_chat_id)
        .fetch_optional(pool)
        .await?;

    Ok(user)
}

pub async fn list_users(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<User>> {
    let users = sqlx::query_as::<_, User>(
        r#"
        SELECT * FROM users
        ORDER BY created_at DESC
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(users)
}

pub async fn count_users(pool: &PgPool) -> Result<i64> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;

    Ok(count.0)
}

/// Number of users who joined through this user's referral link
pub async fn count_referrals(pool: &PgPool, user_id: i64) -> Result<i64> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE referral_user_id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await?;

    Ok(count.0)
}

// ============================================================================
// Admin Operations
// ============================================================================

pub async fn get_admin_by_username(pool: &PgPool, username: &str) -> Result<Option<Admin>> {
    let admin = sqlx::query_as::<_, Admin>("SELECT * FROM admins WHERE username = $1")
        .bind(username)
        .fetch_optional(pool)
        .await?;

    Ok(admin)
}

pub async fn create_admin(pool: &PgPool, username: &str, password_hash: &str) -> Result<Admin> {
    let admin = sqlx::query_as::<_, Admin>(
        r#"
        INSERT INTO admins (username, password_hash)
        VALUES ($1, $2)
        RETURNING *
        "#,
    )
    .bind(username)
    .bind(password_hash)
    .fetch_one(pool)
    .await?;

    Ok(admin)
}

pub async fn count_admins(pool: &PgPool) -> Result<i64> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM admins")
        .fetch_one(pool)
        .await?;

    Ok(count.0)
}

// ============================================================================
// Service Operations
// ============================================================================

pub async fn create_service(pool: &PgPool, req: &ServiceRequest) -> Result<Service> {
    let service = sqlx::query_as::<_, Service>(
        r#"
        INSERT INTO services (name, price, duration_days, data_limit, is_test, enable, sort_order)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(&req.name)
    .bind(req.price)
    .bind(req.duration_days)
    .bind(req.data_limit)
    .bind(req.is_test.unwrap_or(false))
    .bind(req.enable.unwrap_or(true))
    .bind(req.sort_order.unwrap_or(0))
    .fetch_one(pool)
    .await?;

    Ok(service)
}

pub async fn get_service_by_id(pool: &PgPool, service_id: i64) -> Result<Option<Service>> {
    let service = sqlx::query_as::<_, Service>("SELECT * FROM services WHERE id = $1")
        .bind(service_id)
        .fetch_optional(pool)
        .await?;

    Ok(service)
}

/// Enabled, sellable services in menu order
pub async fn list_available_services(pool: &PgPool) -> Result<Vec<Service>> {
    let services = sqlx::query_as::<_, Service>(
        r#"
        SELECT * FROM services
        WHERE enable = TRUE AND is_test = FALSE
        ORDER BY sort_order ASC, price ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(services)
}

pub async fn list_all_services(pool: &PgPool) -> Result<Vec<Service>> {
    let services = sqlx::query_as::<_, Service>("SELECT * FROM services ORDER BY sort_order ASC, id ASC")
        .fetch_all(pool)
        .await?;

    Ok(services)
}

// ============================================================================
// Account Operations
// ============================================================================

pub async fn get_account_by_id(pool: &PgPool, account_id: i64) -> Result<Option<Account>> {
    let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
        .bind(account_id)
        .fetch_optional(pool)
        .await?;

    Ok(account)
}

pub async fn get_account_by_uuid(pool: &PgPool, uuid: Uuid) -> Result<Option<Account>> {
    let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE uuid = $1")
        .bind(uuid)
        .fetch_optional(pool)
        .await?;

    Ok(account)
}

/// A user's accounts, most recently changed first
pub async fn list_accounts_by_user(pool: &PgPool, user_id: i64) -> Result<Vec<Account>> {
    let accounts = sqlx::query_as::<_, Account>(
        r#"
        SELECT * FROM accounts
        WHERE user_id = $1
        ORDER BY modified_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(accounts)
}

pub async fn update_account_user_title(pool: &PgPool, account_id: i64, user_title: &str) -> Result<Account> {
    let account = sqlx::query_as::<_, Account>(
        r#"
        UPDATE accounts
        SET user_title = $2, modified_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(account_id)
    .bind(user_title)
    .fetch_one(pool)
    .await?;

    Ok(account)
}

/// Add reported traffic to an account; `None` for unknown uuids
pub async fn add_account_traffic(pool: &PgPool, uuid: Uuid, bytes: i64) -> Result<Option<Account>> {
    let account = sqlx::query_as::<_, Account>(
        r#"
        UPDATE accounts
        SET used_traffic = used_traffic + $2, modified_at = NOW()
        WHERE uuid = $1
        RETURNING *
        "#,
    )
    .bind(uuid)
    .bind(bytes)
    .fetch_optional(pool)
    .await?;

    Ok(account)
}

/// Enabled accounts whose expiry falls inside the widest notification window
pub async fn list_accounts_expiring_before(pool: &PgPool, before: DateTime<Utc>) -> Result<Vec<Account>> {
    let accounts = sqlx::query_as::<_, Account>(
        r#"
        SELECT * FROM accounts
        WHERE enable = TRUE AND expired_at IS NOT NULL AND expired_at <= $1
        ORDER BY expired_at ASC
        "#,
    )
    .bind(before)
    .fetch_all(pool)
    .await?;

    Ok(accounts)
}

// ============================================================================
// Order Operations
// ============================================================================

pub async fn get_order_by_id(pool: &PgPool, order_id: i64) -> Result<Option<Order>> {
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
        .bind(order_id)
        .fetch_optional(pool)
        .await?;

    Ok(order)
}

pub async fn count_user_orders_by_status<'e, E: PgExecutor<'e>>(
    executor: E,
    user_id: i64,
    status: OrderStatus,
) -> Result<i64> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE user_id = $1 AND status = $2")
        .bind(user_id)
        .bind(status)
        .fetch_one(executor)
        .await?;

    Ok(count.0)
}

pub async fn update_order_status<'e, E: PgExecutor<'e>>(
    executor: E,
    order_id: i64,
    status: OrderStatus,
) -> Result<Option<Order>> {
    let order = sqlx::query_as::<_, Order>(
        "UPDATE orders SET status = $2, modified_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(order_id)
    .bind(status)
    .fetch_optional(executor)
    .await?;

    Ok(order)
}

/// Orders newest first, optionally filtered by account and status
pub async fn list_orders(
    pool: &PgPool,
    account_id: Option<i64>,
    status: Option<OrderStatus>,
    limit: i64,
) -> Result<Vec<Order>> {
    let orders = sqlx::query_as::<_, Order>(
        r#"
        SELECT * FROM orders
        WHERE ($1::BIGINT IS NULL OR account_id = $1)
          AND ($2::VARCHAR IS NULL OR status = $2)
        ORDER BY created_at DESC, id DESC
        LIMIT $3
        "#,
    )
    .bind(account_id)
    .bind(status)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(orders)
}

/// Paid orders ready for provisioning, oldest first. Recharges of an
/// account that is still active stay reserved and are left out, so they
/// never hold up the rest of the queue.
pub async fn list_paid_orders(pool: &PgPool, limit: i64) -> Result<Vec<Order>> {
    let orders = sqlx::query_as::<_, Order>(
        r#"
        SELECT o.* FROM orders o
        LEFT JOIN accounts a ON a.id = o.account_id
        WHERE o.status = 'paid'
          AND (
            o.account_id = 0
            OR a.id IS NULL
            OR NOT a.enable
            OR (a.expired_at IS NOT NULL AND a.expired_at <= NOW())
            OR (a.data_limit > 0 AND a.used_traffic >= a.data_limit)
          )
        ORDER BY o.created_at ASC, o.id ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(orders)
}

/// Whether the user ordered this service at or after `since`
pub async fn has_order_for_service_since(
    pool: &PgPool,
    user_id: i64,
    service_id: i64,
    since: DateTime<Utc>,
) -> Result<bool> {
    let count: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM orders
        WHERE user_id = $1 AND service_id = $2 AND created_at >= $3
        "#,
    )
    .bind(user_id)
    .bind(service_id)
    .bind(since)
    .fetch_one(pool)
    .await?;

    Ok(count.0 > 0)
}

// ============================================================================
// Transaction Operations
// ============================================================================

pub async fn create_transaction<'e, E: PgExecutor<'e>>(
    executor: E,
    user_id: i64,
    order_id: Option<i64>,
    amount: i64,
    balance_after: i64,
    kind: TransactionKind,
    description: Option<&str>,
) -> Result<Transaction> {
    let transaction = sqlx::query_as::<_, Transaction>(
        r#"
        INSERT INTO transactions (user_id, order_id, amount, balance_after, kind, description)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(order_id)
    .bind(amount)
    .bind(balance_after)
    .bind(kind)
    .bind(description)
    .fetch_one(executor)
    .await?;

    Ok(transaction)
}

pub async fn list_user_transactions(pool: &PgPool, user_id: i64, limit: i64) -> Result<Vec<Transaction>> {
    let transactions = sqlx::query_as::<_, Transaction>(
        r#"
        SELECT * FROM transactions
        WHERE user_id = $1
        ORDER BY created_at DESC, id DESC
        LIMIT $2
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(transactions)
}

pub async fn count_user_transactions_by_kind<'e, E: PgExecutor<'e>>(
    executor: E,
    user_id: i64,
    kind: TransactionKind,
) -> Result<i64> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions WHERE user_id = $1 AND kind = $2")
        .bind(user_id)
        .bind(kind)
        .fetch_one(executor)
        .await?;

    Ok(count.0)
}

// ============================================================================
// Payment Account Operations
// ============================================================================

pub async fn create_payment_account(pool: &PgPool, req: &PaymentAccountRequest) -> Result<PaymentAccount> {
    let account = sqlx::query_as::<_, PaymentAccount>(
        r#"
        INSERT INTO payment_accounts
            (card_number, account_number, shaba, bank_name, owner_family, payment_notice)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(&req.card_number)
    .bind(&req.account_number)
    .bind(&req.shaba)
    .bind(&req.bank_name)
    .bind(&req.owner_family)
    .bind(&req.payment_notice)
    .fetch_one(pool)
    .await?;

    Ok(account)
}

pub async fn get_payment_account_by_id(pool: &PgPool, id: i64) -> Result<Option<PaymentAccount>> {
    let account = sqlx::query_as::<_, PaymentAccount>("SELECT * FROM payment_accounts WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(account)
}

pub async fn list_enabled_payment_accounts(pool: &PgPool) -> Result<Vec<PaymentAccount>> {
    let accounts = sqlx::query_as::<_, PaymentAccount>(
        "SELECT * FROM payment_accounts WHERE enable = TRUE ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await?;

    Ok(accounts)
}

pub async fn list_all_payment_accounts(pool: &PgPool) -> Result<Vec<PaymentAccount>> {
    let accounts = sqlx::query_as::<_, PaymentAccount>("SELECT * FROM payment_accounts ORDER BY id ASC")
        .fetch_all(pool)
        .await?;

    Ok(accounts)
}

// ============================================================================
// Inbound Operations
// ============================================================================

pub async fn create_inbound(pool: &PgPool, req: &InboundRequest) -> Result<Inbound> {
    let inbound = sqlx::query_as::<_, Inbound>(
        r#"
        INSERT INTO inbounds (remark, key, protocol, port, enable, develop)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(&req.remark)
    .bind(&req.key)
    .bind(req.protocol.to_lowercase())
    .bind(req.port)
    .bind(req.enable.unwrap_or(true))
    .bind(req.develop.unwrap_or(false))
    .fetch_one(pool)
    .await?;

    Ok(inbound)
}

pub async fn get_inbound_by_id(pool: &PgPool, inbound_id: i64) -> Result<Option<Inbound>> {
    let inbound = sqlx::query_as::<_, Inbound>("SELECT * FROM inbounds WHERE id = $1")
        .bind(inbound_id)
        .fetch_optional(pool)
        .await?;

    Ok(inbound)
}

pub async fn list_inbounds(pool: &PgPool) -> Result<Vec<Inbound>> {
    let inbounds = sqlx::query_as::<_, Inbound>("SELECT * FROM inbounds ORDER BY id ASC")
        .fetch_all(pool)
        .await?;

    Ok(inbounds)
}

pub async fn update_inbound(pool: &PgPool, inbound_id: i64, req: &InboundRequest) -> Result<Option<Inbound>> {
    let inbound = sqlx::query_as::<_, Inbound>(
        r#"
        UPDATE inbounds
        SET remark = $2, key = $3, protocol = $4, port = $5,
            enable = COALESCE($6, enable), develop = COALESCE($7, develop),
            modified_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(inbound_id)
    .bind(&req.remark)
    .bind(&req.key)
    .bind(req.protocol.to_lowercase())
    .bind(req.port)
    .bind(req.enable)
    .bind(req.develop)
    .fetch_optional(pool)
    .await?;

    Ok(inbound)
}

/// Delete an inbound and detach its configs
pub async fn delete_inbound(pool: &PgPool, inbound_id: i64) -> Result<bool> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE inbound_config SET inbound_id = NULL, modified_at = NOW() WHERE inbound_id = $1")
        .bind(inbound_id)
        .execute(&mut *tx)
        .await?;

    let result = sqlx::query("DELETE FROM inbounds WHERE id = $1")
        .bind(inbound_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(result.rows_affected() > 0)
}

// ============================================================================
// Inbound Config Operations
// ============================================================================

pub async fn create_inbound_config(pool: &PgPool, req: &InboundConfigCreate) -> Result<InboundConfig> {
    let config = sqlx::query_as::<_, InboundConfig>(
        r#"
        INSERT INTO inbound_config (
            inbound_id, remark, port, domain, host, sni, address, path, pbk, sid, spx,
            enable, develop, finger_print, security, network, alpns, type, config_mode, extra
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                $12, $13, $14, $15, $16, $17, $18, $19, $20)
        RETURNING *
        "#,
    )
    .bind(req.inbound_id)
    .bind(&req.remark)
    .bind(req.port)
    .bind(&req.domain)
    .bind(&req.host)
    .bind(&req.sni)
    .bind(&req.address)
    .bind(&req.path)
    .bind(&req.pbk)
    .bind(&req.sid)
    .bind(&req.spx)
    .bind(req.enable.unwrap_or(true))
    .bind(req.develop.unwrap_or(false))
    .bind(req.finger_print.unwrap_or_default())
    .bind(req.security.unwrap_or_default())
    .bind(req.network.unwrap_or_default())
    .bind(req.alpns.clone().map(crate::models::JsonList))
    .bind(req.config_type.unwrap_or_default())
    .bind(req.config_mode.as_deref().unwrap_or("auto"))
    .bind(&req.extra)
    .fetch_one(pool)
    .await?;

    Ok(config)
}

pub async fn get_inbound_config_by_id(pool: &PgPool, config_id: i64) -> Result<Option<InboundConfig>> {
    let config = sqlx::query_as::<_, InboundConfig>("SELECT * FROM inbound_config WHERE id = $1")
        .bind(config_id)
        .fetch_optional(pool)
        .await?;

    Ok(config)
}

pub async fn list_inbound_configs(pool: &PgPool, inbound_id: Option<i64>) -> Result<Vec<InboundConfig>> {
    let configs = sqlx::query_as::<_, InboundConfig>(
        r#"
        SELECT * FROM inbound_config
        WHERE ($1::BIGINT IS NULL OR inbound_id = $1)
        ORDER BY id ASC
        "#,
    )
    .bind(inbound_id)
    .fetch_all(pool)
    .await?;

    Ok(configs)
}

/// Only fields present in the request are written; `modified_at` is always bumped
pub async fn update_inbound_config(
    pool: &PgPool,
    config_id: i64,
    req: &InboundConfigUpdate,
) -> Result<Option<InboundConfig>> {
    let config = sqlx::query_as::<_, InboundConfig>(
        r#"
        UPDATE inbound_config SET
            inbound_id = COALESCE($2, inbound_id),
            remark = COALESCE($3, remark),
            port = COALESCE($4, port),
            domain = COALESCE($5, domain),
            host = COALESCE($6, host),
            sni = COALESCE($7, sni),
            address = COALESCE($8, address),
            path = COALESCE($9, path),
            pbk = COALESCE($10, pbk),
            sid = COALESCE($11, sid),
            spx = COALESCE($12, spx),
            enable = COALESCE($13, enable),
            develop = COALESCE($14, develop),
            finger_print = COALESCE($15, finger_print),
            security = COALESCE($16, security),
            network = COALESCE($17, network),
            alpns = COALESCE($18, alpns),
            type = COALESCE($19, type),
            config_mode = COALESCE($20, config_mode),
            extra = COALESCE($21, extra),
            modified_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(config_id)
    .bind(req.inbound_id)
    .bind(&req.remark)
    .bind(req.port)
    .bind(&req.domain)
    .bind(&req.host)
    .bind(&req.sni)
    .bind(&req.address)
    .bind(&req.path)
    .bind(&req.pbk)
    .bind(&req.sid)
    .bind(&req.spx)
    .bind(req.enable)
    .bind(req.develop)
    .bind(req.finger_print)
    .bind(req.security)
    .bind(req.network)
    .bind(req.alpns.clone().map(crate::models::JsonList))
    .bind(req.config_type)
    .bind(&req.config_mode)
    .bind(&req.extra)
    .fetch_optional(pool)
    .await?;

    Ok(config)
}

pub async fn delete_inbound_config(pool: &PgPool, config_id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM inbound_config WHERE id = $1")
        .bind(config_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Enabled, non-develop configs for subscription rendering
pub async fn list_enabled_inbound_configs(pool: &PgPool) -> Result<Vec<InboundConfig>> {
    let configs = sqlx::query_as::<_, InboundConfig>(
        r#"
        SELECT * FROM inbound_config
        WHERE enable = TRUE AND develop = FALSE
        ORDER BY id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(configs)
}

// ============================================================================
// Notification Operations
// ============================================================================

pub async fn create_notification<'e, E: PgExecutor<'e>>(
    executor: E,
    n: &NotificationCreate,
) -> Result<Notification> {
    let notification = sqlx::query_as::<_, Notification>(
        r#"
        INSERT INTO notifications (
            user_id, account_id, level, message, details, keyboard, photo_url,
            approve, send_to_admin, engine, status, type
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING *
        "#,
    )
    .bind(n.user_id)
    .bind(n.account_id)
    .bind(n.level)
    .bind(&n.message)
    .bind(&n.details)
    .bind(n.keyboard_text())
    .bind(&n.photo_url)
    .bind(n.approve)
    .bind(n.send_to_admin)
    .bind(n.engine)
    .bind(n.status)
    .bind(n.notification_type)
    .fetch_one(executor)
    .await?;

    Ok(notification)
}

pub async fn get_notification_by_id(pool: &PgPool, id: i64) -> Result<Option<Notification>> {
    let notification = sqlx::query_as::<_, Notification>("SELECT * FROM notifications WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(notification)
}

/// Filtered page of notifications plus the total number of matches
pub async fn list_notifications(pool: &PgPool, query: &NotificationQuery) -> Result<(Vec<Notification>, i64)> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);

    let notifications = sqlx::query_as::<_, Notification>(
        r#"
        SELECT * FROM notifications
        WHERE ($1::BIGINT IS NULL OR user_id = $1)
          AND ($2::VARCHAR IS NULL OR status = $2)
          AND ($3::VARCHAR IS NULL OR type = $3)
        ORDER BY created_at DESC, id DESC
        LIMIT $4 OFFSET $5
        "#,
    )
    .bind(query.user_id)
    .bind(query.status)
    .bind(query.notification_type)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let total: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM notifications
        WHERE ($1::BIGINT IS NULL OR user_id = $1)
          AND ($2::VARCHAR IS NULL OR status = $2)
          AND ($3::VARCHAR IS NULL OR type = $3)
        "#,
    )
    .bind(query.user_id)
    .bind(query.status)
    .bind(query.notification_type)
    .fetch_one(pool)
    .await?;

    Ok((notifications, total.0))
}

pub async fn modify_notification(pool: &PgPool, n: &NotificationModify) -> Result<Option<Notification>> {
    let base = &n.base;
    let notification = sqlx::query_as::<_, Notification>(
        r#"
        UPDATE notifications
        SET user_id = $2, account_id = $3, level = $4, message = $5, details = $6,
            keyboard = $7, photo_url = $8, approve = $9, send_to_admin = $10,
            engine = $11, status = $12, type = $13, modified_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(n.id)
    .bind(base.user_id)
    .bind(base.account_id)
    .bind(base.level)
    .bind(&base.message)
    .bind(&base.details)
    .bind(base.keyboard_text())
    .bind(&base.photo_url)
    .bind(base.approve)
    .bind(base.send_to_admin)
    .bind(base.engine)
    .bind(base.status)
    .bind(base.notification_type)
    .fetch_optional(pool)
    .await?;

    Ok(notification)
}

pub async fn set_notification_status(pool: &PgPool, id: i64, status: NotificationStatus) -> Result<()> {
    sqlx::query("UPDATE notifications SET status = $2, modified_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(status)
        .execute(pool)
        .await?;

    Ok(())
}

/// Approved pending notifications for one engine, oldest first
pub async fn next_pending_notifications(
    pool: &PgPool,
    engine: NotificationEngine,
    limit: i64,
) -> Result<Vec<Notification>> {
    let notifications = sqlx::query_as::<_, Notification>(
        r#"
        SELECT * FROM notifications
        WHERE status = 'pending' AND approve = TRUE AND engine = $1
        ORDER BY created_at ASC, id ASC
        LIMIT $2
        "#,
    )
    .bind(engine)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(notifications)
}

/// Whether this account was already notified at this level since its
/// last provisioning
pub async fn notification_exists_for_level(
    pool: &PgPool,
    account_id: i64,
    notification_type: NotificationType,
    level: i32,
) -> Result<bool> {
    let count: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM notifications n
        WHERE n.account_id = $1 AND n.type = $2 AND n.level = $3
          AND n.created_at >= COALESCE(
              (SELECT MAX(o.modified_at) FROM orders o
               WHERE o.account_id = $1 AND o.status = 'completed'),
              '-infinity'::TIMESTAMPTZ
          )
        "#,
    )
    .bind(account_id)
    .bind(notification_type)
    .bind(level)
    .fetch_one(pool)
    .await?;

    Ok(count.0 > 0)
}
