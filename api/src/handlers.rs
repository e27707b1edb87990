use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use redis::aio::ConnectionManager;
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;
use validator::Validate;

use crate::cache::RedisCache;
use crate::commerce::{CommerceError, CommerceService};
use crate::config::Config;
use crate::db;
use crate::middleware::admin_middleware;
use crate::models::{
    AdminLoginRequest, AdminLoginResponse, Inbound, InboundConfig, InboundConfigCreate, InboundConfigUpdate,
    InboundRequest, Order, OrderQuery, PageQuery, PaymentAccount, PaymentAccountRequest, RechargeRequest, Service,
    ServiceRequest,
};
use crate::notification::{
    NotificationCreate, NotificationModify, NotificationQuery, NotificationResponse, NotificationsResponse,
};
use crate::subscription;
use crate::utils::{generate_token, verify_password};

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub redis_cache: RedisCache,
    pub commerce: CommerceService,
    pub config: Arc<Config>,
}

// Custom error type for API responses
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": {
                "code": format!("{:?}", status),
                "message": error_message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        ApiError::InternalServerError("Database error occurred".to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", err);
        ApiError::InternalServerError(err.to_string())
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<CommerceError> for ApiError {
    fn from(err: CommerceError) -> Self {
        match err {
            CommerceError::UserNotFound
            | CommerceError::ServiceNotFound
            | CommerceError::AccountNotFound => ApiError::NotFound(err.to_string()),
            CommerceError::AccountNotOwned => ApiError::Forbidden(err.to_string()),
            CommerceError::MaxOpenOrder
            | CommerceError::MaxPendingOrder
            | CommerceError::NoEnoughBalance { .. } => ApiError::Conflict(err.to_string()),
            CommerceError::ServiceDisabled
            | CommerceError::InvalidAmount
            | CommerceError::InvalidTitle => ApiError::BadRequest(err.to_string()),
            CommerceError::Database(e) => e.into(),
        }
    }
}

/// Published config lists are cached; any admin change must drop them
async fn invalidate_published_configs(state: &AppState) {
    if let Err(e) = state.redis_cache.invalidate_published_configs().await {
        tracing::warn!("Failed to invalidate published configs: {}", e);
    }
}

// ============================================================================
// Router Configuration
// ============================================================================

pub fn create_router(db_pool: PgPool, redis_conn: ConnectionManager, config: Config) -> Router {
    let state = AppState {
        commerce: CommerceService::new(db_pool.clone(), config.referral_bonus_percent),
        db_pool,
        redis_cache: RedisCache::new(redis_conn),
        config: Arc::new(config.clone()),
    };

    let cors = if config.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .max_age(Duration::from_secs(3600))
    } else {
        let allowed_origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse::<axum::http::HeaderValue>().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(allowed_origins)
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PUT,
                axum::http::Method::DELETE,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
            .max_age(Duration::from_secs(3600))
    };

    let admin = Router::new()
        .route("/api/admin/inbounds", get(admin_list_inbounds_handler).post(admin_create_inbound_handler))
        .route(
            "/api/admin/inbounds/:id",
            get(admin_get_inbound_handler)
                .put(admin_update_inbound_handler)
                .delete(admin_delete_inbound_handler),
        )
        .route(
            "/api/admin/inbound-configs",
            get(admin_list_inbound_configs_handler).post(admin_create_inbound_config_handler),
        )
        .route(
            "/api/admin/inbound-configs/:id",
            get(admin_get_inbound_config_handler)
                .put(admin_update_inbound_config_handler)
                .delete(admin_delete_inbound_config_handler),
        )
        .route(
            "/api/admin/notifications",
            get(admin_list_notifications_handler).post(admin_create_notification_handler),
        )
        .route(
            "/api/admin/notifications/:id",
            get(admin_get_notification_handler).put(admin_modify_notification_handler),
        )
        .route("/api/admin/users", get(admin_list_users_handler))
        .route("/api/admin/users/:id/balance", put(admin_recharge_user_handler))
        .route("/api/admin/orders", get(admin_list_orders_handler))
        .route("/api/admin/services", get(admin_list_services_handler).post(admin_create_service_handler))
        .route(
            "/api/admin/payment-accounts",
            get(admin_list_payment_accounts_handler).post(admin_create_payment_account_handler),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            config.jwt_secret.clone(),
            admin_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/api/admin/login", post(admin_login_handler))
        .route("/sub/:uuid", get(subscription_handler))
        .merge(admin)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

// ============================================================================
// Public Handlers
// ============================================================================

/// POST /api/admin/login - Exchange admin credentials for a JWT
async fn admin_login_handler(
    State(state): State<AppState>,
    Json(req): Json<AdminLoginRequest>,
) -> Result<Json<AdminLoginResponse>, ApiError> {
    let invalid = || ApiError::Unauthorized("Invalid username or password".to_string());

    let admin = db::get_admin_by_username(&state.db_pool, req.username.trim())
        .await?
        .ok_or_else(invalid)?;

    if !verify_password(&req.password, &admin.password_hash)? {
        tracing::warn!("Failed admin login for {}", admin.username);
        return Err(invalid());
    }

    let token = generate_token(
        admin.id,
        &admin.username,
        true,
        &state.config.jwt_secret,
        state.config.jwt_expiration,
    )?;

    tracing::info!("Admin {} logged in", admin.username);

    Ok(Json(AdminLoginResponse {
        token,
        expires_in: state.config.jwt_expiration,
    }))
}

/// GET /sub/:uuid - Base64 subscription bundle for proxy clients
async fn subscription_handler(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<Response, ApiError> {
    let not_found = || ApiError::NotFound("Subscription not found".to_string());
    let uuid = Uuid::parse_str(&uuid).map_err(|_| not_found())?;

    let bundle = subscription::subscription_for(&state.db_pool, &state.redis_cache, uuid)
        .await?
        .ok_or_else(not_found)?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::HeaderName::from_static("subscription-userinfo"), bundle.userinfo),
        ],
        bundle.body,
    )
        .into_response())
}

// ============================================================================
// Admin Inbound Handlers
// ============================================================================

async fn admin_list_inbounds_handler(State(state): State<AppState>) -> Result<Json<Vec<Inbound>>, ApiError> {
    Ok(Json(db::list_inbounds(&state.db_pool).await?))
}

async fn admin_get_inbound_handler(
    State(state): State<AppState>,
    Path(inbound_id): Path<i64>,
) -> Result<Json<Inbound>, ApiError> {
    db::get_inbound_by_id(&state.db_pool, inbound_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Inbound not found".to_string()))
}

async fn admin_create_inbound_handler(
    State(state): State<AppState>,
    Json(req): Json<InboundRequest>,
) -> Result<(StatusCode, Json<Inbound>), ApiError> {
    req.validate()?;

    let inbound = db::create_inbound(&state.db_pool, &req).await?;
    invalidate_published_configs(&state).await;
    tracing::info!("Inbound {} created", inbound.id);

    Ok((StatusCode::CREATED, Json(inbound)))
}

async fn admin_update_inbound_handler(
    State(state): State<AppState>,
    Path(inbound_id): Path<i64>,
    Json(req): Json<InboundRequest>,
) -> Result<Json<Inbound>, ApiError> {
    req.validate()?;

    let inbound = db::update_inbound(&state.db_pool, inbound_id, &req)
        .await?
        .ok_or_else(|| ApiError::NotFound("Inbound not found".to_string()))?;
    invalidate_published_configs(&state).await;

    Ok(Json(inbound))
}

async fn admin_delete_inbound_handler(
    State(state): State<AppState>,
    Path(inbound_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if !db::delete_inbound(&state.db_pool, inbound_id).await? {
        return Err(ApiError::NotFound("Inbound not found".to_string()));
    }
    invalidate_published_configs(&state).await;
    tracing::info!("Inbound {} deleted", inbound_id);

    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Admin Inbound Config Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
struct InboundConfigListQuery {
    inbound_id: Option<i64>,
}

async fn admin_list_inbound_configs_handler(
    State(state): State<AppState>,
    Query(query): Query<InboundConfigListQuery>,
) -> Result<Json<Vec<InboundConfig>>, ApiError> {
    Ok(Json(db::list_inbound_configs(&state.db_pool, query.inbound_id).await?))
}

async fn admin_get_inbound_config_handler(
    State(state): State<AppState>,
    Path(config_id): Path<i64>,
) -> Result<Json<InboundConfig>, ApiError> {
    db::get_inbound_config_by_id(&state.db_pool, config_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Inbound config not found".to_string()))
}

async fn ensure_inbound_exists(state: &AppState, inbound_id: Option<i64>) -> Result<(), ApiError> {
    if let Some(id) = inbound_id {
        if db::get_inbound_by_id(&state.db_pool, id).await?.is_none() {
            return Err(ApiError::BadRequest(format!("Inbound {} does not exist", id)));
        }
    }
    Ok(())
}

async fn admin_create_inbound_config_handler(
    State(state): State<AppState>,
    Json(req): Json<InboundConfigCreate>,
) -> Result<(StatusCode, Json<InboundConfig>), ApiError> {
    req.validate()?;
    ensure_inbound_exists(&state, req.inbound_id).await?;

    let config = db::create_inbound_config(&state.db_pool, &req).await?;
    invalidate_published_configs(&state).await;
    tracing::info!("Inbound config {} created", config.id);

    Ok((StatusCode::CREATED, Json(config)))
}

async fn admin_update_inbound_config_handler(
    State(state): State<AppState>,
    Path(config_id): Path<i64>,
    Json(req): Json<InboundConfigUpdate>,
) -> Result<Json<InboundConfig>, ApiError> {
    req.validate()?;
    ensure_inbound_exists(&state, req.inbound_id).await?;

    let config = db::update_inbound_config(&state.db_pool, config_id, &req)
        .await?
        .ok_or_else(|| ApiError::NotFound("Inbound config not found".to_string()))?;
    invalidate_published_configs(&state).await;

    Ok(Json(config))
}

async fn admin_delete_inbound_config_handler(
    State(state): State<AppState>,
    Path(config_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if !db::delete_inbound_config(&state.db_pool, config_id).await? {
        return Err(ApiError::NotFound("Inbound config not found".to_string()));
    }
    invalidate_published_configs(&state).await;

    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Admin Notification Handlers
// ============================================================================

async fn admin_create_notification_handler(
    State(state): State<AppState>,
    Json(req): Json<NotificationCreate>,
) -> Result<(StatusCode, Json<NotificationResponse>), ApiError> {
    let req = req.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    if db::get_user_by_id(&state.db_pool, req.user_id).await?.is_none() {
        return Err(ApiError::NotFound("User not found".to_string()));
    }

    let notification = db::create_notification(&state.db_pool, &req).await?;
    tracing::info!(
        "Notification {} queued for user {} (approved: {})",
        notification.id,
        notification.user_id,
        notification.approve
    );

    Ok((StatusCode::CREATED, Json(notification.into())))
}

async fn admin_list_notifications_handler(
    State(state): State<AppState>,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<NotificationsResponse>, ApiError> {
    let (notifications, total) = db::list_notifications(&state.db_pool, &query).await?;

    Ok(Json(NotificationsResponse {
        notifications: notifications.into_iter().map(Into::into).collect(),
        total,
    }))
}

async fn admin_get_notification_handler(
    State(state): State<AppState>,
    Path(notification_id): Path<i64>,
) -> Result<Json<NotificationResponse>, ApiError> {
    db::get_notification_by_id(&state.db_pool, notification_id)
        .await?
        .map(|n| Json(n.into()))
        .ok_or_else(|| ApiError::NotFound("Notification not found".to_string()))
}

/// PUT /api/admin/notifications/:id - Edit a queued notification; this is
/// also how admin-created notifications get approved
async fn admin_modify_notification_handler(
    State(state): State<AppState>,
    Path(notification_id): Path<i64>,
    Json(req): Json<NotificationModify>,
) -> Result<Json<NotificationResponse>, ApiError> {
    if req.id != notification_id {
        return Err(ApiError::BadRequest("Notification id does not match the path".to_string()));
    }
    let req = req.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    db::modify_notification(&state.db_pool, &req)
        .await?
        .map(|n| Json(n.into()))
        .ok_or_else(|| ApiError::NotFound("Notification not found".to_string()))
}

// ============================================================================
// Admin User, Order and Catalogue Handlers
// ============================================================================

async fn admin_list_users_handler(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (limit, offset) = (page.limit(), page.offset());
    let users = db::list_users(&state.db_pool, limit, offset).await?;
    let total = db::count_users(&state.db_pool).await?;

    Ok(Json(json!({
        "users": users,
        "total": total,
        "limit": limit,
        "offset": offset,
    })))
}

/// PUT /api/admin/users/:id/balance - Credit a verified payment receipt
async fn admin_recharge_user_handler(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(req): Json<RechargeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = state
        .commerce
        .recharge_balance(user_id, req.amount, req.description.as_deref())
        .await?;

    tracing::info!("Recharged user {} by {}", user.id, req.amount);

    Ok(Json(json!({
        "user_id": user.id,
        "balance": user.balance,
    })))
}

async fn admin_list_orders_handler(
    State(state): State<AppState>,
    Query(query): Query<OrderQuery>,
) -> Result<Json<Vec<Order>>, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let orders = state.commerce.orders(query.account_id, query.status, limit).await?;
    Ok(Json(orders))
}

async fn admin_list_services_handler(State(state): State<AppState>) -> Result<Json<Vec<Service>>, ApiError> {
    Ok(Json(db::list_all_services(&state.db_pool).await?))
}

async fn admin_create_service_handler(
    State(state): State<AppState>,
    Json(req): Json<ServiceRequest>,
) -> Result<(StatusCode, Json<Service>), ApiError> {
    req.validate()?;
    let service = db::create_service(&state.db_pool, &req).await?;
    Ok((StatusCode::CREATED, Json(service)))
}

async fn admin_list_payment_accounts_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<PaymentAccount>>, ApiError> {
    Ok(Json(db::list_all_payment_accounts(&state.db_pool).await?))
}

async fn admin_create_payment_account_handler(
    State(state): State<AppState>,
    Json(req): Json<PaymentAccountRequest>,
) -> Result<(StatusCode, Json<PaymentAccount>), ApiError> {
    req.validate()?;
    let account = db::create_payment_account(&state.db_pool, &req).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use axum_test::TestServer;

    #[tokio::test]
    async fn test_health_check() {
        let response = health_check().await;
        assert_eq!(response, "OK");
    }

    #[test]
    fn test_api_error_into_response() {
        let cases = [
            (ApiError::BadRequest("bad".to_string()), StatusCode::BAD_REQUEST),
            (ApiError::Unauthorized("no".to_string()), StatusCode::UNAUTHORIZED),
            (ApiError::Forbidden("no".to_string()), StatusCode::FORBIDDEN),
            (ApiError::NotFound("missing".to_string()), StatusCode::NOT_FOUND),
            (ApiError::Conflict("conflict".to_string()), StatusCode::CONFLICT),
            (ApiError::InternalServerError("boom".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }

    #[test]
    fn test_commerce_error_mapping() {
        let status = |e: CommerceError| ApiError::from(e).into_response().status();

        assert_eq!(status(CommerceError::UserNotFound), StatusCode::NOT_FOUND);
        assert_eq!(status(CommerceError::AccountNotOwned), StatusCode::FORBIDDEN);
        assert_eq!(status(CommerceError::MaxOpenOrder), StatusCode::CONFLICT);
        assert_eq!(
            status(CommerceError::NoEnoughBalance { balance: 1, price: 2 }),
            StatusCode::CONFLICT
        );
        assert_eq!(status(CommerceError::InvalidAmount), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(CommerceError::Database(anyhow::anyhow!("connection reset"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_validation_errors_are_bad_requests() {
        let req = InboundRequest {
            remark: String::new(),
            key: "de-1".to_string(),
            protocol: "vless".to_string(),
            port: 70000,
            enable: None,
            develop: None,
        };
        let err = ApiError::from(req.validate().unwrap_err());
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    async fn test_server() -> TestServer {
        dotenv::dotenv().ok();
        let mut config = Config::from_env().unwrap();
        config.jwt_secret = "handlers-test-secret".to_string();

        let pool = db::create_pool(&config.database_url).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        let redis = crate::cache::create_redis_connection(&config.redis_url).await.unwrap();

        TestServer::new(create_router(pool, redis, config)).unwrap()
    }

    #[tokio::test]
    #[ignore] // Requires database and Redis to be running
    async fn test_router_health_and_auth() {
        let server = test_server().await;

        let response = server.get("/health").await;
        response.assert_status_ok();
        response.assert_text("OK");

        server.get("/api/admin/inbounds").await.assert_status(StatusCode::UNAUTHORIZED);

        let token = generate_token(1, "root", true, "handlers-test-secret", 3600).unwrap();
        server
            .get("/api/admin/inbounds")
            .add_header(
                header::AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
            )
            .await
            .assert_status_ok();
    }

    #[tokio::test]
    #[ignore] // Requires database and Redis to be running
    async fn test_unknown_subscription_is_not_found() {
        let server = test_server().await;

        server.get("/sub/not-a-uuid").await.assert_status(StatusCode::NOT_FOUND);
        server
            .get(&format!("/sub/{}", Uuid::new_v4()))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    #[ignore] // Requires database and Redis to be running
    async fn test_bad_login_is_unauthorized() {
        let server = test_server().await;

        let response = server
            .post("/api/admin/login")
            .json(&json!({ "username": "nobody", "password": "wrong" }))
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
    }
}
