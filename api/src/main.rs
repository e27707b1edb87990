use anyhow::Result;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use proxyshop_api::cache::{create_redis_connection, RedisCache};
use proxyshop_api::commerce::OrderProcessor;
use proxyshop_api::config::Config;
use proxyshop_api::traffic::{ExpiryScanner, TrafficProcessor, TRAFFIC_STREAM};
use proxyshop_api::{db, handlers, utils};

const TRAFFIC_CONSUMER_GROUP: &str = "traffic-processors";

/// Create the first admin when the table is empty
async fn ensure_admin(pool: &sqlx::PgPool, config: &Config) -> Result<()> {
    if db::count_admins(pool).await? > 0 {
        return Ok(());
    }

    let password = match &config.admin_password {
        Some(password) => password.clone(),
        None => {
            let generated = utils::generate_password(16);
            tracing::warn!(
                "ADMIN_PASSWORD not set, generated password for {}: {}",
                config.admin_username,
                generated
            );
            generated
        }
    };

    let hash = utils::hash_password(&password)?;
    db::create_admin(pool, &config.admin_username, &hash).await?;
    tracing::info!("Bootstrap admin {} created", config.admin_username);

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proxyshop_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting proxyshop API");

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    let db_pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&db_pool).await?;
    tracing::info!("Database ready");

    ensure_admin(&db_pool, &config).await?;

    let redis_conn = create_redis_connection(&config.redis_url).await?;
    tracing::info!("Redis connection established");

    // Background workers
    let mut traffic_processor = TrafficProcessor::new(
        redis_conn.clone(),
        db_pool.clone(),
        TRAFFIC_STREAM.to_string(),
        TRAFFIC_CONSUMER_GROUP.to_string(),
        config.traffic_consumer_name.clone(),
    );
    traffic_processor.initialize().await?;
    tokio::spawn(async move {
        if let Err(e) = traffic_processor.start().await {
            tracing::error!("Traffic processor stopped: {}", e);
        }
    });

    let order_processor = OrderProcessor::new(
        db_pool.clone(),
        RedisCache::new(redis_conn.clone()),
        Duration::from_secs(config.order_interval_secs),
    );
    tokio::spawn(async move {
        if let Err(e) = order_processor.start().await {
            tracing::error!("Order processor stopped: {}", e);
        }
    });

    let expiry_scanner = ExpiryScanner::new(db_pool.clone(), Duration::from_secs(config.expiry_scan_interval_secs));
    tokio::spawn(async move { expiry_scanner.start().await });

    let app = handlers::create_router(db_pool, redis_conn, config.clone());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
