use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_expiration: i64,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    /// Public base URL that subscription links are served under
    pub subscription_base_url: String,
    pub referral_bonus_percent: i64,
    /// Bootstrap admin, created on startup when no admin exists
    pub admin_username: String,
    pub admin_password: Option<String>,
    pub order_interval_secs: u64,
    pub expiry_scan_interval_secs: u64,
    pub traffic_consumer_name: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            jwt_secret: env::var("JWT_SECRET")
                .context("JWT_SECRET must be set")?,
            jwt_expiration: env::var("JWT_EXPIRATION")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .context("JWT_EXPIRATION must be a valid number")?,
            host: env::var("API_HOST")
                .unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("API_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("API_PORT must be a valid number")?,
            cors_origins: env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            subscription_base_url: env::var("SUBSCRIPTION_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            referral_bonus_percent: env::var("REFERRAL_BONUS_PERCENT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("REFERRAL_BONUS_PERCENT must be a valid number")?,
            admin_username: env::var("ADMIN_USERNAME")
                .unwrap_or_else(|_| "admin".to_string()),
            admin_password: env::var("ADMIN_PASSWORD").ok().filter(|p| !p.is_empty()),
            order_interval_secs: env::var("ORDER_PROCESSOR_INTERVAL")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("ORDER_PROCESSOR_INTERVAL must be a valid number")?,
            expiry_scan_interval_secs: env::var("EXPIRY_SCAN_INTERVAL")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .context("EXPIRY_SCAN_INTERVAL must be a valid number")?,
            traffic_consumer_name: env::var("TRAFFIC_CONSUMER_NAME")
                .unwrap_or_else(|_| "api-1".to_string()),
        })
    }
}
