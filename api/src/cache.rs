use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

/// Subscription bundles are served from cache for this long
pub const SUBSCRIPTION_TTL_SECS: u64 = 300;
/// Published inbound configs are shared by every subscription render
pub const PUBLISHED_CONFIGS_TTL_SECS: u64 = 60;

pub const ACCOUNT_UPDATE_CHANNEL: &str = "account:update";
const PUBLISHED_CONFIGS_KEY: &str = "inbound_configs:published";

/// Cached `GET /sub/:uuid` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSubscription {
    pub body: String,
    pub userinfo: String,
}

/// Payload published on [`ACCOUNT_UPDATE_CHANNEL`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountUpdate {
    pub account_id: i64,
    pub uuid: Uuid,
    pub action: String,
    pub timestamp: String,
}

pub fn subscription_key(uuid: &Uuid) -> String {
    format!("subscription:{}", uuid)
}

/// Redis cache utility functions
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Get the Redis connection manager
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    // ========================================================================
    // Subscription Cache Operations
    // ========================================================================

    pub async fn cache_subscription(&self, uuid: &Uuid, sub: &CachedSubscription) -> Result<()> {
        self.set_json(&subscription_key(uuid), sub, SUBSCRIPTION_TTL_SECS)
            .await
            .context("Failed to cache subscription")
    }

    pub async fn get_subscription(&self, uuid: &Uuid) -> Result<Option<CachedSubscription>> {
        self.get_json(&subscription_key(uuid))
            .await
            .context("Failed to get subscription from cache")
    }

    pub async fn invalidate_subscription(&self, uuid: &Uuid) -> Result<()> {
        self.delete(&subscription_key(uuid))
            .await
            .context("Failed to invalidate subscription cache")
    }

    // ========================================================================
    // Published Inbound Config Cache Operations
    // ========================================================================

    pub async fn cache_published_configs<T: Serialize>(&self, configs: &T) -> Result<()> {
        self.set_json(PUBLISHED_CONFIGS_KEY, configs, PUBLISHED_CONFIGS_TTL_SECS)
            .await
            .context("Failed to cache published inbound configs")
    }

    pub async fn get_published_configs<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.get_json(PUBLISHED_CONFIGS_KEY)
            .await
            .context("Failed to get published inbound configs from cache")
    }

    /// Drop the shared config list after any inbound or config change
    pub async fn invalidate_published_configs(&self) -> Result<()> {
        self.delete(PUBLISHED_CONFIGS_KEY)
            .await
            .context("Failed to invalidate published inbound configs")
    }

    // ========================================================================
    // Account Update Notification (Redis Pub/Sub)
    // ========================================================================

    /// Tell proxy nodes that an account's limits or state changed
    pub async fn publish_account_update(&self, account_id: i64, uuid: Uuid, action: &str) -> Result<()> {
        let message = AccountUpdate {
            account_id,
            uuid,
            action: action.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let payload = serde_json::to_string(&message).context("Failed to serialize account update")?;

        let mut conn = self.conn.clone();
        let _: () = conn.publish(ACCOUNT_UPDATE_CHANNEL, payload)
            .await
            .context("Failed to publish account update")?;

        Ok(())
    }

    // ========================================================================
    // Generic Cache Operations
    // ========================================================================

    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl_seconds: u64) -> Result<()> {
        let json = serde_json::to_string(value).context("Failed to serialize cache value")?;
        self.set_with_ttl(key, &json, ttl_seconds).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(data) => {
                let value = serde_json::from_str(&data).context("Failed to deserialize cache value")?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl_seconds)
            .await
            .context("Failed to set cache value")?;

        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await.context("Failed to get cache value")?;

        Ok(value)
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.context("Failed to delete cache key")?;

        Ok(())
    }
}

/// Create a Redis connection manager
pub async fn create_redis_connection(redis_url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

    client
        .get_connection_manager()
        .await
        .context("Failed to get Redis connection manager")
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_test_redis() -> Result<RedisCache> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let conn = create_redis_connection(&redis_url).await?;
        Ok(RedisCache::new(conn))
    }

    #[test]
    fn test_subscription_key_format() {
        let uuid = Uuid::parse_str("6f1b1f4e-2a55-4a8e-9d3c-1c2f0e4b7a10").unwrap();
        assert_eq!(subscription_key(&uuid), "subscription:6f1b1f4e-2a55-4a8e-9d3c-1c2f0e4b7a10");
    }

    #[test]
    fn test_account_update_payload_shape() {
        let update = AccountUpdate {
            account_id: 3,
            uuid: Uuid::nil(),
            action: "provisioned".to_string(),
            timestamp: "2024-01-01T00:00:00+00:00".to_string(),
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["account_id"], 3);
        assert_eq!(json["uuid"], "00000000-0000-0000-0000-000000000000");
        assert_eq!(json["action"], "provisioned");
    }

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_subscription_cache_roundtrip_and_invalidate() {
        let cache = create_test_redis().await.unwrap();
        let uuid = Uuid::new_v4();
        let sub = CachedSubscription {
            body: "dmxlc3M6Ly8=".to_string(),
            userinfo: "upload=0; download=0; total=0; expire=0".to_string(),
        };

        cache.cache_subscription(&uuid, &sub).await.unwrap();
        assert_eq!(cache.get_subscription(&uuid).await.unwrap(), Some(sub));

        cache.invalidate_subscription(&uuid).await.unwrap();
        assert!(cache.get_subscription(&uuid).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_ttl_expiration() {
        let cache = create_test_redis().await.unwrap();
        let key = "test_ttl_key";

        cache.set_with_ttl(key, "value", 1).await.unwrap();
        assert!(cache.get(key).await.unwrap().is_some());

        tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
        assert!(cache.get(key).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_invalidations_are_idempotent() {
        let cache = create_test_redis().await.unwrap();

        cache.invalidate_published_configs().await.unwrap();
        cache.invalidate_published_configs().await.unwrap();
        cache.invalidate_subscription(&Uuid::new_v4()).await.unwrap();
    }
}
