use anyhow::{Context, Result};
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{streams::StreamReadReply, AsyncCommands};
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time;
use uuid::Uuid;

use crate::cache::RedisCache;
use crate::db;
use crate::models::Account;
use crate::notification::{self, expire_time_level, used_traffic_level, NotificationType};

pub const TRAFFIC_STREAM: &str = "traffic:reports";

/// Usage pushed by a proxy node for one account
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficReport {
    pub uuid: Uuid,
    pub upload: i64,
    pub download: i64,
    pub timestamp: i64,
}

/// Sum upload and download per account
pub fn aggregate_traffic(reports: &[TrafficReport]) -> HashMap<Uuid, (i64, i64)> {
    let mut aggregated: HashMap<Uuid, (i64, i64)> = HashMap::new();

    for report in reports {
        let entry = aggregated.entry(report.uuid).or_insert((0, 0));
        entry.0 += report.upload.max(0);
        entry.1 += report.download.max(0);
    }

    aggregated
}

fn get_field(data: &HashMap<String, redis::Value>, field: &str) -> Result<String> {
    let value = data
        .get(field)
        .ok_or_else(|| anyhow::anyhow!("Missing field: {}", field))?;

    match value {
        redis::Value::Data(bytes) => {
            String::from_utf8(bytes.clone()).context(format!("Invalid UTF-8 in field: {}", field))
        }
        redis::Value::Int(i) => Ok(i.to_string()),
        _ => Err(anyhow::anyhow!("Unexpected value type for field: {}", field)),
    }
}

fn get_i64_field(data: &HashMap<String, redis::Value>, field: &str) -> Result<i64> {
    get_field(data, field)?
        .parse::<i64>()
        .context(format!("Failed to parse i64 from field: {}", field))
}

/// Parse one stream entry
pub fn parse_traffic_report(data: &HashMap<String, redis::Value>) -> Result<TrafficReport> {
    let uuid = Uuid::parse_str(&get_field(data, "uuid")?).context("Invalid account uuid")?;

    Ok(TrafficReport {
        uuid,
        upload: get_i64_field(data, "upload")?,
        download: get_i64_field(data, "download")?,
        timestamp: get_i64_field(data, "timestamp")?,
    })
}

/// Queue a `used_traffic` notification for the highest threshold reached,
/// once per level.
pub async fn notify_used_traffic(pool: &PgPool, account: &Account) -> Result<bool> {
    let Some(level) = used_traffic_level(account.used_traffic, account.data_limit) else {
        return Ok(false);
    };
    if db::notification_exists_for_level(pool, account.id, NotificationType::UsedTraffic, level.into()).await? {
        return Ok(false);
    }

    db::create_notification(pool, &notification::used_traffic(account, level)).await?;
    tracing::info!("Account {} reached {}% traffic", account.id, i32::from(level));
    Ok(true)
}

/// Consumes traffic reports from the Redis stream
pub struct TrafficProcessor {
    redis_conn: ConnectionManager,
    cache: RedisCache,
    db_pool: PgPool,
    stream_name: String,
    consumer_group: String,
    consumer_name: String,
    batch_size: usize,
}

impl TrafficProcessor {
    pub fn new(
        redis_conn: ConnectionManager,
        db_pool: PgPool,
        stream_name: String,
        consumer_group: String,
        consumer_name: String,
    ) -> Self {
        Self {
            cache: RedisCache::new(redis_conn.clone()),
            redis_conn,
            db_pool,
            stream_name,
            consumer_group,
            consumer_name,
            batch_size: 100,
        }
    }

    /// Create the consumer group if it does not exist yet
    pub async fn initialize(&mut self) -> Result<()> {
        let mut conn = self.redis_conn.clone();

        // BUSYGROUP when it already exists
        let _: Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_name)
            .arg(&self.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        tracing::info!(
            "Traffic processor initialized for stream: {}, group: {}",
            self.stream_name,
            self.consumer_group
        );

        Ok(())
    }

    pub async fn start(&mut self) -> Result<()> {
        tracing::info!("Starting traffic processor...");

        loop {
            match self.process_batch().await {
                Ok(count) if count > 0 => tracing::debug!("Processed {} traffic reports", count),
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("Error processing traffic batch: {}", e);
                    time::sleep(Duration::from_secs(5)).await;
                }
            }

            time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn process_batch(&mut self) -> Result<usize> {
        let mut conn = self.redis_conn.clone();

        let opts = redis::streams::StreamReadOptions::default()
            .group(&self.consumer_group, &self.consumer_name)
            .count(self.batch_size)
            .block(1000);

        let results: StreamReadReply = conn
            .xread_options(&[&self.stream_name], &[">"], &opts)
            .await
            .context("Failed to read from stream")?;

        let mut reports = Vec::new();
        let mut message_ids = Vec::new();

        for stream_key in &results.keys {
            for stream_id in &stream_key.ids {
                message_ids.push(stream_id.id.clone());

                match parse_traffic_report(&stream_id.map) {
                    Ok(report) => reports.push(report),
                    // Malformed entries are acknowledged and dropped
                    Err(e) => tracing::warn!("Skipping traffic report {}: {}", stream_id.id, e),
                }
            }
        }

        if !reports.is_empty() {
            let aggregated = aggregate_traffic(&reports);
            self.apply_traffic(&aggregated).await;
        }

        self.acknowledge_messages(&message_ids).await?;

        Ok(reports.len())
    }

    async fn apply_traffic(&self, aggregated: &HashMap<Uuid, (i64, i64)>) {
        for (uuid, (upload, download)) in aggregated {
            let account = match db::add_account_traffic(&self.db_pool, *uuid, upload + download).await {
                Ok(Some(account)) => account,
                Ok(None) => {
                    tracing::warn!("Traffic reported for unknown account {}", uuid);
                    continue;
                }
                Err(e) => {
                    tracing::error!("Failed to update traffic for account {}: {}", uuid, e);
                    continue;
                }
            };

            if let Err(e) = notify_used_traffic(&self.db_pool, &account).await {
                tracing::error!("Failed to queue traffic notification for {}: {}", account.id, e);
            }

            if account.is_exhausted() {
                if let Err(e) = self.cache.invalidate_subscription(&account.uuid).await {
                    tracing::warn!("Failed to invalidate subscription cache: {}", e);
                }
                if let Err(e) = self.cache.publish_account_update(account.id, account.uuid, "exhausted").await {
                    tracing::warn!("Failed to publish account update: {}", e);
                }
            }
        }
    }

    async fn acknowledge_messages(&mut self, message_ids: &[String]) -> Result<()> {
        if message_ids.is_empty() {
            return Ok(());
        }

        let mut conn = self.redis_conn.clone();

        for message_id in message_ids {
            let _: Result<i64, redis::RedisError> = redis::cmd("XACK")
                .arg(&self.stream_name)
                .arg(&self.consumer_group)
                .arg(message_id)
                .query_async(&mut conn)
                .await;
        }

        Ok(())
    }
}

/// Push a traffic report onto the stream (used by node agents and tests)
pub async fn add_traffic_report(
    redis_conn: &mut ConnectionManager,
    stream_name: &str,
    uuid: Uuid,
    upload: i64,
    download: i64,
) -> Result<String> {
    let message_id: String = redis::cmd("XADD")
        .arg(stream_name)
        .arg("*")
        .arg("uuid")
        .arg(uuid.to_string())
        .arg("upload")
        .arg(upload)
        .arg("download")
        .arg(download)
        .arg("timestamp")
        .arg(Utc::now().timestamp())
        .query_async(redis_conn)
        .await
        .context("Failed to add traffic report to stream")?;

    Ok(message_id)
}

// ============================================================================
// Expiry scanning
// ============================================================================

/// Periodically queues `expire_time` notifications for accounts entering
/// an expiry window
pub struct ExpiryScanner {
    db_pool: PgPool,
    interval: Duration,
}

impl ExpiryScanner {
    pub fn new(db_pool: PgPool, interval: Duration) -> Self {
        Self { db_pool, interval }
    }

    pub async fn start(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            match self.scan().await {
                Ok(count) if count > 0 => tracing::info!("Queued {} expiry notifications", count),
                Ok(_) => {}
                Err(e) => tracing::error!("Expiry scan failed: {}", e),
            }
        }
    }

    pub async fn scan(&self) -> Result<usize> {
        let now = Utc::now();
        let accounts = db::list_accounts_expiring_before(&self.db_pool, now + chrono::Duration::days(30)).await?;
        let mut queued = 0;

        for account in accounts {
            let Some(level) = expire_time_level(account.expired_at, now) else {
                continue;
            };
            if db::notification_exists_for_level(&self.db_pool, account.id, NotificationType::ExpireTime, level.into())
                .await?
            {
                continue;
            }

            db::create_notification(&self.db_pool, &notification::expire_time(&account, level)).await?;
            queued += 1;
        }

        Ok(queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(fields: &[(&str, redis::Value)]) -> HashMap<String, redis::Value> {
        fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_aggregate_traffic_by_uuid() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let reports = vec![
            TrafficReport { uuid: a, upload: 1000, download: 2000, timestamp: 1 },
            TrafficReport { uuid: a, upload: 500, download: 1500, timestamp: 2 },
            TrafficReport { uuid: b, upload: 3000, download: 4000, timestamp: 3 },
        ];

        let aggregated = aggregate_traffic(&reports);

        assert_eq!(aggregated.len(), 2);
        assert_eq!(aggregated.get(&a), Some(&(1500, 3500)));
        assert_eq!(aggregated.get(&b), Some(&(3000, 4000)));
    }

    #[test]
    fn test_aggregate_ignores_negative_counters() {
        let a = Uuid::new_v4();
        let reports = vec![TrafficReport { uuid: a, upload: -10, download: 20, timestamp: 1 }];
        assert_eq!(aggregate_traffic(&reports).get(&a), Some(&(0, 20)));
    }

    #[test]
    fn test_parse_traffic_report() {
        let uuid = Uuid::new_v4();
        let data = entry(&[
            ("uuid", redis::Value::Data(uuid.to_string().into_bytes())),
            ("upload", redis::Value::Data(b"1024".to_vec())),
            ("download", redis::Value::Int(2048)),
            ("timestamp", redis::Value::Data(b"1700000000".to_vec())),
        ]);

        let report = parse_traffic_report(&data).unwrap();
        assert_eq!(report.uuid, uuid);
        assert_eq!(report.upload, 1024);
        assert_eq!(report.download, 2048);
        assert_eq!(report.timestamp, 1_700_000_000);
    }

    #[test]
    fn test_parse_traffic_report_rejects_bad_entries() {
        let missing = entry(&[("upload", redis::Value::Int(1))]);
        assert!(parse_traffic_report(&missing).is_err());

        let bad_uuid = entry(&[
            ("uuid", redis::Value::Data(b"not-a-uuid".to_vec())),
            ("upload", redis::Value::Int(1)),
            ("download", redis::Value::Int(1)),
            ("timestamp", redis::Value::Int(1)),
        ]);
        assert!(parse_traffic_report(&bad_uuid).is_err());

        let bad_number = entry(&[
            ("uuid", redis::Value::Data(Uuid::nil().to_string().into_bytes())),
            ("upload", redis::Value::Data(b"lots".to_vec())),
            ("download", redis::Value::Int(1)),
            ("timestamp", redis::Value::Int(1)),
        ]);
        assert!(parse_traffic_report(&bad_number).is_err());
    }
}
