use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Unanswered prompts are dropped after this long
pub const DEFAULT_PROMPT_TTL: Duration = Duration::from_secs(30 * 60);

/// What a ForceReply prompt is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingPrompt {
    PaymentReceipt { account_id: i64 },
    ChangeServiceName { account_id: i64 },
}

impl PendingPrompt {
    pub fn account_id(&self) -> i64 {
        match self {
            Self::PaymentReceipt { account_id } | Self::ChangeServiceName { account_id } => *account_id,
        }
    }
}

/// Prompts waiting for an answer, keyed by `"{prompt message id}:{chat id}"`.
/// Held in memory only, so prompts sent before a restart are forgotten.
/// Expired prompts are ignored and purged on the next `track`.
#[derive(Clone)]
pub struct PendingReplies {
    inner: Arc<RwLock<HashMap<String, (PendingPrompt, Instant)>>>,
    ttl: Duration,
}

impl Default for PendingReplies {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_PROMPT_TTL)
    }
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    fn is_live(&self, tracked_at: Instant) -> bool {
        tracked_at.elapsed() < self.ttl
    }

    pub fn key(message_id: i32, chat_id: i64) -> String {
        format!("{}:{}", message_id, chat_id)
    }

    pub async fn track(&self, message_id: i32, chat_id: i64, prompt: PendingPrompt) {
        let mut inner = self.inner.write().await;
        inner.retain(|_, (_, tracked_at)| self.is_live(*tracked_at));
        inner.insert(Self::key(message_id, chat_id), (prompt, Instant::now()));
    }

    pub async fn get(&self, message_id: i32, chat_id: i64) -> Option<PendingPrompt> {
        self.inner
            .read()
            .await
            .get(&Self::key(message_id, chat_id))
            .filter(|(_, tracked_at)| self.is_live(*tracked_at))
            .map(|(prompt, _)| *prompt)
    }

    pub async fn contains(&self, message_id: i32, chat_id: i64) -> bool {
        self.get(message_id, chat_id).await.is_some()
    }

    /// Removes the entry for an answered prompt
    pub async fn take(&self, message_id: i32, chat_id: i64) -> Option<PendingPrompt> {
        self.inner
            .write()
            .await
            .remove(&Self::key(message_id, chat_id))
            .filter(|(_, tracked_at)| self.is_live(*tracked_at))
            .map(|(prompt, _)| prompt)
    }
}
