//! Delivers queued telegram notifications.

use std::time::Duration;

use proxyshop_api::commerce::CommerceService;
use proxyshop_api::db;
use proxyshop_api::keyboard::KeyboardFactory;
use proxyshop_api::notification::{Notification, NotificationEngine, NotificationStatus};
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardMarkup, InputFile, ParseMode};

use crate::keyboards;

pub struct NotificationDispatcher {
    bot: Bot,
    commerce: CommerceService,
    admin_chat_id: i64,
    interval: Duration,
    batch_size: i64,
}

/// Keyboard stored with the notification; a malformed one is dropped
fn notification_markup(notification: &Notification) -> Option<InlineKeyboardMarkup> {
    let raw = notification.keyboard.as_deref().filter(|k| !k.is_empty())?;
    match KeyboardFactory::parse(raw) {
        Ok(rows) if !rows.is_empty() => Some(keyboards::inline_markup(&rows)),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!("Notification {} has an invalid keyboard: {}", notification.id, e);
            None
        }
    }
}

impl NotificationDispatcher {
    pub fn new(bot: Bot, commerce: CommerceService, admin_chat_id: i64, interval: Duration) -> Self {
        Self {
            bot,
            commerce,
            admin_chat_id,
            interval,
            batch_size: 20,
        }
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        tracing::info!("Starting notification dispatcher...");

        loop {
            match self.process_batch().await {
                Ok(count) if count > 0 => tracing::debug!("Dispatched {} notifications", count),
                Ok(_) => {}
                Err(e) => tracing::error!("Error dispatching notifications: {}", e),
            }

            tokio::time::sleep(self.interval).await;
        }
    }

    /// Returns the number of notifications handled, sent or failed
    pub async fn process_batch(&self) -> anyhow::Result<usize> {
        let pool = self.commerce.pool();
        let notifications =
            db::next_pending_notifications(pool, NotificationEngine::Telegram, self.batch_size).await?;
        let count = notifications.len();

        for notification in notifications {
            let status = match self.deliver(&notification).await {
                Ok(()) => NotificationStatus::Sent,
                Err(e) => {
                    tracing::error!("Failed to send notification {}: {}", notification.id, e);
                    NotificationStatus::Failed
                }
            };
            db::set_notification_status(pool, notification.id, status).await?;
        }

        Ok(count)
    }

    async fn recipient(&self, notification: &Notification) -> anyhow::Result<ChatId> {
        if notification.send_to_admin {
            return Ok(ChatId(self.admin_chat_id));
        }
        let user = self
            .commerce
            .get_user(notification.user_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("User {} not found", notification.user_id))?;
        Ok(ChatId(user.telegram_chat_id))
    }

    async fn deliver(&self, notification: &Notification) -> anyhow::Result<()> {
        let chat_id = self.recipient(notification).await?;
        let text = notification.text();
        let markup = notification_markup(notification);

        match notification.photo_url.as_deref().filter(|u| !u.is_empty()) {
            Some(photo_url) => {
                let photo = InputFile::url(url::Url::parse(photo_url)?);
                let request = self
                    .bot
                    .send_photo(chat_id, photo)
                    .caption(text)
                    .parse_mode(ParseMode::Html);
                match markup {
                    Some(markup) => request.reply_markup(markup).await?,
                    None => request.await?,
                };
            }
            None => {
                let request = self.bot.send_message(chat_id, text).parse_mode(ParseMode::Html);
                match markup {
                    Some(markup) => request.reply_markup(markup).await?,
                    None => request.await?,
                };
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proxyshop_api::notification::NotificationType;
    use teloxide::types::InlineKeyboardButtonKind;

    fn notification(keyboard: Option<&str>) -> Notification {
        Notification {
            id: 1,
            user_id: 1,
            account_id: None,
            level: 0,
            message: Some("Hello".to_string()),
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
    fn test_markup_from_stored_keyboard() {
        let n = notification(Some(
            r#"[{"text":"Renew","callback_data":"my_services:"},{"text":"Site","url":"https://example.com"},{"text":"More"}]"#,
        ));
        let markup = notification_markup(&n).unwrap();

        assert_eq!(markup.inline_keyboard.len(), 2);
        assert!(matches!(
            &markup.inline_keyboard[0][0].kind,
            InlineKeyboardButtonKind::CallbackData(d) if d == "my_services:"
        ));
        assert!(matches!(markup.inline_keyboard[0][1].kind, InlineKeyboardButtonKind::Url(_)));
    }

    #[test]
    fn test_missing_or_invalid_keyboard() {
        assert!(notification_markup(&notification(None)).is_none());
        assert!(notification_markup(&notification(Some(""))).is_none());
        assert!(notification_markup(&notification(Some("{not json"))).is_none());
        assert!(notification_markup(&notification(Some("[]"))).is_none());
    }
}
