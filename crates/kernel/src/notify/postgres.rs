//! Notifications persisted for the notification inbox.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::{ContentEvent, NotificationEmitter};

/// Writes a `notifications` row for events that have a recipient.
#[derive(Clone)]
pub struct PgNotificationEmitter {
    pool: PgPool,
}

impl PgNotificationEmitter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationEmitter for PgNotificationEmitter {
    async fn emit(&self, event: ContentEvent) -> Result<()> {
        let Some(recipient) = event.recipient else {
            return Ok(());
        };
        if recipient == event.actor_id {
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, kind, content_kind, content_id, post_id, project_id, from_user_id, is_read, created)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, $9)
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(recipient)
        .bind(event.kind.as_str())
        .bind(event.content.kind.as_str())
        .bind(event.content.id)
        .bind(event.post_id)
        .bind(event.project_id)
        .bind(event.actor_id)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("failed to insert notification")?;

        debug!(event = %event.kind, recipient = %recipient, "notification stored");
        Ok(())
    }
}

impl std::fmt::Debug for PgNotificationEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgNotificationEmitter").finish()
    }
}
