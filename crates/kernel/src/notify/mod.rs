//! Lifecycle event emission.
//!
//! The coordinator emits one event per successful create or delete. Delivery
//! is fire-and-forget: an emitter failure is logged and never reaches the
//! caller of the content operation.

pub mod postgres;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use crate::models::ContentRef;

pub use postgres::PgNotificationEmitter;

/// Lifecycle event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PostCreated,
    CommentAdded,
    PostDeleted,
    CommentDeleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PostCreated => "post_created",
            EventKind::CommentAdded => "comment_added",
            EventKind::PostDeleted => "post_deleted",
            EventKind::CommentDeleted => "comment_deleted",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A content lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentEvent {
    pub kind: EventKind,
    pub content: ContentRef,
    /// The post itself, or the parent post of a comment.
    pub post_id: Uuid,
    pub project_id: Uuid,
    pub actor_id: Uuid,
    /// User who should be notified, if anyone.
    pub recipient: Option<Uuid>,
}

/// Receives lifecycle events from the coordinator.
#[async_trait]
pub trait NotificationEmitter: Send + Sync {
    async fn emit(&self, event: ContentEvent) -> Result<()>;
}

/// Emitter that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEmitter;

#[async_trait]
impl NotificationEmitter for LogEmitter {
    async fn emit(&self, event: ContentEvent) -> Result<()> {
        info!(
            event = %event.kind,
            content = %event.content,
            actor = %event.actor_id,
            recipient = ?event.recipient,
            "content event"
        );
        Ok(())
    }
}

/// Emitter that fans events out to in-process subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastEmitter {
    sender: broadcast::Sender<ContentEvent>,
}

impl BroadcastEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContentEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl NotificationEmitter for BroadcastEmitter {
    async fn emit(&self, event: ContentEvent) -> Result<()> {
        // No subscribers is not a failure
        let _ = self.sender.send(event);
        Ok(())
    }
}

/// Emitter that forwards to several emitters, failing if any of them fails.
pub struct FanoutEmitter {
    emitters: Vec<std::sync::Arc<dyn NotificationEmitter>>,
}

impl FanoutEmitter {
    pub fn new(emitters: Vec<std::sync::Arc<dyn NotificationEmitter>>) -> Self {
        Self { emitters }
    }
}

#[async_trait]
impl NotificationEmitter for FanoutEmitter {
    async fn emit(&self, event: ContentEvent) -> Result<()> {
        let mut first_error = None;
        for emitter in &self.emitters {
            if let Err(e) = emitter.emit(event.clone()).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn event() -> ContentEvent {
        let post_id = Uuid::now_v7();
        ContentEvent {
            kind: EventKind::PostCreated,
            content: ContentRef::post(post_id),
            post_id,
            project_id: Uuid::now_v7(),
            actor_id: Uuid::now_v7(),
            recipient: None,
        }
    }

    #[test]
    fn event_kind_names() {
        assert_eq!(EventKind::CommentAdded.to_string(), "comment_added");
        let json = serde_json::to_string(&EventKind::PostDeleted).unwrap();
        assert_eq!(json, "\"post_deleted\"");
    }

    #[tokio::test]
    async fn broadcast_delivers_to_subscribers() {
        let emitter = BroadcastEmitter::new(8);
        let mut rx = emitter.subscribe();
        let sent = event();
        emitter.emit(sent.clone()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), sent);
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_ok() {
        assert!(BroadcastEmitter::new(1).emit(event()).await.is_ok());
    }

    struct Failing;

    #[async_trait]
    impl NotificationEmitter for Failing {
        async fn emit(&self, _event: ContentEvent) -> Result<()> {
            anyhow::bail!("delivery failed")
        }
    }

    #[tokio::test]
    async fn fanout_reaches_every_emitter_and_reports_failure() {
        let broadcast = BroadcastEmitter::new(4);
        let mut rx = broadcast.subscribe();
        let fanout = FanoutEmitter::new(vec![
            std::sync::Arc::new(Failing),
            std::sync::Arc::new(broadcast.clone()),
        ]);

        assert!(fanout.emit(event()).await.is_err());
        assert!(rx.try_recv().is_ok());
    }
}
