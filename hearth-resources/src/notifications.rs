use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use uuid::Uuid;

use hearth_shared::{AppError, AppResult};

use crate::store::QueryKey;
use crate::Resources;

const RESOURCE: &str = "notifications";
const TABLE: &str = "notifications";
const INVALIDATES: &[&str] = &["notifications"];
const BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub family_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    /// payment_due, invitation, system, ...
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// One change observed on the notification feed.
#[derive(Debug, Clone)]
pub enum NotificationEvent {
    Received(Notification),
    Read(Uuid),
    AllRead,
}

/// Broadcast fan-out of notification changes. Subscribers that lag past
/// the buffer skip events rather than blocking the publisher.
#[derive(Clone)]
pub(crate) struct NotificationBus {
    tx: broadcast::Sender<NotificationEvent>,
}

impl NotificationBus {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    fn emit(&self, event: NotificationEvent) {
        let _ = self.tx.send(event);
    }

    fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.tx.subscribe()
    }
}

pub struct Notifications<'a> {
    pub(crate) hub: &'a Resources,
}

impl Notifications<'_> {
    /// Observe feed changes. New remote rows surface on the next
    /// [`refresh`](Self::refresh); local mutations surface immediately.
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.hub.notification_bus().subscribe()
    }

    pub async fn list(&self) -> AppResult<Vec<Notification>> {
        let scope = self.hub.scope()?;
        let key = QueryKey::new(RESOURCE, scope.family_id);
        if let Some(cached) = self.hub.cache().get(&key).await {
            return Ok(cached);
        }
        let rows = self.fetch(&scope.token, scope.family_id).await?;
        self.hub.cache().put(key, &rows).await;
        Ok(rows)
    }

    pub async fn unread_count(&self) -> AppResult<usize> {
        Ok(self.list().await?.iter().filter(|n| !n.read).count())
    }

    /// Re-fetch the feed, publish anything new on the bus, and refresh
    /// the cache.
    pub async fn refresh(&self) -> AppResult<Vec<Notification>> {
        let scope = self.hub.scope()?;
        let key = QueryKey::new(RESOURCE, scope.family_id);
        let known: Vec<Notification> = self.hub.cache().get(&key).await.unwrap_or_default();

        let rows = self.fetch(&scope.token, scope.family_id).await?;
        for row in &rows {
            if !known.iter().any(|n| n.id == row.id) {
                self.hub
                    .notification_bus()
                    .emit(NotificationEvent::Received(row.clone()));
            }
        }
        self.hub.cache().put(key, &rows).await;
        Ok(rows)
    }

    pub async fn mark_read(&self, id: Uuid) -> AppResult<Notification> {
        let scope = self.hub.scope()?;
        let mut rows: Vec<Notification> = self
            .hub
            .rest()
            .table(TABLE)
            .bearer(&scope.token)
            .eq("id", id)
            .eq("family_id", scope.family_id)
            .update(&json!({ "read": true }))
            .await?;
        let updated = rows
            .pop()
            .ok_or_else(|| AppError::not_found(format!("notification {id} not found")))?;
        self.hub.invalidated(INVALIDATES, scope.family_id).await;
        self.hub.notification_bus().emit(NotificationEvent::Read(id));
        Ok(updated)
    }

    pub async fn mark_all_read(&self) -> AppResult<()> {
        let scope = self.hub.scope()?;
        let _: Vec<Notification> = self
            .hub
            .rest()
            .table(TABLE)
            .bearer(&scope.token)
            .eq("family_id", scope.family_id)
            .eq("read", false)
            .update(&json!({ "read": true }))
            .await?;
        self.hub.invalidated(INVALIDATES, scope.family_id).await;
        self.hub.notification_bus().emit(NotificationEvent::AllRead);
        Ok(())
    }

    async fn fetch(&self, token: &str, family_id: Uuid) -> AppResult<Vec<Notification>> {
        self.hub
            .rest()
            .table(TABLE)
            .bearer(token)
            .eq("family_id", family_id)
            .select("*")
            .order("created_at.desc")
            .fetch()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bus_fans_out_to_every_subscriber() {
        let bus = NotificationBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let id = Uuid::new_v4();
        bus.emit(NotificationEvent::Read(id));

        assert!(matches!(rx1.recv().await, Ok(NotificationEvent::Read(got)) if got == id));
        assert!(matches!(rx2.recv().await, Ok(NotificationEvent::Read(got)) if got == id));
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        let bus = NotificationBus::new();
        bus.emit(NotificationEvent::AllRead);
    }
}
