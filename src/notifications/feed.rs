use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::{connections::ConnectionRequest, profiles, AppResult};

use super::{store, FeedEntry, Notification, CONNECTION_REQUEST_ACTION, PROFILE_ACTION};

/// Largest number of notifications returned by one read of the feed.
pub const PAGE_SIZE: i64 = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEvent {
    pub user_id: String,
}

/// Push side of the notification feed. A publish only says "this user's
/// notifications changed"; subscribers answer by reading the feed again.
#[derive(Clone)]
pub struct NotificationFeed {
    tx: broadcast::Sender<FeedEvent>,
}

impl Default for NotificationFeed {
    fn default() -> Self {
        Self::new(64)
    }
}

impl NotificationFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity).0,
        }
    }

    pub fn publish(&self, user_id: &str) {
        // no subscribers is not an error, the next poll picks the change up
        let receivers = self.tx.send(FeedEvent { user_id: user_id.to_owned() }).unwrap_or(0);
        debug!("published feed change for u/{user_id} to {receivers} subscribers");
    }

    pub fn subscribe(&self, user_id: &str) -> Subscription {
        Subscription {
            user_id: user_id.to_owned(),
            rx: self.tx.subscribe(),
        }
    }
}

pub struct Subscription {
    user_id: String,
    rx: broadcast::Receiver<FeedEvent>,
}

impl Subscription {
    /// Waits for the next change to this user's notifications. `None` once the
    /// feed has shut down.
    pub async fn changed(&mut self) -> Option<()> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.user_id == self.user_id => return Some(()),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    // some of the skipped events may have been ours
                    debug!("u/{} feed lagged by {skipped}", self.user_id);
                    return Some(());
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedSnapshot {
    pub notifications: Vec<FeedEntry>,
    pub unread: i64,
}

/// Full read of a user's feed: the newest page, enriched with who caused each
/// notification, plus the unread badge count.
pub async fn load(db_pool: &SqlitePool, user_id: &str) -> AppResult<FeedSnapshot> {
    let notifications = store::recent(db_pool, user_id, PAGE_SIZE).await?;

    let mut entries = Vec::with_capacity(notifications.len());
    for notification in notifications {
        let actor = match actor(db_pool, &notification).await {
            Ok(actor) => actor,
            Err(e) => {
                warn!("could not enrich notification {}: {e}", notification.id);
                None
            }
        };
        entries.push(FeedEntry { notification, actor });
    }

    Ok(FeedSnapshot {
        notifications: entries,
        unread: store::unread_count(db_pool, user_id).await?,
    })
}

async fn actor(db_pool: &SqlitePool, notification: &Notification) -> AppResult<Option<profiles::ProfileSummary>> {
    let Some(action_id) = notification.action_id.as_deref() else {
        return Ok(None);
    };

    let actor_id = match notification.action_type.as_deref() {
        Some(CONNECTION_REQUEST_ACTION) => {
            let request: Option<ConnectionRequest> = sqlx::query_as("SELECT id,sender_id,receiver_id,status,message,created_at FROM connection_requests WHERE id=?")
                .bind(action_id)
                .fetch_optional(db_pool)
                .await?;
            // withdrawn requests leave nothing to enrich with
            let Some(request) = request else {
                return Ok(None);
            };
            request.sender_id
        }
        Some(PROFILE_ACTION) => action_id.to_owned(),
        _ => return Ok(None),
    };

    Ok(profiles::store::get(db_pool, &actor_id).await?.as_ref().map(Into::into))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn subscribers_only_wake_for_their_user() {
        let feed = NotificationFeed::default();
        let mut alice = feed.subscribe("alice");
        let mut bob = feed.subscribe("bob");

        feed.publish("bob");

        assert_eq!(timeout(Duration::from_secs(1), bob.changed()).await.unwrap(), Some(()));
        assert!(timeout(Duration::from_millis(50), alice.changed()).await.is_err());
    }

    #[tokio::test]
    async fn lagging_subscriber_still_wakes() {
        let feed = NotificationFeed::new(2);
        let mut alice = feed.subscribe("alice");
        for _ in 0..5 {
            feed.publish("bob");
        }

        assert_eq!(timeout(Duration::from_secs(1), alice.changed()).await.unwrap(), Some(()));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        NotificationFeed::default().publish("nobody");
    }
}
