mod actions;
mod feed;
pub mod store;
mod ws;

use axum::{routing::{get, post}, Router};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::{profiles::ProfileSummary, AppState};

pub use feed::{load, FeedEvent, FeedSnapshot, NotificationFeed, Subscription, PAGE_SIZE};
pub use store::NewNotification;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(actions::list))
        .route("/unread", get(actions::unread))
        .route("/read", post(actions::read_all))
        .route("/ws", get(ws::feed_ws))
        .route("/{id}/read", post(actions::read))
        .route("/{id}/accept", post(actions::accept))
        .route("/{id}/decline", post(actions::decline))
}

/// `action_type` of notifications pointing at a connection request.
pub const CONNECTION_REQUEST_ACTION: &str = "connection_request";
/// `action_type` of notifications pointing at a profile.
pub const PROFILE_ACTION: &str = "profile";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum NotificationKind {
    ConnectionRequest,
    ConnectionAccepted,
    AccountProvisioned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub read: bool,
    pub action_type: Option<String>,
    pub action_id: Option<String>,
}

impl Notification {
    /// The connection request an inline accept/decline acts on, if any.
    pub fn request_action(&self) -> Option<&str> {
        match (self.kind, self.action_type.as_deref(), self.action_id.as_deref()) {
            (NotificationKind::ConnectionRequest, Some(CONNECTION_REQUEST_ACTION), Some(id)) => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedEntry {
    #[serde(flatten)]
    pub notification: Notification,
    /// Who caused the notification, when it could be looked up.
    pub actor: Option<ProfileSummary>,
}
