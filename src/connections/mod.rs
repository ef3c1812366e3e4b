mod handlers;
mod resolver;
mod service;

use axum::{routing::{delete, get, post}, Router};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::{profiles::ProfileSummary, AppState};

pub use resolver::{find_request, resolve_status};
pub use service::Connections;

/// Busy-guard operation names, shared with the inline answers in the notification feed.
pub(crate) const ACCEPT_REQUEST: &str = "accept_request";
pub(crate) const DECLINE_REQUEST: &str = "decline_request";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::snapshot))
        .route("/requests", post(handlers::send))
        .route("/requests/{id}", delete(handlers::cancel))
        .route("/requests/{id}/accept", post(handlers::accept))
        .route("/requests/{id}/decline", post(handlers::decline))
        .route("/status/{user_id}", get(handlers::status))
        .route("/{user_id}", delete(handlers::remove))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ConnectionRequest {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub status: RequestStatus,
    pub message: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl ConnectionRequest {
    /// True if this request was sent from either user of the pair to the other.
    pub fn involves(&self, a: &str, b: &str) -> bool {
        (self.sender_id == a && self.receiver_id == b) || (self.sender_id == b && self.receiver_id == a)
    }
}

/// How the current user relates to another user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    None,
    Sent,
    Received,
    Connected,
}

impl ConnectionStatus {
    /// The same relationship seen from the other side.
    pub fn mirror(self) -> Self {
        match self {
            ConnectionStatus::Sent => ConnectionStatus::Received,
            ConnectionStatus::Received => ConnectionStatus::Sent,
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingRequest {
    #[serde(flatten)]
    pub request: ConnectionRequest,
    pub sender: Option<ProfileSummary>,
}

/// Everything the connections views need, re-read in full after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionsSnapshot {
    /// Every request the user sent or received, newest first.
    pub requests: Vec<ConnectionRequest>,
    /// Requests waiting for the user's answer.
    pub pending: Vec<PendingRequest>,
    pub connections: Vec<ProfileSummary>,
}
