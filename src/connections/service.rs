use sqlx::{SqliteConnection, SqlitePool};
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::{
    db,
    notifications::{self, NewNotification, NotificationFeed, NotificationKind, CONNECTION_REQUEST_ACTION, PROFILE_ACTION},
    profiles::{self, ProfileDirectory, ProfileSummary},
    session::SessionContext,
    AppError, AppResult,
};

use super::{resolve_status, ConnectionRequest, ConnectionStatus, ConnectionsSnapshot, PendingRequest, RequestStatus};

const COLUMNS: &str = "id,sender_id,receiver_id,status,message,created_at";
const MAX_MESSAGE_LEN: usize = 500;

/// The connection-request state machine. Every mutation runs in one
/// transaction and leaves local state alone; callers re-read with
/// [`Connections::snapshot`] afterwards.
#[derive(Clone)]
pub struct Connections {
    db_pool: SqlitePool,
    feed: NotificationFeed,
    directory: ProfileDirectory,
}

impl Connections {
    pub fn new(db_pool: SqlitePool, feed: NotificationFeed, directory: ProfileDirectory) -> Self {
        Self { db_pool, feed, directory }
    }

    pub async fn requests_for(&self, user_id: &str) -> AppResult<Vec<ConnectionRequest>> {
        Ok(
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM connection_requests WHERE sender_id=? OR receiver_id=? ORDER BY created_at DESC, id DESC"))
                .bind(user_id)
                .bind(user_id)
                .fetch_all(&self.db_pool)
                .await?
        )
    }

    pub async fn pending_for(&self, user_id: &str) -> AppResult<Vec<PendingRequest>> {
        let requests: Vec<ConnectionRequest> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM connection_requests WHERE receiver_id=? AND status='pending' ORDER BY created_at DESC, id DESC"))
                .bind(user_id)
                .fetch_all(&self.db_pool)
                .await?;

        let mut pending = Vec::with_capacity(requests.len());
        for request in requests {
            let sender = profiles::store::get(&self.db_pool, &request.sender_id).await?;
            pending.push(PendingRequest {
                sender: sender.as_ref().map(Into::into),
                request,
            });
        }
        Ok(pending)
    }

    pub async fn connections_for(&self, user_id: &str) -> AppResult<Vec<ProfileSummary>> {
        let ids: Vec<(String,)> = sqlx::query_as(
            "SELECT CASE WHEN user1_id=? THEN user2_id ELSE user1_id END FROM connections WHERE user1_id=? OR user2_id=? ORDER BY created_at DESC",
        )
            .bind(user_id)
            .bind(user_id)
            .bind(user_id)
            .fetch_all(&self.db_pool)
            .await?;

        let mut connections = Vec::with_capacity(ids.len());
        for (id,) in ids {
            if let Some(profile) = profiles::store::get(&self.db_pool, &id).await? {
                connections.push((&profile).into());
            }
        }
        Ok(connections)
    }

    pub async fn snapshot(&self, ctx: &SessionContext) -> AppResult<ConnectionsSnapshot> {
        Ok(ConnectionsSnapshot {
            requests: self.requests_for(&ctx.user_id).await?,
            pending: self.pending_for(&ctx.user_id).await?,
            connections: self.connections_for(&ctx.user_id).await?,
        })
    }

    pub async fn status_toward(&self, ctx: &SessionContext, target_id: &str) -> AppResult<(ConnectionStatus, Option<ConnectionRequest>)> {
        let requests = self.requests_for(&ctx.user_id).await?;
        let status = resolve_status(&requests, &ctx.user_id, target_id);
        let request = super::find_request(&requests, &ctx.user_id, target_id).cloned();
        Ok((status, request))
    }

    pub async fn send_request(&self, ctx: &SessionContext, receiver_id: &str, message: Option<String>) -> AppResult<ConnectionRequest> {
        let receiver_id = receiver_id.trim();
        if receiver_id.is_empty() {
            return Err(AppError::validation("receiver is required"));
        }
        if receiver_id == ctx.user_id {
            return Err(AppError::validation("you cannot connect with yourself"));
        }
        let message = normalize_message(message)?;

        if profiles::store::get(&self.db_pool, receiver_id).await?.is_none() {
            return Err(AppError::not_found("profile"));
        }

        let mut tx = self.db_pool.begin().await?;

        let open: Option<(RequestStatus,)> = sqlx::query_as(
            "SELECT status FROM connection_requests WHERE ((sender_id=? AND receiver_id=?) OR (sender_id=? AND receiver_id=?)) AND status<>'rejected' LIMIT 1",
        )
            .bind(&ctx.user_id)
            .bind(receiver_id)
            .bind(receiver_id)
            .bind(&ctx.user_id)
            .fetch_optional(&mut *tx)
            .await?;
        match open {
            Some((RequestStatus::Accepted,)) => return Err(AppError::conflict("you are already connected")),
            Some(_) => return Err(AppError::conflict("a connection request between you is already pending")),
            None => {}
        }

        let request = ConnectionRequest {
            id: Uuid::now_v7().to_string(),
            sender_id: ctx.user_id.clone(),
            receiver_id: receiver_id.to_owned(),
            status: RequestStatus::Pending,
            message,
            created_at: OffsetDateTime::now_utc(),
        };
        sqlx::query("INSERT INTO connection_requests (id,sender_id,receiver_id,status,message,created_at) VALUES (?,?,?,?,?,?)")
            .bind(&request.id)
            .bind(&request.sender_id)
            .bind(&request.receiver_id)
            .bind(request.status)
            .bind(&request.message)
            .bind(db::stamp(request.created_at))
            .execute(&mut *tx)
            .await
            .map_err(open_pair_conflict)?;

        notifications::store::insert(&mut tx, NewNotification {
            user_id: request.receiver_id.clone(),
            kind: NotificationKind::ConnectionRequest,
            title: "New connection request".to_owned(),
            description: format!("{} wants to connect with you", ctx.profile.full_name),
            action_type: Some(CONNECTION_REQUEST_ACTION),
            action_id: Some(request.id.clone()),
        }).await?;

        tx.commit().await?;
        self.feed.publish(&request.receiver_id);

        info!("u/{} sent connection request {} to u/{}", request.sender_id, request.id, request.receiver_id);
        Ok(request)
    }

    pub async fn cancel_request(&self, ctx: &SessionContext, request_id: &str) -> AppResult<()> {
        let mut tx = self.db_pool.begin().await?;

        let request = pending_request(&mut tx, request_id).await?;
        if request.sender_id != ctx.user_id {
            return Err(AppError::forbidden("only the sender can cancel a request"));
        }

        sqlx::query("DELETE FROM connection_requests WHERE id=?")
            .bind(request_id)
            .execute(&mut *tx)
            .await?;
        notifications::store::mark_request_handled(&mut tx, request_id).await?;

        tx.commit().await?;
        self.feed.publish(&request.receiver_id);

        info!("u/{} canceled connection request {request_id}", ctx.user_id);
        Ok(())
    }

    pub async fn accept_request(&self, ctx: &SessionContext, request_id: &str) -> AppResult<()> {
        let mut tx = self.db_pool.begin().await?;

        let request = pending_request(&mut tx, request_id).await?;
        if request.receiver_id != ctx.user_id {
            return Err(AppError::forbidden("only the receiver can accept a request"));
        }

        sqlx::query("UPDATE connection_requests SET status='accepted' WHERE id=?")
            .bind(request_id)
            .execute(&mut *tx)
            .await?;

        let (user1, user2) = ordered_pair(&request.sender_id, &request.receiver_id);
        sqlx::query("INSERT OR IGNORE INTO connections (user1_id,user2_id,created_at) VALUES (?,?,?)")
            .bind(user1)
            .bind(user2)
            .bind(db::stamp(OffsetDateTime::now_utc()))
            .execute(&mut *tx)
            .await?;

        profiles::store::adjust_connections_count(&mut tx, &request.sender_id, 1).await?;
        profiles::store::adjust_connections_count(&mut tx, &request.receiver_id, 1).await?;

        notifications::store::mark_request_handled(&mut tx, request_id).await?;
        notifications::store::insert(&mut tx, NewNotification {
            user_id: request.sender_id.clone(),
            kind: NotificationKind::ConnectionAccepted,
            title: "Connection accepted".to_owned(),
            description: format!("{} accepted your connection request", ctx.profile.full_name),
            action_type: Some(PROFILE_ACTION),
            action_id: Some(ctx.user_id.clone()),
        }).await?;

        tx.commit().await?;
        self.directory.invalidate().await;
        self.feed.publish(&request.sender_id);
        self.feed.publish(&request.receiver_id);

        info!("u/{} accepted connection request {request_id} from u/{}", ctx.user_id, request.sender_id);
        Ok(())
    }

    pub async fn decline_request(&self, ctx: &SessionContext, request_id: &str) -> AppResult<()> {
        let mut tx = self.db_pool.begin().await?;

        let request = pending_request(&mut tx, request_id).await?;
        if request.receiver_id != ctx.user_id {
            return Err(AppError::forbidden("only the receiver can decline a request"));
        }

        sqlx::query("UPDATE connection_requests SET status='rejected' WHERE id=?")
            .bind(request_id)
            .execute(&mut *tx)
            .await?;
        notifications::store::mark_request_handled(&mut tx, request_id).await?;

        tx.commit().await?;
        self.feed.publish(&ctx.user_id);

        info!("u/{} declined connection request {request_id}", ctx.user_id);
        Ok(())
    }

    /// Severs a connection: drops the edge, the requests that led to it and
    /// both counters, all or nothing.
    pub async fn remove_connection(&self, ctx: &SessionContext, target_id: &str) -> AppResult<()> {
        if target_id == ctx.user_id {
            return Err(AppError::validation("you cannot disconnect from yourself"));
        }

        let mut tx = self.db_pool.begin().await?;

        let (user1, user2) = ordered_pair(&ctx.user_id, target_id);
        let edge = sqlx::query("DELETE FROM connections WHERE user1_id=? AND user2_id=?")
            .bind(user1)
            .bind(user2)
            .execute(&mut *tx)
            .await?;
        if edge.rows_affected() == 0 {
            return Err(AppError::not_found("connection"));
        }

        sqlx::query("DELETE FROM connection_requests WHERE ((sender_id=? AND receiver_id=?) OR (sender_id=? AND receiver_id=?)) AND status<>'rejected'")
            .bind(&ctx.user_id)
            .bind(target_id)
            .bind(target_id)
            .bind(&ctx.user_id)
            .execute(&mut *tx)
            .await?;

        profiles::store::adjust_connections_count(&mut tx, &ctx.user_id, -1).await?;
        profiles::store::adjust_connections_count(&mut tx, target_id, -1).await?;

        tx.commit().await?;
        self.directory.invalidate().await;

        info!("u/{} removed connection with u/{target_id}", ctx.user_id);
        Ok(())
    }
}

/// Loads a request that can still be answered.
async fn pending_request(conn: &mut SqliteConnection, request_id: &str) -> AppResult<ConnectionRequest> {
    let request: ConnectionRequest = sqlx::query_as(&format!("SELECT {COLUMNS} FROM connection_requests WHERE id=?"))
        .bind(request_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::not_found("connection request"))?;

    if request.status != RequestStatus::Pending {
        return Err(AppError::conflict("this request has already been answered"));
    }
    Ok(request)
}

fn ordered_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a < b { (a, b) } else { (b, a) }
}

/// Blank messages are stored as NULL.
fn normalize_message(message: Option<String>) -> AppResult<Option<String>> {
    let Some(message) = message else {
        return Ok(None);
    };
    let message = message.trim();
    if message.chars().count() > MAX_MESSAGE_LEN {
        return Err(AppError::validation(format!("message is longer than {MAX_MESSAGE_LEN} characters")));
    }
    Ok((!message.is_empty()).then(|| message.to_owned()))
}

/// The open-pair index caught a request racing past the check in `send_request`.
fn open_pair_conflict(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::conflict("a connection request between you is already pending")
        }
        _ => err.into(),
    }
}
