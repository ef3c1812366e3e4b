use axum::{debug_handler, extract::{Path, State}, Json};
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::{
    busy::InFlight,
    connections::{Connections, ACCEPT_REQUEST, DECLINE_REQUEST},
    session::SessionContext,
    AppError, AppResult, AppState,
};

use super::{feed, store, FeedSnapshot};

#[derive(Serialize)]
pub(crate) struct Done {
    message: &'static str,
    #[serde(flatten)]
    feed: FeedSnapshot,
}

#[debug_handler(state = AppState)]
pub(crate) async fn list(
    ctx: SessionContext,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<FeedSnapshot>> {
    Ok(Json(feed::load(&db_pool, &ctx.user_id).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn unread(
    ctx: SessionContext,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Value>> {
    let unread = store::unread_count(&db_pool, &ctx.user_id).await?;
    Ok(Json(json!({ "unread": unread })))
}

#[debug_handler(state = AppState)]
pub(crate) async fn read(
    ctx: SessionContext,
    Path(id): Path<String>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<FeedSnapshot>> {
    store::mark_read(&db_pool, &ctx.user_id, &id).await?;
    Ok(Json(feed::load(&db_pool, &ctx.user_id).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn read_all(
    ctx: SessionContext,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<FeedSnapshot>> {
    store::mark_all_read(&db_pool, &ctx.user_id).await?;
    Ok(Json(feed::load(&db_pool, &ctx.user_id).await?))
}

/// The connection request behind an inline accept/decline button.
async fn request_behind(db_pool: &SqlitePool, ctx: &SessionContext, id: &str) -> AppResult<String> {
    let notification = store::get(db_pool, &ctx.user_id, id).await?;
    notification
        .request_action()
        .map(str::to_owned)
        .ok_or_else(|| AppError::validation("this notification has no connection request to answer"))
}

#[debug_handler(state = AppState)]
pub(crate) async fn accept(
    ctx: SessionContext,
    Path(id): Path<String>,
    State(db_pool): State<SqlitePool>,
    State(connections): State<Connections>,
    State(in_flight): State<InFlight>,
) -> AppResult<Json<Done>> {
    let request_id = request_behind(&db_pool, &ctx, &id).await?;
    let _busy = in_flight.acquire(&ctx.user_id, ACCEPT_REQUEST, &request_id)?;

    connections.accept_request(&ctx, &request_id).await?;
    store::mark_read(&db_pool, &ctx.user_id, &id).await?;

    Ok(Json(Done {
        message: "Connection request accepted",
        feed: feed::load(&db_pool, &ctx.user_id).await?,
    }))
}

#[debug_handler(state = AppState)]
pub(crate) async fn decline(
    ctx: SessionContext,
    Path(id): Path<String>,
    State(db_pool): State<SqlitePool>,
    State(connections): State<Connections>,
    State(in_flight): State<InFlight>,
) -> AppResult<Json<Done>> {
    let request_id = request_behind(&db_pool, &ctx, &id).await?;
    let _busy = in_flight.acquire(&ctx.user_id, DECLINE_REQUEST, &request_id)?;

    connections.decline_request(&ctx, &request_id).await?;
    store::mark_read(&db_pool, &ctx.user_id, &id).await?;

    Ok(Json(Done {
        message: "Connection request declined",
        feed: feed::load(&db_pool, &ctx.user_id).await?,
    }))
}
