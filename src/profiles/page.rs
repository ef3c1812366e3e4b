use axum::{debug_handler, extract::{Path, State}, Json};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::{
    connections::{ConnectionRequest, ConnectionStatus, Connections},
    session::SessionContext,
    AppResult, AppState,
};

use super::{store, Directory, Profile, ProfileDirectory, ProfilePatch};

#[derive(Serialize)]
pub(crate) struct ProfilePage {
    #[serde(flatten)]
    profile: Profile,
    status: ConnectionStatus,
    /// The request behind `status`, so the client can cancel or answer it.
    request: Option<ConnectionRequest>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn directory(
    ctx: SessionContext,
    State(db_pool): State<SqlitePool>,
    State(directory): State<ProfileDirectory>,
    State(connections): State<Connections>,
) -> AppResult<Json<Directory>> {
    let requests = connections.requests_for(&ctx.user_id).await?;
    Ok(Json(directory.discover(&db_pool, &ctx.profile, &requests).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn me(ctx: SessionContext) -> Json<Profile> {
    Json(ctx.profile)
}

#[debug_handler(state = AppState)]
pub(crate) async fn profile(
    ctx: SessionContext,
    Path(user_id): Path<String>,
    State(db_pool): State<SqlitePool>,
    State(connections): State<Connections>,
) -> AppResult<Json<ProfilePage>> {
    let mut profile = store::fetch(&db_pool, &user_id).await?;
    if profile.user_id != ctx.user_id && !ctx.is_authority() {
        profile.email = None;
    }

    let (status, request) = connections.status_toward(&ctx, &user_id).await?;
    Ok(Json(ProfilePage { profile, status, request }))
}

#[debug_handler(state = AppState)]
pub(crate) async fn update(
    ctx: SessionContext,
    Path(user_id): Path<String>,
    State(db_pool): State<SqlitePool>,
    State(directory): State<ProfileDirectory>,
    Json(patch): Json<ProfilePatch>,
) -> AppResult<Json<Profile>> {
    let profile = store::update(&db_pool, &ctx, &user_id, patch).await?;
    directory.invalidate().await;
    Ok(Json(profile))
}
