use axum::{debug_handler, extract::{Path, State}, Json};
use serde::{Deserialize, Serialize};

use crate::{busy::InFlight, session::SessionContext, AppResult, AppState};

use super::{ConnectionRequest, ConnectionStatus, Connections, ConnectionsSnapshot, ACCEPT_REQUEST, DECLINE_REQUEST};

#[derive(Deserialize)]
pub(crate) struct SendRequestBody {
    receiver_id: String,
    message: Option<String>,
}

/// Confirmation for the toast plus the state re-read after the mutation.
#[derive(Serialize)]
pub(crate) struct Done {
    message: &'static str,
    #[serde(flatten)]
    snapshot: ConnectionsSnapshot,
}

#[derive(Serialize)]
pub(crate) struct StatusResponse {
    user_id: String,
    status: ConnectionStatus,
    request: Option<ConnectionRequest>,
}

async fn done(connections: &Connections, ctx: &SessionContext, message: &'static str) -> AppResult<Json<Done>> {
    Ok(Json(Done {
        message,
        snapshot: connections.snapshot(ctx).await?,
    }))
}

#[debug_handler(state = AppState)]
pub(crate) async fn snapshot(
    ctx: SessionContext,
    State(connections): State<Connections>,
) -> AppResult<Json<ConnectionsSnapshot>> {
    Ok(Json(connections.snapshot(&ctx).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn status(
    ctx: SessionContext,
    Path(user_id): Path<String>,
    State(connections): State<Connections>,
) -> AppResult<Json<StatusResponse>> {
    let (status, request) = connections.status_toward(&ctx, &user_id).await?;
    Ok(Json(StatusResponse { user_id, status, request }))
}

#[debug_handler(state = AppState)]
pub(crate) async fn send(
    ctx: SessionContext,
    State(connections): State<Connections>,
    State(in_flight): State<InFlight>,
    Json(SendRequestBody { receiver_id, message }): Json<SendRequestBody>,
) -> AppResult<Json<Done>> {
    let _busy = in_flight.acquire(&ctx.user_id, "send_request", &receiver_id)?;
    connections.send_request(&ctx, &receiver_id, message).await?;
    done(&connections, &ctx, "Connection request sent").await
}

#[debug_handler(state = AppState)]
pub(crate) async fn cancel(
    ctx: SessionContext,
    Path(id): Path<String>,
    State(connections): State<Connections>,
    State(in_flight): State<InFlight>,
) -> AppResult<Json<Done>> {
    let _busy = in_flight.acquire(&ctx.user_id, "cancel_request", &id)?;
    connections.cancel_request(&ctx, &id).await?;
    done(&connections, &ctx, "Connection request canceled").await
}

#[debug_handler(state = AppState)]
pub(crate) async fn accept(
    ctx: SessionContext,
    Path(id): Path<String>,
    State(connections): State<Connections>,
    State(in_flight): State<InFlight>,
) -> AppResult<Json<Done>> {
    let _busy = in_flight.acquire(&ctx.user_id, ACCEPT_REQUEST, &id)?;
    connections.accept_request(&ctx, &id).await?;
    done(&connections, &ctx, "Connection request accepted").await
}

#[debug_handler(state = AppState)]
pub(crate) async fn decline(
    ctx: SessionContext,
    Path(id): Path<String>,
    State(connections): State<Connections>,
    State(in_flight): State<InFlight>,
) -> AppResult<Json<Done>> {
    let _busy = in_flight.acquire(&ctx.user_id, DECLINE_REQUEST, &id)?;
    connections.decline_request(&ctx, &id).await?;
    done(&connections, &ctx, "Connection request declined").await
}

#[debug_handler(state = AppState)]
pub(crate) async fn remove(
    ctx: SessionContext,
    Path(user_id): Path<String>,
    State(connections): State<Connections>,
    State(in_flight): State<InFlight>,
) -> AppResult<Json<Done>> {
    let _busy = in_flight.acquire(&ctx.user_id, "remove_connection", &user_id)?;
    connections.remove_connection(&ctx, &user_id).await?;
    done(&connections, &ctx, "Connection removed").await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        profiles::store::{insert, NewProfile},
        AppError,
    };

    async fn signed_in(state: &AppState, user_id: &str, name: &str) -> SessionContext {
        SessionContext::new(insert(&state.db_pool, NewProfile::student(user_id, name)).await.unwrap())
    }

    #[tokio::test]
    async fn send_then_accept_returns_fresh_snapshots() {
        let state = AppState::for_tests().await;
        let ada = signed_in(&state, "ada", "Ada").await;
        let grace = signed_in(&state, "grace", "Grace").await;

        let body = SendRequestBody { receiver_id: "grace".to_owned(), message: Some("Hi".to_owned()) };
        let Json(sent) = send(ada.clone(), State(state.connections()), State(state.in_flight.clone()), Json(body))
            .await
            .unwrap();
        assert_eq!(sent.message, "Connection request sent");
        assert_eq!(sent.snapshot.requests.len(), 1);

        let id = sent.snapshot.requests[0].id.clone();
        let Json(accepted) = accept(grace, Path(id.clone()), State(state.connections()), State(state.in_flight.clone()))
            .await
            .unwrap();
        assert_eq!(accepted.snapshot.connections.len(), 1);
        assert!(!state.in_flight.is_busy("grace", ACCEPT_REQUEST, &id));
    }

    #[tokio::test]
    async fn accept_in_flight_is_rejected() {
        let state = AppState::for_tests().await;
        let ada = signed_in(&state, "ada", "Ada").await;
        let grace = signed_in(&state, "grace", "Grace").await;
        let request = state.connections().send_request(&ada, "grace", None).await.unwrap();

        let _busy = state.in_flight.acquire("grace", ACCEPT_REQUEST, &request.id).unwrap();
        let second = accept(grace, Path(request.id.clone()), State(state.connections()), State(state.in_flight.clone())).await;
        assert!(matches!(second, Err(AppError::Conflict(_))));
    }
}
