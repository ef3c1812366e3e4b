use axum::{
    debug_handler,
    extract::{ws::{Message, WebSocket}, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::{session::SessionContext, AppState};

use super::{load, NotificationFeed};

/// Pushes the user's whole feed on connect and again after every change.
#[debug_handler(state = AppState)]
pub(crate) async fn feed_ws(
    ctx: SessionContext,
    State(db_pool): State<SqlitePool>,
    State(feed): State<NotificationFeed>,

    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(async move |socket| serve(socket, db_pool, feed, ctx.user_id).await)
}

async fn serve(socket: WebSocket, db_pool: SqlitePool, feed: NotificationFeed, user_id: String) {
    let mut subscription = feed.subscribe(&user_id);
    let (mut sender, mut receiver) = socket.split();

    let mut push_task = tokio::spawn(async move {
        loop {
            let payload = match load(&db_pool, &user_id).await.map(|snapshot| serde_json::to_string(&snapshot)) {
                Ok(Ok(payload)) => payload,
                Ok(Err(e)) => {
                    warn!("could not encode feed for u/{user_id}: {e}");
                    break;
                }
                Err(e) => {
                    warn!("could not load feed for u/{user_id}: {e}");
                    break;
                }
            };

            if sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
            if subscription.changed().await.is_none() {
                break;
            }
        }
        debug!("feed socket for u/{user_id} closed");
    });

    // the client only listens; read until it hangs up
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut push_task => recv_task.abort(),
        _ = &mut recv_task => push_task.abort(),
    };
}
