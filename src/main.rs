use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context};
use axum::{
    debug_handler,
    http::{header::CONTENT_TYPE, HeaderValue, Method},
    routing::get,
    Json, Router,
};
use campuslink::{
    auth, busy::InFlight, config::Config, connections, db, email, notifications::{self, NotificationFeed},
    profiles::{self, ProfileDirectory}, AppState,
};
use reqwest::Url;
use serde_json::{json, Value};
use tokio::{net::TcpListener, signal};
use tower_http::cors::CorsLayer;
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = Config::load();

    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(config.public_url.starts_with("https://"))
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(config.session_inactivity_minutes)));

    let db_pool = db::connect(&config.database_url)
        .await
        .with_context(|| format!("opening {}", config.database_url))?;

    let secrets: Value = match std::fs::read_to_string(&config.oauth_clients_path) {
        Ok(raw) => serde_json::from_str(&raw).with_context(|| format!("parsing {}", config.oauth_clients_path))?,
        Err(e) => {
            warn!("could not read {}: {e}, sign in is disabled", config.oauth_clients_path);
            json!({})
        }
    };
    let clients = auth::Clients::from_json(&secrets, &config.public_url)?;
    let identity = auth::Identity::from_json(&secrets)?;

    let app_state = AppState {
        db_pool,
        clients,
        identity,
        feed: NotificationFeed::default(),
        directory: ProfileDirectory::default(),
        in_flight: InFlight::default(),
        mailer: email::Mailer::new(&config),
        config: Arc::new(config),
    };

    let cors = CorsLayer::new()
        .allow_origin(cors_origin(&app_state.config.public_url)?)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    let address = app_state.config.bind_address.clone();
    let app = Router::new()
        .route("/health", get(health))

        .merge(auth::router())
        .merge(email::router())
        .nest("/p", profiles::router())
        .nest("/c", connections::router())
        .nest("/n", notifications::router())

        .with_state(app_state)
        .layer(session_layer)
        .layer(cors);

    let listener = TcpListener::bind(&address).await.with_context(|| format!("binding {address}"))?;
    info!("listening on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shut down");
    Ok(())
}

/// The browser origin allowed to call with the session cookie: scheme, host
/// and port of the public URL.
fn cors_origin(public_url: &str) -> anyhow::Result<HeaderValue> {
    let url = Url::parse(public_url).with_context(|| format!("parsing PUBLIC_URL {public_url}"))?;
    let origin = url.origin();
    if !origin.is_tuple() {
        bail!("PUBLIC_URL {public_url} has no origin");
    }
    Ok(HeaderValue::from_str(&origin.ascii_serialization())?)
}

#[debug_handler]
async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("could not listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
        info!("received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                info!("received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("could not listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
