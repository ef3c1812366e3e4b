pub mod appresult;
pub mod auth;
pub mod busy;
pub mod config;
pub mod connections;
pub mod db;
pub mod email;
pub mod notifications;
pub mod profiles;
pub mod res;
pub mod session;

use std::sync::Arc;

use axum::extract::FromRef;
use serde_json::Value;
use sqlx::SqlitePool;

pub use appresult::{AppError, AppResult};

use crate::{
    busy::InFlight, config::Config, connections::Connections, email::Mailer,
    notifications::NotificationFeed, profiles::ProfileDirectory,
};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub clients: auth::Clients,
    pub identity: auth::Identity,
    pub feed: NotificationFeed,
    pub directory: ProfileDirectory,
    pub in_flight: InFlight,
    pub mailer: Mailer,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn connections(&self) -> Connections {
        Connections::new(self.db_pool.clone(), self.feed.clone(), self.directory.clone())
    }
}

#[cfg(test)]
impl AppState {
    /// Fresh in-memory state with no identity platform and a log-only mailer.
    pub(crate) async fn for_tests() -> Self {
        let config = Config::default();
        Self {
            db_pool: db::test_pool().await,
            clients: auth::Clients::default(),
            identity: auth::Identity::default(),
            feed: NotificationFeed::default(),
            directory: ProfileDirectory::default(),
            in_flight: InFlight::default(),
            mailer: Mailer::new(&config),
            config: Arc::new(config),
        }
    }
}

impl FromRef<AppState> for Connections {
    fn from_ref(state: &AppState) -> Self {
        state.connections()
    }
}

pub trait GetField {
    fn get_str_field(&self, field: &str) -> AppResult<String>;
    fn get_obj_field(&self, field: &str) -> AppResult<&Value>;
}

impl GetField for serde_json::Value {
    fn get_str_field(&self, field: &str) -> AppResult<String> {
        Ok(
            self.get(field)
            .ok_or(format!("expected {field} in {self}"))?
            .as_str()
            .ok_or(format!("expected {field} in {self} to be string"))?
            .to_owned()
        )
    }

    fn get_obj_field(&self, field: &str) -> AppResult<&Value> {
        self.get(field)
        .ok_or(format!("expected {field} in {self}").into())
    }
}
