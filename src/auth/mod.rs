mod clients;
mod identity;
mod lockin;
mod login;
mod logout;

use axum::{routing::get, Router};

use crate::AppState;

pub use clients::{ClientProvider, Clients};
pub use identity::{Identity, IdentityUser, SignedUp};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", get(login::login_page))
        .route("/login/{provider}", get(login::login))
        .route("/lockin/{provider}", get(lockin::lockin))
        .route("/logout", get(logout::logout))
}

/// Only same-site paths are followed after sign in or sign out.
pub(crate) fn safe_return_url(return_url: Option<String>) -> String {
    match return_url {
        Some(url) if url.starts_with('/') && !url.starts_with("//") && !url.contains('\\') => url,
        _ => "/".to_owned(),
    }
}
