mod admin;
mod hook;
mod mailer;
pub mod templates;

use axum::{routing::post, Router};

use crate::AppState;

pub use admin::{log_action, provision, temporary_password, ProvisionRequest};
pub use mailer::Mailer;
pub use templates::{AuthEmailKind, RenderedEmail};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/users", post(admin::create_user))
        .route("/hooks/auth-email", post(hook::auth_email))
}
