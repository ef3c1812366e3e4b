use std::sync::Arc;

use axum::{debug_handler, extract::State, http::{header, HeaderMap}, Json};
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::{config::Config, AppError, AppResult, AppState};

use super::{templates, AuthEmailKind, Mailer, RenderedEmail};

/// Body the identity platform posts when it needs an auth email sent.
#[derive(Debug, Deserialize)]
pub(crate) struct AuthEmailHook {
    user: HookUser,
    email_data: EmailData,
}

#[derive(Debug, Deserialize)]
struct HookUser {
    email: String,
    #[serde(default)]
    new_email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmailData {
    token: String,
    token_hash: String,
    #[serde(default)]
    redirect_to: Option<String>,
    email_action_type: String,
    #[serde(default)]
    site_url: Option<String>,
}

fn authorize(headers: &HeaderMap, secret: Option<&str>) -> AppResult<()> {
    let Some(secret) = secret else {
        return Err(AppError::forbidden("auth email hook is not configured"));
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(presented) if same_secret(presented, secret) => Ok(()),
        _ => Err(AppError::forbidden("bad hook secret")),
    }
}

/// Compares every byte, without stopping at the first difference.
fn same_secret(presented: &str, secret: &str) -> bool {
    let (presented, secret) = (presented.as_bytes(), secret.as_bytes());
    presented.len() == secret.len()
        && presented.iter().zip(secret).fold(0u8, |diff, (a, b)| diff | (a ^ b)) == 0
}

/// Picks the recipient, the template and the verification link for a hook call.
fn render(hook: &AuthEmailHook, public_url: &str) -> AppResult<(String, RenderedEmail)> {
    let kind: AuthEmailKind = hook.email_data.email_action_type.parse()?;
    if hook.user.email.trim().is_empty() {
        return Err(AppError::validation("hook user has no email"));
    }

    let site_url = hook.email_data.site_url.as_deref().unwrap_or(public_url).trim_end_matches('/');
    let redirect_to = hook.email_data.redirect_to.as_deref().unwrap_or(site_url);
    let link = Url::parse_with_params(
        &format!("{site_url}/auth/v1/verify"),
        &[
            ("token", hook.email_data.token_hash.as_str()),
            ("type", hook.email_data.email_action_type.as_str()),
            ("redirect_to", redirect_to),
        ],
    )?;

    let to = match (kind, &hook.user.new_email) {
        (AuthEmailKind::EmailChange, Some(new_email)) => new_email.clone(),
        _ => hook.user.email.clone(),
    };

    let email = templates::auth_email(kind, &to, &hook.email_data.token, link.as_str());
    Ok((to, email))
}

#[debug_handler(state = AppState)]
pub(crate) async fn auth_email(
    State(mailer): State<Mailer>,
    State(config): State<Arc<Config>>,
    headers: HeaderMap,
    Json(hook): Json<AuthEmailHook>,
) -> AppResult<Json<Value>> {
    authorize(&headers, config.auth_hook_secret.as_deref())?;

    let (to, email) = render(&hook, &config.public_url)?;
    mailer.send(&to, &email).await?;

    info!("{} email sent for {to}", hook.email_data.email_action_type);
    Ok(Json(json!({})))
}
