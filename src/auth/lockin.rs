use axum::{debug_handler, extract::{Path, Query, State}, response::Redirect};
use oauth2::{AuthorizationCode, CsrfToken, PkceCodeVerifier, TokenResponse};
use serde::Deserialize;
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{
    config::Config,
    profiles::ProfileDirectory,
    session::{SessionContext, CSRF_STATE, PKCE_VERIFIER, RETURN_URL},
    AppError, AppResult, AppState,
};

use super::{clients::ClientProvider, safe_return_url, Clients, Identity};

#[derive(Deserialize)]
pub struct LockinQuery {
    pub state: Option<String>,
    pub code: Option<String>,
}

/// OAuth callback: checks the CSRF state, exchanges the code, lets the
/// identity platform resolve the user and starts their session.
#[debug_handler(state = AppState)]
pub(crate) async fn lockin(
    Path(provider): Path<ClientProvider>,
    Query(LockinQuery { state, code }): Query<LockinQuery>,
    State(db_pool): State<SqlitePool>,
    State(clients): State<Clients>,
    State(identity): State<Identity>,
    State(directory): State<ProfileDirectory>,
    State(config): State<std::sync::Arc<Config>>,
    session: Session,
) -> AppResult<Redirect> {
    let state = CsrfToken::new(state.ok_or_else(|| AppError::validation("OAuth: without state"))?);
    let code = AuthorizationCode::new(code.ok_or_else(|| AppError::validation("OAuth: without code"))?);

    let Some(stored_state) = session.remove::<String>(CSRF_STATE).await? else {
        return Err(AppError::validation("no csrf_state"));
    };

    if state.secret().as_str() != stored_state.as_str() {
        return Err(AppError::validation("csrf tokens don't match"));
    }

    let Some(pkce_verifier) = session.remove::<String>(PKCE_VERIFIER).await? else {
        return Err(AppError::validation("no pkce_verifier"));
    };

    let client = clients.get_client(provider)?;
    let http_client = reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    let token_result = client
        .exchange_code(code)
        .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier))
        .request_async(&http_client)
        .await?;

    let access_token = token_result.access_token().secret();
    let user = identity.sign_in_with_idp(provider, access_token, &config.public_url).await?;

    let return_url = session.remove::<String>(RETURN_URL).await?;

    SessionContext::begin(
        &session,
        &db_pool,
        &directory,
        &user.user_id,
        user.display_name.as_deref().unwrap_or_default(),
        user.email.as_deref(),
    ).await?;

    Ok(Redirect::to(&safe_return_url(return_url)))
}
