use axum::{debug_handler, extract::{Path, Query, State}, response::{IntoResponse, Redirect, Response}, Json};
use oauth2::{CsrfToken, PkceCodeChallenge, Scope};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_sessions::Session;
use tracing::debug;

use crate::{session::{CSRF_STATE, PKCE_VERIFIER, RETURN_URL}, AppResult, AppState};

use super::{clients::ClientProvider, Clients};

#[derive(Deserialize)]
pub(crate) struct LoginQuery {
    pub(crate) return_url: Option<String>,
}

/// The providers a client can offer as sign in buttons.
#[debug_handler(state = AppState)]
pub(crate) async fn login_page(State(clients): State<Clients>) -> Json<Value> {
    let providers: Vec<_> = clients
        .providers()
        .into_iter()
        .map(|provider| json!({ "provider": provider, "url": format!("/login/{}", provider.key()) }))
        .collect();
    Json(json!({ "providers": providers }))
}

#[debug_handler(state = AppState)]
pub(crate) async fn login(
    Path(provider): Path<ClientProvider>,
    Query(LoginQuery { return_url }): Query<LoginQuery>,
    State(clients): State<Clients>,
    session: Session,
) -> AppResult<Response> {
    let client = clients.get_client(provider)?;

    let (pkce_code_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

    let (authorize_url, csrf_state) = client.authorize_url(CsrfToken::new_random)
        .add_scope(Scope::new("openid".to_string()))
        .add_scope(Scope::new("email".to_string()))
        .set_pkce_challenge(pkce_code_challenge)
        .url();

    session.insert(CSRF_STATE, csrf_state.secret()).await?;
    session.insert(PKCE_VERIFIER, pkce_verifier.secret()).await?;
    if let Some(return_url) = return_url {
        session.insert(RETURN_URL, return_url).await?;
    }

    debug!("redirecting to {provider} sign in");
    Ok(Redirect::to(authorize_url.as_str()).into_response())
}
