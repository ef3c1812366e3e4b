use std::fmt;

use oauth2::{basic::BasicClient, AuthUrl, Client, ClientId, ClientSecret, RedirectUrl, TokenUrl};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AppError, AppResult, GetField};

pub(crate) type OAuthClient = Client<oauth2::StandardErrorResponse<oauth2::basic::BasicErrorResponseType>, oauth2::StandardTokenResponse<oauth2::EmptyExtraTokenFields, oauth2::basic::BasicTokenType>, oauth2::StandardTokenIntrospectionResponse<oauth2::EmptyExtraTokenFields, oauth2::basic::BasicTokenType>, oauth2::StandardRevocableToken, oauth2::StandardErrorResponse<oauth2::RevocationErrorResponseType>, oauth2::EndpointSet, oauth2::EndpointNotSet, oauth2::EndpointNotSet, oauth2::EndpointNotSet, oauth2::EndpointSet>;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClientProvider {
    Google,
    Github,
}

impl ClientProvider {
    /// Provider id as the identity platform names it.
    pub fn id(&self) -> &str {
        use ClientProvider::*;
        match self {
            Google => "google.com",
            Github => "github.com",
        }
    }

    /// Name used in routes and in the secrets file.
    pub fn key(&self) -> &'static str {
        use ClientProvider::*;
        match self {
            Google => "google",
            Github => "github",
        }
    }

    fn endpoints(&self) -> (&'static str, &'static str) {
        use ClientProvider::*;
        match self {
            Google => ("https://accounts.google.com/o/oauth2/auth", "https://oauth2.googleapis.com/token"),
            Github => ("https://github.com/login/oauth/authorize", "https://github.com/login/oauth/access_token"),
        }
    }
}

impl fmt::Display for ClientProvider {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// OAuth clients for the sign-in providers present in the secrets file.
#[derive(Clone, Default)]
pub struct Clients {
    google_client: Option<OAuthClient>,
    github_client: Option<OAuthClient>,
}

impl Clients {
    /// Reads `{"google": {"client_id", "client_secret"}, "github": {...}}`.
    /// Callbacks land on `{public_url}/lockin/{provider}`.
    pub fn from_json(json: &Value, public_url: &str) -> AppResult<Clients> {
        Ok(
            Clients {
                google_client: client(json, ClientProvider::Google, public_url)?,
                github_client: client(json, ClientProvider::Github, public_url)?,
            }
        )
    }

    pub fn providers(&self) -> Vec<ClientProvider> {
        [
            (ClientProvider::Google, &self.google_client),
            (ClientProvider::Github, &self.github_client),
        ]
            .into_iter()
            .filter_map(|(provider, client)| client.as_ref().map(|_| provider))
            .collect()
    }

    pub(crate) fn get_client(&self, provider: ClientProvider) -> AppResult<OAuthClient> {
        use ClientProvider::*;
        match provider {
            Google => self.google_client.clone(),
            Github => self.github_client.clone(),
        }.ok_or_else(|| AppError::not_found(format!("sign in provider {provider}")))
    }
}

fn client(json: &Value, provider: ClientProvider, public_url: &str) -> AppResult<Option<OAuthClient>> {
    let Some(json) = json.get(provider.key()) else {
        return Ok(None);
    };
    let (auth_url, token_url) = provider.endpoints();

    Ok(Some(
        BasicClient::new(ClientId::new(json.get_str_field("client_id")?))
            .set_client_secret(ClientSecret::new(json.get_str_field("client_secret")?))
            .set_auth_uri(AuthUrl::new(auth_url.to_owned())?)
            .set_token_uri(TokenUrl::new(token_url.to_owned())?)
            .set_redirect_uri(RedirectUrl::new(format!("{public_url}/lockin/{}", provider.key()))?)
    ))
}
