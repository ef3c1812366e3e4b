use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::{AppError, AppResult, GetField};

use super::clients::ClientProvider;

const IDENTITY_TOOLKIT: &str = "https://identitytoolkit.googleapis.com/v1";

/// Client for the hosted identity platform, which owns credentials and user ids.
#[derive(Clone, Default)]
pub struct Identity {
    api_key: Option<String>,
    http_client: reqwest::Client,
}

/// A user the identity platform vouched for.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityUser {
    pub user_id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

/// A fresh email/password account.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedUp {
    pub user_id: String,
    id_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignInWithIdp {
    post_body: String,
    request_uri: String,
    return_idp_credential: bool,
    return_secure_token: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignUp<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

impl Identity {
    /// Reads `{"firebase": {"apikey": ...}}`; without it every call fails.
    pub fn from_json(json: &Value) -> AppResult<Self> {
        let api_key = match json.get("firebase") {
            Some(firebase) => Some(firebase.get_str_field("apikey")?),
            None => {
                warn!("no identity platform key configured, sign in and provisioning are disabled");
                None
            }
        };

        Ok(Self {
            api_key,
            http_client: reqwest::Client::new(),
        })
    }

    fn url(&self, method: &str) -> AppResult<String> {
        let api_key = self.api_key.as_deref().ok_or("identity platform is not configured")?;
        Ok(format!("{IDENTITY_TOOLKIT}/accounts:{method}?key={api_key}"))
    }

    /// Trades a provider access token for the platform's user.
    pub async fn sign_in_with_idp(&self, provider: ClientProvider, access_token: &str, request_uri: &str) -> AppResult<IdentityUser> {
        let body = self.call("signInWithIdp", &SignInWithIdp {
            post_body: format!("access_token={access_token}&providerId={}", provider.id()),
            request_uri: request_uri.to_owned(),
            return_idp_credential: true,
            return_secure_token: true,
        }).await?;

        user_from(&body)
    }

    /// Creates an email/password account.
    pub async fn sign_up(&self, email: &str, password: &str) -> AppResult<SignedUp> {
        let body = self.call("signUp", &SignUp {
            email,
            password,
            return_secure_token: true,
        }).await?;

        signed_up_from(&body)
    }

    /// Deletes an account created by [`Identity::sign_up`], using the token it returned.
    pub async fn delete_account(&self, signed_up: &SignedUp) -> AppResult<()> {
        self.call("delete", &json!({ "idToken": signed_up.id_token })).await?;
        Ok(())
    }

    async fn call<B: Serialize>(&self, method: &str, request: &B) -> AppResult<Value> {
        let response = self.http_client.post(self.url(method)?)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            return Err(platform_error(&body));
        }
        Ok(body)
    }
}

fn signed_up_from(body: &Value) -> AppResult<SignedUp> {
    Ok(SignedUp {
        user_id: body.get_str_field("localId")?,
        id_token: body.get_str_field("idToken")?,
    })
}

fn user_from(body: &Value) -> AppResult<IdentityUser> {
    let optional = |field: &str| body.get(field).and_then(Value::as_str).map(str::to_owned);
    Ok(IdentityUser {
        user_id: body.get_str_field("localId")?,
        display_name: optional("displayName").or_else(|| optional("fullName")),
        email: optional("email"),
    })
}

/// Turns `{"error": {"message": "EMAIL_EXISTS"}}` into an error carrying the
/// platform's message.
fn platform_error(body: &Value) -> AppError {
    let message = body
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("identity platform request failed");

    match message {
        "EMAIL_EXISTS" => AppError::conflict("an account with this email already exists"),
        m if m.starts_with("INVALID_EMAIL") => AppError::validation("email address is invalid"),
        m if m.starts_with("WEAK_PASSWORD") => AppError::validation("password is too weak"),
        m => AppError::from(m),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn reads_user_from_sign_in_response() {
        let body = json!({ "localId": "abc", "fullName": "Ada L", "email": "ada@campus.edu" });
        let user = user_from(&body).unwrap();
        assert_eq!(user, IdentityUser {
            user_id: "abc".to_owned(),
            display_name: Some("Ada L".to_owned()),
            email: Some("ada@campus.edu".to_owned()),
        });
        assert!(user_from(&json!({ "email": "x" })).is_err());
    }

    #[test]
    fn maps_platform_errors() {
        let exists = json!({ "error": { "code": 400, "message": "EMAIL_EXISTS" } });
        assert!(matches!(platform_error(&exists), AppError::Conflict(_)));

        let weak = json!({ "error": { "message": "WEAK_PASSWORD : Password should be at least 6 characters" } });
        assert!(matches!(platform_error(&weak), AppError::Validation(_)));

        let other = platform_error(&json!({ "error": { "message": "QUOTA_EXCEEDED" } }));
        assert_eq!(other.to_string(), "QUOTA_EXCEEDED");
    }

    #[test]
    fn sign_up_keeps_the_token_for_cleanup() {
        let body = json!({ "localId": "uid-9", "idToken": "tok", "email": "ada@campus.edu" });
        let signed_up = signed_up_from(&body).unwrap();
        assert_eq!(signed_up.user_id, "uid-9");
        assert_eq!(signed_up.id_token, "tok");

        assert!(signed_up_from(&json!({ "localId": "uid-9" })).is_err());
    }

    #[tokio::test]
    async fn unconfigured_platform_fails_without_calling_out() {
        let identity = Identity::from_json(&json!({})).unwrap();
        let err = identity.sign_up("ada@campus.edu", "secret123").await.unwrap_err();
        assert_eq!(err.to_string(), "identity platform is not configured");
    }
}
