use axum::{extract::FromRequestParts, http::request::Parts};
use sqlx::SqlitePool;
use tower_sessions::Session;
use tracing::info;

use crate::{
    profiles::{store, Profile, ProfileDirectory, Role},
    AppError, AppResult, AppState,
};

pub const USER_ID: &str = "user_id";
pub const CSRF_STATE: &str = "csrf_state";
pub const PKCE_VERIFIER: &str = "pkce_verifier";
pub const RETURN_URL: &str = "return_url";

/// Who is acting. Built once per request from the cookie session and handed
/// to every operation explicitly.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user_id: String,
    pub profile: Profile,
}

impl SessionContext {
    pub fn new(profile: Profile) -> Self {
        Self {
            user_id: profile.user_id.clone(),
            profile,
        }
    }

    /// Starts a session for a user the identity platform just vouched for,
    /// provisioning their profile on first sign in.
    pub async fn begin(
        session: &Session,
        db_pool: &SqlitePool,
        directory: &ProfileDirectory,
        user_id: &str,
        display_name: &str,
        email: Option<&str>,
    ) -> AppResult<Self> {
        let (profile, created) = store::ensure(db_pool, user_id, display_name, email).await?;
        if created {
            directory.invalidate().await;
        }

        session.cycle_id().await?;
        session.insert(USER_ID, user_id).await?;
        info!("welcome u/{user_id}");

        Ok(Self::new(profile))
    }

    pub async fn end(session: &Session) -> AppResult<()> {
        if let Some(user_id) = session.get::<String>(USER_ID).await? {
            info!("goodbye u/{user_id}");
        }
        session.flush().await?;
        Ok(())
    }

    pub fn is_authority(&self) -> bool {
        self.profile.role == Role::Authority
    }

    pub fn require_authority(&self) -> AppResult<()> {
        if self.is_authority() {
            Ok(())
        } else {
            Err(AppError::forbidden("authority role required"))
        }
    }
}

impl FromRequestParts<AppState> for SessionContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|(_, msg)| AppError::from(msg))?;

        let Some(user_id) = session.get::<String>(USER_ID).await? else {
            return Err(AppError::Unauthenticated);
        };

        let Some(profile) = store::get(&state.db_pool, &user_id).await? else {
            // the profile behind this session is gone
            session.flush().await?;
            return Err(AppError::Unauthenticated);
        };

        Ok(Self { user_id, profile })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::Request;
    use tower_sessions::MemoryStore;

    use super::*;
    use crate::{db::test_pool, profiles::store::NewProfile};

    /// Request parts as they look behind the session layer.
    fn parts_with(session: &Session) -> Parts {
        let (mut parts, ()) = Request::new(()).into_parts();
        parts.extensions.insert(session.clone());
        parts
    }

    fn new_session() -> Session {
        Session::new(None, Arc::new(MemoryStore::default()), None)
    }

    #[tokio::test]
    async fn anonymous_request_is_unauthenticated() {
        let state = AppState::for_tests().await;
        let mut parts = parts_with(&new_session());

        let ctx = SessionContext::from_request_parts(&mut parts, &state).await;
        assert!(matches!(ctx, Err(AppError::Unauthenticated)));
    }

    #[tokio::test]
    async fn signed_in_request_carries_profile() {
        let state = AppState::for_tests().await;
        store::insert(&state.db_pool, NewProfile::student("u1", "Ada")).await.unwrap();
        let session = new_session();
        session.insert(USER_ID, "u1").await.unwrap();

        let ctx = SessionContext::from_request_parts(&mut parts_with(&session), &state).await.unwrap();
        assert_eq!(ctx.user_id, "u1");
        assert_eq!(ctx.profile.full_name, "Ada");
    }

    #[tokio::test]
    async fn vanished_profile_ends_the_session() {
        let state = AppState::for_tests().await;
        let session = new_session();
        session.insert(USER_ID, "ghost").await.unwrap();

        let ctx = SessionContext::from_request_parts(&mut parts_with(&session), &state).await;
        assert!(matches!(ctx, Err(AppError::Unauthenticated)));
        assert!(session.get::<String>(USER_ID).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sign_in_then_sign_out() {
        let db_pool = test_pool().await;
        let directory = ProfileDirectory::default();
        let session = Session::new(None, Arc::new(MemoryStore::default()), None);

        let ctx = SessionContext::begin(&session, &db_pool, &directory, "u1", "Ada", Some("ada@campus.edu"))
            .await
            .unwrap();
        assert_eq!(ctx.user_id, "u1");
        assert_eq!(ctx.profile.email.as_deref(), Some("ada@campus.edu"));
        assert!(!ctx.is_authority());
        assert!(matches!(ctx.require_authority(), Err(AppError::Forbidden(_))));
        assert_eq!(session.get::<String>(USER_ID).await.unwrap().as_deref(), Some("u1"));

        SessionContext::end(&session).await.unwrap();
        assert!(session.get::<String>(USER_ID).await.unwrap().is_none());
    }
}
