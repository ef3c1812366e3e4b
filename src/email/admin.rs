use axum::{debug_handler, extract::State, http::StatusCode, Json};
use rand::{distr::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{SqliteConnection, SqlitePool};
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    db,
    notifications::{self, NewNotification, NotificationFeed, NotificationKind},
    profiles::{store::{self, NewProfile}, Profile, Role},
    session::SessionContext,
    AppError, AppResult, AppState,
};

use super::templates;

const PASSWORD_LEN: usize = 12;

/// An authority creating an account on someone's behalf.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionRequest {
    pub email: String,
    pub full_name: String,
    pub role: Role,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub institution_id: Option<String>,
}

impl ProvisionRequest {
    fn validated(self) -> AppResult<Self> {
        let email = self.email.trim().to_lowercase();
        let valid_email = match email.split_once('@') {
            Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.'),
            None => false,
        };
        if !valid_email {
            return Err(AppError::validation("a valid email is required"));
        }

        let full_name = self.full_name.trim().to_owned();
        if full_name.is_empty() {
            return Err(AppError::validation("full name is required"));
        }

        let blank_to_none = |v: Option<String>| v.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
        Ok(Self {
            email,
            full_name,
            role: self.role,
            department: blank_to_none(self.department),
            institution_id: blank_to_none(self.institution_id),
        })
    }
}

#[derive(Serialize)]
pub(crate) struct Provisioned {
    profile: Profile,
    email_sent: bool,
}

pub fn temporary_password() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(PASSWORD_LEN)
        .map(char::from)
        .collect()
}

/// Appends to the audit trail of administrator actions.
pub async fn log_action(conn: &mut SqliteConnection, actor_id: &str, action: &str, target_id: Option<&str>, details: Value) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO admin_actions (id,actor_id,action,target_id,details,created_at) VALUES (?,?,?,?,?,?)")
        .bind(Uuid::now_v7().to_string())
        .bind(actor_id)
        .bind(action)
        .bind(target_id)
        .bind(details.to_string())
        .bind(db::stamp(OffsetDateTime::now_utc()))
        .execute(conn)
        .await?;
    Ok(())
}

/// Records a freshly created identity as a profile, audits it and greets the
/// new user in their feed. All three rows land together or not at all.
pub async fn provision(
    db_pool: &SqlitePool,
    feed: &NotificationFeed,
    ctx: &SessionContext,
    user_id: String,
    request: &ProvisionRequest,
) -> AppResult<Profile> {
    let mut tx = db_pool.begin().await?;

    let profile = store::insert_with(&mut tx, NewProfile {
        user_id,
        email: Some(request.email.clone()),
        full_name: request.full_name.clone(),
        role: request.role,
        department: request.department.clone(),
        institution_id: request.institution_id.clone(),
    }).await?;

    log_action(
        &mut tx,
        &ctx.user_id,
        "create_user",
        Some(&profile.user_id),
        json!({ "email": request.email, "role": request.role }),
    ).await?;

    notifications::store::insert(&mut tx, NewNotification {
        user_id: profile.user_id.clone(),
        kind: NotificationKind::AccountProvisioned,
        title: "Welcome aboard".to_owned(),
        description: format!("{} created your {} account", ctx.profile.full_name, request.role.as_str()),
        action_type: None,
        action_id: None,
    }).await?;

    tx.commit().await?;
    feed.publish(&profile.user_id);

    info!("u/{} provisioned u/{} as {}", ctx.user_id, profile.user_id, request.role.as_str());
    Ok(profile)
}

#[debug_handler(state = AppState)]
pub(crate) async fn create_user(
    ctx: SessionContext,
    State(state): State<AppState>,
    Json(request): Json<ProvisionRequest>,
) -> AppResult<(StatusCode, Json<Provisioned>)> {
    ctx.require_authority()?;
    let request = request.validated()?;
    let _busy = state.in_flight.acquire(&ctx.user_id, "create_user", &request.email)?;

    let password = temporary_password();
    let signed_up = state.identity.sign_up(&request.email, &password).await?;
    let profile = match provision(&state.db_pool, &state.feed, &ctx, signed_up.user_id.clone(), &request).await {
        Ok(profile) => profile,
        Err(e) => {
            // drop the identity account too, so retrying with the same email works
            if let Err(cleanup) = state.identity.delete_account(&signed_up).await {
                warn!("could not delete identity account u/{} after failed provisioning: {cleanup}", signed_up.user_id);
            }
            return Err(e);
        }
    };
    state.directory.invalidate().await;

    let email = templates::credentials_email(
        &profile.full_name,
        &request.email,
        profile.role,
        &password,
        &format!("{}/login", state.config.public_url),
    );
    // the account exists either way, the authority can hand the credentials over manually
    let email_sent = match state.mailer.send(&request.email, &email).await {
        Ok(()) => state.mailer.is_live(),
        Err(e) => {
            warn!("credentials email to {} failed: {e}", request.email);
            false
        }
    };

    Ok((StatusCode::CREATED, Json(Provisioned { profile, email_sent })))
}
