mod directory;
mod page;
pub mod store;

use axum::{routing::get, Router};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::AppState;

pub use directory::{partition, Directory, DirectoryEntry, ProfileDirectory, RoleGroup};
pub use store::ProfilePatch;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(page::directory))
        .route("/me", get(page::me))
        .route("/{user_id}", get(page::profile).patch(page::update))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Role {
    Student,
    Mentor,
    Teacher,
    Authority,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Student, Role::Mentor, Role::Teacher, Role::Authority];

    pub fn as_str(&self) -> &'static str {
        use Role::*;
        match self {
            Student => "student",
            Mentor => "mentor",
            Teacher => "teacher",
            Authority => "authority",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Profile {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub full_name: String,
    pub department: Option<String>,
    pub year: Option<i64>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub role: Role,
    pub connections_count: i64,
    pub daily_streak: i64,
    pub institution_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// The part of a profile shown next to requests, notifications and search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub user_id: String,
    pub full_name: String,
    pub department: Option<String>,
    pub year: Option<i64>,
    pub avatar_url: Option<String>,
    pub role: Role,
}

impl From<&Profile> for ProfileSummary {
    fn from(profile: &Profile) -> Self {
        Self {
            user_id: profile.user_id.clone(),
            full_name: profile.full_name.clone(),
            department: profile.department.clone(),
            year: profile.year,
            avatar_url: profile.avatar_url.clone(),
            role: profile.role,
        }
    }
}
