use serde::Deserialize;
use sqlx::{SqliteConnection, SqlitePool};
use time::OffsetDateTime;
use tracing::info;

use crate::{db, session::SessionContext, AppError, AppResult};

use super::{Profile, Role};

const COLUMNS: &str = "user_id,email,full_name,department,year,bio,avatar_url,role,connections_count,daily_streak,institution_id,created_at";

pub async fn get(db_pool: &SqlitePool, user_id: &str) -> AppResult<Option<Profile>> {
    Ok(
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM profiles WHERE user_id=?"))
            .bind(user_id)
            .fetch_optional(db_pool)
            .await?
    )
}

pub async fn fetch(db_pool: &SqlitePool, user_id: &str) -> AppResult<Profile> {
    get(db_pool, user_id)
        .await?
        .ok_or_else(|| AppError::not_found("profile"))
}

pub async fn all(db_pool: &SqlitePool) -> AppResult<Vec<Profile>> {
    Ok(
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM profiles ORDER BY full_name COLLATE NOCASE, user_id"))
            .fetch_all(db_pool)
            .await?
    )
}

#[derive(Debug, Clone)]
pub struct NewProfile {
    pub user_id: String,
    pub email: Option<String>,
    pub full_name: String,
    pub role: Role,
    pub department: Option<String>,
    pub institution_id: Option<String>,
}

impl NewProfile {
    pub fn student(user_id: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            full_name: full_name.into(),
            role: Role::Student,
            department: None,
            institution_id: None,
        }
    }
}

pub async fn insert(db_pool: &SqlitePool, new: NewProfile) -> AppResult<Profile> {
    let mut conn = db_pool.acquire().await?;
    Ok(insert_with(&mut conn, new).await?)
}

/// Inserts as part of the caller's transaction.
pub async fn insert_with(conn: &mut SqliteConnection, new: NewProfile) -> Result<Profile, sqlx::Error> {
    info!("adding u/{} ({}) as {}", new.user_id, new.full_name, new.role.as_str());
    sqlx::query("INSERT INTO profiles (user_id,email,full_name,role,department,institution_id,created_at) VALUES (?,?,?,?,?,?,?)")
        .bind(&new.user_id)
        .bind(&new.email)
        .bind(&new.full_name)
        .bind(new.role)
        .bind(&new.department)
        .bind(&new.institution_id)
        .bind(db::stamp(OffsetDateTime::now_utc()))
        .execute(&mut *conn)
        .await?;

    sqlx::query_as(&format!("SELECT {COLUMNS} FROM profiles WHERE user_id=?"))
        .bind(&new.user_id)
        .fetch_one(conn)
        .await
}

/// Returns the profile for `user_id`, creating a student profile on first sign in.
/// The flag is true when a profile was created.
pub async fn ensure(db_pool: &SqlitePool, user_id: &str, full_name: &str, email: Option<&str>) -> AppResult<(Profile, bool)> {
    if let Some(profile) = get(db_pool, user_id).await? {
        return Ok((profile, false));
    }

    let full_name = match full_name.trim() {
        "" => "New Student",
        name => name,
    };
    let mut new = NewProfile::student(user_id, full_name);
    new.email = email.map(str::to_owned);

    Ok((insert(db_pool, new).await?, true))
}

/// Changes to a profile. Absent fields stay as they are; a blank string clears
/// an optional text field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfilePatch {
    pub full_name: Option<String>,
    pub department: Option<String>,
    pub year: Option<i64>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub role: Option<Role>,
    pub institution_id: Option<String>,
}

impl ProfilePatch {
    fn touches_privileged_fields(&self) -> bool {
        self.role.is_some() || self.institution_id.is_some()
    }

    pub fn authorize(&self, ctx: &SessionContext, target_id: &str) -> AppResult<()> {
        if ctx.is_authority() {
            return Ok(());
        }
        if ctx.user_id != target_id {
            return Err(AppError::forbidden("only an authority can edit another profile"));
        }
        if self.touches_privileged_fields() {
            return Err(AppError::forbidden("only an authority can change role or institution"));
        }
        Ok(())
    }

    pub fn apply(self, profile: &mut Profile) -> AppResult<()> {
        if let Some(full_name) = self.full_name {
            let full_name = full_name.trim();
            if full_name.is_empty() {
                return Err(AppError::validation("name cannot be empty"));
            }
            profile.full_name = full_name.to_owned();
        }
        if let Some(year) = self.year {
            if !(1..=8).contains(&year) {
                return Err(AppError::validation("year must be between 1 and 8"));
            }
            profile.year = Some(year);
        }
        if let Some(role) = self.role {
            profile.role = role;
        }

        fn set(field: &mut Option<String>, value: Option<String>) {
            if let Some(value) = value {
                let value = value.trim();
                *field = (!value.is_empty()).then(|| value.to_owned());
            }
        }
        set(&mut profile.department, self.department);
        set(&mut profile.bio, self.bio);
        set(&mut profile.avatar_url, self.avatar_url);
        set(&mut profile.institution_id, self.institution_id);

        Ok(())
    }
}

pub async fn update(db_pool: &SqlitePool, ctx: &SessionContext, target_id: &str, patch: ProfilePatch) -> AppResult<Profile> {
    patch.authorize(ctx, target_id)?;

    let mut profile = fetch(db_pool, target_id).await?;
    patch.apply(&mut profile)?;

    sqlx::query("UPDATE profiles SET full_name=?,department=?,year=?,bio=?,avatar_url=?,role=?,institution_id=? WHERE user_id=?")
        .bind(&profile.full_name)
        .bind(&profile.department)
        .bind(profile.year)
        .bind(&profile.bio)
        .bind(&profile.avatar_url)
        .bind(profile.role)
        .bind(&profile.institution_id)
        .bind(&profile.user_id)
        .execute(db_pool)
        .await?;

    info!("u/{} updated profile u/{}", ctx.user_id, target_id);
    Ok(profile)
}

/// Moves `connections_count` by `delta`, never below zero.
pub(crate) async fn adjust_connections_count(conn: &mut SqliteConnection, user_id: &str, delta: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE profiles SET connections_count=MAX(0, connections_count + ?) WHERE user_id=?")
        .bind(delta)
        .bind(user_id)
        .execute(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn ensure_creates_once() {
        let db_pool = test_pool().await;

        let (profile, created) = ensure(&db_pool, "u1", "  Ada Lovelace ", Some("ada@campus.edu")).await.unwrap();
        assert!(created);
        assert_eq!(profile.full_name, "Ada Lovelace");
        assert_eq!(profile.role, Role::Student);
        assert_eq!(profile.connections_count, 0);

        let (again, created) = ensure(&db_pool, "u1", "Someone Else", None).await.unwrap();
        assert!(!created);
        assert_eq!(again, profile);
    }

    #[tokio::test]
    async fn ensure_names_nameless_users() {
        let db_pool = test_pool().await;
        let (profile, _) = ensure(&db_pool, "u2", "   ", None).await.unwrap();
        assert_eq!(profile.full_name, "New Student");
    }

    #[tokio::test]
    async fn counter_never_goes_negative() {
        let db_pool = test_pool().await;
        insert(&db_pool, NewProfile::student("u1", "Ada")).await.unwrap();

        let mut conn = db_pool.acquire().await.unwrap();
        adjust_connections_count(&mut conn, "u1", 1).await.unwrap();
        adjust_connections_count(&mut conn, "u1", -1).await.unwrap();
        adjust_connections_count(&mut conn, "u1", -1).await.unwrap();
        drop(conn);

        assert_eq!(fetch(&db_pool, "u1").await.unwrap().connections_count, 0);
    }

    #[tokio::test]
    async fn owner_updates_display_fields() {
        let db_pool = test_pool().await;
        let owner = insert(&db_pool, NewProfile::student("u1", "Ada")).await.unwrap();
        let ctx = SessionContext::new(owner);

        let patch = ProfilePatch {
            bio: Some("Engines".to_owned()),
            year: Some(2),
            department: Some("  ".to_owned()),
            ..Default::default()
        };
        let updated = update(&db_pool, &ctx, "u1", patch).await.unwrap();
        assert_eq!(updated.bio.as_deref(), Some("Engines"));
        assert_eq!(updated.year, Some(2));
        assert_eq!(updated.department, None);
        assert_eq!(fetch(&db_pool, "u1").await.unwrap(), updated);
    }

    #[rstest]
    #[case::other_profile("u2", ProfilePatch { bio: Some("x".to_owned()), ..Default::default() })]
    #[case::own_role("u1", ProfilePatch { role: Some(Role::Authority), ..Default::default() })]
    #[case::own_institution("u1", ProfilePatch { institution_id: Some("mit".to_owned()), ..Default::default() })]
    #[tokio::test]
    async fn students_cannot_escalate(#[case] target: &str, #[case] patch: ProfilePatch) {
        let db_pool = test_pool().await;
        let student = insert(&db_pool, NewProfile::student("u1", "Ada")).await.unwrap();
        insert(&db_pool, NewProfile::student("u2", "Grace")).await.unwrap();

        let err = update(&db_pool, &SessionContext::new(student), target, patch).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn authority_can_change_roles() {
        let db_pool = test_pool().await;
        let mut admin = NewProfile::student("boss", "Dean");
        admin.role = Role::Authority;
        let admin = insert(&db_pool, admin).await.unwrap();
        insert(&db_pool, NewProfile::student("u1", "Ada")).await.unwrap();

        let patch = ProfilePatch { role: Some(Role::Mentor), institution_id: Some("mit".to_owned()), ..Default::default() };
        let updated = update(&db_pool, &SessionContext::new(admin), "u1", patch).await.unwrap();
        assert_eq!(updated.role, Role::Mentor);
        assert_eq!(updated.institution_id.as_deref(), Some("mit"));
    }

    #[rstest]
    #[case(ProfilePatch { full_name: Some(" ".to_owned()), ..Default::default() })]
    #[case(ProfilePatch { year: Some(0), ..Default::default() })]
    #[case(ProfilePatch { year: Some(9), ..Default::default() })]
    fn rejects_invalid_patches(#[case] patch: ProfilePatch) {
        let mut profile = Profile {
            user_id: "u1".to_owned(),
            email: None,
            full_name: "Ada".to_owned(),
            department: None,
            year: None,
            bio: None,
            avatar_url: None,
            role: Role::Student,
            connections_count: 0,
            daily_streak: 0,
            institution_id: None,
            created_at: OffsetDateTime::UNIX_EPOCH,
        };
        assert!(matches!(patch.apply(&mut profile), Err(AppError::Validation(_))));
    }
}
