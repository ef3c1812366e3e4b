use sqlx::{SqliteConnection, SqlitePool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{db, AppError, AppResult};

use super::{Notification, NotificationKind, CONNECTION_REQUEST_ACTION};

const COLUMNS: &str = "id,user_id,kind,title,description,created_at,read,action_type,action_id";

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub description: String,
    pub action_type: Option<&'static str>,
    pub action_id: Option<String>,
}

/// Writes a notification as part of the caller's transaction. Publishing the
/// change to subscribers is up to the caller, once the transaction commits.
pub async fn insert(conn: &mut SqliteConnection, new: NewNotification) -> Result<Notification, sqlx::Error> {
    insert_at(conn, new, OffsetDateTime::now_utc()).await
}

async fn insert_at(conn: &mut SqliteConnection, new: NewNotification, created_at: OffsetDateTime) -> Result<Notification, sqlx::Error> {
    let notification = Notification {
        id: Uuid::now_v7().to_string(),
        user_id: new.user_id,
        kind: new.kind,
        title: new.title,
        description: new.description,
        created_at,
        read: false,
        action_type: new.action_type.map(str::to_owned),
        action_id: new.action_id,
    };

    sqlx::query("INSERT INTO notifications (id,user_id,kind,title,description,created_at,read,action_type,action_id) VALUES (?,?,?,?,?,?,0,?,?)")
        .bind(&notification.id)
        .bind(&notification.user_id)
        .bind(notification.kind)
        .bind(&notification.title)
        .bind(&notification.description)
        .bind(db::stamp(notification.created_at))
        .bind(&notification.action_type)
        .bind(&notification.action_id)
        .execute(conn)
        .await?;

    Ok(notification)
}

/// Newest first, at most `limit`.
pub async fn recent(db_pool: &SqlitePool, user_id: &str, limit: i64) -> AppResult<Vec<Notification>> {
    Ok(
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM notifications WHERE user_id=? ORDER BY created_at DESC, id DESC LIMIT ?"))
            .bind(user_id)
            .bind(limit)
            .fetch_all(db_pool)
            .await?
    )
}

/// A notification owned by `user_id`. Someone else's notification is reported
/// as missing.
pub async fn get(db_pool: &SqlitePool, user_id: &str, id: &str) -> AppResult<Notification> {
    sqlx::query_as(&format!("SELECT {COLUMNS} FROM notifications WHERE id=? AND user_id=?"))
        .bind(id)
        .bind(user_id)
        .fetch_optional(db_pool)
        .await?
        .ok_or_else(|| AppError::not_found("notification"))
}

pub async fn unread_count(db_pool: &SqlitePool, user_id: &str) -> AppResult<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notifications WHERE user_id=? AND read=0")
        .bind(user_id)
        .fetch_one(db_pool)
        .await?;
    Ok(count)
}

/// unread -> read. Marking an already read notification again is a no-op.
pub async fn mark_read(db_pool: &SqlitePool, user_id: &str, id: &str) -> AppResult<()> {
    let result = sqlx::query("UPDATE notifications SET read=1 WHERE id=? AND user_id=?")
        .bind(id)
        .bind(user_id)
        .execute(db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("notification"));
    }
    Ok(())
}

pub async fn mark_all_read(db_pool: &SqlitePool, user_id: &str) -> AppResult<u64> {
    let result = sqlx::query("UPDATE notifications SET read=1 WHERE user_id=? AND read=0")
        .bind(user_id)
        .execute(db_pool)
        .await?;
    Ok(result.rows_affected())
}

/// Marks every notification pointing at `request_id` read, once the request has been answered or withdrawn.
pub(crate) async fn mark_request_handled(conn: &mut SqliteConnection, request_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE notifications SET read=1 WHERE action_type=? AND action_id=?")
        .bind(CONNECTION_REQUEST_ACTION)
        .bind(request_id)
        .execute(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use time::{macros::datetime, Duration};

    use super::*;
    use crate::{
        db::test_pool,
        profiles::store::{insert as insert_profile, NewProfile},
    };

    fn note(user_id: &str, title: &str) -> NewNotification {
        NewNotification {
            user_id: user_id.to_owned(),
            kind: NotificationKind::AccountProvisioned,
            title: title.to_owned(),
            description: String::new(),
            action_type: None,
            action_id: None,
        }
    }

    async fn pool_with_users() -> SqlitePool {
        let db_pool = test_pool().await;
        insert_profile(&db_pool, NewProfile::student("u1", "Ada")).await.unwrap();
        insert_profile(&db_pool, NewProfile::student("u2", "Grace")).await.unwrap();
        db_pool
    }

    #[tokio::test]
    async fn mark_read_is_idempotent() {
        let db_pool = pool_with_users().await;
        let mut conn = db_pool.acquire().await.unwrap();
        let n = insert(&mut conn, note("u1", "hello")).await.unwrap();
        drop(conn);

        assert_eq!(unread_count(&db_pool, "u1").await.unwrap(), 1);
        mark_read(&db_pool, "u1", &n.id).await.unwrap();
        mark_read(&db_pool, "u1", &n.id).await.unwrap();

        assert!(get(&db_pool, "u1", &n.id).await.unwrap().read);
        assert_eq!(unread_count(&db_pool, "u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn foreign_notifications_are_not_found() {
        let db_pool = pool_with_users().await;
        let mut conn = db_pool.acquire().await.unwrap();
        let n = insert(&mut conn, note("u1", "hello")).await.unwrap();
        drop(conn);

        assert!(matches!(mark_read(&db_pool, "u2", &n.id).await, Err(AppError::NotFound(_))));
        assert!(matches!(get(&db_pool, "u2", &n.id).await, Err(AppError::NotFound(_))));
        assert!(!get(&db_pool, "u1", &n.id).await.unwrap().read);
    }

    #[tokio::test]
    async fn recent_is_newest_first_and_capped() {
        let db_pool = pool_with_users().await;
        let start = OffsetDateTime::now_utc() - Duration::hours(1);
        for i in 0..55 {
            sqlx::query("INSERT INTO notifications (id,user_id,kind,title,description,created_at) VALUES (?,?,?,?,?,?)")
                .bind(format!("n{i:02}"))
                .bind("u1")
                .bind(NotificationKind::AccountProvisioned)
                .bind(format!("#{i}"))
                .bind("")
                .bind(db::stamp(start + Duration::seconds(i)))
                .execute(&db_pool)
                .await
                .unwrap();
        }
        let mut conn = db_pool.acquire().await.unwrap();
        insert(&mut conn, note("u2", "not yours")).await.unwrap();
        drop(conn);

        let page = recent(&db_pool, "u1", 50).await.unwrap();
        assert_eq!(page.len(), 50);
        assert_eq!(page[0].title, "#54");
        assert_eq!(page[49].title, "#5");
        assert!(page.iter().all(|n| n.user_id == "u1"));
    }

    #[tokio::test]
    async fn sub_second_order_survives_text_sorting() {
        let db_pool = pool_with_users().await;
        let older = datetime!(2026-10-18 12:00:00.100 UTC);
        let newer = datetime!(2026-10-18 12:00:00.150 UTC);

        // inserted newest first so the id tie-break cannot rescue a bad sort
        let mut conn = db_pool.acquire().await.unwrap();
        insert_at(&mut conn, note("u1", "newer"), newer).await.unwrap();
        insert_at(&mut conn, note("u1", "older"), older).await.unwrap();
        drop(conn);

        let page = recent(&db_pool, "u1", 50).await.unwrap();
        let titles: Vec<_> = page.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, ["newer", "older"]);
        assert_eq!(page[1].created_at, older);
    }

    #[tokio::test]
    async fn mark_all_read_counts_changes() {
        let db_pool = pool_with_users().await;
        let mut conn = db_pool.acquire().await.unwrap();
        insert(&mut conn, note("u1", "a")).await.unwrap();
        insert(&mut conn, note("u1", "b")).await.unwrap();
        drop(conn);

        assert_eq!(mark_all_read(&db_pool, "u1").await.unwrap(), 2);
        assert_eq!(mark_all_read(&db_pool, "u1").await.unwrap(), 0);
    }
}
