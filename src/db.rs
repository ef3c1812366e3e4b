use std::str::FromStr;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use time::{OffsetDateTime, UtcOffset};
use tracing::info;

use crate::include_res;

const SCHEMA: &str = include_res!(str, "/schema.sql");

pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool_options = if database_url.contains(":memory:") {
        // each connection to :memory: is its own database, so keep exactly one alive
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(16)
    };

    let db_pool = pool_options.connect_with(options).await?;

    migrate(&db_pool).await?;
    Ok(db_pool)
}

/// Applies the embedded schema. Every statement is idempotent.
pub async fn migrate(db_pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(db_pool).await?;
    info!("schema applied");
    Ok(())
}

/// UTC text with all nine fractional digits, so `ORDER BY created_at` on the
/// text column is time order. Still RFC 3339, so it decodes as `OffsetDateTime`.
pub fn stamp(at: OffsetDateTime) -> String {
    let at = at.to_offset(UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:09}Z",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second(),
        at.nanosecond(),
    )
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    connect("sqlite::memory:").await.unwrap()
}

#[cfg(test)]
mod tests {
    use time::{macros::datetime, Duration};

    use super::*;

    #[test]
    fn stamps_sort_like_time() {
        let older = datetime!(2026-10-18 12:00:00.100 UTC);
        let newer = older + Duration::milliseconds(50);

        assert_eq!(stamp(older), "2026-10-18T12:00:00.100000000Z");
        assert!(stamp(older) < stamp(newer));
        assert_eq!(stamp(newer.to_offset(time::macros::offset!(+2))), stamp(newer));
    }

    #[tokio::test]
    async fn stamps_decode_back() {
        let db_pool = test_pool().await;
        let at = datetime!(2026-10-18 12:00:00.15 UTC);

        let (decoded,): (OffsetDateTime,) = sqlx::query_as("SELECT ?")
            .bind(stamp(at))
            .fetch_one(&db_pool)
            .await
            .unwrap();
        assert_eq!(decoded, at);
    }

    #[tokio::test]
    async fn migrate_is_repeatable() {
        let db_pool = test_pool().await;
        migrate(&db_pool).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .fetch_all(&db_pool)
            .await
            .unwrap();
        let tables: Vec<_> = tables.into_iter().map(|(name,)| name).collect();
        for table in ["admin_actions", "connection_requests", "connections", "notifications", "profiles"] {
            assert!(tables.iter().any(|t| t == table), "missing {table}");
        }
    }
}
