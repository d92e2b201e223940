//! Durable snapshot storage in SQLite.

use crate::sync::UserSnapshot;
use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tap_core::UserId;
use tracing::debug;

const UPSERT_SQL: &str = "\
INSERT INTO users (telegram_id, points, energy, level, profit_per_hour, raw_state, last_db_sync)
VALUES (?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
ON CONFLICT(telegram_id) DO UPDATE SET
    points = excluded.points,
    energy = excluded.energy,
    level = excluded.level,
    profit_per_hour = excluded.profit_per_hour,
    raw_state = excluded.raw_state,
    last_db_sync = CURRENT_TIMESTAMP";

/// Open (creating if needed) the database at `url` and apply migrations.
pub async fn init_db(url: &str) -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str(url)
        .with_context(|| format!("invalid sqlite url {url}"))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(opts)
        .await
        .with_context(|| format!("connecting to {url}"))?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Private in-memory database on a single pinned connection.
pub async fn init_memory_db() -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await?;
    migrate(&pool).await?;
    Ok(pool)
}

async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("running migrations")?;
    Ok(())
}

/// Row as last flushed to durable storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredUser {
    pub user_id: UserId,
    pub points: i64,
    pub energy: i64,
    pub level: i64,
    pub profit_per_hour: i64,
    pub raw_state: String,
}

fn to_sql_int(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

/// Upserts full user snapshots into the `users` table.
#[derive(Clone, Debug)]
pub struct SqliteSink {
    pool: SqlitePool,
}

impl SqliteSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Write a batch in one transaction; later snapshots overwrite earlier rows.
    pub async fn upsert(&self, batch: &[UserSnapshot]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.context("begin upsert")?;
        for snap in batch {
            sqlx::query(UPSERT_SQL)
                .bind(snap.user_id.0)
                .bind(to_sql_int(snap.points))
                .bind(to_sql_int(snap.energy))
                .bind(i64::from(snap.level))
                .bind(to_sql_int(snap.profit_per_hour))
                .bind(snap.raw_state.to_string())
                .execute(&mut *tx)
                .await
                .with_context(|| format!("upserting user {}", snap.user_id))?;
        }
        tx.commit().await.context("commit upsert")?;
        debug!(rows = batch.len(), "snapshots upserted");
        Ok(())
    }

    pub async fn fetch(&self, id: UserId) -> Result<Option<StoredUser>> {
        let row = sqlx::query(
            "SELECT points, energy, level, profit_per_hour, raw_state FROM users WHERE telegram_id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| -> Result<StoredUser> {
            Ok(StoredUser {
                user_id: id,
                points: r.try_get("points")?,
                energy: r.try_get("energy")?,
                level: r.try_get("level")?,
                profit_per_hour: r.try_get("profit_per_hour")?,
                raw_state: r.try_get("raw_state")?,
            })
        })
        .transpose()
    }

    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}
