use anyhow::{Context, Result};
use directories::ProjectDirs;
use futures::future::BoxFuture;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::path::{Path, PathBuf};

use crate::metrics::Tally;
use crate::sink::{MetricsRecord, MetricsSink};

const SQLITE_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS metrics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
        keypresses INTEGER,
        mouse_clicks INTEGER,
        mouse_distance_in REAL,
        mouse_distance_mi REAL,
        scroll_steps INTEGER
    );
"#;

const POSTGRES_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS metrics (
        id BIGSERIAL PRIMARY KEY,
        timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        keypresses BIGINT NOT NULL,
        mouse_clicks BIGINT NOT NULL,
        mouse_distance_in DOUBLE PRECISION NOT NULL,
        mouse_distance_mi DOUBLE PRECISION NOT NULL,
        scroll_steps BIGINT NOT NULL
    );
"#;

const TOTALS_QUERY: &str = r#"
    SELECT
        CAST(COALESCE(SUM(keypresses), 0) AS BIGINT) AS keypresses,
        CAST(COALESCE(SUM(mouse_clicks), 0) AS BIGINT) AS mouse_clicks,
        CAST(COALESCE(SUM(mouse_distance_in), 0) AS DOUBLE PRECISION) AS mouse_distance_in,
        CAST(COALESCE(SUM(scroll_steps), 0) AS BIGINT) AS scroll_steps
    FROM metrics
"#;

#[derive(sqlx::FromRow)]
struct TotalsRow {
    keypresses: i64,
    mouse_clicks: i64,
    mouse_distance_in: f64,
    scroll_steps: i64,
}

impl From<TotalsRow> for Tally {
    fn from(row: TotalsRow) -> Self {
        Tally {
            keypresses: row.keypresses.max(0) as u64,
            mouse_clicks: row.mouse_clicks.max(0) as u64,
            mouse_distance_in: row.mouse_distance_in,
            scroll_steps: row.scroll_steps.max(0) as u64,
        }
    }
}

/// Local store, the default sink.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new() -> Result<Self> {
        let db_path = get_database_path()?;
        Self::open(&db_path).await
    }

    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = initialize_database(db_path).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn insert_metrics(&self, record: &MetricsRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO metrics
            (timestamp, keypresses, mouse_clicks, mouse_distance_in, mouse_distance_mi, scroll_steps)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.timestamp)
        .bind(record.keypresses)
        .bind(record.mouse_clicks)
        .bind(record.mouse_distance_in)
        .bind(record.mouse_distance_mi)
        .bind(record.scroll_steps)
        .execute(self.pool())
        .await
        .context("Failed to insert metrics")?;

        Ok(())
    }

    pub async fn get_total_metrics(&self) -> Result<Tally> {
        let row: TotalsRow = sqlx::query_as(TOTALS_QUERY)
            .fetch_one(self.pool())
            .await
            .context("Failed to load total metrics")?;
        Ok(row.into())
    }
}

impl MetricsSink for Database {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn flush<'a>(&'a self, record: &'a MetricsRecord) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.insert_metrics(record))
    }

    fn load_totals(&self) -> BoxFuture<'_, Result<Option<Tally>>> {
        Box::pin(async move { self.get_total_metrics().await.map(Some) })
    }
}

pub fn get_database_path() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "input-tally", "input-tally")
        .context("Failed to get project directories")?;

    let data_dir = proj_dirs.data_dir();
    std::fs::create_dir_all(data_dir)?;

    Ok(data_dir.join("input-tally.db"))
}

async fn initialize_database(db_path: &Path) -> Result<SqlitePool> {
    if let Some(dir) = db_path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options)
        .await
        .context("Failed to connect to database")?;
    log::info!("Using sqlite database at {}", db_path.display());

    sqlx::query(SQLITE_SCHEMA)
        .execute(&pool)
        .await
        .context("Failed to create metrics table")?;

    Ok(pool)
}

/// Remote PostgreSQL store.
pub struct PostgresDatabase {
    pool: PgPool,
}

impl PostgresDatabase {
    pub async fn connect(url: &str) -> Result<Self> {
        log::info!("Connecting to postgres instance...");
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(url)
            .await
            .context("Failed to connect to postgres")?;

        sqlx::query(POSTGRES_SCHEMA)
            .execute(&pool)
            .await
            .context("Failed to create metrics table")?;

        Ok(Self { pool })
    }

    pub async fn insert_metrics(&self, record: &MetricsRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO metrics
            (timestamp, keypresses, mouse_clicks, mouse_distance_in, mouse_distance_mi, scroll_steps)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.timestamp)
        .bind(record.keypresses)
        .bind(record.mouse_clicks)
        .bind(record.mouse_distance_in)
        .bind(record.mouse_distance_mi)
        .bind(record.scroll_steps)
        .execute(&self.pool)
        .await
        .context("Failed to insert metrics")?;

        Ok(())
    }

    pub async fn get_total_metrics(&self) -> Result<Tally> {
        let row: TotalsRow = sqlx::query_as(TOTALS_QUERY)
            .fetch_one(&self.pool)
            .await
            .context("Failed to load total metrics")?;
        Ok(row.into())
    }
}

impl MetricsSink for PostgresDatabase {
    fn name(&self) -> &str {
        "postgres"
    }

    fn flush<'a>(&'a self, record: &'a MetricsRecord) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.insert_metrics(record))
    }

    fn load_totals(&self) -> BoxFuture<'_, Result<Option<Tally>>> {
        Box::pin(async move { self.get_total_metrics().await.map(Some) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(keypresses: i64, distance: f64) -> MetricsRecord {
        MetricsRecord {
            keypresses,
            mouse_clicks: 1,
            mouse_distance_in: distance,
            mouse_distance_mi: distance / 63360.0,
            scroll_steps: 4,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn sqlite_sink_persists_and_aggregates() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("nested").join("metrics.db"))
            .await
            .unwrap();

        assert_eq!(db.get_total_metrics().await.unwrap(), Tally::default());

        db.flush(&record(10, 1.5)).await.unwrap();
        db.flush(&record(5, 2.5)).await.unwrap();

        let totals = db.load_totals().await.unwrap().unwrap();
        assert_eq!(totals.keypresses, 15);
        assert_eq!(totals.mouse_clicks, 2);
        assert_eq!(totals.scroll_steps, 8);
        assert!((totals.mouse_distance_in - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn reopening_keeps_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.db");

        {
            let db = Database::open(&path).await.unwrap();
            db.flush(&record(3, 0.0)).await.unwrap();
            db.pool().close().await;
        }

        let db = Database::open(&path).await.unwrap();
        assert_eq!(db.get_total_metrics().await.unwrap().keypresses, 3);
    }
}
