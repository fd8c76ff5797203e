use tracing::info;

use super::core::Database;
use crate::TARGET_DB;

impl Database {
    pub async fn initialize_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS digests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                tags TEXT NOT NULL DEFAULT '[]',
                target_article_count INTEGER NOT NULL DEFAULT 10,
                generation_hour INTEGER NOT NULL DEFAULT 6,
                min_cluster_size INTEGER NOT NULL DEFAULT 3,
                lookback_hours INTEGER NOT NULL DEFAULT 24,
                target_language TEXT NOT NULL DEFAULT 'English',
                system_prompt TEXT,
                article_prompt TEXT,
                modules TEXT NOT NULL DEFAULT '[]',
                publish_threshold REAL NOT NULL DEFAULT 0.7,
                is_active INTEGER NOT NULL DEFAULT 1,
                total_tokens INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(self.pool())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candidates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                body TEXT NOT NULL DEFAULT '',
                published_at TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                link TEXT NOT NULL,
                normalized_link TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(self.pool())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_candidates_published
             ON candidates (published_at)",
        )
        .execute(self.pool())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS digest_articles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                digest_id INTEGER NOT NULL REFERENCES digests (id),
                run_date TEXT NOT NULL,
                title TEXT NOT NULL,
                summary TEXT NOT NULL DEFAULT '',
                sections TEXT NOT NULL DEFAULT '[]',
                keywords TEXT NOT NULL DEFAULT '[]',
                source_links TEXT NOT NULL DEFAULT '[]',
                reading_minutes INTEGER NOT NULL DEFAULT 0,
                quality TEXT,
                quality_aggregate REAL,
                status TEXT NOT NULL DEFAULT 'draft',
                superseded INTEGER NOT NULL DEFAULT 0,
                tokens_used INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(self.pool())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_digest_articles_digest_date
             ON digest_articles (digest_id, run_date)",
        )
        .execute(self.pool())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS run_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                digest_id INTEGER NOT NULL REFERENCES digests (id),
                run_date TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                superseded INTEGER NOT NULL DEFAULT 0,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                clusters_found INTEGER NOT NULL DEFAULT 0,
                articles_generated INTEGER NOT NULL DEFAULT 0,
                articles_published INTEGER NOT NULL DEFAULT 0,
                tokens_used INTEGER NOT NULL DEFAULT 0,
                clustering_method TEXT,
                errors TEXT NOT NULL DEFAULT '[]'
            )
            "#,
        )
        .execute(self.pool())
        .await?;

        // Upholds the once-per-day invariant at the persistence layer: at
        // most one non-superseded run record per (digest, date).
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_run_records_active
             ON run_records (digest_id, run_date) WHERE superseded = 0",
        )
        .execute(self.pool())
        .await?;

        info!(target: TARGET_DB, "Database schema initialized");
        Ok(())
    }
}
