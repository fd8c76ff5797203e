use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info};

use super::core::Database;
use crate::models::{RunRecord, RunStatus};
use crate::TARGET_DB;

/// Result of attempting to claim today's run for a digest.
#[derive(Debug)]
pub enum RunClaim {
    /// This invocation owns the run and must drive it to a terminal state.
    Claimed { run_id: i64 },
    /// A non-failed run already exists for the date and force was not set.
    AlreadyGenerated { status: RunStatus },
}

fn decode_err(e: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(e))
}

fn run_from_row(row: &SqliteRow) -> Result<RunRecord, sqlx::Error> {
    let run_date = NaiveDate::parse_from_str(&row.get::<String, _>("run_date"), "%Y-%m-%d")
        .map_err(decode_err)?;
    let started_at = DateTime::parse_from_rfc3339(&row.get::<String, _>("started_at"))
        .map_err(decode_err)?
        .with_timezone(&Utc);
    let finished_at = row
        .get::<Option<String>, _>("finished_at")
        .map(|t| DateTime::parse_from_rfc3339(&t).map(|dt| dt.with_timezone(&Utc)))
        .transpose()
        .map_err(decode_err)?;
    let errors: Vec<String> =
        serde_json::from_str(&row.get::<String, _>("errors")).map_err(decode_err)?;
    let status = RunStatus::parse(&row.get::<String, _>("status"))
        .unwrap_or(RunStatus::Failed);

    Ok(RunRecord {
        id: row.get("id"),
        digest_id: row.get("digest_id"),
        run_date,
        status,
        superseded: row.get::<i64, _>("superseded") != 0,
        started_at,
        finished_at,
        clusters_found: row.get("clusters_found"),
        articles_generated: row.get("articles_generated"),
        articles_published: row.get("articles_published"),
        tokens_used: row.get("tokens_used"),
        clustering_method: row.get("clustering_method"),
        errors,
    })
}

impl Database {
    /// Atomically claims the run for (digest, date). The conditional insert
    /// rides on the partial unique index, so concurrent invocations cannot
    /// both claim; there is no read-then-write window. A prior `failed`
    /// run, or a `running` run started before `stale_before`, is retaken
    /// in place.
    pub async fn claim_run(
        &self,
        digest_id: i64,
        run_date: NaiveDate,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<RunClaim, sqlx::Error> {
        let date = run_date.format("%Y-%m-%d").to_string();
        let started = now.to_rfc3339();

        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO run_records (digest_id, run_date, status, started_at)
            VALUES (?1, ?2, 'running', ?3)
            ON CONFLICT (digest_id, run_date) WHERE superseded = 0 DO NOTHING
            RETURNING id
            "#,
        )
        .bind(digest_id)
        .bind(&date)
        .bind(&started)
        .fetch_optional(self.pool())
        .await?;

        if let Some(run_id) = inserted {
            debug!(target: TARGET_DB, "Claimed new run {} for digest {} on {}", run_id, digest_id, date);
            return Ok(RunClaim::Claimed { run_id });
        }

        // A non-superseded record exists. Retake it only if it failed or
        // went stale; the guard is re-checked inside the UPDATE so a
        // concurrent claimer cannot also win.
        let existing = sqlx::query(
            "SELECT id, status FROM run_records
             WHERE digest_id = ?1 AND run_date = ?2 AND superseded = 0",
        )
        .bind(digest_id)
        .bind(&date)
        .fetch_one(self.pool())
        .await?;

        let run_id: i64 = existing.get("id");
        let retaken = sqlx::query(
            r#"
            UPDATE run_records
            SET status = 'running', started_at = ?1, finished_at = NULL,
                clusters_found = 0, articles_generated = 0,
                articles_published = 0, tokens_used = 0,
                clustering_method = NULL, errors = '[]'
            WHERE id = ?2
              AND (status = 'failed' OR (status = 'running' AND started_at < ?3))
            "#,
        )
        .bind(&started)
        .bind(run_id)
        .bind(stale_before.to_rfc3339())
        .execute(self.pool())
        .await?;

        if retaken.rows_affected() == 1 {
            info!(target: TARGET_DB, "Retook failed/stale run {} for digest {} on {}", run_id, digest_id, date);
            return Ok(RunClaim::Claimed { run_id });
        }

        let status = RunStatus::parse(&existing.get::<String, _>("status"))
            .unwrap_or(RunStatus::Running);
        Ok(RunClaim::AlreadyGenerated { status })
    }

    /// Marks any non-superseded run for (digest, date) as superseded ahead
    /// of a forced regeneration. Returns how many records were hidden.
    pub async fn supersede_runs(
        &self,
        digest_id: i64,
        run_date: NaiveDate,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE run_records SET superseded = 1
             WHERE digest_id = ?1 AND run_date = ?2 AND superseded = 0",
        )
        .bind(digest_id)
        .bind(run_date.format("%Y-%m-%d").to_string())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Writes the terminal state and statistics of a finished run.
    #[allow(clippy::too_many_arguments)]
    pub async fn finish_run(
        &self,
        run_id: i64,
        status: RunStatus,
        finished_at: DateTime<Utc>,
        clusters_found: i64,
        articles_generated: i64,
        articles_published: i64,
        tokens_used: i64,
        clustering_method: Option<&str>,
        errors: &[String],
    ) -> Result<(), sqlx::Error> {
        let errors = serde_json::to_string(errors).map_err(decode_err)?;

        sqlx::query(
            r#"
            UPDATE run_records
            SET status = ?1, finished_at = ?2, clusters_found = ?3,
                articles_generated = ?4, articles_published = ?5,
                tokens_used = ?6, clustering_method = ?7, errors = ?8
            WHERE id = ?9
            "#,
        )
        .bind(status.as_str())
        .bind(finished_at.to_rfc3339())
        .bind(clusters_found)
        .bind(articles_generated)
        .bind(articles_published)
        .bind(tokens_used)
        .bind(clustering_method)
        .bind(&errors)
        .bind(run_id)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    pub async fn get_run(&self, run_id: i64) -> Result<Option<RunRecord>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM run_records WHERE id = ?1")
            .bind(run_id)
            .fetch_optional(self.pool())
            .await?;

        row.map(|r| run_from_row(&r)).transpose()
    }

    /// Latest non-superseded run record for a digest, for the status query
    /// surface.
    pub async fn latest_run(&self, digest_id: i64) -> Result<Option<RunRecord>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT * FROM run_records
             WHERE digest_id = ?1 AND superseded = 0
             ORDER BY run_date DESC, id DESC LIMIT 1",
        )
        .bind(digest_id)
        .fetch_optional(self.pool())
        .await?;

        row.map(|r| run_from_row(&r)).transpose()
    }

    pub async fn count_runs(
        &self,
        digest_id: i64,
        run_date: NaiveDate,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM run_records WHERE digest_id = ?1 AND run_date = ?2",
        )
        .bind(digest_id)
        .bind(run_date.format("%Y-%m-%d").to_string())
        .fetch_one(self.pool())
        .await
    }

    /// Run counts and token totals since a date, for statistics.
    pub async fn run_stats(
        &self,
        digest_id: Option<i64>,
        since: NaiveDate,
    ) -> Result<(i64, i64, i64), sqlx::Error> {
        let since = since.format("%Y-%m-%d").to_string();
        let (filter, bind_digest) = match digest_id {
            Some(_) => (" AND digest_id = ?2", true),
            None => ("", false),
        };

        let sql = format!(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN status = 'succeeded' THEN 1 ELSE 0 END), 0) AS succeeded,
                COALESCE(SUM(tokens_used), 0) AS tokens
            FROM run_records
            WHERE run_date >= ?1 AND superseded = 0{}
            "#,
            filter
        );

        let mut query = sqlx::query(&sql).bind(&since);
        if bind_digest {
            query = query.bind(digest_id.unwrap_or_default());
        }
        let row = query.fetch_one(self.pool()).await?;

        Ok((
            row.get::<i64, _>("total"),
            row.get::<i64, _>("succeeded"),
            row.get::<i64, _>("tokens"),
        ))
    }

    /// Irreversibly deletes run records strictly older than the cutoff.
    pub async fn delete_runs_before(
        &self,
        cutoff: NaiveDate,
        digest_id: Option<i64>,
    ) -> Result<u64, sqlx::Error> {
        let cutoff = cutoff.format("%Y-%m-%d").to_string();
        let result = match digest_id {
            Some(id) => {
                sqlx::query("DELETE FROM run_records WHERE run_date < ?1 AND digest_id = ?2")
                    .bind(&cutoff)
                    .bind(id)
                    .execute(self.pool())
                    .await?
            }
            None => {
                sqlx::query("DELETE FROM run_records WHERE run_date < ?1")
                    .bind(&cutoff)
                    .execute(self.pool())
                    .await?
            }
        };

        Ok(result.rows_affected())
    }
}
