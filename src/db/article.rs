use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use super::core::Database;
use crate::models::{ArticleSection, ArticleStatus, DigestArticle, QualityBreakdown};
use crate::TARGET_DB;

fn decode_err(e: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(e))
}

fn article_from_row(row: &SqliteRow) -> Result<DigestArticle, sqlx::Error> {
    let sections: Vec<ArticleSection> =
        serde_json::from_str(&row.get::<String, _>("sections")).map_err(decode_err)?;
    let keywords: Vec<String> =
        serde_json::from_str(&row.get::<String, _>("keywords")).map_err(decode_err)?;
    let source_links: Vec<String> =
        serde_json::from_str(&row.get::<String, _>("source_links")).map_err(decode_err)?;
    let quality: Option<QualityBreakdown> = row
        .get::<Option<String>, _>("quality")
        .map(|q| serde_json::from_str(&q))
        .transpose()
        .map_err(decode_err)?;
    let run_date = NaiveDate::parse_from_str(&row.get::<String, _>("run_date"), "%Y-%m-%d")
        .map_err(decode_err)?;
    let created_at = DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))
        .map_err(decode_err)?
        .with_timezone(&Utc);
    let status = ArticleStatus::parse(&row.get::<String, _>("status"))
        .unwrap_or(ArticleStatus::Draft);

    Ok(DigestArticle {
        id: row.get("id"),
        digest_id: row.get("digest_id"),
        run_date,
        title: row.get("title"),
        summary: row.get("summary"),
        sections,
        keywords,
        source_links,
        reading_minutes: row.get::<i64, _>("reading_minutes") as u32,
        quality,
        status,
        tokens_used: row.get("tokens_used"),
        created_at,
    })
}

impl Database {
    /// Persists a digest article, returning its new id.
    pub async fn insert_article(&self, article: &DigestArticle) -> Result<i64, sqlx::Error> {
        let sections = serde_json::to_string(&article.sections).map_err(decode_err)?;
        let keywords = serde_json::to_string(&article.keywords).map_err(decode_err)?;
        let source_links =
            serde_json::to_string(&article.source_links).map_err(decode_err)?;
        let quality = article
            .quality
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(decode_err)?;

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO digest_articles (
                digest_id, run_date, title, summary, sections, keywords,
                source_links, reading_minutes, quality, quality_aggregate,
                status, tokens_used, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            RETURNING id
            "#,
        )
        .bind(article.digest_id)
        .bind(article.run_date.format("%Y-%m-%d").to_string())
        .bind(&article.title)
        .bind(&article.summary)
        .bind(&sections)
        .bind(&keywords)
        .bind(&source_links)
        .bind(article.reading_minutes as i64)
        .bind(&quality)
        .bind(article.quality.as_ref().map(|q| q.aggregate))
        .bind(article.status.as_str())
        .bind(article.tokens_used)
        .bind(article.created_at.to_rfc3339())
        .fetch_one(self.pool())
        .await?;

        debug!(
            target: TARGET_DB,
            "Inserted digest article {} ('{}', {})",
            id,
            article.title,
            article.status.as_str()
        );
        Ok(id)
    }

    pub async fn get_article(&self, id: i64) -> Result<Option<DigestArticle>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM digest_articles WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        row.map(|r| article_from_row(&r)).transpose()
    }

    /// Published, non-superseded articles for a digest, newest first.
    pub async fn published_articles(
        &self,
        digest_id: i64,
        limit: i64,
    ) -> Result<Vec<DigestArticle>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM digest_articles
            WHERE digest_id = ?1 AND status = 'published' AND superseded = 0
            ORDER BY run_date DESC, id ASC
            LIMIT ?2
            "#,
        )
        .bind(digest_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(article_from_row).collect()
    }

    /// Titles and keywords of articles published for this digest on earlier
    /// dates within the window, for the cross-day redundancy check. The
    /// current date is excluded so a same-date regeneration is not compared
    /// against the articles it replaces.
    pub async fn recent_published_fingerprints(
        &self,
        digest_id: i64,
        since: NaiveDate,
        before: NaiveDate,
    ) -> Result<Vec<(String, Vec<String>)>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT title, keywords FROM digest_articles
            WHERE digest_id = ?1 AND status = 'published' AND superseded = 0
              AND run_date >= ?2 AND run_date < ?3
            ORDER BY run_date DESC, id ASC
            "#,
        )
        .bind(digest_id)
        .bind(since.format("%Y-%m-%d").to_string())
        .bind(before.format("%Y-%m-%d").to_string())
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let keywords: Vec<String> =
                    serde_json::from_str(&row.get::<String, _>("keywords"))
                        .map_err(decode_err)?;
                Ok((row.get::<String, _>("title"), keywords))
            })
            .collect()
    }

    /// Hides a date's articles ahead of a forced regeneration. The rows are
    /// retained for audit, only excluded from feeds and redundancy checks.
    pub async fn supersede_articles(
        &self,
        digest_id: i64,
        run_date: NaiveDate,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE digest_articles SET superseded = 1
             WHERE digest_id = ?1 AND run_date = ?2 AND superseded = 0",
        )
        .bind(digest_id)
        .bind(run_date.format("%Y-%m-%d").to_string())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Irreversibly deletes articles strictly older than the cutoff date.
    pub async fn delete_articles_before(
        &self,
        cutoff: NaiveDate,
        digest_id: Option<i64>,
    ) -> Result<u64, sqlx::Error> {
        let cutoff = cutoff.format("%Y-%m-%d").to_string();
        let result = match digest_id {
            Some(id) => {
                sqlx::query(
                    "DELETE FROM digest_articles WHERE run_date < ?1 AND digest_id = ?2",
                )
                .bind(&cutoff)
                .bind(id)
                .execute(self.pool())
                .await?
            }
            None => {
                sqlx::query("DELETE FROM digest_articles WHERE run_date < ?1")
                    .bind(&cutoff)
                    .execute(self.pool())
                    .await?
            }
        };

        Ok(result.rows_affected())
    }

    /// Article counts and average quality since a date, for statistics.
    pub async fn article_stats(
        &self,
        digest_id: Option<i64>,
        since: NaiveDate,
    ) -> Result<(i64, i64, f64), sqlx::Error> {
        let since = since.format("%Y-%m-%d").to_string();
        let (filter, bind_digest) = match digest_id {
            Some(_) => (" AND digest_id = ?2", true),
            None => ("", false),
        };

        let sql = format!(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN status = 'published' THEN 1 ELSE 0 END), 0) AS published,
                COALESCE(AVG(quality_aggregate), 0.0) AS avg_quality
            FROM digest_articles
            WHERE run_date >= ?1{}
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
            row.get::<i64, _>("published"),
            row.get::<f64, _>("avg_quality"),
        ))
    }
}
