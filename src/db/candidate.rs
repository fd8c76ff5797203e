use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;
use url::Url;
use urlnorm::UrlNormalizer;

use super::core::Database;
use crate::models::Candidate;
use crate::TARGET_DB;

/// A source article handed over by the feed-fetching collaborator.
#[derive(Debug, Clone)]
pub struct NewCandidate {
    pub title: String,
    pub body: String,
    pub published_at: DateTime<Utc>,
    pub tags: Vec<String>,
    pub link: String,
}

fn decode_err(e: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(e))
}

pub(crate) fn candidate_from_row(row: &SqliteRow) -> Result<Candidate, sqlx::Error> {
    let tags: Vec<String> =
        serde_json::from_str(&row.get::<String, _>("tags")).map_err(decode_err)?;
    let published_at = DateTime::parse_from_rfc3339(&row.get::<String, _>("published_at"))
        .map_err(decode_err)?
        .with_timezone(&Utc);

    Ok(Candidate {
        id: row.get("id"),
        title: row.get("title"),
        body: row.get("body"),
        published_at,
        tags,
        link: row.get("link"),
    })
}

impl Database {
    /// Inserts a candidate, deduplicated by normalized origin link. Returns
    /// the new row id, or `None` when the link was already known.
    pub async fn insert_candidate(
        &self,
        new: &NewCandidate,
    ) -> Result<Option<i64>, sqlx::Error> {
        let parsed_url = Url::parse(&new.link).map_err(decode_err)?;
        let normalizer = UrlNormalizer::default();
        let normalized_link = normalizer.compute_normalization_string(&parsed_url);

        let tags = serde_json::to_string(&new.tags).map_err(decode_err)?;

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO candidates (title, body, published_at, tags, link, normalized_link)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (normalized_link) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&new.title)
        .bind(&new.body)
        .bind(new.published_at.to_rfc3339())
        .bind(&tags)
        .bind(&new.link)
        .bind(&normalized_link)
        .fetch_optional(self.pool())
        .await?;

        if id.is_none() {
            debug!(target: TARGET_DB, "Skipping already seen candidate: {}", new.link);
        }
        Ok(id)
    }

    /// All candidates published within the window, newest first. Tag
    /// filtering happens in the pool accessor, since tags are stored as
    /// JSON arrays.
    pub async fn candidates_in_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candidate>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM candidates
            WHERE published_at >= ?1 AND published_at <= ?2
            ORDER BY published_at DESC, id ASC
            "#,
        )
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(candidate_from_row).collect()
    }
}
