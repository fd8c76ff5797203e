use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use super::core::Database;
use crate::models::{default_modules, ContentModule, DigestConfig};
use crate::TARGET_DB;

/// Configuration values for a new digest. Editing happens between runs,
/// through the external admin collaborator.
#[derive(Debug, Clone)]
pub struct NewDigest {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub target_article_count: usize,
    pub generation_hour: u8,
    pub min_cluster_size: usize,
    pub lookback_hours: i64,
    pub target_language: String,
    pub system_prompt: Option<String>,
    pub article_prompt: Option<String>,
    pub modules: Vec<ContentModule>,
    pub publish_threshold: f64,
    pub is_active: bool,
}

impl Default for NewDigest {
    fn default() -> Self {
        NewDigest {
            name: String::new(),
            description: String::new(),
            tags: Vec::new(),
            target_article_count: 10,
            generation_hour: 6,
            min_cluster_size: 3,
            lookback_hours: 24,
            target_language: "English".to_string(),
            system_prompt: None,
            article_prompt: None,
            modules: default_modules(),
            publish_threshold: 0.7,
            is_active: true,
        }
    }
}

fn decode_err(e: serde_json::Error) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(e))
}

fn digest_from_row(row: &SqliteRow) -> Result<DigestConfig, sqlx::Error> {
    let tags: Vec<String> =
        serde_json::from_str(&row.get::<String, _>("tags")).map_err(decode_err)?;
    let modules: Vec<ContentModule> =
        serde_json::from_str(&row.get::<String, _>("modules")).map_err(decode_err)?;

    Ok(DigestConfig {
        id: row.get("id"),
        name: row.get("name"),
        slug: row.get("slug"),
        description: row.get("description"),
        tags,
        target_article_count: row.get::<i64, _>("target_article_count") as usize,
        generation_hour: row.get::<i64, _>("generation_hour") as u8,
        min_cluster_size: row.get::<i64, _>("min_cluster_size") as usize,
        lookback_hours: row.get("lookback_hours"),
        target_language: row.get("target_language"),
        system_prompt: row.get("system_prompt"),
        article_prompt: row.get("article_prompt"),
        modules,
        publish_threshold: row.get("publish_threshold"),
        is_active: row.get::<i64, _>("is_active") != 0,
        total_tokens: row.get("total_tokens"),
    })
}

impl Database {
    pub async fn insert_digest(&self, new: &NewDigest) -> Result<i64, sqlx::Error> {
        let slug = Uuid::new_v5(
            &Uuid::NAMESPACE_URL,
            format!("{}:{}", new.name, new.target_language).as_bytes(),
        )
        .simple()
        .to_string();
        let now = Utc::now().to_rfc3339();

        let tags = serde_json::to_string(&new.tags).map_err(decode_err)?;
        let modules = serde_json::to_string(&new.modules).map_err(decode_err)?;

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO digests (
                name, slug, description, tags, target_article_count,
                generation_hour, min_cluster_size, lookback_hours,
                target_language, system_prompt, article_prompt, modules,
                publish_threshold, is_active, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)
            RETURNING id
            "#,
        )
        .bind(&new.name)
        .bind(&slug)
        .bind(&new.description)
        .bind(&tags)
        .bind(new.target_article_count as i64)
        .bind(new.generation_hour as i64)
        .bind(new.min_cluster_size as i64)
        .bind(new.lookback_hours)
        .bind(&new.target_language)
        .bind(&new.system_prompt)
        .bind(&new.article_prompt)
        .bind(&modules)
        .bind(new.publish_threshold)
        .bind(new.is_active as i64)
        .bind(&now)
        .fetch_one(self.pool())
        .await?;

        debug!(target: TARGET_DB, "Inserted digest '{}' as id {}", new.name, id);
        Ok(id)
    }

    pub async fn get_digest(&self, id: i64) -> Result<Option<DigestConfig>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM digests WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        row.map(|r| digest_from_row(&r)).transpose()
    }

    /// Active digests whose configured generation hour matches.
    pub async fn active_digests_for_hour(
        &self,
        hour: u8,
    ) -> Result<Vec<DigestConfig>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM digests WHERE is_active = 1 AND generation_hour = ?1 ORDER BY id",
        )
        .bind(hour as i64)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(digest_from_row).collect()
    }

    /// Accumulates token spend onto the digest's lifetime counter.
    pub async fn add_digest_tokens(&self, id: i64, tokens: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE digests SET total_tokens = total_tokens + ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(tokens)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
