use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::db::Database;
use crate::models::{Candidate, DigestConfig};
use crate::TARGET_PIPELINE;

/// Retrieves the candidate articles for a digest's configured tag set
/// within its lookback window, newest first. Candidates are deduplicated
/// by normalized origin link at ingestion time; an empty tag set yields an
/// empty pool.
pub async fn candidates_for_digest(
    db: &Database,
    config: &DigestConfig,
    now: DateTime<Utc>,
) -> Result<Vec<Candidate>, sqlx::Error> {
    if config.tags.is_empty() {
        return Ok(Vec::new());
    }

    let from = now - Duration::hours(config.lookback_hours);
    let window = db.candidates_in_window(from, now).await?;

    let pool: Vec<Candidate> = window
        .into_iter()
        .filter(|candidate| {
            candidate
                .tags
                .iter()
                .any(|tag| config.tags.iter().any(|wanted| wanted == tag))
        })
        .collect();

    debug!(
        target: TARGET_PIPELINE,
        "Pool for digest '{}': {} candidates in the last {}h",
        config.name,
        pool.len(),
        config.lookback_hours
    );
    Ok(pool)
}
