use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of one generation attempt for a (digest, date) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    PartiallyFailed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::PartiallyFailed => "partially_failed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(RunStatus::Pending),
            "running" => Some(RunStatus::Running),
            "succeeded" => Some(RunStatus::Succeeded),
            "partially_failed" => Some(RunStatus::PartiallyFailed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    Draft,
    Published,
    Failed,
}

impl ArticleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleStatus::Draft => "draft",
            ArticleStatus::Published => "published",
            ArticleStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(ArticleStatus::Draft),
            "published" => Some(ArticleStatus::Published),
            "failed" => Some(ArticleStatus::Failed),
            _ => None,
        }
    }
}

/// A named content section of a digest article, with a relative length
/// weight used to derive per-section word targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentModule {
    pub name: String,
    pub title: String,
    pub weight: f64,
}

impl ContentModule {
    pub fn new(name: &str, title: &str, weight: f64) -> Self {
        ContentModule {
            name: name.to_string(),
            title: title.to_string(),
            weight,
        }
    }
}

/// Default module template: timeline, key viewpoints, analysis, impact.
pub fn default_modules() -> Vec<ContentModule> {
    vec![
        ContentModule::new("timeline", "Timeline", 1.0),
        ContentModule::new("viewpoints", "Key Viewpoints", 1.0),
        ContentModule::new("analysis", "In-Depth Analysis", 2.0),
        ContentModule::new("impact", "Impact Assessment", 1.0),
    ]
}

/// A named, user-defined generation policy. Owned by configuration storage;
/// immutable for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestConfig {
    pub id: i64,
    pub name: String,
    pub slug: String,
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
    pub total_tokens: i64,
}

/// A source article pulled into a run. Read-only pipeline input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub published_at: DateTime<Utc>,
    pub tags: Vec<String>,
    pub link: String,
}

/// One rendered section of a digest article, in module order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleSection {
    pub module: String,
    pub title: String,
    pub content: String,
}

/// Per-dimension quality scores plus the weighted aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityBreakdown {
    pub structure: f64,
    pub length: f64,
    pub diversity: f64,
    pub novelty: f64,
    pub aggregate: f64,
}

/// The durable output of one accepted cluster. Never regenerated in place;
/// a forced re-run supersedes and creates new rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestArticle {
    pub id: i64,
    pub digest_id: i64,
    pub run_date: NaiveDate,
    pub title: String,
    pub summary: String,
    pub sections: Vec<ArticleSection>,
    pub keywords: Vec<String>,
    pub source_links: Vec<String>,
    pub reading_minutes: u32,
    pub quality: Option<QualityBreakdown>,
    pub status: ArticleStatus,
    pub tokens_used: i64,
    pub created_at: DateTime<Utc>,
}

/// Audit/state record for one generation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: i64,
    pub digest_id: i64,
    pub run_date: NaiveDate,
    pub status: RunStatus,
    pub superseded: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub clusters_found: i64,
    pub articles_generated: i64,
    pub articles_published: i64,
    pub tokens_used: i64,
    pub clustering_method: Option<String>,
    pub errors: Vec<String>,
}

/// Structured result of a single batch invocation, returned to the caller
/// instead of an opaque failure.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub digest_id: i64,
    pub digest_name: String,
    pub run_date: NaiveDate,
    pub disposition: RunDisposition,
    pub clusters_found: i64,
    pub articles_generated: i64,
    pub articles_published: i64,
    pub tokens_used: i64,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunDisposition {
    /// A non-failed run already exists for today and force was not set.
    AlreadyGenerated,
    Succeeded,
    PartiallyFailed,
    Failed,
}

/// Aggregated result of generating every digest whose hour matched.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub runs: Vec<RunOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupOutcome {
    pub cutoff_date: NaiveDate,
    pub runs_deleted: u64,
    pub articles_deleted: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DigestStatistics {
    pub period_days: i64,
    pub total_runs: i64,
    pub succeeded_runs: i64,
    pub success_rate: f64,
    pub total_articles: i64,
    pub published_articles: i64,
    pub average_quality: f64,
    pub total_tokens: i64,
}
