use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use prettytable::{Cell, Row as PrettyRow, Table};
use serde::Deserialize;

use daybrief::db::{Database, NewCandidate, NewDigest};
use daybrief::environment::var_or;
use daybrief::feed::{self, FeedOptions, DEFAULT_FEED_LIMIT};
use daybrief::llm::LlmAgent;
use daybrief::logging::configure_logging;
use daybrief::orchestrator::{self, Orchestrator, RunTrigger};

#[derive(Parser)]
#[clap(name = "daybrief", about = "AI-synthesized daily digest generation")]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate one digest for today
    Generate {
        /// Digest ID
        #[clap(short, long)]
        digest: i64,

        /// Supersede any existing run for today and regenerate
        #[clap(short, long)]
        force: bool,
    },

    /// Generate every active digest whose generation hour matches
    GenerateAll {
        /// Override the hour instead of using the current UTC hour
        #[clap(long)]
        hour: Option<u8>,
    },

    /// Show a digest's configuration and its latest run
    Status {
        /// Digest ID
        #[clap(short, long)]
        digest: i64,
    },

    /// Aggregate run and article statistics over a trailing period
    Stats {
        /// Restrict to one digest
        #[clap(short, long)]
        digest: Option<i64>,

        /// Period length in days
        #[clap(long, default_value = "7")]
        days: i64,
    },

    /// Print one generated article in full
    ShowArticle {
        /// Article ID
        #[clap(required = true)]
        id: i64,
    },

    /// Render a digest's published articles as a feed
    Feed {
        /// Digest ID
        #[clap(short, long)]
        digest: i64,

        /// Output format
        #[clap(long, value_enum, default_value = "rss")]
        format: FeedFormat,

        /// Maximum number of articles
        #[clap(long, default_value_t = DEFAULT_FEED_LIMIT)]
        limit: i64,
    },

    /// Delete articles and run records older than the retention window
    Cleanup {
        /// Retention window in days
        #[clap(long, default_value = "30")]
        days: i64,

        /// Restrict to one digest
        #[clap(short, long)]
        digest: Option<i64>,
    },

    /// Register a new digest configuration
    AddDigest {
        #[clap(long)]
        name: String,

        #[clap(long, default_value = "")]
        description: String,

        /// Tags a candidate must carry to enter this digest's pool
        #[clap(long, required = true, num_args = 1..)]
        tags: Vec<String>,

        /// UTC hour at which the digest generates
        #[clap(long, default_value = "6")]
        hour: u8,

        #[clap(long, default_value = "10")]
        target_article_count: usize,

        #[clap(long, default_value = "3")]
        min_cluster_size: usize,

        #[clap(long, default_value = "24")]
        lookback_hours: i64,

        #[clap(long, default_value = "English")]
        language: String,

        #[clap(long, default_value = "0.7")]
        publish_threshold: f64,
    },

    /// Load candidate articles from a JSON file
    Ingest {
        /// Path to a JSON array of candidate objects
        #[clap(short, long)]
        file: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FeedFormat {
    Rss,
    Json,
}

/// On-disk shape of one ingested candidate.
#[derive(Deserialize)]
struct CandidateFile {
    title: String,
    body: String,
    published_at: DateTime<Utc>,
    tags: Vec<String>,
    link: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    configure_logging();

    let args = Cli::parse();

    let database_path = var_or("DATABASE_PATH", "daybrief.db");
    let db = Database::new(&database_path)
        .await
        .context("failed to open database")?;

    match args.command {
        Commands::Generate { digest, force } => {
            let agent = LlmAgent::from_env();
            let orchestrator = Orchestrator::new(&db, &agent);
            let trigger = RunTrigger {
                now: Utc::now(),
                force,
            };
            let outcome = orchestrator.generate_for_digest(digest, trigger).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::GenerateAll { hour } => {
            let agent = LlmAgent::from_env();
            let orchestrator = Orchestrator::new(&db, &agent);
            let batch = orchestrator.generate_matching_hour(Utc::now(), hour).await?;
            println!("{}", serde_json::to_string_pretty(&batch)?);
        }
        Commands::Status { digest } => {
            let status = feed::digest_status(&db, digest).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Stats { digest, days } => {
            let stats =
                orchestrator::statistics(&db, digest, days, Utc::now().date_naive()).await?;
            print_stats_table(&stats, days);
        }
        Commands::ShowArticle { id } => {
            let article = db
                .get_article(id)
                .await?
                .with_context(|| format!("article {} not found", id))?;
            println!("# {}\n", article.title);
            println!("{}", feed::render_article(&article));
            println!(
                "\n[{} | {} min read | {} sources | {} tokens]",
                article.status.as_str(),
                article.reading_minutes,
                article.source_links.len(),
                article.tokens_used
            );
        }
        Commands::Feed {
            digest,
            format,
            limit,
        } => {
            let options = FeedOptions {
                site_url: var_or("SITE_URL", "https://localhost"),
                limit,
            };
            let rendered = match format {
                FeedFormat::Rss => feed::render_rss(&db, digest, &options).await?,
                FeedFormat::Json => feed::render_json(&db, digest, &options).await?,
            };
            println!("{}", rendered);
        }
        Commands::Cleanup { days, digest } => {
            let outcome =
                orchestrator::cleanup(&db, days, Utc::now().date_naive(), digest).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::AddDigest {
            name,
            description,
            tags,
            hour,
            target_article_count,
            min_cluster_size,
            lookback_hours,
            language,
            publish_threshold,
        } => {
            let id = db
                .insert_digest(&NewDigest {
                    name,
                    description,
                    tags,
                    target_article_count,
                    generation_hour: hour,
                    min_cluster_size,
                    lookback_hours,
                    target_language: language,
                    publish_threshold,
                    ..NewDigest::default()
                })
                .await?;
            println!("Created digest {}", id);
        }
        Commands::Ingest { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file))?;
            let candidates: Vec<CandidateFile> =
                serde_json::from_str(&raw).context("invalid candidate file")?;

            let mut inserted = 0;
            let mut duplicates = 0;
            for candidate in &candidates {
                let id = db
                    .insert_candidate(&NewCandidate {
                        title: candidate.title.clone(),
                        body: candidate.body.clone(),
                        published_at: candidate.published_at,
                        tags: candidate.tags.clone(),
                        link: candidate.link.clone(),
                    })
                    .await?;
                match id {
                    Some(_) => inserted += 1,
                    None => duplicates += 1,
                }
            }
            println!(
                "Ingested {} candidates ({} duplicates skipped)",
                inserted, duplicates
            );
        }
    }

    Ok(())
}

fn print_stats_table(stats: &daybrief::models::DigestStatistics, days: i64) {
    let mut table = Table::new();
    table.add_row(PrettyRow::new(vec![
        Cell::new("Metric"),
        Cell::new(&format!("Last {} days", days)),
    ]));
    table.add_row(PrettyRow::new(vec![
        Cell::new("Runs"),
        Cell::new(&stats.total_runs.to_string()),
    ]));
    table.add_row(PrettyRow::new(vec![
        Cell::new("Succeeded runs"),
        Cell::new(&stats.succeeded_runs.to_string()),
    ]));
    table.add_row(PrettyRow::new(vec![
        Cell::new("Success rate"),
        Cell::new(&format!("{:.1}%", stats.success_rate * 100.0)),
    ]));
    table.add_row(PrettyRow::new(vec![
        Cell::new("Articles"),
        Cell::new(&stats.total_articles.to_string()),
    ]));
    table.add_row(PrettyRow::new(vec![
        Cell::new("Published"),
        Cell::new(&stats.published_articles.to_string()),
    ]));
    table.add_row(PrettyRow::new(vec![
        Cell::new("Average quality"),
        Cell::new(&format!("{:.3}", stats.average_quality)),
    ]));
    table.add_row(PrettyRow::new(vec![
        Cell::new("Tokens"),
        Cell::new(&stats.total_tokens.to_string()),
    ]));
    table.printstd();
}
