use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use tracing::{error, info, warn};

use crate::clustering;
use crate::db::{Database, RunClaim};
use crate::keywords;
use crate::llm::{AiAgent, TokenUsage};
use crate::models::{
    BatchOutcome, CleanupOutcome, DigestConfig, DigestStatistics, RunDisposition, RunOutcome,
    RunStatus,
};
use crate::pool;
use crate::quality;
use crate::synthesis;
use crate::TARGET_PIPELINE;

/// Upper bound on clusters synthesized concurrently within one run.
pub const MAX_CONCURRENT_SYNTHESIS: usize = 2;

/// A `running` record older than this is considered abandoned and may be
/// retaken by a new invocation.
pub const STALE_RUN_HOURS: i64 = 2;

/// What triggered a generation attempt. Time is injected by the caller so
/// the pipeline itself never reads the wall clock.
#[derive(Debug, Clone, Copy)]
pub struct RunTrigger {
    pub now: DateTime<Utc>,
    pub force: bool,
}

impl RunTrigger {
    pub fn at(now: DateTime<Utc>) -> Self {
        RunTrigger { now, force: false }
    }

    pub fn forced(now: DateTime<Utc>) -> Self {
        RunTrigger { now, force: true }
    }
}

/// Drives digests through the generation state machine: claim the day's
/// run, pull the candidate pool, cluster, synthesize, score, persist, and
/// record a terminal status. One orchestrator serves any number of digests.
pub struct Orchestrator<'a, A: AiAgent> {
    db: &'a Database,
    agent: &'a A,
}

impl<'a, A: AiAgent> Orchestrator<'a, A> {
    pub fn new(db: &'a Database, agent: &'a A) -> Self {
        Orchestrator { db, agent }
    }

    /// Generates one digest for the trigger's date. Idempotent per
    /// (digest, date): a repeat invocation returns `AlreadyGenerated`
    /// without touching the agent. With `force`, the existing run record is
    /// superseded up front so a fresh run can be claimed, but the date's
    /// published articles are replaced only once the new run has produced
    /// output; a forced run that yields nothing leaves them serving.
    pub async fn generate_for_digest(
        &self,
        digest_id: i64,
        trigger: RunTrigger,
    ) -> Result<RunOutcome> {
        let config = self
            .db
            .get_digest(digest_id)
            .await?
            .ok_or_else(|| anyhow!("digest {} not found", digest_id))?;
        if !config.is_active {
            return Err(anyhow!("digest '{}' is not active", config.name));
        }

        let run_date = trigger.now.date_naive();

        if trigger.force {
            let runs = self.db.supersede_runs(digest_id, run_date).await?;
            if runs > 0 {
                info!(
                    target: TARGET_PIPELINE,
                    "Forced regeneration of '{}' for {}: superseded {} run records",
                    config.name, run_date, runs
                );
            }
        }

        let stale_before = trigger.now - Duration::hours(STALE_RUN_HOURS);
        let run_id = match self
            .db
            .claim_run(digest_id, run_date, trigger.now, stale_before)
            .await?
        {
            RunClaim::Claimed { run_id } => run_id,
            RunClaim::AlreadyGenerated { status } => {
                info!(
                    target: TARGET_PIPELINE,
                    "Digest '{}' already has a {} run for {}, skipping",
                    config.name,
                    status.as_str(),
                    run_date
                );
                return Ok(RunOutcome {
                    digest_id,
                    digest_name: config.name,
                    run_date,
                    disposition: RunDisposition::AlreadyGenerated,
                    clusters_found: 0,
                    articles_generated: 0,
                    articles_published: 0,
                    tokens_used: 0,
                    errors: Vec::new(),
                });
            }
        };

        match self
            .execute_run(&config, run_id, run_date, trigger.now, trigger.force)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // Infrastructure failure mid-run. Leave a terminal record so
                // the claim does not linger as a stale `running` row.
                error!(
                    target: TARGET_PIPELINE,
                    "Run {} for digest '{}' aborted: {:#}", run_id, config.name, e
                );
                let message = format!("{:#}", e);
                self.fail_run(
                    &config,
                    run_id,
                    run_date,
                    trigger.now,
                    message,
                    TokenUsage::default(),
                )
                .await
            }
        }
    }

    async fn execute_run(
        &self,
        config: &DigestConfig,
        run_id: i64,
        run_date: NaiveDate,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<RunOutcome> {
        let candidates = pool::candidates_for_digest(self.db, config, now).await?;
        if candidates.len() < config.min_cluster_size {
            let message = format!(
                "insufficient candidates: found {}, need at least {}",
                candidates.len(),
                config.min_cluster_size
            );
            return self
                .fail_run(config, run_id, run_date, now, message, TokenUsage::default())
                .await;
        }

        let (clustering_usage, clustering_result) =
            clustering::run_clustering(self.agent, &candidates, config.min_cluster_size).await;
        let outcome = match clustering_result {
            Ok(outcome) => outcome,
            Err(e) => {
                return self
                    .fail_run(config, run_id, run_date, now, e.to_string(), clustering_usage)
                    .await;
            }
        };

        let mut errors = Vec::new();
        if let Some(note) = outcome.note {
            errors.push(note);
        }
        let method = outcome.method;
        let clusters_found = outcome.clusters.len() as i64;

        let mut clusters = outcome.clusters;
        clusters.truncate(config.target_article_count.max(1));
        for cluster in &mut clusters {
            keywords::annotate(cluster);
        }

        let recent_since = run_date - Duration::days(quality::TRAILING_WINDOW_DAYS);
        let recent = self
            .db
            .recent_published_fingerprints(config.id, recent_since, run_date)
            .await?;

        let agent = self.agent;
        let mut results: Vec<(usize, synthesis::SynthesisOutcome)> =
            stream::iter(clusters.iter().enumerate().map(|(index, cluster)| async move {
                let outcome =
                    synthesis::synthesize_cluster(agent, cluster, config, run_date, now).await;
                (index, outcome)
            }))
            .buffer_unordered(MAX_CONCURRENT_SYNTHESIS)
            .collect()
            .await;
        results.sort_by_key(|(index, _)| *index);

        // A forced run replaces the date's prior articles only once it has
        // something to replace them with.
        if force && results.iter().any(|(_, s)| s.result.is_ok()) {
            let hidden = self.db.supersede_articles(config.id, run_date).await?;
            if hidden > 0 {
                info!(
                    target: TARGET_PIPELINE,
                    "Forced regeneration of '{}' superseded {} prior articles for {}",
                    config.name, hidden, run_date
                );
            }
        }

        let mut usage = clustering_usage;
        let mut generated: i64 = 0;
        let mut published: i64 = 0;
        let mut synthesis_failed = false;

        for (index, synthesized) in results {
            usage.add(synthesized.usage);
            match synthesized.result {
                Ok(mut article) => {
                    let source_tags: HashSet<&str> = clusters[index]
                        .members
                        .iter()
                        .flat_map(|m| m.tags.iter().map(String::as_str))
                        .collect();
                    let breakdown =
                        quality::evaluate(config, &article, source_tags.len(), &recent);
                    article.status = quality::decide(&breakdown, config.publish_threshold);
                    if article.status == crate::models::ArticleStatus::Published {
                        published += 1;
                    }
                    article.quality = Some(breakdown);
                    self.db.insert_article(&article).await?;
                    generated += 1;
                }
                Err(e) => {
                    synthesis_failed = true;
                    warn!(
                        target: TARGET_PIPELINE,
                        "Cluster {} of digest '{}' failed synthesis: {}",
                        index + 1,
                        config.name,
                        e
                    );
                    errors.push(format!("cluster {}: {}", index + 1, e));
                }
            }
        }

        let status = if synthesis_failed {
            RunStatus::PartiallyFailed
        } else {
            RunStatus::Succeeded
        };

        self.db
            .finish_run(
                run_id,
                status,
                now,
                clusters_found,
                generated,
                published,
                usage.total() as i64,
                Some(method.as_str()),
                &errors,
            )
            .await?;
        self.db
            .add_digest_tokens(config.id, usage.total() as i64)
            .await?;

        info!(
            target: TARGET_PIPELINE,
            "Digest '{}' {} for {}: {} clusters, {} articles ({} published), {} tokens",
            config.name,
            status.as_str(),
            run_date,
            clusters_found,
            generated,
            published,
            usage.total()
        );

        Ok(RunOutcome {
            digest_id: config.id,
            digest_name: config.name.clone(),
            run_date,
            disposition: match status {
                RunStatus::PartiallyFailed => RunDisposition::PartiallyFailed,
                _ => RunDisposition::Succeeded,
            },
            clusters_found,
            articles_generated: generated,
            articles_published: published,
            tokens_used: usage.total() as i64,
            errors,
        })
    }

    /// Terminal failure before any article was produced. No partial output
    /// is persisted for the date, but tokens already spent are recorded.
    async fn fail_run(
        &self,
        config: &DigestConfig,
        run_id: i64,
        run_date: NaiveDate,
        now: DateTime<Utc>,
        message: String,
        usage: TokenUsage,
    ) -> Result<RunOutcome> {
        warn!(
            target: TARGET_PIPELINE,
            "Digest '{}' failed for {}: {}", config.name, run_date, message
        );
        let errors = vec![message];
        let tokens = usage.total() as i64;
        self.db
            .finish_run(
                run_id,
                RunStatus::Failed,
                now,
                0,
                0,
                0,
                tokens,
                None,
                &errors,
            )
            .await?;
        if tokens > 0 {
            self.db.add_digest_tokens(config.id, tokens).await?;
        }

        Ok(RunOutcome {
            digest_id: config.id,
            digest_name: config.name.clone(),
            run_date,
            disposition: RunDisposition::Failed,
            clusters_found: 0,
            articles_generated: 0,
            articles_published: 0,
            tokens_used: tokens,
            errors,
        })
    }

    /// Generates every active digest whose configured hour matches. One
    /// digest's failure never aborts the batch; each digest's outcome is
    /// reported individually.
    pub async fn generate_matching_hour(
        &self,
        now: DateTime<Utc>,
        hour_override: Option<u8>,
    ) -> Result<BatchOutcome> {
        let hour = hour_override.unwrap_or(now.hour() as u8);
        let digests = self.db.active_digests_for_hour(hour).await?;
        info!(
            target: TARGET_PIPELINE,
            "Hour {:02}: {} digests scheduled", hour, digests.len()
        );

        let mut succeeded = 0;
        let mut failed = 0;
        let mut skipped = 0;
        let mut runs = Vec::with_capacity(digests.len());

        for config in &digests {
            let outcome = match self.generate_for_digest(config.id, RunTrigger::at(now)).await {
                Ok(outcome) => outcome,
                Err(e) => RunOutcome {
                    digest_id: config.id,
                    digest_name: config.name.clone(),
                    run_date: now.date_naive(),
                    disposition: RunDisposition::Failed,
                    clusters_found: 0,
                    articles_generated: 0,
                    articles_published: 0,
                    tokens_used: 0,
                    errors: vec![format!("{:#}", e)],
                },
            };
            match outcome.disposition {
                RunDisposition::AlreadyGenerated => skipped += 1,
                RunDisposition::Failed => failed += 1,
                _ => succeeded += 1,
            }
            runs.push(outcome);
        }

        Ok(BatchOutcome {
            total: digests.len(),
            succeeded,
            failed,
            skipped,
            runs,
        })
    }
}

/// Aggregate run and article statistics over a trailing period, for the
/// whole installation or one digest. Needs no agent; read-only.
pub async fn statistics(
    db: &Database,
    digest_id: Option<i64>,
    days: i64,
    today: NaiveDate,
) -> Result<DigestStatistics> {
    let since = today - Duration::days(days);
    let (total_runs, succeeded_runs, total_tokens) = db.run_stats(digest_id, since).await?;
    let (total_articles, published_articles, average_quality) =
        db.article_stats(digest_id, since).await?;

    let success_rate = if total_runs > 0 {
        succeeded_runs as f64 / total_runs as f64
    } else {
        0.0
    };

    Ok(DigestStatistics {
        period_days: days,
        total_runs,
        succeeded_runs,
        success_rate,
        total_articles,
        published_articles,
        average_quality,
        total_tokens,
    })
}

/// Deletes articles and run records strictly older than the retention
/// cutoff. Superseded rows age out with everything else. Needs no agent.
pub async fn cleanup(
    db: &Database,
    retention_days: i64,
    today: NaiveDate,
    digest_id: Option<i64>,
) -> Result<CleanupOutcome> {
    let cutoff = today - Duration::days(retention_days);
    let articles_deleted = db.delete_articles_before(cutoff, digest_id).await?;
    let runs_deleted = db.delete_runs_before(cutoff, digest_id).await?;

    info!(
        target: TARGET_PIPELINE,
        "Cleanup before {}: removed {} articles and {} run records",
        cutoff, articles_deleted, runs_deleted
    );

    Ok(CleanupOutcome {
        cutoff_date: cutoff,
        runs_deleted,
        articles_deleted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewCandidate, NewDigest};
    use crate::error::AgentError;
    use crate::llm::Completion;
    use crate::prompt::CLUSTERING_SYSTEM_PROMPT;
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    /// Scripted agent: one fixed clustering response (None means the agent
    /// times out) and a queue of synthesis responses consumed in call order.
    /// An empty queue yields a well-formed default document.
    struct ScriptedAgent {
        clustering: Option<String>,
        synthesis: Mutex<VecDeque<Option<String>>>,
    }

    impl ScriptedAgent {
        fn clustering_down() -> Self {
            ScriptedAgent {
                clustering: None,
                synthesis: Mutex::new(VecDeque::new()),
            }
        }

        fn with_clustering(response: &str) -> Self {
            ScriptedAgent {
                clustering: Some(response.to_string()),
                synthesis: Mutex::new(VecDeque::new()),
            }
        }

        fn queue_synthesis(self, responses: Vec<Option<String>>) -> Self {
            *self.synthesis.lock().unwrap() = responses.into();
            self
        }
    }

    impl AiAgent for ScriptedAgent {
        async fn complete(&self, system: &str, _prompt: &str) -> Result<Completion, AgentError> {
            let usage = TokenUsage {
                prompt: 100,
                completion: 200,
            };
            if system == CLUSTERING_SYSTEM_PROMPT {
                return match &self.clustering {
                    Some(text) => Ok(Completion {
                        text: text.clone(),
                        usage,
                    }),
                    None => Err(AgentError::Timeout(StdDuration::from_secs(120))),
                };
            }
            let scripted = self.synthesis.lock().unwrap().pop_front();
            match scripted {
                Some(Some(text)) => Ok(Completion { text, usage }),
                Some(None) => Err(AgentError::Timeout(StdDuration::from_secs(120))),
                None => Ok(Completion {
                    text: default_synthesis_response(),
                    usage,
                }),
            }
        }
    }

    /// A document whose section lengths track the default module targets,
    /// so the quality gate publishes it.
    fn default_synthesis_response() -> String {
        let section = |words: usize| vec!["word"; words].join(" ");
        serde_json::json!({
            "title": "Scripted digest article",
            "summary": "A scripted summary.",
            "sections": {
                "timeline": section(160),
                "viewpoints": section(160),
                "analysis": section(320),
                "impact": section(160),
            }
        })
        .to_string()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 20, 6, 0, 0).unwrap()
    }

    async fn seed_digest(db: &Database) -> i64 {
        db.insert_digest(&NewDigest {
            name: "World Brief".to_string(),
            tags: vec!["economy".to_string(), "space".to_string()],
            ..NewDigest::default()
        })
        .await
        .unwrap()
    }

    /// Six candidates about rate policy and four about a rocket launch,
    /// published inside the default 24h lookback window.
    async fn seed_candidates(db: &Database) {
        let economy = [
            "The central bank raised interest rates again as inflation strained policy.",
            "Inflation kept the central bank policy tight, with interest rates climbing.",
            "The central bank defended its policy of higher interest rates to curb inflation.",
            "Economists tied the central bank policy to interest rates and inflation data.",
            "Bond traders watched the central bank policy as interest rates and inflation rose.",
            "The central bank policy statement linked interest rates to stubborn inflation.",
        ];
        let space = [
            "The rocket launch placed a satellite in orbit after the booster separated cleanly.",
            "Engineers confirmed the booster recovery while the rocket launch satellite reached orbit.",
            "The rocket booster landed downrange as the launch put another satellite into orbit.",
            "Spectators cheered the rocket launch as the satellite orbit deployment capped the booster flight.",
        ];

        let published_at = now() - Duration::hours(2);
        for (i, body) in economy.iter().enumerate() {
            db.insert_candidate(&NewCandidate {
                title: format!("Economy story {}", i + 1),
                body: body.to_string(),
                published_at,
                tags: vec!["economy".to_string()],
                link: format!("https://example.com/economy/{}", i + 1),
            })
            .await
            .unwrap();
        }
        for (i, body) in space.iter().enumerate() {
            db.insert_candidate(&NewCandidate {
                title: format!("Space story {}", i + 1),
                body: body.to_string(),
                published_at,
                tags: vec!["space".to_string(), "science".to_string()],
                link: format!("https://example.com/space/{}", i + 1),
            })
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn clustering_fallback_still_succeeds() {
        let db = Database::new_in_memory().await.unwrap();
        let digest_id = seed_digest(&db).await;
        seed_candidates(&db).await;

        let agent = ScriptedAgent::clustering_down();
        let orchestrator = Orchestrator::new(&db, &agent);
        let outcome = orchestrator
            .generate_for_digest(digest_id, RunTrigger::at(now()))
            .await
            .unwrap();

        assert_eq!(outcome.disposition, RunDisposition::Succeeded);
        assert_eq!(outcome.clusters_found, 2);
        assert_eq!(outcome.articles_generated, 2);
        assert_eq!(outcome.articles_published, 2);
        // fallback is recorded, not treated as a run failure
        assert_eq!(outcome.errors.len(), 1);

        let run = db.latest_run(digest_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.clustering_method.as_deref(), Some("features"));
        assert_eq!(run.tokens_used, 600);

        let articles = db.published_articles(digest_id, 50).await.unwrap();
        assert_eq!(articles.len(), 2);
        for article in &articles {
            assert!(!article.source_links.is_empty());
            assert!(article.quality.as_ref().unwrap().aggregate >= 0.7);
            assert!(article.reading_minutes >= 1);
        }

        let config = db.get_digest(digest_id).await.unwrap().unwrap();
        assert_eq!(config.total_tokens, 600);
    }

    #[tokio::test]
    async fn semantic_path_keeps_agent_labels() {
        let clustering = serde_json::json!({
            "clusters": [
                {
                    "id": 1,
                    "title": "Rate policy tightens",
                    "keywords": ["rates", "inflation"],
                    "member_ids": [0, 1, 2, 3, 4, 5],
                    "summary": "Central banks keep tightening."
                },
                {
                    "id": 2,
                    "title": "Rocket launch and recovery",
                    "keywords": ["rocket", "launch"],
                    "member_ids": [6, 7, 8, 9],
                    "summary": "A launch with booster recovery."
                }
            ]
        })
        .to_string();

        let db = Database::new_in_memory().await.unwrap();
        let digest_id = seed_digest(&db).await;
        seed_candidates(&db).await;

        let agent = ScriptedAgent::with_clustering(&clustering);
        let orchestrator = Orchestrator::new(&db, &agent);
        let outcome = orchestrator
            .generate_for_digest(digest_id, RunTrigger::at(now()))
            .await
            .unwrap();

        assert_eq!(outcome.disposition, RunDisposition::Succeeded);
        assert!(outcome.errors.is_empty());

        let run = db.latest_run(digest_id).await.unwrap().unwrap();
        assert_eq!(run.clustering_method.as_deref(), Some("semantic"));
        // one clustering call plus two synthesis calls
        assert_eq!(run.tokens_used, 900);

        let articles = db.published_articles(digest_id, 50).await.unwrap();
        let keywords: Vec<&[String]> =
            articles.iter().map(|a| a.keywords.as_slice()).collect();
        assert!(keywords
            .iter()
            .any(|k| k.contains(&"rates".to_string())));
        assert!(keywords
            .iter()
            .any(|k| k.contains(&"rocket".to_string())));
    }

    #[tokio::test]
    async fn second_invocation_is_idempotent() {
        let db = Database::new_in_memory().await.unwrap();
        let digest_id = seed_digest(&db).await;
        seed_candidates(&db).await;

        let agent = ScriptedAgent::clustering_down();
        let orchestrator = Orchestrator::new(&db, &agent);
        let first = orchestrator
            .generate_for_digest(digest_id, RunTrigger::at(now()))
            .await
            .unwrap();
        assert_eq!(first.disposition, RunDisposition::Succeeded);

        let second = orchestrator
            .generate_for_digest(digest_id, RunTrigger::at(now() + Duration::minutes(5)))
            .await
            .unwrap();
        assert_eq!(second.disposition, RunDisposition::AlreadyGenerated);
        assert_eq!(second.articles_generated, 0);

        assert_eq!(db.count_runs(digest_id, now().date_naive()).await.unwrap(), 1);
        assert_eq!(db.published_articles(digest_id, 50).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn one_bad_synthesis_is_partial_failure() {
        let db = Database::new_in_memory().await.unwrap();
        let digest_id = seed_digest(&db).await;
        seed_candidates(&db).await;

        // one valid document and one missing its title
        let agent = ScriptedAgent::clustering_down().queue_synthesis(vec![
            Some(default_synthesis_response()),
            Some(r#"{"sections": {"timeline": "content"}}"#.to_string()),
        ]);
        let orchestrator = Orchestrator::new(&db, &agent);
        let outcome = orchestrator
            .generate_for_digest(digest_id, RunTrigger::at(now()))
            .await
            .unwrap();

        assert_eq!(outcome.disposition, RunDisposition::PartiallyFailed);
        assert_eq!(outcome.clusters_found, 2);
        assert_eq!(outcome.articles_generated, 1);
        assert!(outcome
            .errors
            .iter()
            .any(|e| e.contains("missing") || e.contains("title")));

        let run = db.latest_run(digest_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::PartiallyFailed);
        // token spend of the failed call still counts
        assert_eq!(run.tokens_used, 600);
    }

    #[tokio::test]
    async fn force_supersedes_and_regenerates() {
        let db = Database::new_in_memory().await.unwrap();
        let digest_id = seed_digest(&db).await;
        seed_candidates(&db).await;

        let agent = ScriptedAgent::clustering_down();
        let orchestrator = Orchestrator::new(&db, &agent);
        orchestrator
            .generate_for_digest(digest_id, RunTrigger::at(now()))
            .await
            .unwrap();

        let forced = orchestrator
            .generate_for_digest(digest_id, RunTrigger::forced(now() + Duration::hours(1)))
            .await
            .unwrap();
        assert_eq!(forced.disposition, RunDisposition::Succeeded);

        // both runs remain for audit, only one is current
        assert_eq!(db.count_runs(digest_id, now().date_naive()).await.unwrap(), 2);
        let run = db.latest_run(digest_id).await.unwrap().unwrap();
        assert!(!run.superseded);

        // feeds see only the fresh articles; the old rows are retained
        assert_eq!(db.published_articles(digest_id, 50).await.unwrap().len(), 2);
        let (total, _, _) = db
            .article_stats(Some(digest_id), now().date_naive())
            .await
            .unwrap();
        assert_eq!(total, 4);
    }

    #[tokio::test]
    async fn failed_forced_regeneration_keeps_previous_articles() {
        let db = Database::new_in_memory().await.unwrap();
        let digest_id = seed_digest(&db).await;
        seed_candidates(&db).await;

        let agent = ScriptedAgent::clustering_down();
        let orchestrator = Orchestrator::new(&db, &agent);
        let first = orchestrator
            .generate_for_digest(digest_id, RunTrigger::at(now()))
            .await
            .unwrap();
        assert_eq!(first.articles_published, 2);

        // every synthesis call of the forced run times out
        let flaky = ScriptedAgent::clustering_down().queue_synthesis(vec![None, None]);
        let forced = Orchestrator::new(&db, &flaky)
            .generate_for_digest(digest_id, RunTrigger::forced(now() + Duration::hours(1)))
            .await
            .unwrap();
        assert_eq!(forced.disposition, RunDisposition::PartiallyFailed);
        assert_eq!(forced.articles_generated, 0);

        // the date's previously published articles still serve the feed
        assert_eq!(db.published_articles(digest_id, 50).await.unwrap().len(), 2);
        let run = db.latest_run(digest_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::PartiallyFailed);
    }

    #[tokio::test]
    async fn clustering_spend_counts_even_when_assignment_is_rejected() {
        let db = Database::new_in_memory().await.unwrap();
        let digest_id = seed_digest(&db).await;
        seed_candidates(&db).await;

        // the agent answers the clustering call with prose, so its output
        // is rejected and the feature fallback runs instead
        let agent = ScriptedAgent::with_clustering("I grouped them roughly by theme.");
        let orchestrator = Orchestrator::new(&db, &agent);
        let outcome = orchestrator
            .generate_for_digest(digest_id, RunTrigger::at(now()))
            .await
            .unwrap();

        assert_eq!(outcome.disposition, RunDisposition::Succeeded);
        let run = db.latest_run(digest_id).await.unwrap().unwrap();
        assert_eq!(run.clustering_method.as_deref(), Some("features"));
        // the rejected clustering call plus two synthesis calls
        assert_eq!(run.tokens_used, 900);
        assert_eq!(outcome.tokens_used, 900);

        let config = db.get_digest(digest_id).await.unwrap().unwrap();
        assert_eq!(config.total_tokens, 900);
    }

    #[tokio::test]
    async fn insufficient_candidates_fail_and_allow_retry() {
        let db = Database::new_in_memory().await.unwrap();
        let digest_id = seed_digest(&db).await;
        // only two candidates against a minimum cluster size of three
        db.insert_candidate(&NewCandidate {
            title: "Lonely economy story".to_string(),
            body: "The central bank raised interest rates.".to_string(),
            published_at: now() - Duration::hours(1),
            tags: vec!["economy".to_string()],
            link: "https://example.com/economy/solo".to_string(),
        })
        .await
        .unwrap();
        db.insert_candidate(&NewCandidate {
            title: "Lonely space story".to_string(),
            body: "The rocket launch succeeded.".to_string(),
            published_at: now() - Duration::hours(1),
            tags: vec!["space".to_string()],
            link: "https://example.com/space/solo".to_string(),
        })
        .await
        .unwrap();

        let agent = ScriptedAgent::clustering_down();
        let orchestrator = Orchestrator::new(&db, &agent);
        let outcome = orchestrator
            .generate_for_digest(digest_id, RunTrigger::at(now()))
            .await
            .unwrap();

        assert_eq!(outcome.disposition, RunDisposition::Failed);
        assert_eq!(outcome.articles_generated, 0);
        let run = db.latest_run(digest_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);

        // a failed run does not block a retry the same day
        seed_candidates(&db).await;
        let retry = orchestrator
            .generate_for_digest(digest_id, RunTrigger::at(now() + Duration::minutes(10)))
            .await
            .unwrap();
        assert_eq!(retry.disposition, RunDisposition::Succeeded);
        assert_eq!(db.count_runs(digest_id, now().date_naive()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn batch_generation_reports_each_digest() {
        let db = Database::new_in_memory().await.unwrap();
        let digest_id = seed_digest(&db).await;
        // same hour but no candidates will match its tags
        let starved_id = db
            .insert_digest(&NewDigest {
                name: "Sports Brief".to_string(),
                tags: vec!["sports".to_string()],
                ..NewDigest::default()
            })
            .await
            .unwrap();
        // different hour, must not run
        db.insert_digest(&NewDigest {
            name: "Evening Brief".to_string(),
            tags: vec!["economy".to_string()],
            generation_hour: 18,
            ..NewDigest::default()
        })
        .await
        .unwrap();
        seed_candidates(&db).await;

        let agent = ScriptedAgent::clustering_down();
        let orchestrator = Orchestrator::new(&db, &agent);
        let batch = orchestrator
            .generate_matching_hour(now(), None)
            .await
            .unwrap();

        assert_eq!(batch.total, 2);
        assert_eq!(batch.succeeded, 1);
        assert_eq!(batch.failed, 1);
        assert_eq!(batch.skipped, 0);

        assert!(db.latest_run(digest_id).await.unwrap().is_some());
        let starved = db.latest_run(starved_id).await.unwrap().unwrap();
        assert_eq!(starved.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn statistics_summarize_the_period() {
        let db = Database::new_in_memory().await.unwrap();
        let digest_id = seed_digest(&db).await;
        seed_candidates(&db).await;

        let agent = ScriptedAgent::clustering_down();
        let orchestrator = Orchestrator::new(&db, &agent);
        orchestrator
            .generate_for_digest(digest_id, RunTrigger::at(now()))
            .await
            .unwrap();

        let stats = statistics(&db, Some(digest_id), 7, now().date_naive())
            .await
            .unwrap();
        assert_eq!(stats.total_runs, 1);
        assert_eq!(stats.succeeded_runs, 1);
        assert!((stats.success_rate - 1.0).abs() < 1e-9);
        assert_eq!(stats.total_articles, 2);
        assert_eq!(stats.published_articles, 2);
        assert!(stats.average_quality > 0.0);
        assert_eq!(stats.total_tokens, 600);
    }

    #[tokio::test]
    async fn cleanup_deletes_strictly_older_rows() {
        let db = Database::new_in_memory().await.unwrap();
        let digest_id = seed_digest(&db).await;
        seed_candidates(&db).await;

        let agent = ScriptedAgent::clustering_down();
        let orchestrator = Orchestrator::new(&db, &agent);

        // an old run with its articles, forty days back
        let old_now = now() - Duration::days(40);
        match db
            .claim_run(digest_id, old_now.date_naive(), old_now, old_now)
            .await
            .unwrap()
        {
            RunClaim::Claimed { run_id } => {
                db.finish_run(
                    run_id,
                    RunStatus::Succeeded,
                    old_now,
                    1,
                    0,
                    0,
                    0,
                    Some("features"),
                    &[],
                )
                .await
                .unwrap();
            }
            RunClaim::AlreadyGenerated { .. } => panic!("old claim should succeed"),
        }

        // today's run
        orchestrator
            .generate_for_digest(digest_id, RunTrigger::at(now()))
            .await
            .unwrap();

        let outcome = cleanup(&db, 30, now().date_naive(), None).await.unwrap();
        assert_eq!(outcome.runs_deleted, 1);
        assert_eq!(outcome.articles_deleted, 0);

        // today's run and articles survive
        assert_eq!(db.count_runs(digest_id, now().date_naive()).await.unwrap(), 1);
        assert_eq!(db.published_articles(digest_id, 50).await.unwrap().len(), 2);

        // a cutoff on the run date itself keeps the row (strictly older only)
        let boundary = cleanup(&db, 0, now().date_naive(), None).await.unwrap();
        assert_eq!(boundary.runs_deleted, 0);
    }
}
