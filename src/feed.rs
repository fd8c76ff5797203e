use anyhow::{anyhow, Result};
use rss::{ChannelBuilder, GuidBuilder, ItemBuilder};
use serde::Serialize;

use crate::db::Database;
use crate::models::{DigestArticle, DigestConfig, RunRecord};

/// How many published articles a feed carries when the caller does not say.
pub const DEFAULT_FEED_LIMIT: i64 = 50;

/// Rendering options shared by both feed formats.
#[derive(Debug, Clone)]
pub struct FeedOptions {
    pub site_url: String,
    pub limit: i64,
}

impl Default for FeedOptions {
    fn default() -> Self {
        FeedOptions {
            site_url: "https://localhost".to_string(),
            limit: DEFAULT_FEED_LIMIT,
        }
    }
}

/// Answer to the status query: configuration identity plus the latest
/// non-superseded run, if any exists yet.
#[derive(Debug, Serialize)]
pub struct DigestStatus {
    pub digest_id: i64,
    pub name: String,
    pub slug: String,
    pub is_active: bool,
    pub generation_hour: u8,
    pub total_tokens: i64,
    pub latest_run: Option<RunRecord>,
}

#[derive(Debug, Serialize)]
struct JsonFeed<'a> {
    name: &'a str,
    slug: &'a str,
    description: &'a str,
    language: &'a str,
    articles: Vec<JsonFeedArticle<'a>>,
}

#[derive(Debug, Serialize)]
struct JsonFeedArticle<'a> {
    id: i64,
    run_date: chrono::NaiveDate,
    title: &'a str,
    summary: &'a str,
    body: String,
    keywords: &'a [String],
    source_links: &'a [String],
    reading_minutes: u32,
    link: String,
}

async fn feed_inputs(
    db: &Database,
    digest_id: i64,
    limit: i64,
) -> Result<(DigestConfig, Vec<DigestArticle>)> {
    let config = db
        .get_digest(digest_id)
        .await?
        .ok_or_else(|| anyhow!("digest {} not found", digest_id))?;
    let articles = db.published_articles(digest_id, limit).await?;
    Ok((config, articles))
}

fn article_link(site_url: &str, slug: &str, article_id: i64) -> String {
    format!(
        "{}/digests/{}/articles/{}",
        site_url.trim_end_matches('/'),
        slug,
        article_id
    )
}

/// Flattens an article's sections into one document, section titles as
/// headings, in the digest's configured module order.
pub fn render_article(article: &DigestArticle) -> String {
    let mut body = String::new();
    if !article.summary.is_empty() {
        body.push_str(&article.summary);
        body.push_str("\n\n");
    }
    for section in &article.sections {
        body.push_str("## ");
        body.push_str(&section.title);
        body.push_str("\n\n");
        body.push_str(&section.content);
        body.push_str("\n\n");
    }
    body.trim_end().to_string()
}

/// The digest's published, non-superseded articles as an RSS 2.0 channel.
pub async fn render_rss(
    db: &Database,
    digest_id: i64,
    options: &FeedOptions,
) -> Result<String> {
    let (config, articles) = feed_inputs(db, digest_id, options.limit).await?;

    let channel_link = format!(
        "{}/digests/{}",
        options.site_url.trim_end_matches('/'),
        config.slug
    );

    let items: Vec<rss::Item> = articles
        .iter()
        .map(|article| {
            let link = article_link(&options.site_url, &config.slug, article.id);
            ItemBuilder::default()
                .title(Some(article.title.clone()))
                .link(Some(link.clone()))
                .guid(Some(
                    GuidBuilder::default()
                        .value(link)
                        .permalink(true)
                        .build(),
                ))
                .pub_date(Some(article.created_at.to_rfc2822()))
                .description(Some(article.summary.clone()))
                .content(Some(render_article(article)))
                .build()
        })
        .collect();

    let channel = ChannelBuilder::default()
        .title(config.name)
        .link(channel_link)
        .description(config.description)
        .language(Some(config.target_language))
        .items(items)
        .build();

    Ok(channel.to_string())
}

/// The same feed as a JSON document, for consumers that prefer structured
/// access over XML.
pub async fn render_json(
    db: &Database,
    digest_id: i64,
    options: &FeedOptions,
) -> Result<String> {
    let (config, articles) = feed_inputs(db, digest_id, options.limit).await?;

    let feed = JsonFeed {
        name: &config.name,
        slug: &config.slug,
        description: &config.description,
        language: &config.target_language,
        articles: articles
            .iter()
            .map(|article| JsonFeedArticle {
                id: article.id,
                run_date: article.run_date,
                title: &article.title,
                summary: &article.summary,
                body: render_article(article),
                keywords: &article.keywords,
                source_links: &article.source_links,
                reading_minutes: article.reading_minutes,
                link: article_link(&options.site_url, &config.slug, article.id),
            })
            .collect(),
    };

    Ok(serde_json::to_string_pretty(&feed)?)
}

/// Current state of a digest: its identity and the latest run on record.
pub async fn digest_status(db: &Database, digest_id: i64) -> Result<DigestStatus> {
    let config = db
        .get_digest(digest_id)
        .await?
        .ok_or_else(|| anyhow!("digest {} not found", digest_id))?;
    let latest_run = db.latest_run(digest_id).await?;

    Ok(DigestStatus {
        digest_id: config.id,
        name: config.name,
        slug: config.slug,
        is_active: config.is_active,
        generation_hour: config.generation_hour,
        total_tokens: config.total_tokens,
        latest_run,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewDigest;
    use crate::models::{ArticleSection, ArticleStatus};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn article(digest_id: i64, title: &str) -> DigestArticle {
        DigestArticle {
            id: 0,
            digest_id,
            run_date: NaiveDate::from_ymd_opt(2026, 8, 20).unwrap(),
            title: title.to_string(),
            summary: "Short summary.".to_string(),
            sections: vec![
                ArticleSection {
                    module: "timeline".to_string(),
                    title: "Timeline".to_string(),
                    content: "First this happened.".to_string(),
                },
                ArticleSection {
                    module: "analysis".to_string(),
                    title: "In-Depth Analysis".to_string(),
                    content: "Then we looked closer.".to_string(),
                },
            ],
            keywords: vec!["rates".to_string()],
            source_links: vec!["https://example.com/a".to_string()],
            reading_minutes: 2,
            quality: None,
            status: ArticleStatus::Published,
            tokens_used: 300,
            created_at: Utc.with_ymd_and_hms(2026, 8, 20, 6, 30, 0).unwrap(),
        }
    }

    async fn seed(db: &Database) -> i64 {
        db.insert_digest(&NewDigest {
            name: "World Brief".to_string(),
            description: "Daily world digest".to_string(),
            tags: vec!["world".to_string()],
            ..NewDigest::default()
        })
        .await
        .unwrap()
    }

    #[test]
    fn article_renders_sections_in_order() {
        let rendered = render_article(&article(1, "Rates climb"));
        let timeline = rendered.find("## Timeline").unwrap();
        let analysis = rendered.find("## In-Depth Analysis").unwrap();
        assert!(timeline < analysis);
        assert!(rendered.starts_with("Short summary."));
    }

    #[tokio::test]
    async fn rss_feed_carries_published_articles_only() {
        let db = Database::new_in_memory().await.unwrap();
        let digest_id = seed(&db).await;

        db.insert_article(&article(digest_id, "Published story"))
            .await
            .unwrap();
        let mut draft = article(digest_id, "Draft story");
        draft.status = ArticleStatus::Draft;
        db.insert_article(&draft).await.unwrap();

        let xml = render_rss(&db, digest_id, &FeedOptions::default())
            .await
            .unwrap();
        assert!(xml.contains("<title>World Brief</title>"));
        assert!(xml.contains("Published story"));
        assert!(!xml.contains("Draft story"));
        assert!(xml.contains("Aug 2026"));
    }

    #[tokio::test]
    async fn superseded_articles_drop_out_of_feeds() {
        let db = Database::new_in_memory().await.unwrap();
        let digest_id = seed(&db).await;

        db.insert_article(&article(digest_id, "Old take"))
            .await
            .unwrap();
        db.supersede_articles(digest_id, NaiveDate::from_ymd_opt(2026, 8, 20).unwrap())
            .await
            .unwrap();
        db.insert_article(&article(digest_id, "Fresh take"))
            .await
            .unwrap();

        let json = render_json(&db, digest_id, &FeedOptions::default())
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let articles = parsed["articles"].as_array().unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0]["title"], "Fresh take");
        assert!(articles[0]["link"]
            .as_str()
            .unwrap()
            .contains("/articles/"));
    }

    #[tokio::test]
    async fn status_reports_latest_run() {
        let db = Database::new_in_memory().await.unwrap();
        let digest_id = seed(&db).await;

        let status = digest_status(&db, digest_id).await.unwrap();
        assert_eq!(status.name, "World Brief");
        assert!(status.latest_run.is_none());

        let now = Utc.with_ymd_and_hms(2026, 8, 20, 6, 0, 0).unwrap();
        match db
            .claim_run(digest_id, now.date_naive(), now, now)
            .await
            .unwrap()
        {
            crate::db::RunClaim::Claimed { run_id } => {
                db.finish_run(
                    run_id,
                    crate::models::RunStatus::Succeeded,
                    now,
                    2,
                    2,
                    2,
                    600,
                    Some("semantic"),
                    &[],
                )
                .await
                .unwrap();
            }
            crate::db::RunClaim::AlreadyGenerated { .. } => panic!("claim should succeed"),
        }

        let status = digest_status(&db, digest_id).await.unwrap();
        let run = status.latest_run.unwrap();
        assert_eq!(run.status, crate::models::RunStatus::Succeeded);
        assert_eq!(run.tokens_used, 600);
    }
}
