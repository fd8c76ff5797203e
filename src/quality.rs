use strsim::jaro_winkler;

use crate::models::{ArticleStatus, DigestArticle, DigestConfig, QualityBreakdown};
use crate::synthesis::module_targets;
use crate::text::word_count;

/// How many days back previously published articles are compared against
/// for the redundancy dimension.
pub const TRAILING_WINDOW_DAYS: i64 = 7;

/// Source-tag count at which the diversity dimension saturates.
const DIVERSITY_SATURATION: f64 = 3.0;

const W_STRUCTURE: f64 = 0.35;
const W_LENGTH: f64 = 0.25;
const W_DIVERSITY: f64 = 0.20;
const W_NOVELTY: f64 = 0.20;

/// Scores a draft article along the four quality dimensions. Pure function
/// of its inputs: re-scoring without re-synthesis yields identical results.
///
/// `recent` carries (title, keywords) fingerprints of articles already
/// published for the same digest within the trailing window.
pub fn evaluate(
    config: &DigestConfig,
    article: &DigestArticle,
    distinct_source_tags: usize,
    recent: &[(String, Vec<String>)],
) -> QualityBreakdown {
    let requested = config.modules.len().max(1);
    let structure = article.sections.len() as f64 / requested as f64;

    let targets = module_targets(&config.modules);
    let target_words: usize = config
        .modules
        .iter()
        .zip(&targets)
        .filter(|(module, _)| article.sections.iter().any(|s| s.module == module.name))
        .map(|(_, target)| *target)
        .sum();
    let rendered_words: usize = article
        .sections
        .iter()
        .map(|s| word_count(&s.content))
        .sum();
    let length = if target_words == 0 {
        0.0
    } else {
        let ratio = rendered_words as f64 / target_words as f64;
        (1.0 - (ratio - 1.0).abs()).clamp(0.0, 1.0)
    };

    let diversity = (distinct_source_tags as f64 / DIVERSITY_SATURATION).min(1.0);

    let redundancy = recent
        .iter()
        .map(|(title, keywords)| overlap(article, title, keywords))
        .fold(0.0, f64::max);
    let novelty = 1.0 - redundancy;

    let aggregate = (W_STRUCTURE * structure
        + W_LENGTH * length
        + W_DIVERSITY * diversity
        + W_NOVELTY * novelty)
        .clamp(0.0, 1.0);

    QualityBreakdown {
        structure,
        length,
        diversity,
        novelty,
        aggregate,
    }
}

/// Publish/draft decision against the digest's threshold.
pub fn decide(breakdown: &QualityBreakdown, threshold: f64) -> ArticleStatus {
    if breakdown.aggregate >= threshold {
        ArticleStatus::Published
    } else {
        ArticleStatus::Draft
    }
}

/// Textual overlap between a draft and one previously published article:
/// the stronger of title similarity and keyword-set overlap.
fn overlap(article: &DigestArticle, title: &str, keywords: &[String]) -> f64 {
    let title_sim = jaro_winkler(
        &article.title.to_lowercase(),
        &title.to_lowercase(),
    );

    let keyword_sim = if article.keywords.is_empty() || keywords.is_empty() {
        0.0
    } else {
        let ours: std::collections::HashSet<&str> =
            article.keywords.iter().map(String::as_str).collect();
        let theirs: std::collections::HashSet<&str> =
            keywords.iter().map(String::as_str).collect();
        let intersection = ours.intersection(&theirs).count() as f64;
        let union = ours.union(&theirs).count() as f64;
        intersection / union
    };

    title_sim.max(keyword_sim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{default_modules, ArticleSection};
    use chrono::{NaiveDate, Utc};

    fn config() -> DigestConfig {
        DigestConfig {
            id: 1,
            name: "Tech Daily".to_string(),
            slug: "tech-daily".to_string(),
            description: String::new(),
            tags: vec!["tech".to_string()],
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
            total_tokens: 0,
        }
    }

    fn article_with_sections(words_per_section: usize) -> DigestArticle {
        let body = vec!["word"; words_per_section].join(" ");
        let sections = default_modules()
            .iter()
            .map(|m| ArticleSection {
                module: m.name.clone(),
                title: m.title.clone(),
                content: body.clone(),
            })
            .collect();
        DigestArticle {
            id: 0,
            digest_id: 1,
            run_date: NaiveDate::from_ymd_opt(2026, 8, 20).unwrap(),
            title: "Central bank raises rates".to_string(),
            summary: String::new(),
            sections,
            keywords: vec!["rates".to_string(), "inflation".to_string()],
            source_links: vec!["https://example.com/1".to_string()],
            reading_minutes: 4,
            quality: None,
            status: crate::models::ArticleStatus::Draft,
            tokens_used: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn scoring_is_deterministic() {
        let config = config();
        let article = article_with_sections(200);
        let recent = vec![(
            "Rates and inflation".to_string(),
            vec!["rates".to_string()],
        )];
        let first = evaluate(&config, &article, 3, &recent);
        let second = evaluate(&config, &article, 3, &recent);
        assert_eq!(first, second);
    }

    #[test]
    fn complete_diverse_article_publishes() {
        let config = config();
        let article = article_with_sections(200);
        let breakdown = evaluate(&config, &article, 3, &[]);
        assert_eq!(breakdown.structure, 1.0);
        assert_eq!(breakdown.diversity, 1.0);
        assert_eq!(breakdown.novelty, 1.0);
        assert!(breakdown.aggregate >= config.publish_threshold);
        assert_eq!(
            decide(&breakdown, config.publish_threshold),
            ArticleStatus::Published
        );
    }

    #[test]
    fn near_duplicate_topic_is_penalized() {
        let config = config();
        let article = article_with_sections(200);
        let fresh = evaluate(&config, &article, 3, &[]);
        let duplicated = evaluate(
            &config,
            &article,
            3,
            &[(
                article.title.clone(),
                article.keywords.clone(),
            )],
        );
        assert!(duplicated.aggregate < fresh.aggregate);
        assert_eq!(duplicated.novelty, 0.0);
    }

    #[test]
    fn missing_modules_lower_structure() {
        let config = config();
        let mut article = article_with_sections(200);
        article.sections.truncate(2);
        let breakdown = evaluate(&config, &article, 3, &[]);
        assert_eq!(breakdown.structure, 0.5);
    }

    #[test]
    fn single_source_tag_limits_diversity() {
        let config = config();
        let article = article_with_sections(200);
        let breakdown = evaluate(&config, &article, 1, &[]);
        assert!((breakdown.diversity - 1.0 / 3.0).abs() < 1e-9);
    }
}
