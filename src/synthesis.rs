use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::clustering::Cluster;
use crate::error::SynthesisError;
use crate::llm::{AiAgent, TokenUsage};
use crate::models::{ArticleSection, ArticleStatus, ContentModule, DigestArticle, DigestConfig};
use crate::prompt;
use crate::text::{reading_minutes, strip_code_fence, word_count};
use crate::TARGET_PIPELINE;

/// Total word budget for one digest article, split across modules by their
/// relative weights.
pub const BASE_ARTICLE_WORDS: usize = 800;

/// Floor for any single module's word target.
const MIN_MODULE_WORDS: usize = 50;

/// Per-module word targets derived from the configured relative weights.
pub fn module_targets(modules: &[ContentModule]) -> Vec<usize> {
    let total: f64 = modules.iter().map(|m| m.weight.max(0.0)).sum();
    if total <= 0.0 {
        let even = (BASE_ARTICLE_WORDS / modules.len().max(1)).max(MIN_MODULE_WORDS);
        return vec![even; modules.len()];
    }
    modules
        .iter()
        .map(|m| {
            let share = BASE_ARTICLE_WORDS as f64 * m.weight.max(0.0) / total;
            (share.round() as usize).max(MIN_MODULE_WORDS)
        })
        .collect()
}

/// The result of synthesizing one cluster. Token usage is reported even
/// when parsing fails, so the run's counters stay accurate.
#[derive(Debug)]
pub struct SynthesisOutcome {
    pub usage: TokenUsage,
    pub result: Result<DigestArticle, SynthesisError>,
}

/// Drives the agent to produce one multi-section article for a cluster.
/// A failure here never aborts the run; the caller records it and moves on.
pub async fn synthesize_cluster<A: AiAgent>(
    agent: &A,
    cluster: &Cluster,
    config: &DigestConfig,
    run_date: NaiveDate,
    created_at: DateTime<Utc>,
) -> SynthesisOutcome {
    let targets = module_targets(&config.modules);
    let system = prompt::synthesis_system_prompt(config);
    let payload = prompt::synthesis_prompt(cluster, config, &targets);

    let completion = match agent.complete(&system, &payload).await {
        Ok(completion) => completion,
        Err(e) => {
            warn!(target: TARGET_PIPELINE, "Synthesis agent call failed: {}", e);
            return SynthesisOutcome {
                usage: TokenUsage::default(),
                result: Err(e.into()),
            };
        }
    };

    let usage = completion.usage;
    let result = parse_synthesis_response(&completion.text, config).map(|parsed| {
        let words: usize = parsed
            .sections
            .iter()
            .map(|s| word_count(&s.content))
            .sum();

        debug!(
            target: TARGET_PIPELINE,
            "Synthesized '{}': {} sections, {} words, {} tokens",
            parsed.title,
            parsed.sections.len(),
            words,
            usage.total()
        );

        DigestArticle {
            id: 0,
            digest_id: config.id,
            run_date,
            title: parsed.title,
            summary: parsed.summary,
            sections: parsed.sections,
            keywords: cluster.keywords.clone(),
            source_links: cluster.members.iter().map(|m| m.link.clone()).collect(),
            reading_minutes: reading_minutes(words),
            quality: None,
            status: ArticleStatus::Draft,
            tokens_used: usage.total() as i64,
            created_at,
        }
    });

    SynthesisOutcome { usage, result }
}

#[derive(Debug)]
struct ParsedSynthesis {
    title: String,
    summary: String,
    sections: Vec<ArticleSection>,
}

/// Parses the agent's structured document against the section contract:
/// mandatory title, at least one requested section. Modules the agent
/// omitted are recorded as absent, not as empty placeholders.
fn parse_synthesis_response(
    response: &str,
    config: &DigestConfig,
) -> Result<ParsedSynthesis, SynthesisError> {
    let value: Value = serde_json::from_str(strip_code_fence(response))
        .map_err(|e| SynthesisError::MalformedResponse(e.to_string()))?;

    let title = value
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(SynthesisError::MissingTitle)?
        .to_string();

    let summary = value
        .get("summary")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    let section_map = value
        .get("sections")
        .and_then(Value::as_object)
        .ok_or(SynthesisError::NoSections)?;

    let sections: Vec<ArticleSection> = config
        .modules
        .iter()
        .filter_map(|module| {
            section_map
                .get(&module.name)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|content| !content.is_empty())
                .map(|content| ArticleSection {
                    module: module.name.clone(),
                    title: module.title.clone(),
                    content: content.to_string(),
                })
        })
        .collect();

    if sections.is_empty() {
        return Err(SynthesisError::NoSections);
    }

    Ok(ParsedSynthesis {
        title,
        summary,
        sections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::default_modules;

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

    #[test]
    fn parses_full_document_in_module_order() {
        let response = r#"```json
{
  "title": "Rates climb again",
  "summary": "Central banks keep tightening.",
  "sections": {
    "analysis": "Deep analysis here.",
    "timeline": "First this, then that.",
    "impact": "Markets reacted."
  }
}
```"#;
        let parsed = parse_synthesis_response(response, &config()).unwrap();
        assert_eq!(parsed.title, "Rates climb again");
        // "viewpoints" was omitted: absent, not an empty placeholder
        let names: Vec<&str> = parsed.sections.iter().map(|s| s.module.as_str()).collect();
        assert_eq!(names, vec!["timeline", "analysis", "impact"]);
    }

    #[test]
    fn missing_title_is_a_typed_failure() {
        let response = r#"{"sections": {"timeline": "content"}}"#;
        let err = parse_synthesis_response(response, &config()).unwrap_err();
        assert!(matches!(err, SynthesisError::MissingTitle));
    }

    #[test]
    fn empty_sections_are_a_typed_failure() {
        let response = r#"{"title": "T", "sections": {"unknown_module": "content"}}"#;
        let err = parse_synthesis_response(response, &config()).unwrap_err();
        assert!(matches!(err, SynthesisError::NoSections));
    }

    #[test]
    fn prose_is_malformed() {
        let err = parse_synthesis_response("Sure! Here is the article...", &config())
            .unwrap_err();
        assert!(matches!(err, SynthesisError::MalformedResponse(_)));
    }

    #[test]
    fn targets_follow_weights() {
        let targets = module_targets(&default_modules());
        assert_eq!(targets.len(), 4);
        // "analysis" carries twice the weight of the others
        assert_eq!(targets[2], 2 * targets[0]);
        assert_eq!(targets.iter().sum::<usize>(), BASE_ARTICLE_WORDS);
    }
}
