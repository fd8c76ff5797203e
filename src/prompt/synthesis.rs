use crate::clustering::Cluster;
use crate::models::DigestConfig;
use crate::text::excerpt;

/// Maximum number of body characters forwarded per cluster member.
const MEMBER_EXCERPT_CHARS: usize = 500;

const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a senior news analyst who synthesizes multiple related news stories into one high-quality analytical article.

Your articles:
- Accurately extract the core information from every source.
- Provide unique insight and analysis, not a bare retelling.
- Are clearly structured, rigorously argued, and concisely written.
- Stay objective and data-driven.

Always respond with JSON only. Do not narrate your actions or restate these instructions."#;

/// The system role for a synthesis call: the digest's configured analyst
/// persona, or the default one, plus the output-language requirement.
pub fn synthesis_system_prompt(config: &DigestConfig) -> String {
    let persona = config
        .system_prompt
        .as_deref()
        .unwrap_or(DEFAULT_SYSTEM_PROMPT);
    format!("{}\n\nWrite all output in {}.", persona, config.target_language)
}

/// Builds the user-turn payload for one cluster: the member articles, the
/// requested content modules with their target lengths, and the response
/// contract the parser relies on.
pub fn synthesis_prompt(cluster: &Cluster, config: &DigestConfig, targets: &[usize]) -> String {
    let members: Vec<String> = cluster
        .members
        .iter()
        .enumerate()
        .map(|(i, member)| {
            format!(
                "Article {}:\nTitle: {}\nPublished: {}\nLink: {}\nContent: {}",
                i + 1,
                member.title,
                member.published_at.format("%Y-%m-%d %H:%M"),
                member.link,
                excerpt(&member.body, MEMBER_EXCERPT_CHARS),
            )
        })
        .collect();

    let module_lines: Vec<String> = config
        .modules
        .iter()
        .zip(targets)
        .map(|(module, target)| {
            format!(
                "- \"{}\" ({}): roughly {} words",
                module.name, module.title, target
            )
        })
        .collect();

    let topic_line = match &cluster.label {
        Some(label) => format!("Topic: {}\nKeywords: {}\n\n", label, cluster.keywords.join(", ")),
        None => String::new(),
    };

    let instructions = config.article_prompt.as_deref().unwrap_or(
        "Write one analytical article that synthesizes the source articles below into the requested sections.",
    );

    format!(
        r#"{instructions}

{topic_line}Source articles:

{members}

Requested sections:
{modules}

Respond with JSON only, in this exact shape:
```json
{{
  "title": "Article title",
  "summary": "Article summary, at most 50 words",
  "sections": {{
    "<section name>": "Section content in Markdown"
  }}
}}
```
Use the section names exactly as listed above as the keys of "sections". Omit a section entirely if the sources do not support it."#,
        instructions = instructions,
        topic_line = topic_line,
        members = members.join("\n\n"),
        modules = module_lines.join("\n"),
    )
}
