use crate::models::Candidate;
use crate::text::excerpt;

/// Maximum number of body characters forwarded per candidate, to keep the
/// clustering prompt within token limits.
const EXCERPT_CHARS: usize = 500;

pub const CLUSTERING_SYSTEM_PROMPT: &str = r#"You are a professional content analyst. You group news articles into topical clusters.

Group the articles you are given by topic similarity. Decide the number of groups yourself, so that:
1. Each group covers one clearly distinct topic.
2. Each group has enough substance to support a synthesized analysis article.
3. Articles that fit no group are simply left out.

For every group provide:
1. A concise, powerful topic title.
2. Up to 5 keywords.
3. The list of article IDs that belong to the group.
4. A topic summary of at most 200 words.

Respond with JSON only, in this exact shape:
```json
{
  "clusters": [
    {
      "id": 0,
      "title": "Topic title",
      "keywords": ["keyword1", "keyword2"],
      "member_ids": [1, 2, 3],
      "summary": "Topic summary"
    }
  ]
}
```
Do not narrate your reasoning and do not add fields beyond the ones shown."#;

/// Builds the user-turn payload for the semantic clustering call: one
/// compact block per candidate, indexed by position so the response can be
/// mapped back without exposing database ids.
pub fn clustering_prompt(candidates: &[Candidate], min_cluster_size: usize) -> String {
    let blocks: Vec<String> = candidates
        .iter()
        .enumerate()
        .map(|(i, candidate)| {
            format!(
                "ID: {}\nTitle: {}\nPublished: {}\nTags: {}\nContent: {}",
                i,
                candidate.title,
                candidate.published_at.format("%Y-%m-%d %H:%M"),
                candidate.tags.join(", "),
                excerpt(&candidate.body, EXCERPT_CHARS),
            )
        })
        .collect();

    format!(
        "Groups with fewer than {} articles will be discarded, so prefer fewer, larger groups.\n\nArticles:\n\n{}",
        min_cluster_size,
        blocks.join("\n\n")
    )
}
