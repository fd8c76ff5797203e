use serde::Deserialize;
use std::collections::HashSet;
use tracing::debug;

use crate::clustering::{Cluster, ClusterAttempt, ClusterMethod, Clusterer};
use crate::error::{AgentError, ClusterError};
use crate::llm::{AiAgent, TokenUsage};
use crate::models::Candidate;
use crate::prompt;
use crate::text::strip_code_fence;
use crate::TARGET_PIPELINE;

/// AI-backed clustering tier: submits compact candidate representations to
/// the agent and parses the structured assignment it returns. The whole
/// response is validated before anything is accepted; any violation fails
/// the tier so the caller can fall back.
pub struct SemanticClusterer<'a, A: AiAgent> {
    agent: &'a A,
}

impl<'a, A: AiAgent> SemanticClusterer<'a, A> {
    pub fn new(agent: &'a A) -> Self {
        SemanticClusterer { agent }
    }
}

#[derive(Debug, Deserialize)]
struct AssignmentDoc {
    clusters: Vec<AssignmentGroup>,
}

#[derive(Debug, Deserialize)]
struct AssignmentGroup {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    keywords: Vec<String>,
    member_ids: Vec<usize>,
    #[serde(default)]
    summary: Option<String>,
}

impl<'a, A: AiAgent> Clusterer for SemanticClusterer<'a, A> {
    fn method(&self) -> ClusterMethod {
        ClusterMethod::Semantic
    }

    async fn cluster(&self, candidates: &[Candidate], min_size: usize) -> ClusterAttempt {
        let payload = prompt::clustering_prompt(candidates, min_size);
        let completion = match self
            .agent
            .complete(prompt::CLUSTERING_SYSTEM_PROMPT, &payload)
            .await
        {
            Ok(completion) => completion,
            Err(e) => {
                return ClusterAttempt {
                    usage: TokenUsage::default(),
                    result: Err(ClusterError::Semantic(e)),
                }
            }
        };

        // The call itself spent tokens; count them even if the assignment
        // below fails validation.
        let usage = completion.usage;
        let result = parse_assignments(&completion.text, candidates, min_size)
            .map_err(ClusterError::Semantic);

        if let Ok(clusters) = &result {
            debug!(
                target: TARGET_PIPELINE,
                "Agent assigned {} of {} candidates into {} qualifying clusters",
                clusters.iter().map(|c| c.members.len()).sum::<usize>(),
                candidates.len(),
                clusters.len()
            );
        }

        ClusterAttempt { usage, result }
    }
}

/// Parses and validates the agent's assignment document. Validation covers
/// the full document before any group is accepted: every id must reference
/// a real candidate and no candidate may appear in more than one group.
/// Groups smaller than `min_size` are discarded after validation; their
/// members are not forced into other groups.
fn parse_assignments(
    response: &str,
    candidates: &[Candidate],
    min_size: usize,
) -> Result<Vec<Cluster>, AgentError> {
    let doc: AssignmentDoc = serde_json::from_str(strip_code_fence(response))
        .map_err(|e| AgentError::Malformed(format!("invalid assignment JSON: {}", e)))?;

    let mut seen: HashSet<usize> = HashSet::new();
    for group in &doc.clusters {
        for &id in &group.member_ids {
            if id >= candidates.len() {
                return Err(AgentError::Malformed(format!(
                    "assignment references unknown candidate id {}",
                    id
                )));
            }
            if !seen.insert(id) {
                return Err(AgentError::Malformed(format!(
                    "candidate id {} assigned to more than one cluster",
                    id
                )));
            }
        }
    }

    let clusters = doc
        .clusters
        .into_iter()
        .filter(|group| group.member_ids.len() >= min_size)
        .map(|group| {
            let members = group
                .member_ids
                .iter()
                .map(|&id| candidates[id].clone())
                .collect();
            Cluster {
                members,
                label: group.title.filter(|t| !t.trim().is_empty()),
                keywords: group.keywords,
                summary: group.summary.filter(|s| !s.trim().is_empty()),
            }
        })
        .collect();

    Ok(clusters)
}
