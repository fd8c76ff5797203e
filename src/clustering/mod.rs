// Module declarations
pub mod features;
pub mod semantic;
pub mod types;

pub use types::{Cluster, ClusterMethod, ClusterOutcome};

pub use features::FeatureClusterer;
pub use semantic::SemanticClusterer;

use tracing::{info, warn};

use crate::error::ClusterError;
use crate::llm::{AiAgent, TokenUsage};
use crate::models::Candidate;
use crate::TARGET_PIPELINE;

/// One tier's attempt: the clusters it produced (or its failure) plus the
/// token spend the attempt incurred. Spend is reported whether or not the
/// attempt qualified, so run accounting stays accurate.
#[derive(Debug)]
pub struct ClusterAttempt {
    pub usage: TokenUsage,
    pub result: Result<Vec<Cluster>, ClusterError>,
}

/// Polymorphic clustering capability: group candidates into topic clusters
/// of at least `min_size` members. Candidates that join no qualifying
/// cluster are dropped from the run, not retried.
#[allow(async_fn_in_trait)]
pub trait Clusterer {
    fn method(&self) -> ClusterMethod;

    async fn cluster(&self, candidates: &[Candidate], min_size: usize) -> ClusterAttempt;
}

/// Orders clusters by descending member count, then by earliest member
/// publish timestamp, for reproducible downstream numbering.
pub fn order_clusters(clusters: &mut [Cluster]) {
    clusters.sort_by(|a, b| {
        b.members
            .len()
            .cmp(&a.members.len())
            .then_with(|| a.earliest_published().cmp(&b.earliest_published()))
    });
}

/// Runs the two-tier clustering: the AI-semantic path first, falling back
/// to feature-based clustering when the agent fails, times out, or returns
/// output that cannot be fully validated. An inconsistent semantic
/// assignment is never partially accepted. The accumulated token usage of
/// every attempt is returned alongside the result, including when the run
/// ultimately fails.
pub async fn run_clustering<A: AiAgent>(
    agent: &A,
    candidates: &[Candidate],
    min_size: usize,
) -> (TokenUsage, Result<ClusterOutcome, ClusterError>) {
    let mut usage = TokenUsage::default();
    if candidates.len() < min_size {
        return (
            usage,
            Err(ClusterError::InsufficientCandidates {
                found: candidates.len(),
                required: min_size,
            }),
        );
    }

    let semantic = SemanticClusterer::new(agent);
    let attempt = semantic.cluster(candidates, min_size).await;
    usage.add(attempt.usage);

    let note;
    match attempt.result {
        Ok(clusters) if !clusters.is_empty() => {
            let mut clusters = clusters;
            order_clusters(&mut clusters);
            info!(
                target: TARGET_PIPELINE,
                "Semantic clustering produced {} clusters from {} candidates",
                clusters.len(),
                candidates.len()
            );
            return (
                usage,
                Ok(ClusterOutcome {
                    clusters,
                    method: ClusterMethod::Semantic,
                    note: None,
                }),
            );
        }
        Ok(_) => {
            warn!(
                target: TARGET_PIPELINE,
                "Semantic clustering produced no qualifying clusters, trying feature fallback"
            );
            note = Some("semantic clustering produced no qualifying clusters".to_string());
        }
        Err(e) => {
            warn!(
                target: TARGET_PIPELINE,
                "Semantic clustering failed ({}), trying feature fallback", e
            );
            note = Some(format!("semantic clustering failed: {}", e));
        }
    }

    let fallback = FeatureClusterer::default();
    let attempt = fallback.cluster(candidates, min_size).await;
    usage.add(attempt.usage);
    let mut clusters = match attempt.result {
        Ok(clusters) => clusters,
        Err(e) => return (usage, Err(e)),
    };
    if clusters.is_empty() {
        return (usage, Err(ClusterError::NoQualifyingClusters(min_size)));
    }
    order_clusters(&mut clusters);
    info!(
        target: TARGET_PIPELINE,
        "Feature clustering produced {} clusters from {} candidates",
        clusters.len(),
        candidates.len()
    );
    (
        usage,
        Ok(ClusterOutcome {
            clusters,
            method: ClusterMethod::Features,
            note,
        }),
    )
}
