use std::time::Duration;
use thiserror::Error;

/// Failures of the external AI agent. Every variant is recoverable at the
/// pipeline level: clustering falls back to the feature-based method and
/// synthesis skips the affected cluster.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent request timed out after {0:?}")]
    Timeout(Duration),
    #[error("agent unreachable: {0}")]
    Unreachable(String),
    #[error("agent rate limited: {0}")]
    RateLimited(String),
    #[error("agent returned malformed output: {0}")]
    Malformed(String),
}

/// Failures of the clustering stage as a whole. A `ClusterError` from the
/// final tier aborts the run before any article is persisted.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("not enough candidates to cluster: found {found}, need at least {required}")]
    InsufficientCandidates { found: usize, required: usize },
    #[error("semantic clustering failed: {0}")]
    Semantic(#[from] AgentError),
    #[error("no cluster reached the minimum size of {0}")]
    NoQualifyingClusters(usize),
}

/// Typed synthesis failures. These never abort the run; the affected
/// cluster contributes zero articles and the run ends partially failed.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("synthesized document has no title")]
    MissingTitle,
    #[error("synthesized document contains none of the requested sections")]
    NoSections,
    #[error("could not parse synthesis response: {0}")]
    MalformedResponse(String),
    #[error(transparent)]
    Agent(#[from] AgentError),
}
