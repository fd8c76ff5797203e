use serde::Serialize;

use crate::models::Candidate;

/// Which clustering tier produced a run's clusters, recorded for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMethod {
    Semantic,
    Features,
}

impl ClusterMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterMethod::Semantic => "semantic",
            ClusterMethod::Features => "features",
        }
    }
}

/// An ephemeral, in-memory grouping of candidates produced by one run.
/// Never persisted independently of the article it produces.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub members: Vec<Candidate>,
    pub label: Option<String>,
    pub keywords: Vec<String>,
    pub summary: Option<String>,
}

impl Cluster {
    pub fn from_members(members: Vec<Candidate>) -> Self {
        Cluster {
            members,
            label: None,
            keywords: Vec::new(),
            summary: None,
        }
    }

    /// Earliest member publish timestamp, used for deterministic ordering.
    pub fn earliest_published(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.members.iter().map(|m| m.published_at).min()
    }
}

/// The clusters of one run plus the tier that produced them. When the
/// fallback tier ran, `note` records why, for the run's error summary.
#[derive(Debug)]
pub struct ClusterOutcome {
    pub clusters: Vec<Cluster>,
    pub method: ClusterMethod,
    pub note: Option<String>,
}
