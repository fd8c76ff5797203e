use std::collections::HashMap;

use crate::clustering::Cluster;
use crate::text::content_words;

/// Maximum keywords derived per cluster.
pub const MAX_KEYWORDS: usize = 5;

/// Maximum tokens in a derived cluster label.
pub const MAX_LABEL_TOKENS: usize = 8;

/// Derives an ordered keyword list from a cluster's combined text:
/// frequency-weighted terms, stoplist excluded, ties broken by first-seen
/// order. Pure function of cluster content.
pub fn extract_keywords(cluster: &Cluster, max: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut first_seen: HashMap<String, usize> = HashMap::new();
    let mut position = 0usize;

    for member in &cluster.members {
        for word in content_words(&format!("{} {}", member.title, member.body)) {
            first_seen.entry(word.clone()).or_insert(position);
            *counts.entry(word).or_insert(0) += 1;
            position += 1;
        }
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| first_seen[&a.0].cmp(&first_seen[&b.0])));
    ranked.into_iter().take(max).map(|(word, _)| word).collect()
}

/// Derives a short label from the top keywords, capped at
/// [`MAX_LABEL_TOKENS`] tokens.
pub fn derive_label(keywords: &[String], member_count: usize) -> String {
    if keywords.is_empty() {
        return format!("Topic cluster ({} articles)", member_count);
    }
    keywords
        .iter()
        .take(MAX_LABEL_TOKENS.min(3))
        .cloned()
        .collect::<Vec<_>>()
        .join(" / ")
}

/// Fills in label and keywords for clusters the semantic tier did not
/// annotate. Agent-provided metadata is kept as-is.
pub fn annotate(cluster: &mut Cluster) {
    if cluster.keywords.is_empty() {
        cluster.keywords = extract_keywords(cluster, MAX_KEYWORDS);
    }
    if cluster.label.is_none() {
        cluster.label = Some(derive_label(&cluster.keywords, cluster.members.len()));
    }
}
