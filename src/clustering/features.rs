use std::collections::{BTreeMap, HashMap};

use crate::clustering::{Cluster, ClusterAttempt, ClusterMethod, Clusterer};
use crate::llm::TokenUsage;
use crate::models::Candidate;
use crate::text::tokens;

/// Minimum cosine similarity for two candidates to be considered neighbors.
const SIMILARITY_THRESHOLD: f64 = 0.2;

/// Classical fallback tier: TF-IDF features over segmented tokens, cosine
/// similarity, and greedy density grouping. Deterministic for identical
/// input; candidates that reach no group of `min_size` are dropped as noise.
pub struct FeatureClusterer {
    similarity_threshold: f64,
}

impl Default for FeatureClusterer {
    fn default() -> Self {
        FeatureClusterer {
            similarity_threshold: SIMILARITY_THRESHOLD,
        }
    }
}

// Ordered so that similarity sums are bit-for-bit reproducible.
type TermVector = BTreeMap<String, f64>;

impl FeatureClusterer {
    fn vectorize(&self, candidates: &[Candidate]) -> Vec<TermVector> {
        let docs: Vec<Vec<String>> = candidates
            .iter()
            .map(|c| tokens(&format!("{} {}", c.title, c.body)))
            .collect();

        // Document frequency per term
        let mut df: HashMap<&str, usize> = HashMap::new();
        for doc in &docs {
            let mut seen: Vec<&str> = doc.iter().map(String::as_str).collect();
            seen.sort_unstable();
            seen.dedup();
            for term in seen {
                *df.entry(term).or_insert(0) += 1;
            }
        }

        let n = docs.len() as f64;
        docs.iter()
            .map(|doc| {
                let mut tf: HashMap<&str, f64> = HashMap::new();
                for term in doc {
                    *tf.entry(term).or_insert(0.0) += 1.0;
                }
                let mut vector: TermVector = tf
                    .into_iter()
                    .map(|(term, count)| {
                        let idf = (n / (1.0 + df[term] as f64)).ln() + 1.0;
                        (term.to_string(), count * idf)
                    })
                    .collect();
                let norm: f64 = vector.values().map(|v| v * v).sum::<f64>().sqrt();
                if norm > 0.0 {
                    for value in vector.values_mut() {
                        *value /= norm;
                    }
                }
                vector
            })
            .collect()
    }
}

fn cosine(a: &TermVector, b: &TermVector) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .filter_map(|(term, weight)| large.get(term).map(|other| weight * other))
        .sum()
}

impl Clusterer for FeatureClusterer {
    fn method(&self) -> ClusterMethod {
        ClusterMethod::Features
    }

    async fn cluster(&self, candidates: &[Candidate], min_size: usize) -> ClusterAttempt {
        let vectors = self.vectorize(candidates);
        let n = candidates.len();
        let mut assigned = vec![false; n];
        let mut clusters = Vec::new();

        // Greedy density grouping, seeded in input order for determinism.
        for i in 0..n {
            if assigned[i] {
                continue;
            }
            let mut group = vec![i];
            for j in 0..n {
                if j == i || assigned[j] || group.contains(&j) {
                    continue;
                }
                if cosine(&vectors[i], &vectors[j]) >= self.similarity_threshold {
                    group.push(j);
                }
            }
            if group.len() >= min_size {
                for &idx in &group {
                    assigned[idx] = true;
                }
                clusters.push(Cluster::from_members(
                    group.iter().map(|&idx| candidates[idx].clone()).collect(),
                ));
            }
        }

        ClusterAttempt {
            usage: TokenUsage::default(),
            result: Ok(clusters),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::order_clusters;
    use chrono::{TimeZone, Utc};

    fn candidate(id: i64, title: &str, body: &str) -> Candidate {
        Candidate {
            id,
            title: title.to_string(),
            body: body.to_string(),
            published_at: Utc
                .with_ymd_and_hms(2026, 8, 20, 6 + (id as u32 % 12), 0, 0)
                .unwrap(),
            tags: vec!["news".to_string()],
            link: format!("https://example.com/{}", id),
        }
    }

    fn two_topic_pool() -> Vec<Candidate> {
        let mut pool = Vec::new();
        // Six articles about a central bank rate decision
        for i in 0..6 {
            pool.push(candidate(
                i,
                "Central bank raises interest rates again",
                "The central bank raised interest rates citing inflation pressure. \
                 Economists expect rates and inflation to dominate monetary policy debates.",
            ));
        }
        // Four articles about a rocket launch
        for i in 6..10 {
            pool.push(candidate(
                i,
                "Rocket launch delivers satellites to orbit",
                "The rocket launch placed communication satellites into orbit. \
                 Engineers celebrated the launch vehicle and satellite deployment.",
            ));
        }
        pool
    }

    #[tokio::test]
    async fn groups_two_true_topics() {
        let pool = two_topic_pool();
        let clusterer = FeatureClusterer::default();
        let mut clusters = clusterer.cluster(&pool, 3).await.result.unwrap();
        order_clusters(&mut clusters);

        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].members.len(), 6);
        assert_eq!(clusters[1].members.len(), 4);
    }

    #[tokio::test]
    async fn drops_noise_below_minimum_size() {
        let mut pool = two_topic_pool();
        pool.push(candidate(
            10,
            "Local bakery wins pastry award",
            "A bakery won a regional pastry award for its croissants.",
        ));

        let clusterer = FeatureClusterer::default();
        let clusters = clusterer.cluster(&pool, 3).await.result.unwrap();

        let clustered: usize = clusters.iter().map(|c| c.members.len()).sum();
        assert_eq!(clustered, 10);
        assert!(clusters
            .iter()
            .all(|c| c.members.iter().all(|m| m.id != 10)));
    }

    #[tokio::test]
    async fn is_deterministic() {
        let pool = two_topic_pool();
        let clusterer = FeatureClusterer::default();
        let first = clusterer.cluster(&pool, 3).await.result.unwrap();
        let second = clusterer.cluster(&pool, 3).await.result.unwrap();

        let ids = |clusters: &[Cluster]| -> Vec<Vec<i64>> {
            clusters
                .iter()
                .map(|c| c.members.iter().map(|m| m.id).collect())
                .collect()
        };
        assert_eq!(ids(&first), ids(&second));
    }
}
