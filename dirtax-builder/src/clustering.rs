//! Topic clustering
//!
//! The pipeline treats clustering as an external collaborator behind the
//! [`Clusterer`] trait: documents plus their vectors in, one topic id per
//! document (noise = `-1`) and ranked keywords per topic out.
//!
//! [`CentroidClusterer`] is the built-in deterministic implementation:
//! 1. Visit documents in an order shuffled by the configured seed
//! 2. Join the most similar existing cluster when cosine similarity to its
//!    centroid reaches `join_threshold`, else start a new cluster
//! 3. Enforce the cluster cap by merging the smallest cluster into its
//!    nearest neighbour
//! 4. Clusters below `min_cluster_size` become noise
//! 5. Renumber by size, largest first
//!
//! Keywords are class-based TF-IDF over unigrams and bigrams.

use crate::models::{TopicCandidate, NOISE_TOPIC_ID};
use crate::models::taxonomy::CANDIDATE_EXAMPLES;
use dirtax_common::atomic::{read_json_if_exists, write_json_atomic};
use dirtax_common::config::defaults;
use dirtax_common::time::utc_now_string;
use dirtax_common::{Error, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Keywords kept per topic
pub const KEYWORDS_PER_TOPIC: usize = 12;

pub const CLUSTER_CACHE_FILE: &str = "cache.clusters.json";
const CLUSTER_CACHE_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterOutput {
    /// Topic id per document, parallel to the input
    pub assignments: Vec<i32>,
    /// Ranked keywords per non-noise topic id
    pub keywords: BTreeMap<i32, Vec<String>>,
}

impl ClusterOutput {
    pub fn topic_count(&self) -> usize {
        self.keywords.len()
    }

    pub fn noise_count(&self) -> usize {
        self.assignments.iter().filter(|&&t| t == NOISE_TOPIC_ID).count()
    }
}

pub trait Clusterer: Send + Sync {
    fn cluster(&self, docs: &[String], vectors: &[Vec<f32>]) -> Result<ClusterOutput>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterSettings {
    pub min_cluster_size: usize,
    pub random_seed: u64,
    /// Negative = derive from corpus size, zero = unbounded, positive = cap
    pub target_clusters: i64,
    pub join_threshold: f32,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            min_cluster_size: defaults::MIN_CLUSTER_SIZE,
            random_seed: defaults::RANDOM_SEED,
            target_clusters: defaults::TARGET_CLUSTERS,
            join_threshold: defaults::JOIN_THRESHOLD,
        }
    }
}

impl ClusterSettings {
    /// Maximum number of clusters for a corpus of `n` documents
    pub fn cluster_cap(&self, n: usize) -> usize {
        match self.target_clusters {
            t if t < 0 => {
                let auto = ((n as f64) / 2.0).sqrt().round() as usize;
                auto.clamp(2, 64)
            }
            0 => usize::MAX,
            t => t as usize,
        }
    }
}

#[derive(Debug, Clone)]
struct Cluster {
    sum: Vec<f32>,
    members: Vec<usize>,
}

impl Cluster {
    fn new(index: usize, vector: &[f32]) -> Self {
        Self {
            sum: vector.to_vec(),
            members: vec![index],
        }
    }

    fn similarity(&self, vector: &[f32]) -> f32 {
        let norm = l2_norm(&self.sum);
        if norm == 0.0 {
            return 0.0;
        }
        dot(&self.sum, vector) / norm
    }

    fn absorb(&mut self, other: Cluster) {
        for (a, b) in self.sum.iter_mut().zip(other.sum.iter()) {
            *a += b;
        }
        self.members.extend(other.members);
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn l2_norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// Unit-length copy of `v`; a zero vector stays zero
pub fn normalized(v: &[f32]) -> Vec<f32> {
    let norm = l2_norm(v);
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

#[derive(Debug, Clone, Default)]
pub struct CentroidClusterer {
    settings: ClusterSettings,
}

impl CentroidClusterer {
    pub fn new(settings: ClusterSettings) -> Self {
        Self { settings }
    }

    fn leader_pass(&self, vectors: &[Vec<f32>]) -> Vec<Cluster> {
        let mut order: Vec<usize> = (0..vectors.len()).collect();
        let mut rng = rand::rngs::StdRng::seed_from_u64(self.settings.random_seed);
        order.shuffle(&mut rng);

        let mut clusters: Vec<Cluster> = Vec::new();
        for index in order {
            let vector = &vectors[index];
            let best = clusters
                .iter()
                .enumerate()
                .map(|(ci, c)| (ci, c.similarity(vector)))
                .fold(None, |best: Option<(usize, f32)>, (ci, sim)| match best {
                    Some((_, b)) if b >= sim => best,
                    _ => Some((ci, sim)),
                });

            match best {
                Some((ci, sim)) if sim >= self.settings.join_threshold => {
                    let cluster = &mut clusters[ci];
                    for (a, b) in cluster.sum.iter_mut().zip(vector.iter()) {
                        *a += b;
                    }
                    cluster.members.push(index);
                }
                _ => clusters.push(Cluster::new(index, vector)),
            }
        }
        clusters
    }

    fn enforce_cap(clusters: &mut Vec<Cluster>, cap: usize) {
        while clusters.len() > cap.max(1) {
            let Some(smallest) = (0..clusters.len()).min_by_key(|&i| (clusters[i].members.len(), i)) else {
                return;
            };
            let removed = clusters.remove(smallest);
            let centroid = normalized(&removed.sum);

            let nearest = clusters
                .iter()
                .enumerate()
                .map(|(ci, c)| (ci, c.similarity(&centroid)))
                .fold(None, |best: Option<(usize, f32)>, (ci, sim)| match best {
                    Some((_, b)) if b >= sim => best,
                    _ => Some((ci, sim)),
                });
            match nearest {
                Some((ci, _)) => clusters[ci].absorb(removed),
                None => {
                    clusters.push(removed);
                    return;
                }
            }
        }
    }
}

impl Clusterer for CentroidClusterer {
    fn cluster(&self, docs: &[String], vectors: &[Vec<f32>]) -> Result<ClusterOutput> {
        if docs.len() != vectors.len() {
            return Err(Error::InvalidInput(format!(
                "clustering got {} documents but {} vectors",
                docs.len(),
                vectors.len()
            )));
        }
        if docs.is_empty() {
            return Ok(ClusterOutput::default());
        }

        let unit: Vec<Vec<f32>> = vectors.iter().map(|v| normalized(v)).collect();
        let mut clusters = self.leader_pass(&unit);
        let initial = clusters.len();

        let cap = self.settings.cluster_cap(docs.len());
        Self::enforce_cap(&mut clusters, cap);

        let min_size = self.settings.min_cluster_size.max(1);
        let mut kept: Vec<Cluster> = clusters
            .into_iter()
            .filter(|c| c.members.len() >= min_size)
            .collect();
        for cluster in &mut kept {
            cluster.members.sort_unstable();
        }
        kept.sort_by_key(|c| (std::cmp::Reverse(c.members.len()), c.members[0]));

        let mut assignments = vec![NOISE_TOPIC_ID; docs.len()];
        for (topic_id, cluster) in kept.iter().enumerate() {
            for &member in &cluster.members {
                assignments[member] = topic_id as i32;
            }
        }

        let keywords = class_tfidf_keywords(docs, &assignments, KEYWORDS_PER_TOPIC);
        let output = ClusterOutput { assignments, keywords };
        let cap_field: i64 = if cap == usize::MAX { -1 } else { cap as i64 };

        info!(
            documents = docs.len(),
            initial_clusters = initial,
            cap = cap_field,
            topics = output.topic_count(),
            noise = output.noise_count(),
            "Clustering complete"
        );
        Ok(output)
    }
}

// ============================================================================
// Keywords
// ============================================================================

const STOPWORDS: &[&str] = &[
    "a", "about", "above", "across", "after", "again", "against", "all", "almost", "also", "among",
    "an", "and", "any", "are", "as", "at", "based", "be", "been", "before", "being", "between",
    "both", "but", "by", "can", "could", "do", "does", "during", "each", "either", "etc", "for",
    "from", "further", "had", "has", "have", "how", "however", "if", "in", "into", "is", "it",
    "its", "itself", "more", "most", "much", "new", "no", "nor", "not", "of", "on", "only", "or",
    "other", "our", "over", "per", "same", "several", "should", "so", "some", "such", "than",
    "that", "the", "their", "them", "then", "there", "these", "they", "this", "those", "through",
    "to", "toward", "towards", "under", "using", "upon", "use", "used", "very", "via", "was",
    "we", "were", "what", "when", "where", "whether", "which", "while", "who", "with", "within",
    "without", "would",
];

fn tokenize(text: &str) -> Vec<String> {
    let words: Vec<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 2 && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect();

    let mut terms = words.clone();
    terms.extend(words.windows(2).map(|pair| format!("{} {}", pair[0], pair[1])));
    terms
}

/// Rank terms per topic by class-based TF-IDF:
/// `tf(t, c) * ln(1 + avg_terms_per_class / freq(t))`.
pub fn class_tfidf_keywords(docs: &[String], assignments: &[i32], top_n: usize) -> BTreeMap<i32, Vec<String>> {
    let mut class_counts: BTreeMap<i32, BTreeMap<String, usize>> = BTreeMap::new();
    for (doc, &topic) in docs.iter().zip(assignments.iter()) {
        if topic == NOISE_TOPIC_ID {
            continue;
        }
        let counts = class_counts.entry(topic).or_default();
        for term in tokenize(doc) {
            *counts.entry(term).or_insert(0) += 1;
        }
    }
    if class_counts.is_empty() {
        return BTreeMap::new();
    }

    let mut global: BTreeMap<&str, usize> = BTreeMap::new();
    for counts in class_counts.values() {
        for (term, &n) in counts {
            *global.entry(term.as_str()).or_insert(0) += n;
        }
    }
    let total_terms: usize = global.values().sum();
    let avg_terms = total_terms as f64 / class_counts.len() as f64;

    class_counts
        .iter()
        .map(|(&topic, counts)| {
            let class_total: usize = counts.values().sum();
            let mut scored: Vec<(&str, f64)> = counts
                .iter()
                .map(|(term, &n)| {
                    let tf = n as f64 / class_total.max(1) as f64;
                    let freq = global.get(term.as_str()).copied().unwrap_or(1).max(1) as f64;
                    (term.as_str(), tf * (1.0 + avg_terms / freq).ln())
                })
                .collect();
            scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
            let keywords = scored.into_iter().take(top_n).map(|(t, _)| t.to_string()).collect();
            (topic, keywords)
        })
        .collect()
}

// ============================================================================
// Candidates
// ============================================================================

/// One candidate per non-noise topic, ordered by topic id.
pub fn build_candidates(docs: &[String], output: &ClusterOutput) -> Vec<TopicCandidate> {
    let mut members: BTreeMap<i32, Vec<&String>> = BTreeMap::new();
    for (doc, &topic) in docs.iter().zip(output.assignments.iter()) {
        if topic != NOISE_TOPIC_ID {
            members.entry(topic).or_default().push(doc);
        }
    }

    members
        .into_iter()
        .map(|(topic_id, docs)| TopicCandidate {
            topic_id,
            size: docs.len(),
            keywords: output
                .keywords
                .get(&topic_id)
                .map(|k| k.iter().take(KEYWORDS_PER_TOPIC).cloned().collect())
                .unwrap_or_default(),
            examples: docs.into_iter().take(CANDIDATE_EXAMPLES).cloned().collect(),
        })
        .collect()
}

// ============================================================================
// Cache
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClusterCacheDoc {
    version: u32,
    fingerprint: String,
    updated_at: String,
    output: ClusterOutput,
}

/// Cached clustering for `fingerprint`, valid only when it covers exactly
/// `record_count` documents.
pub fn load_cached(dir: &Path, fingerprint: &str, record_count: usize) -> Result<Option<ClusterOutput>> {
    let path = dir.join(CLUSTER_CACHE_FILE);
    let doc: ClusterCacheDoc = match read_json_if_exists(&path) {
        Ok(Some(doc)) => doc,
        Ok(None) => return Ok(None),
        Err(Error::Json(e)) => {
            warn!(path = %path.display(), error = %e, "Cluster cache unreadable, recomputing");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    if doc.version != CLUSTER_CACHE_VERSION
        || doc.fingerprint != fingerprint
        || doc.output.assignments.len() != record_count
    {
        debug!("Cluster cache stale");
        return Ok(None);
    }
    Ok(Some(doc.output))
}

pub fn store_cached(dir: &Path, fingerprint: &str, output: &ClusterOutput) -> Result<()> {
    write_json_atomic(
        &dir.join(CLUSTER_CACHE_FILE),
        &ClusterCacheDoc {
            version: CLUSTER_CACHE_VERSION,
            fingerprint: fingerprint.to_string(),
            updated_at: utc_now_string(),
            output: output.clone(),
        },
    )
}
