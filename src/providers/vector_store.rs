use serde::{Deserialize, Serialize};

/// One indexed vector with its serialized payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: String,
}

#[derive(Debug, Clone)]
pub struct ScoredPayload {
    pub score: f32,
    pub payload: String,
}

/// Namespaced vector index. The engine only ever needs upsert, similarity
/// query, and teardown; anything fancier belongs to the backing service.
pub trait VectorStore: Send + Sync {
    fn upsert(&mut self, namespace: &str, entries: Vec<VectorEntry>);

    /// Top-`k` entries of `namespace` by cosine similarity, best first.
    fn query(&self, namespace: &str, vector: &[f32], k: usize) -> Vec<ScoredPayload>;

    /// Releases everything the store holds. Must be idempotent.
    fn teardown(&mut self);
}

/// In-process store backing the per-run diff index and the reference
/// knowledge corpus. Runs own their instances, so there is nothing to leak
/// between concurrent analyses.
#[derive(Default)]
pub struct InMemoryVectorStore {
    namespaces: std::collections::HashMap<String, Vec<VectorEntry>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorStore for InMemoryVectorStore {
    fn upsert(&mut self, namespace: &str, entries: Vec<VectorEntry>) {
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .extend(entries);
    }

    fn query(&self, namespace: &str, vector: &[f32], k: usize) -> Vec<ScoredPayload> {
        let Some(entries) = self.namespaces.get(namespace) else {
            return Vec::new();
        };

        let mut scored: Vec<ScoredPayload> = entries
            .iter()
            .map(|entry| ScoredPayload {
                score: cosine_similarity(&entry.vector, vector),
                payload: entry.payload.clone(),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    fn teardown(&mut self) {
        self.namespaces.clear();
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
