use crate::providers::embedding::Embedder;
use crate::providers::vector_store::{InMemoryVectorStore, VectorEntry, VectorStore};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Pre-populated reference corpus, separate from the per-run diff index so
/// the two can never be conflated. Snippets live in namespaces matching the
/// four analysis kinds and are loaded from a YAML file of the form
/// `namespace: ["snippet", ...]`.
pub struct KnowledgeBase {
    store: InMemoryVectorStore,
}

impl KnowledgeBase {
    pub fn empty() -> Self {
        Self {
            store: InMemoryVectorStore::new(),
        }
    }

    pub async fn load(path: &Path, embedder: &dyn Embedder) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read knowledge file {}", path.display()))?;
        let namespaces: BTreeMap<String, Vec<String>> =
            serde_yaml::from_str(&content).context("Failed to parse knowledge file")?;

        let mut base = Self::empty();
        for (namespace, snippets) in namespaces {
            base.seed(&namespace, &snippets, embedder).await?;
        }
        Ok(base)
    }

    pub async fn seed(
        &mut self,
        namespace: &str,
        snippets: &[String],
        embedder: &dyn Embedder,
    ) -> Result<()> {
        let mut entries = Vec::with_capacity(snippets.len());
        for (idx, snippet) in snippets.iter().enumerate() {
            let vector = embedder.embed(snippet).await?;
            entries.push(VectorEntry {
                id: format!("{}:{}", namespace, idx),
                vector,
                payload: snippet.clone(),
            });
        }
        info!(namespace, count = entries.len(), "seeded knowledge namespace");
        self.store.upsert(namespace, entries);
        Ok(())
    }

    pub fn search(&self, namespace: &str, vector: &[f32], k: usize) -> Vec<String> {
        self.store
            .query(namespace, vector, k)
            .into_iter()
            .map(|hit| hit.payload)
            .collect()
    }
}

/// Merges a snippet file into the on-disk corpus that `KnowledgeBase::load`
/// reads at analysis time. This is the ingestion path; the HTTP surface that
/// fronted it in earlier deployments is intentionally out of scope.
pub fn merge_snippet_file(corpus_path: &Path, namespace: &str, source_path: &Path) -> Result<usize> {
    let incoming: Vec<String> = serde_yaml::from_str(
        &std::fs::read_to_string(source_path)
            .with_context(|| format!("Failed to read {}", source_path.display()))?,
    )
    .context("Snippet file must be a YAML list of strings")?;

    let mut corpus: BTreeMap<String, Vec<String>> = if corpus_path.exists() {
        serde_yaml::from_str(&std::fs::read_to_string(corpus_path)?)
            .context("Existing corpus file is not valid YAML")?
    } else {
        BTreeMap::new()
    };

    let bucket = corpus.entry(namespace.to_string()).or_default();
    let mut added = 0;
    for snippet in incoming {
        if !bucket.contains(&snippet) {
            bucket.push(snippet);
            added += 1;
        }
    }

    std::fs::write(corpus_path, serde_yaml::to_string(&corpus)?)?;
    Ok(added)
}
