use crate::core::diff_index::{DiffChunk, DiffIndexHandle};
use crate::providers::embedding::Embedder;
use crate::providers::knowledge::KnowledgeBase;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Mutex;

const KNOWLEDGE_K: usize = 4;

/// Result of a code search. An empty index or a query with no matches is a
/// valid, non-fatal outcome, so it gets a sentinel instead of an error.
#[derive(Debug)]
pub enum CodeSearch {
    Hits(Vec<DiffChunk>),
    NoResults,
}

impl CodeSearch {
    pub fn into_chunks(self) -> Vec<DiffChunk> {
        match self {
            CodeSearch::Hits(chunks) => chunks,
            CodeSearch::NoResults => Vec::new(),
        }
    }
}

/// Read-only semantic access to two distinct corpora: the current PR's
/// indexed diff and the pre-populated reference knowledge. One instance per
/// run; the query-embedding cache lives here and dies with the run, so
/// nothing is shared between concurrent analyses of different PRs.
pub struct RetrievalGateway<'a> {
    index: &'a DiffIndexHandle,
    knowledge: &'a KnowledgeBase,
    embedder: &'a dyn Embedder,
    embedding_cache: Mutex<HashMap<String, Vec<f32>>>,
}

impl<'a> RetrievalGateway<'a> {
    pub fn new(
        index: &'a DiffIndexHandle,
        knowledge: &'a KnowledgeBase,
        embedder: &'a dyn Embedder,
    ) -> Self {
        Self {
            index,
            knowledge,
            embedder,
            embedding_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Finds code in this PR matching `query`. Over-fetches 2k, filters by
    /// extension, truncates to k preserving descending relevance.
    pub async fn search_code(
        &self,
        query: &str,
        k: usize,
        extension_filter: Option<&str>,
    ) -> Result<CodeSearch> {
        if !self.index.is_built() || k == 0 {
            return Ok(CodeSearch::NoResults);
        }

        let vector = self.cached_embed(query).await?;
        let mut chunks = self.index.search(&vector, 2 * k);
        if let Some(ext) = extension_filter {
            chunks.retain(|c| c.extension == ext);
        }
        chunks.truncate(k);

        if chunks.is_empty() {
            Ok(CodeSearch::NoResults)
        } else {
            Ok(CodeSearch::Hits(chunks))
        }
    }

    /// Finds reference-knowledge snippets about `query` in the namespace of
    /// the given pass kind. Never touches the PR-code corpus.
    pub async fn search_knowledge(&self, query: &str, namespace: &str) -> Result<Vec<String>> {
        let vector = self.cached_embed(query).await?;
        Ok(self.knowledge.search(namespace, &vector, KNOWLEDGE_K))
    }

    /// Whether `line` is an added new-file line of `file` in the indexed
    /// diff. Exposed so passes can reject findings pointing outside the PR.
    pub fn line_is_addressable(&self, file: &str, line: usize) -> bool {
        self.index.line_is_addressable(file, line)
    }

    async fn cached_embed(&self, query: &str) -> Result<Vec<f32>> {
        if let Some(vector) = self.embedding_cache.lock().unwrap().get(query) {
            return Ok(vector.clone());
        }
        let vector = self.embedder.embed(query).await?;
        self.embedding_cache
            .lock()
            .unwrap()
            .insert(query.to_string(), vector.clone());
        Ok(vector)
    }
}
