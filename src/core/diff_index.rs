use crate::core::pr_data::{ChangeType, PRData};
use crate::providers::embedding::Embedder;
use crate::providers::vector_store::{VectorEntry, VectorStore};
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

pub const PR_CODE_NAMESPACE: &str = "pr-code";

const TARGET_CHUNK_CHARS: usize = 800;
// ~15% of the chunk target, carried into the next chunk.
const CHUNK_OVERLAP_CHARS: usize = 120;

static HUNK_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@@ -(\d+),?(\d*) \+(\d+),?(\d*) @@").unwrap());

/// A retrieval-indexed fragment of one file's diff. Created during indexing,
/// never mutated, discarded when the run ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffChunk {
    pub file: String,
    pub line_start: Option<usize>,
    pub line_end: Option<usize>,
    pub content: String,
    pub extension: String,
}

/// Per-run searchable index over the PR's changed code, plus the oracle of
/// exact new-file line numbers that every downstream finding is checked
/// against. Built once, read-only afterwards, torn down unconditionally at
/// the end of the run.
pub struct DiffIndexHandle {
    store: Box<dyn VectorStore>,
    chunks: Vec<DiffChunk>,
    added_lines: HashMap<String, BTreeSet<usize>>,
    built: bool,
    torn_down: bool,
}

impl DiffIndexHandle {
    pub fn new(store: Box<dyn VectorStore>) -> Self {
        Self {
            store,
            chunks: Vec::new(),
            added_lines: HashMap::new(),
            built: false,
            torn_down: false,
        }
    }

    pub async fn build(&mut self, pr: &PRData, embedder: &dyn Embedder) -> Result<()> {
        if pr.files.is_empty() {
            anyhow::bail!("pull request has no files");
        }

        let mut entries = Vec::new();
        for file in &pr.files {
            if file.change_type == ChangeType::Deleted {
                debug!(file = %file.path, "skipping deleted file");
                continue;
            }
            let Some(lines) = annotate_diff(&file.diff_text) else {
                warn!(file = %file.path, "unparseable or empty diff, skipping file");
                continue;
            };

            let added: BTreeSet<usize> = lines
                .iter()
                .filter(|l| l.added)
                .filter_map(|l| l.new_line)
                .collect();
            self.added_lines.insert(file.path.clone(), added);

            let extension = file.extension();
            for piece in chunk_lines(&lines) {
                let chunk = DiffChunk {
                    file: file.path.clone(),
                    line_start: piece.iter().filter_map(|l| l.new_line).min(),
                    line_end: piece.iter().filter_map(|l| l.new_line).max(),
                    content: piece
                        .iter()
                        .map(|l| l.text.as_str())
                        .collect::<Vec<_>>()
                        .join("\n"),
                    extension: extension.clone(),
                };

                let vector = embedder.embed(&chunk.content).await?;
                entries.push(VectorEntry {
                    id: format!("{}:{}", file.path, self.chunks.len()),
                    vector,
                    payload: serde_json::to_string(&chunk)?,
                });
                self.chunks.push(chunk);
            }
        }

        if self.chunks.is_empty() {
            anyhow::bail!("no indexable diff content in pull request");
        }

        self.store.upsert(PR_CODE_NAMESPACE, entries);
        self.built = true;
        debug!(chunks = self.chunks.len(), "diff index built");
        Ok(())
    }

    pub fn is_built(&self) -> bool {
        self.built && !self.torn_down
    }

    /// Top-`k` chunks by similarity. Empty when the index is not built; the
    /// gateway turns that into its no-results sentinel.
    pub fn search(&self, vector: &[f32], k: usize) -> Vec<DiffChunk> {
        if !self.is_built() {
            return Vec::new();
        }
        self.store
            .query(PR_CODE_NAMESPACE, vector, k)
            .into_iter()
            .filter_map(|hit| serde_json::from_str(&hit.payload).ok())
            .collect()
    }

    /// Whether `line` is an added new-file line of `file` in this PR.
    pub fn line_is_addressable(&self, file: &str, line: usize) -> bool {
        self.added_lines
            .get(file)
            .map(|set| set.contains(&line))
            .unwrap_or(false)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Releases the index and cached vectors. Safe to call repeatedly and on
    /// a never-built handle.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.store.teardown();
        self.chunks.clear();
        self.added_lines.clear();
        self.torn_down = true;
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}

impl Drop for DiffIndexHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

struct AnnotatedLine {
    text: String,
    /// New-file line number, for added and context lines inside a hunk.
    new_line: Option<usize>,
    added: bool,
    hunk_header: bool,
}

/// Replays the hunk headers of a unified diff, assigning each added and
/// context line its exact new-file line number. Returns `None` when the text
/// contains no parseable hunk.
fn annotate_diff(diff_text: &str) -> Option<Vec<AnnotatedLine>> {
    let mut lines = Vec::new();
    let mut new_line: usize = 0;
    let mut in_hunk = false;

    for raw in diff_text.lines() {
        if let Some(caps) = HUNK_HEADER.captures(raw) {
            new_line = caps.get(3)?.as_str().parse().ok()?;
            in_hunk = true;
            lines.push(AnnotatedLine {
                text: raw.to_string(),
                new_line: None,
                added: false,
                hunk_header: true,
            });
            continue;
        }

        // File headers and anything before the first hunk carry no line info.
        if !in_hunk || raw.starts_with("+++ ") || raw.starts_with("--- ") {
            lines.push(AnnotatedLine {
                text: raw.to_string(),
                new_line: None,
                added: false,
                hunk_header: false,
            });
            continue;
        }

        let (number, added) = match raw.chars().next() {
            Some('+') => {
                let n = new_line;
                new_line += 1;
                (Some(n), true)
            }
            Some('-') | Some('\\') => (None, false),
            _ => {
                let n = new_line;
                new_line += 1;
                (Some(n), false)
            }
        };
        lines.push(AnnotatedLine {
            text: raw.to_string(),
            new_line: number,
            added,
            hunk_header: false,
        });
    }

    if in_hunk {
        Some(lines)
    } else {
        None
    }
}

/// Splits annotated lines into ~800-char pieces with ~15% overlap, preferring
/// hunk boundaries, then blank lines, then any line.
fn chunk_lines(lines: &[AnnotatedLine]) -> Vec<Vec<&AnnotatedLine>> {
    let mut chunks: Vec<Vec<&AnnotatedLine>> = Vec::new();
    let mut current: Vec<&AnnotatedLine> = Vec::new();
    let mut current_chars = 0usize;

    for line in lines {
        // A hunk header is the best split point once the chunk has substance.
        if line.hunk_header && current_chars >= TARGET_CHUNK_CHARS / 2 {
            emit(&mut chunks, &mut current, &mut current_chars);
        }

        current.push(line);
        current_chars += line.text.len() + 1;

        if current_chars >= TARGET_CHUNK_CHARS {
            // Split at the last blank line if one exists past the midpoint.
            let split = current
                .iter()
                .rposition(|l| l.text.trim().is_empty())
                .filter(|&idx| idx > current.len() / 2)
                .unwrap_or(current.len());
            let rest: Vec<&AnnotatedLine> = current.split_off(split);
            emit(&mut chunks, &mut current, &mut current_chars);
            for l in rest {
                current.push(l);
                current_chars += l.text.len() + 1;
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Pushes `current` as a finished chunk and reseeds it with the overlap tail.
fn emit<'a>(
    chunks: &mut Vec<Vec<&'a AnnotatedLine>>,
    current: &mut Vec<&'a AnnotatedLine>,
    current_chars: &mut usize,
) {
    if current.is_empty() {
        return;
    }
    let emitted = std::mem::take(current);

    let mut overlap: Vec<&AnnotatedLine> = Vec::new();
    let mut chars = 0usize;
    for line in emitted.iter().rev() {
        if chars + line.text.len() + 1 > CHUNK_OVERLAP_CHARS {
            break;
        }
        chars += line.text.len() + 1;
        overlap.push(line);
    }
    overlap.reverse();

    chunks.push(emitted);
    *current = overlap;
    *current_chars = chars;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pr_data::FileDiff;
    use crate::providers::embedding::HashingEmbedder;
    use crate::providers::vector_store::InMemoryVectorStore;

    fn file(path: &str, diff: &str) -> FileDiff {
        FileDiff {
            path: path.into(),
            change_type: ChangeType::Modified,
            diff_text: diff.into(),
            additions: diff.lines().filter(|l| l.starts_with('+')).count(),
            deletions: 0,
        }
    }

    fn pr(files: Vec<FileDiff>) -> PRData {
        PRData::new(1, "head".into(), "main".into(), files)
    }

    const CALC_DIFF: &str = "\
@@ -20,4 +20,5 @@ def average(values):\n \
     total = sum(values)\n \
     count = len(values)\n\
+    result = total / count\n \
     return result\n";

    #[tokio::test]
    async fn added_lines_get_exact_new_file_numbers() {
        let embedder = HashingEmbedder::default();
        let mut handle = DiffIndexHandle::new(Box::new(InMemoryVectorStore::new()));
        handle
            .build(&pr(vec![file("calc.py", CALC_DIFF)]), &embedder)
            .await
            .unwrap();

        // Hunk starts at new line 20; two context lines precede the addition.
        assert!(handle.line_is_addressable("calc.py", 22));
        assert!(!handle.line_is_addressable("calc.py", 1));
        assert!(!handle.line_is_addressable("calc.py", 21));
        assert_eq!(handle.added_lines["calc.py"].len(), 1);
    }

    #[tokio::test]
    async fn every_chunk_of_a_diff_with_additions_has_a_line_range() {
        // Long enough to force several chunks.
        let mut diff = String::from("@@ -1,40 +1,80 @@\n");
        for i in 1..=80 {
            diff.push_str(&format!("+    let value_{i} = compute_something_interesting({i});\n"));
        }

        let embedder = HashingEmbedder::default();
        let mut handle = DiffIndexHandle::new(Box::new(InMemoryVectorStore::new()));
        handle
            .build(&pr(vec![file("src/lib.rs", &diff)]), &embedder)
            .await
            .unwrap();

        assert!(handle.chunk_count() > 1);
        for chunk in &handle.chunks {
            assert!(chunk.line_start.is_some(), "chunk without line range");
            assert!(chunk.line_end.unwrap() >= chunk.line_start.unwrap());
            assert_eq!(chunk.extension, "rs");
        }
        // Consecutive chunks share overlap text.
        let first = &handle.chunks[0].content;
        let second = &handle.chunks[1].content;
        let tail = first.lines().last().unwrap();
        assert!(second.contains(tail));
    }

    #[tokio::test]
    async fn unparseable_file_is_skipped_not_fatal() {
        let embedder = HashingEmbedder::default();
        let mut handle = DiffIndexHandle::new(Box::new(InMemoryVectorStore::new()));
        handle
            .build(
                &pr(vec![
                    file("junk.bin", "no hunks here"),
                    file("calc.py", CALC_DIFF),
                ]),
                &embedder,
            )
            .await
            .unwrap();

        assert!(!handle.added_lines.contains_key("junk.bin"));
        assert!(handle.line_is_addressable("calc.py", 22));
    }

    #[tokio::test]
    async fn empty_pr_fails_the_build() {
        let embedder = HashingEmbedder::default();
        let mut handle = DiffIndexHandle::new(Box::new(InMemoryVectorStore::new()));
        assert!(handle.build(&pr(vec![]), &embedder).await.is_err());
        assert!(!handle.is_built());
    }

    #[tokio::test]
    async fn teardown_is_idempotent_and_disables_search() {
        let embedder = HashingEmbedder::default();
        let mut handle = DiffIndexHandle::new(Box::new(InMemoryVectorStore::new()));
        handle
            .build(&pr(vec![file("calc.py", CALC_DIFF)]), &embedder)
            .await
            .unwrap();

        let query = embedder.embed("total count result").await.unwrap();
        assert!(!handle.search(&query, 3).is_empty());

        handle.teardown();
        handle.teardown();
        assert!(handle.is_torn_down());
        assert!(handle.search(&query, 3).is_empty());

        // Never-built handles tear down safely too.
        let mut fresh = DiffIndexHandle::new(Box::new(InMemoryVectorStore::new()));
        fresh.teardown();
        assert!(fresh.is_torn_down());
    }
}
