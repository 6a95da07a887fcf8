use crate::adapters::llm::{LLMAdapter, LLMRequest};
use crate::core::finding::{Finding, PassKind};
use crate::core::pr_data::PRData;
use crate::core::retrieval::RetrievalGateway;
use crate::core::structured::parse_structured_output;
use serde::Deserialize;
use tracing::{debug, warn};

const MAX_DIFF_CHARS_PER_FILE: usize = 6000;
const MAX_FILES_IN_PROMPT: usize = 20;

/// What one pass reports back to the aggregate barrier. A failed pass still
/// reports: zero findings plus an error marker, never a pipeline abort.
#[derive(Debug)]
pub struct PassReport {
    pub kind: PassKind,
    pub findings: Vec<Finding>,
    pub summary: String,
    pub error: Option<String>,
}

impl PassReport {
    pub fn failed(kind: PassKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            findings: Vec::new(),
            summary: String::new(),
            error: Some(reason.into()),
        }
    }
}

/// Raw wire shape of one finding as the model emits it. Converted to a
/// [`Finding`] only when its location survives validation.
#[derive(Debug, Deserialize)]
struct RawFinding {
    #[serde(default)]
    file: String,
    line: Option<usize>,
    final_line: Option<usize>,
    #[serde(default)]
    description: String,
    evidence: Option<String>,
    impact: Option<String>,
    recommendation: Option<String>,
    example: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PassOutput {
    #[serde(default)]
    findings: Vec<RawFinding>,
    #[serde(default)]
    summary: String,
}

fn fallback_output() -> PassOutput {
    PassOutput {
        findings: Vec::new(),
        summary: "validation failed".to_string(),
    }
}

/// One analysis pass, parameterized by kind. All four share this type and
/// the same output contract; none depends on another pass's output.
pub struct AnalysisPass {
    kind: PassKind,
}

impl AnalysisPass {
    pub fn new(kind: PassKind) -> Self {
        Self { kind }
    }

    pub async fn run(
        &self,
        pr: &PRData,
        gateway: &RetrievalGateway<'_>,
        adapter: &dyn LLMAdapter,
        max_retrievals: usize,
        retrieval_k: usize,
    ) -> PassReport {
        let context = self
            .gather_context(pr, gateway, max_retrievals, retrieval_k)
            .await;

        let request = LLMRequest {
            system_prompt: self.system_prompt(),
            user_prompt: self.user_prompt(pr, &context),
            temperature: None,
            max_tokens: None,
        };

        let response = match adapter.complete(request).await {
            Ok(response) => response,
            Err(err) => {
                warn!(kind = %self.kind, "analysis pass failed: {err}");
                return PassReport::failed(self.kind, err.to_string());
            }
        };

        let output: PassOutput = parse_structured_output(&response.content, fallback_output());
        let mut findings = Vec::new();
        for raw in output.findings {
            match self.validate(raw, gateway) {
                Some(finding) => findings.push(finding),
                None => debug!(kind = %self.kind, "dropped finding with unresolvable location"),
            }
        }

        debug!(kind = %self.kind, count = findings.len(), "pass finished");
        PassReport {
            kind: self.kind,
            findings,
            summary: output.summary,
            error: None,
        }
    }

    /// Runs at most `max_retrievals` gateway lookups: one knowledge query for
    /// the pass topic, then code queries per changed file. Retrieval trouble
    /// is logged and skipped; the pass can always fall back to the diff
    /// alone.
    async fn gather_context(
        &self,
        pr: &PRData,
        gateway: &RetrievalGateway<'_>,
        max_retrievals: usize,
        retrieval_k: usize,
    ) -> String {
        let mut sections = Vec::new();
        let mut budget = max_retrievals;

        if budget > 0 {
            budget -= 1;
            let query = format!("{} review checklist best practices", self.kind);
            match gateway
                .search_knowledge(&query, self.kind.knowledge_namespace())
                .await
            {
                Ok(snippets) if !snippets.is_empty() => {
                    sections.push(format!("Reference notes:\n{}", snippets.join("\n---\n")));
                }
                Ok(_) => {}
                Err(err) => warn!(kind = %self.kind, "knowledge lookup failed: {err}"),
            }
        }

        for file in &pr.files {
            if budget == 0 {
                break;
            }
            budget -= 1;
            let query = format!("{} concerns in {}", self.kind, file.path);
            match gateway.search_code(&query, retrieval_k, None).await {
                Ok(outcome) => {
                    for chunk in outcome.into_chunks() {
                        sections.push(format!(
                            "Related change in {} (lines {}-{}):\n{}",
                            chunk.file,
                            chunk.line_start.unwrap_or(0),
                            chunk.line_end.unwrap_or(0),
                            chunk.content
                        ));
                    }
                }
                Err(err) => warn!(kind = %self.kind, "code search failed: {err}"),
            }
        }

        sections.join("\n\n")
    }

    /// Keeps a raw finding only if it names a file and an added line that
    /// actually exist in the diff. Placeholder locations never propagate.
    fn validate(&self, raw: RawFinding, gateway: &RetrievalGateway<'_>) -> Option<Finding> {
        let line = raw.line?;
        if raw.file.is_empty() || raw.description.is_empty() {
            return None;
        }
        if !gateway.line_is_addressable(&raw.file, line) {
            return None;
        }
        Some(Finding {
            file: raw.file,
            line,
            final_line: raw.final_line,
            kind: self.kind,
            description: raw.description,
            evidence: raw.evidence,
            impact: raw.impact,
            recommendation: raw.recommendation,
            example: raw.example,
            category: None,
        })
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are the {} reviewer in a pull-request analysis pipeline.\n\
             Checklist:\n{}\n\n\
             Report only issues visible in the diff. Every finding must point at an\n\
             added line of the diff, using exact new-file line numbers.\n\
             Respond with JSON only:\n\
             {{\"findings\": [{{\"file\": \"path\", \"line\": 23, \"final_line\": null,\n\
             \"description\": \"...\", \"evidence\": \"...\", \"impact\": \"...\",\n\
             \"recommendation\": \"...\", \"example\": \"...\"}}], \"summary\": \"...\"}}",
            self.kind,
            self.checklist()
        )
    }

    fn user_prompt(&self, pr: &PRData, context: &str) -> String {
        let mut prompt = format!(
            "Pull request #{} ({} -> {}), +{}/-{} lines.\n\n",
            pr.pr_id, pr.source_branch, pr.target_branch, pr.total_additions, pr.total_deletions
        );

        for file in pr.files.iter().take(MAX_FILES_IN_PROMPT) {
            let mut end = MAX_DIFF_CHARS_PER_FILE.min(file.diff_text.len());
            while !file.diff_text.is_char_boundary(end) {
                end -= 1;
            }
            let diff = &file.diff_text[..end];
            prompt.push_str(&format!("File: {} ({:?})\n{}\n\n", file.path, file.change_type, diff));
        }

        if !context.is_empty() {
            prompt.push_str("Supporting context:\n");
            prompt.push_str(context);
        }
        prompt
    }

    fn checklist(&self) -> &'static str {
        match self.kind {
            PassKind::Security => {
                "- injection (SQL, command, template)\n\
                 - missing authorization or authentication checks\n\
                 - hardcoded secrets, keys, or tokens\n\
                 - unsafe deserialization and unvalidated input\n\
                 - sensitive data written to logs or responses"
            }
            PassKind::Performance => {
                "- N+1 queries and repeated I/O in loops\n\
                 - accidental quadratic (or worse) algorithms\n\
                 - unbounded memory growth and missing pagination\n\
                 - blocking calls on hot paths\n\
                 - redundant recomputation of invariant values"
            }
            PassKind::CleanCode => {
                "- single-responsibility violations and god functions\n\
                 - duplicated logic that already exists elsewhere in the diff\n\
                 - misleading names and dead parameters\n\
                 - deeply nested control flow\n\
                 - swallowed errors and empty catch blocks"
            }
            PassKind::Logical => {
                "- null/None dereference and missing guards\n\
                 - division by zero and arithmetic overflow\n\
                 - off-by-one and boundary errors\n\
                 - unhandled edge cases (empty input, duplicates)\n\
                 - race conditions on shared state"
            }
        }
    }
}
