use crate::adapters::llm::LLMAdapter;
use crate::config::Config;
use crate::core::analysis_pass::{AnalysisPass, PassReport};
use crate::core::classifier::FindingClassifier;
use crate::core::comment::Comment;
use crate::core::consolidation::ConsolidationEngine;
use crate::core::debate::DebateLoop;
use crate::core::diff_index::DiffIndexHandle;
use crate::core::finding::{Finding, PassKind};
use crate::core::pr_data::PRData;
use crate::core::retrieval::RetrievalGateway;
use crate::error::WorkflowError;
use crate::providers::embedding::Embedder;
use crate::providers::knowledge::KnowledgeBase;
use crate::providers::source_control::{publish_comments, PublicationReport, SourceControlProvider};
use crate::providers::vector_store::{InMemoryVectorStore, VectorStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
}

/// What the entry contract returns: `{status, comments, total_comments,
/// error?}`. Partial analysis (some passes degraded) is still a success from
/// the caller's perspective.
#[derive(Debug, Serialize)]
pub struct AnalysisOutcome {
    pub status: RunStatus,
    pub comments: Vec<Comment>,
    pub total_comments: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publication: Option<PublicationReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub log: Vec<String>,
}

impl AnalysisOutcome {
    fn success(comments: Vec<Comment>, log: Vec<String>) -> Self {
        Self {
            status: RunStatus::Success,
            total_comments: comments.len(),
            comments,
            error: None,
            publication: None,
            log,
        }
    }

    fn failure(error: WorkflowError, log: Vec<String>) -> Self {
        Self {
            status: RunStatus::Error,
            comments: Vec::new(),
            total_comments: 0,
            error: Some(error.to_string()),
            publication: None,
            log,
        }
    }
}

/// The top-level state machine: fetch, index, fan out to the four passes,
/// join, classify, consolidate, debate, publish, clean up. Fetch failure
/// short-circuits before any per-run resource exists; once the index handle
/// exists its teardown runs on every path.
pub struct WorkflowOrchestrator {
    config: Config,
    adapter: Arc<dyn LLMAdapter>,
    provider: Arc<dyn SourceControlProvider>,
    embedder: Arc<dyn Embedder>,
    knowledge: Arc<KnowledgeBase>,
}

impl WorkflowOrchestrator {
    pub fn new(
        config: Config,
        adapter: Arc<dyn LLMAdapter>,
        provider: Arc<dyn SourceControlProvider>,
        embedder: Arc<dyn Embedder>,
        knowledge: Arc<KnowledgeBase>,
    ) -> Self {
        Self {
            config,
            adapter,
            provider,
            embedder,
            knowledge,
        }
    }

    pub async fn analyze(&self, pr_id: u64) -> AnalysisOutcome {
        self.analyze_with_store(pr_id, Box::new(InMemoryVectorStore::new()))
            .await
    }

    /// Runs the full analysis, then posts the surviving comments back to the
    /// platform. Publication failures are per-item and reported, not fatal.
    pub async fn analyze_and_publish(&self, pr_id: u64) -> AnalysisOutcome {
        let mut outcome = self.analyze(pr_id).await;
        if outcome.status == RunStatus::Success && !outcome.comments.is_empty() {
            let report = publish_comments(self.provider.as_ref(), pr_id, &outcome.comments).await;
            log_step(
                &mut outcome.log,
                format!("published {}/{} comments", report.successful, report.total),
            );
            outcome.publication = Some(report);
        }
        outcome
    }

    /// Same as [`analyze`] with the backing vector store injected, so tests
    /// can observe the teardown contract.
    pub async fn analyze_with_store(
        &self,
        pr_id: u64,
        store: Box<dyn VectorStore>,
    ) -> AnalysisOutcome {
        let mut log = Vec::new();
        log_step(&mut log, format!("analysis started for PR #{pr_id}"));

        // Fetch failure ends the run before any index resource is allocated.
        let pr = match self.provider.fetch_consolidated_pr(pr_id).await {
            Ok(pr) => pr,
            Err(err) => {
                warn!(pr_id, "fetch failed: {err}");
                log_step(&mut log, "fetch failed, ending run".to_string());
                return AnalysisOutcome::failure(WorkflowError::Fetch(err.to_string()), log);
            }
        };
        let pr = pr.without_files(|path| self.config.should_exclude(path));
        log_step(
            &mut log,
            format!(
                "fetched {} files (+{}/-{})",
                pr.files.len(),
                pr.total_additions,
                pr.total_deletions
            ),
        );

        let mut handle = DiffIndexHandle::new(store);
        let result = self.run_pipeline(&pr, &mut handle, &mut log).await;

        // Unconditional finalizer for the per-run index.
        handle.teardown();
        log_step(&mut log, "cleanup complete".to_string());

        match result {
            Ok(comments) => {
                info!(pr_id, comments = comments.len(), "analysis finished");
                AnalysisOutcome::success(comments, log)
            }
            Err(error) => {
                warn!(pr_id, "analysis failed: {error}");
                AnalysisOutcome::failure(error, log)
            }
        }
    }

    async fn run_pipeline(
        &self,
        pr: &PRData,
        handle: &mut DiffIndexHandle,
        log: &mut Vec<String>,
    ) -> Result<Vec<Comment>, WorkflowError> {
        handle
            .build(pr, self.embedder.as_ref())
            .await
            .map_err(|err| WorkflowError::IndexBuild(err.to_string()))?;
        log_step(log, format!("indexed {} diff chunks", handle.chunk_count()));

        let gateway = RetrievalGateway::new(&*handle, &self.knowledge, self.embedder.as_ref());
        let timeout = Duration::from_secs(self.config.analysis_timeout_secs);

        // The four passes run concurrently; the join is the aggregate
        // barrier. Every pass reports, successful or degraded, before
        // anything downstream starts.
        let (security, performance, clean_code, logical) = tokio::join!(
            self.run_pass(PassKind::Security, pr, &gateway, timeout),
            self.run_pass(PassKind::Performance, pr, &gateway, timeout),
            self.run_pass(PassKind::CleanCode, pr, &gateway, timeout),
            self.run_pass(PassKind::Logical, pr, &gateway, timeout),
        );
        let reports = [security, performance, clean_code, logical];
        log_step(
            log,
            format!(
                "passes reported: {}",
                reports
                    .iter()
                    .map(|r| format!(
                        "{}={}{}",
                        r.kind,
                        r.findings.len(),
                        if r.error.is_some() { " (degraded)" } else { "" }
                    ))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        );

        let mut classified = Vec::new();
        for report in reports {
            if let Some(error) = &report.error {
                warn!(kind = %report.kind, "pass degraded: {error}");
            }
            let context = diff_context_for(pr, &report.findings);
            let findings = FindingClassifier::classify(
                report.kind,
                report.findings,
                &context,
                self.adapter.as_ref(),
            )
            .await;
            classified.extend(findings);
        }

        let draft =
            ConsolidationEngine::new(self.config.include_suggestions).consolidate(classified);
        log_step(log, format!("drafted {} comments", draft.len()));

        let debate = DebateLoop::new(self.config.debate_refine_rounds, timeout);
        let finals = debate.run(draft, self.adapter.as_ref()).await;
        log_step(log, format!("{} comments survived the debate", finals.len()));

        Ok(finals)
    }

    async fn run_pass(
        &self,
        kind: PassKind,
        pr: &PRData,
        gateway: &RetrievalGateway<'_>,
        timeout: Duration,
    ) -> PassReport {
        let pass = AnalysisPass::new(kind);
        match tokio::time::timeout(
            timeout,
            pass.run(
                pr,
                gateway,
                self.adapter.as_ref(),
                self.config.max_retrievals_per_pass,
                self.config.retrieval_k,
            ),
        )
        .await
        {
            Ok(report) => report,
            Err(_) => {
                warn!(kind = %kind, "pass timed out");
                PassReport::failed(kind, "analysis timed out")
            }
        }
    }
}

/// Diff text of the files a pass actually flagged, handed to the classifier
/// as code context.
fn diff_context_for(pr: &PRData, findings: &[Finding]) -> String {
    let mut sections = Vec::new();
    for file in &pr.files {
        if findings.iter().any(|f| f.file == file.path) {
            sections.push(format!("File: {}\n{}", file.path, file.diff_text));
        }
    }
    sections.join("\n\n")
}

fn log_step(log: &mut Vec<String>, message: String) {
    let timestamp = chrono::Local::now().format("%H:%M:%S");
    log.push(format!("[{timestamp}] {message}"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::{Reply, ScriptedAdapter};
    use crate::core::comment::Priority;
    use crate::core::pr_data::{ChangeType, FileDiff};
    use crate::providers::embedding::HashingEmbedder;
    use crate::providers::source_control::ThreadId;
    use crate::providers::vector_store::{ScoredPayload, VectorEntry};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CALC_DIFF: &str = "@@ -21,3 +21,4 @@\n total = sum(values)\n count = len(values)\n+result = total / count\n return result\n";

    struct StubProvider {
        pr: Option<PRData>,
        fetch_calls: AtomicUsize,
        failing_posts: bool,
    }

    impl StubProvider {
        fn with_pr(pr: PRData) -> Self {
            Self {
                pr: Some(pr),
                fetch_calls: AtomicUsize::new(0),
                failing_posts: false,
            }
        }

        fn failing() -> Self {
            Self {
                pr: None,
                fetch_calls: AtomicUsize::new(0),
                failing_posts: false,
            }
        }
    }

    #[async_trait]
    impl SourceControlProvider for StubProvider {
        async fn fetch_consolidated_pr(&self, _pr_id: u64) -> Result<PRData> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            match &self.pr {
                Some(pr) => Ok(pr.clone()),
                None => anyhow::bail!("upstream unavailable"),
            }
        }

        async fn post_comment(
            &self,
            _pr_id: u64,
            file: &str,
            _line: usize,
            _message: &str,
        ) -> Result<ThreadId> {
            if self.failing_posts && file.ends_with(".py") {
                anyhow::bail!("post rejected");
            }
            Ok(ThreadId(1))
        }
    }

    /// Store wrapper that counts teardown calls reaching the backend.
    struct TrackingStore {
        inner: InMemoryVectorStore,
        teardowns: Arc<AtomicUsize>,
    }

    impl VectorStore for TrackingStore {
        fn upsert(&mut self, namespace: &str, entries: Vec<VectorEntry>) {
            self.inner.upsert(namespace, entries);
        }

        fn query(&self, namespace: &str, vector: &[f32], k: usize) -> Vec<ScoredPayload> {
            self.inner.query(namespace, vector, k)
        }

        fn teardown(&mut self) {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
            self.inner.teardown();
        }
    }

    fn calc_pr() -> PRData {
        PRData::new(
            12,
            "feature/average".into(),
            "main".into(),
            vec![FileDiff {
                path: "calc.py".into(),
                change_type: ChangeType::Modified,
                diff_text: CALC_DIFF.into(),
                additions: 1,
                deletions: 0,
            }],
        )
    }

    fn orchestrator(
        adapter: ScriptedAdapter,
        provider: StubProvider,
    ) -> (WorkflowOrchestrator, Arc<StubProvider>) {
        let provider = Arc::new(provider);
        let orchestrator = WorkflowOrchestrator::new(
            Config::default(),
            Arc::new(adapter),
            provider.clone(),
            Arc::new(HashingEmbedder::default()),
            Arc::new(KnowledgeBase::empty()),
        );
        (orchestrator, provider)
    }

    fn tracking_store() -> (Box<dyn VectorStore>, Arc<AtomicUsize>) {
        let teardowns = Arc::new(AtomicUsize::new(0));
        (
            Box::new(TrackingStore {
                inner: InMemoryVectorStore::new(),
                teardowns: teardowns.clone(),
            }),
            teardowns,
        )
    }

    const EMPTY_PASS: &str = r#"{"findings": [], "summary": "clean"}"#;
    const LOGICAL_FINDING: &str = r#"{"findings": [
        {"file": "calc.py", "line": 23,
         "description": "division without zero-check",
         "evidence": "count comes straight from len(values)",
         "impact": "raises ZeroDivisionError on empty input",
         "recommendation": "return early when count is zero"}],
        "summary": "one defect"}"#;
    const CLASSIFY_PROBLEM: &str = r#"{"classifications": [{"index": 0, "category": "PROBLEM"}]}"#;
    const APPROVE_0: &str = r#"{"verdicts": [{"index": 0, "verdict": "approve", "reason": "confirmable"}]}"#;
    const NO_REVISIONS: &str = r#"{"revisions": []}"#;

    #[tokio::test]
    async fn end_to_end_single_logical_finding() {
        let adapter = ScriptedAdapter::new(vec![
            Reply::Text(EMPTY_PASS),        // security
            Reply::Text(EMPTY_PASS),        // performance
            Reply::Text(EMPTY_PASS),        // clean-code
            Reply::Text(LOGICAL_FINDING),   // logical
            Reply::Text(CLASSIFY_PROBLEM),  // classifier (only non-empty pass)
            Reply::Text(APPROVE_0),         // debate: critique
            Reply::Text(NO_REVISIONS),      // debate: refine
            Reply::Text(APPROVE_0),         // debate: final decision
        ]);
        let (orchestrator, _) = orchestrator(adapter, StubProvider::with_pr(calc_pr()));

        let outcome = orchestrator.analyze(12).await;

        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(outcome.total_comments, 1);
        let comment = &outcome.comments[0];
        assert_eq!(comment.file, "calc.py");
        assert_eq!(comment.line, 23);
        assert_eq!(comment.priority, Priority::High);
        assert_eq!(comment.source_kinds, vec![PassKind::Logical]);
        // Assertive tone with a concrete fix.
        assert!(comment.message.contains("Fix:"));
        assert!(comment.message.contains("zero"));
    }

    #[tokio::test]
    async fn fetch_failure_short_circuits_without_allocating() {
        let adapter = ScriptedAdapter::always_failing();
        let (orchestrator, provider) = orchestrator(adapter, StubProvider::failing());
        let (store, teardowns) = tracking_store();

        let outcome = orchestrator.analyze_with_store(7, store).await;

        assert_eq!(outcome.status, RunStatus::Error);
        assert!(outcome.error.as_deref().unwrap().contains("fetch failed"));
        assert!(outcome.comments.is_empty());
        assert_eq!(provider.fetch_calls.load(Ordering::SeqCst), 1);
        // No pass ran and no index resource was ever built or torn down.
        assert_eq!(teardowns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn index_failure_is_fatal_but_cleanup_still_runs() {
        let adapter = ScriptedAdapter::always_failing();
        let empty_pr = PRData::new(5, "head".into(), "main".into(), vec![]);
        let (orchestrator, _) = orchestrator(adapter, StubProvider::with_pr(empty_pr));
        let (store, teardowns) = tracking_store();

        let outcome = orchestrator.analyze_with_store(5, store).await;

        assert_eq!(outcome.status, RunStatus::Error);
        assert!(outcome.error.as_deref().unwrap().contains("index build failed"));
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cleanup_runs_exactly_once_on_success() {
        let adapter = ScriptedAdapter::new(vec![
            Reply::Text(EMPTY_PASS),
            Reply::Text(EMPTY_PASS),
            Reply::Text(EMPTY_PASS),
            Reply::Text(EMPTY_PASS),
        ]);
        let (orchestrator, _) = orchestrator(adapter, StubProvider::with_pr(calc_pr()));
        let (store, teardowns) = tracking_store();

        let outcome = orchestrator.analyze_with_store(12, store).await;

        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(outcome.total_comments, 0);
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn three_failed_passes_do_not_block_the_fourth() {
        let adapter = ScriptedAdapter::new(vec![
            Reply::Failure("security model down"),
            Reply::Failure("performance model down"),
            Reply::Failure("clean-code model down"),
            Reply::Text(LOGICAL_FINDING),
            Reply::Text(CLASSIFY_PROBLEM),
            Reply::Text(APPROVE_0),
            Reply::Text(NO_REVISIONS),
            Reply::Text(APPROVE_0),
        ]);
        let (orchestrator, _) = orchestrator(adapter, StubProvider::with_pr(calc_pr()));
        let (store, teardowns) = tracking_store();

        let outcome = orchestrator.analyze_with_store(12, store).await;

        // Degraded passes are absorbed; the run is still a success.
        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(outcome.total_comments, 1);
        assert_eq!(outcome.comments[0].line, 23);
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn two_passes_at_same_location_merge_to_one_comment() {
        const SECURITY_FINDING: &str = r#"{"findings": [
            {"file": "users.py", "line": 46,
             "description": "user input concatenated into SQL query enables injection",
             "recommendation": "use parameterized queries"}],
            "summary": ""}"#;
        const LOGICAL_SAME_SPOT: &str = r#"{"findings": [
            {"file": "users.py", "line": 46,
             "description": "user input concatenated into SQL query allows injection",
             "recommendation": "bind parameters instead of formatting"}],
            "summary": ""}"#;

        let pr = PRData::new(
            3,
            "head".into(),
            "main".into(),
            vec![FileDiff {
                path: "users.py".into(),
                change_type: ChangeType::Modified,
                diff_text: "@@ -45,2 +45,2 @@\n def lookup(name):\n+    cursor.execute(\"SELECT * FROM users WHERE name = '%s'\" % name)\n".into(),
                additions: 1,
                deletions: 0,
            }],
        );

        let adapter = ScriptedAdapter::new(vec![
            Reply::Text(SECURITY_FINDING),  // security
            Reply::Text(EMPTY_PASS),        // performance
            Reply::Text(EMPTY_PASS),        // clean-code
            Reply::Text(LOGICAL_SAME_SPOT), // logical
            Reply::Text(CLASSIFY_PROBLEM),  // classify security findings
            Reply::Text(CLASSIFY_PROBLEM),  // classify logical findings
            Reply::Text(APPROVE_0),
            Reply::Text(NO_REVISIONS),
            Reply::Text(APPROVE_0),
        ]);
        let (orchestrator, _) = orchestrator(adapter, StubProvider::with_pr(pr));

        let outcome = orchestrator.analyze(3).await;

        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(outcome.total_comments, 1);
        let comment = &outcome.comments[0];
        assert_eq!(comment.line, 46);
        assert_eq!(
            comment.source_kinds,
            vec![PassKind::Security, PassKind::Logical]
        );
        assert_eq!(comment.priority, Priority::Critical);
    }

    #[tokio::test]
    async fn publish_reports_partial_failures() {
        let adapter = ScriptedAdapter::new(vec![
            Reply::Text(EMPTY_PASS),
            Reply::Text(EMPTY_PASS),
            Reply::Text(EMPTY_PASS),
            Reply::Text(LOGICAL_FINDING),
            Reply::Text(CLASSIFY_PROBLEM),
            Reply::Text(APPROVE_0),
            Reply::Text(NO_REVISIONS),
            Reply::Text(APPROVE_0),
        ]);
        let mut provider = StubProvider::with_pr(calc_pr());
        provider.failing_posts = true;
        let (orchestrator, _) = orchestrator(adapter, provider);

        let outcome = orchestrator.analyze_and_publish(12).await;

        assert_eq!(outcome.status, RunStatus::Success);
        let report = outcome.publication.unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors.len(), 1);
    }
}
