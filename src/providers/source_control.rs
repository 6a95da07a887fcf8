use crate::core::comment::Comment;
use crate::core::pr_data::PRData;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

/// Identifier of the comment thread created on the hosting platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThreadId(pub u64);

/// The two operations the analysis core needs from a code-hosting platform.
#[async_trait]
pub trait SourceControlProvider: Send + Sync {
    /// Fetches the PR snapshot with file-level diffs. The diffs must carry
    /// enough fidelity to recover exact new-file line numbers.
    async fn fetch_consolidated_pr(&self, pr_id: u64) -> Result<PRData>;

    async fn post_comment(
        &self,
        pr_id: u64,
        file: &str,
        line: usize,
        message: &str,
    ) -> Result<ThreadId>;
}

#[derive(Debug, Default, Serialize)]
pub struct PublicationReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Posts every final comment, continuing past per-item failures. One thread
/// failing to open never blocks the remaining posts.
pub async fn publish_comments(
    provider: &dyn SourceControlProvider,
    pr_id: u64,
    comments: &[Comment],
) -> PublicationReport {
    let mut report = PublicationReport {
        total: comments.len(),
        ..Default::default()
    };

    for comment in comments {
        match provider
            .post_comment(pr_id, &comment.file, comment.line, &comment.message)
            .await
        {
            Ok(thread) => {
                info!(file = %comment.file, line = comment.line, thread = thread.0, "posted comment");
                report.successful += 1;
            }
            Err(err) => {
                warn!(file = %comment.file, line = comment.line, "failed to post comment: {err}");
                report.failed += 1;
                report
                    .errors
                    .push(format!("{}:{}: {}", comment.file, comment.line, err));
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::comment::{Comment, Priority, ValidationStatus};
    use crate::core::finding::PassKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SourceControlProvider for FlakyProvider {
        async fn fetch_consolidated_pr(&self, _pr_id: u64) -> Result<PRData> {
            anyhow::bail!("not under test")
        }

        async fn post_comment(
            &self,
            _pr_id: u64,
            _file: &str,
            _line: usize,
            _message: &str,
        ) -> Result<ThreadId> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 1 {
                anyhow::bail!("rate limited");
            }
            Ok(ThreadId(call as u64 + 100))
        }
    }

    fn comment(file: &str, line: usize) -> Comment {
        Comment {
            file: file.into(),
            line,
            final_line: None,
            priority: Priority::High,
            source_kinds: vec![PassKind::Logical],
            message: "Missing zero check.".into(),
            validation_status: ValidationStatus::Approved,
        }
    }

    #[tokio::test]
    async fn partial_failures_are_collected_not_fatal() {
        let provider = FlakyProvider {
            calls: AtomicUsize::new(0),
        };
        let comments = vec![comment("a.py", 3), comment("b.py", 9), comment("c.py", 12)];

        let report = publish_comments(&provider, 42, &comments).await;

        assert_eq!(report.total, 3);
        assert_eq!(report.successful, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("b.py:9"));
        // All three posts were attempted despite the middle failure.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }
}
