use thiserror::Error;

/// Failures that escalate to the workflow's top-level error field.
///
/// Everything else (a single pass erroring, a classifier call returning
/// garbage, one comment failing to post) is absorbed locally with a
/// documented fallback value and never surfaces here.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("index build failed: {0}")]
    IndexBuild(String),
}
