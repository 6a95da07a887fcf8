use crate::core::finding::PassKind;
use serde::{Deserialize, Serialize};

/// A candidate or final review comment anchored to code.
///
/// Drafted by the consolidation engine from one or more findings, refined
/// across debate rounds, frozen once the debate terminates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub file: String,
    pub line: usize,
    pub final_line: Option<usize>,
    pub priority: Priority,
    /// The pass kinds that contributed; more than one when findings at the
    /// same location were merged.
    pub source_kinds: Vec<PassKind>,
    /// Self-contained human-readable explanation: problem, impact, fix.
    pub message: String,
    pub validation_status: ValidationStatus,
}

/// Internal priority vocabulary. External severity schemes translate to this
/// at the interface boundary and nowhere else. Declaration order is
/// presentation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Pending,
    Approved,
    Rejected,
}

/// Presentation-order contract: Critical first, stable `(file, line)`
/// tie-break within a priority.
pub fn sort_for_presentation(comments: &mut [Comment]) {
    comments.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.file.cmp(&b.file))
            .then_with(|| a.line.cmp(&b.line))
    });
}
