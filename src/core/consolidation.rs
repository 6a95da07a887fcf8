use crate::core::comment::{sort_for_presentation, Comment, Priority, ValidationStatus};
use crate::core::finding::{Finding, FindingCategory, PassKind};
use similar::TextDiff;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Two same-location findings describing the same underlying issue merge at
/// this word-level description-similarity ratio.
const SAME_ISSUE_RATIO: f32 = 0.5;

/// The reviewer role: merges all passes' classified findings into a draft
/// comment list with exact line anchors and a deterministic order.
pub struct ConsolidationEngine {
    include_suggestions: bool,
}

impl ConsolidationEngine {
    pub fn new(include_suggestions: bool) -> Self {
        Self {
            include_suggestions,
        }
    }

    pub fn consolidate(&self, findings: Vec<Finding>) -> Vec<Comment> {
        // Group by exact location. Findings at different lines never merge,
        // however similar their text.
        let mut by_location: BTreeMap<(String, usize), Vec<Finding>> = BTreeMap::new();
        for finding in findings {
            if finding.line == 0 {
                warn!(file = %finding.file, "dropping finding without a resolvable line");
                continue;
            }
            if !self.include_suggestions
                && finding.category_or_default() == FindingCategory::Suggestion
            {
                continue;
            }
            by_location
                .entry((finding.file.clone(), finding.line))
                .or_default()
                .push(finding);
        }

        let mut comments = Vec::new();
        for ((file, line), group) in by_location {
            for cluster in cluster_same_issue(group) {
                comments.push(self.draft_comment(&file, line, cluster));
            }
        }

        sort_for_presentation(&mut comments);
        debug!(count = comments.len(), "drafted comments");
        comments
    }

    fn draft_comment(&self, file: &str, line: usize, cluster: Vec<Finding>) -> Comment {
        let priority = cluster
            .iter()
            .map(|f| priority_for(f.kind, f.category_or_default()))
            .min()
            .unwrap_or(Priority::Low);

        let mut source_kinds: Vec<PassKind> = cluster.iter().map(|f| f.kind).collect();
        source_kinds.sort();
        source_kinds.dedup();

        let is_problem = cluster
            .iter()
            .any(|f| f.category_or_default() == FindingCategory::Problem);

        // Lead with the strongest member.
        let lead = cluster
            .iter()
            .min_by_key(|f| priority_for(f.kind, f.category_or_default()))
            .expect("cluster is never empty");

        let message = if is_problem {
            assertive_message(lead, &source_kinds)
        } else {
            reflective_message(lead, &source_kinds)
        };

        Comment {
            file: file.to_string(),
            line,
            final_line: cluster.iter().find_map(|f| f.final_line),
            priority,
            source_kinds,
            message,
            validation_status: ValidationStatus::Pending,
        }
    }
}

/// Greedy clustering of one location's findings: a finding joins the first
/// cluster whose representative reads like the same issue.
fn cluster_same_issue(group: Vec<Finding>) -> Vec<Vec<Finding>> {
    let mut clusters: Vec<Vec<Finding>> = Vec::new();
    for finding in group {
        match clusters
            .iter_mut()
            .find(|cluster| same_issue(&cluster[0], &finding))
        {
            Some(cluster) => cluster.push(finding),
            None => clusters.push(vec![finding]),
        }
    }
    clusters
}

fn same_issue(a: &Finding, b: &Finding) -> bool {
    let left = a.description.to_lowercase();
    let right = b.description.to_lowercase();
    TextDiff::from_words(left.as_str(), right.as_str()).ratio() >= SAME_ISSUE_RATIO
}

fn priority_for(kind: PassKind, category: FindingCategory) -> Priority {
    match (category, kind) {
        (FindingCategory::Problem, PassKind::Security) => Priority::Critical,
        (FindingCategory::Problem, _) => Priority::High,
        (FindingCategory::Suggestion, PassKind::Security | PassKind::Logical) => Priority::Medium,
        (FindingCategory::Suggestion, _) => Priority::Low,
    }
}

/// Direct, assertive phrasing for confirmable problems: states the defect and
/// a concrete fix.
fn assertive_message(lead: &Finding, source_kinds: &[PassKind]) -> String {
    let mut message = lead.description.trim_end_matches('.').to_string();
    message.push('.');

    if let Some(evidence) = &lead.evidence {
        message.push_str(&format!(" Evidence: {}.", evidence.trim_end_matches('.')));
    }
    if let Some(impact) = &lead.impact {
        message.push_str(&format!(" Impact: {}.", impact.trim_end_matches('.')));
    }
    match &lead.recommendation {
        Some(recommendation) => {
            message.push_str(&format!(" Fix: {}.", recommendation.trim_end_matches('.')));
        }
        None => message.push_str(" Fix: correct this at the flagged line before merging."),
    }
    if let Some(example) = &lead.example {
        message.push_str(&format!("\n\nExample:\n{}", example));
    }
    if source_kinds.len() > 1 {
        message.push_str(&format!(
            "\n\nFlagged independently by the {} passes.",
            kind_list(source_kinds)
        ));
    }
    message
}

/// Reflective phrasing for context-dependent suggestions: poses two to five
/// concrete questions instead of prescribing.
fn reflective_message(lead: &Finding, source_kinds: &[PassKind]) -> String {
    let mut questions = Vec::new();
    if let Some(recommendation) = &lead.recommendation {
        questions.push(format!(
            "Would it be worth applying this here: {}?",
            recommendation.trim_end_matches('.')
        ));
    }
    if let Some(impact) = &lead.impact {
        questions.push(format!(
            "Is the current behavior acceptable given: {}?",
            impact.trim_end_matches('.')
        ));
    }
    questions.push("Does the surrounding context already account for this?".to_string());
    if questions.len() < 2 {
        questions.push("Is the current form a deliberate choice?".to_string());
    }
    questions.truncate(5);

    let mut message = format!(
        "Consider whether this should change: {}.",
        lead.description.trim_end_matches('.')
    );
    for question in questions {
        message.push_str(&format!("\n- {}", question));
    }
    if source_kinds.len() > 1 {
        message.push_str(&format!(
            "\n\nRaised by the {} passes.",
            kind_list(source_kinds)
        ));
    }
    message
}

fn kind_list(kinds: &[PassKind]) -> String {
    kinds
        .iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(" and ")
}
