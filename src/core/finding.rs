use serde::{Deserialize, Serialize};

/// The four independent analysis passes. Each produces findings of its own
/// kind; no pass ever sees another pass's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PassKind {
    Security,
    Performance,
    CleanCode,
    Logical,
}

impl PassKind {
    pub const ALL: [PassKind; 4] = [
        PassKind::Security,
        PassKind::Performance,
        PassKind::CleanCode,
        PassKind::Logical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PassKind::Security => "security",
            PassKind::Performance => "performance",
            PassKind::CleanCode => "clean-code",
            PassKind::Logical => "logical",
        }
    }

    /// Namespace of the reference-knowledge corpus this pass consults.
    pub fn knowledge_namespace(&self) -> &'static str {
        self.as_str()
    }
}

impl std::fmt::Display for PassKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PROBLEM is reserved for defects confirmable purely by reading the code.
/// Anything that needs business context or taste stays SUGGESTION, which is
/// also the fallback whenever classification fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FindingCategory {
    Problem,
    Suggestion,
}

/// One issue reported by an analysis pass, anchored to an exact new-file
/// line of the PR diff. Never mutated after classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub file: String,
    /// A real line from the diff. Findings whose line cannot be resolved
    /// against the diff never get this far.
    pub line: usize,
    pub final_line: Option<usize>,
    pub kind: PassKind,
    pub description: String,
    pub evidence: Option<String>,
    pub impact: Option<String>,
    pub recommendation: Option<String>,
    pub example: Option<String>,
    pub category: Option<FindingCategory>,
}

impl Finding {
    /// Effective category; unclassified findings count as suggestions.
    pub fn category_or_default(&self) -> FindingCategory {
        self.category.unwrap_or(FindingCategory::Suggestion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unclassified_defaults_to_suggestion() {
        let finding = Finding {
            file: "calc.py".into(),
            line: 23,
            final_line: None,
            kind: PassKind::Logical,
            description: "division without zero-check".into(),
            evidence: None,
            impact: None,
            recommendation: None,
            example: None,
            category: None,
        };
        assert_eq!(finding.category_or_default(), FindingCategory::Suggestion);
    }

    #[test]
    fn category_round_trips_upper_case() {
        let json = serde_json::to_string(&FindingCategory::Problem).unwrap();
        assert_eq!(json, "\"PROBLEM\"");
        let back: FindingCategory = serde_json::from_str("\"SUGGESTION\"").unwrap();
        assert_eq!(back, FindingCategory::Suggestion);
    }
}
