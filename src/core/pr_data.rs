use serde::{Deserialize, Serialize};

/// Immutable snapshot of a pull request at analysis time.
///
/// Created once per run by the source-control provider and read-only from
/// then on; nothing is persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PRData {
    pub pr_id: u64,
    pub source_branch: String,
    pub target_branch: String,
    pub files: Vec<FileDiff>,
    pub total_additions: usize,
    pub total_deletions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub change_type: ChangeType,
    /// Unified-diff hunks for this file. Must allow recovering the exact
    /// new-file line number of every added line.
    pub diff_text: String,
    pub additions: usize,
    pub deletions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
}

impl ChangeType {
    /// Maps provider status strings (GitHub vocabulary) onto the internal
    /// enum. Renames and copies count as modifications.
    pub fn from_status(status: &str) -> Self {
        match status {
            "added" => ChangeType::Added,
            "removed" | "deleted" => ChangeType::Deleted,
            _ => ChangeType::Modified,
        }
    }
}

impl PRData {
    pub fn new(pr_id: u64, source_branch: String, target_branch: String, files: Vec<FileDiff>) -> Self {
        let total_additions = files.iter().map(|f| f.additions).sum();
        let total_deletions = files.iter().map(|f| f.deletions).sum();
        Self {
            pr_id,
            source_branch,
            target_branch,
            files,
            total_additions,
            total_deletions,
        }
    }

    /// Copy of this snapshot with the given files removed. Used once, right
    /// after fetch, to honor configured exclusion globs.
    pub fn without_files(&self, excluded: impl Fn(&str) -> bool) -> Self {
        let files: Vec<FileDiff> = self
            .files
            .iter()
            .filter(|f| !excluded(&f.path))
            .cloned()
            .collect();
        Self::new(
            self.pr_id,
            self.source_branch.clone(),
            self.target_branch.clone(),
            files,
        )
    }
}

impl FileDiff {
    pub fn extension(&self) -> String {
        std::path::Path::new(&self.path)
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_are_summed_over_files() {
        let pr = PRData::new(
            7,
            "feature/x".into(),
            "main".into(),
            vec![
                FileDiff {
                    path: "a.py".into(),
                    change_type: ChangeType::Modified,
                    diff_text: String::new(),
                    additions: 3,
                    deletions: 1,
                },
                FileDiff {
                    path: "b.py".into(),
                    change_type: ChangeType::Added,
                    diff_text: String::new(),
                    additions: 10,
                    deletions: 0,
                },
            ],
        );
        assert_eq!(pr.total_additions, 13);
        assert_eq!(pr.total_deletions, 1);
    }

    #[test]
    fn change_type_maps_provider_statuses() {
        assert_eq!(ChangeType::from_status("added"), ChangeType::Added);
        assert_eq!(ChangeType::from_status("removed"), ChangeType::Deleted);
        assert_eq!(ChangeType::from_status("renamed"), ChangeType::Modified);
    }

    #[test]
    fn without_files_recomputes_totals() {
        let pr = PRData::new(
            1,
            "head".into(),
            "main".into(),
            vec![
                FileDiff {
                    path: "src/lib.rs".into(),
                    change_type: ChangeType::Modified,
                    diff_text: String::new(),
                    additions: 5,
                    deletions: 2,
                },
                FileDiff {
                    path: "vendor/dep.rs".into(),
                    change_type: ChangeType::Modified,
                    diff_text: String::new(),
                    additions: 100,
                    deletions: 0,
                },
            ],
        );
        let filtered = pr.without_files(|p| p.starts_with("vendor/"));
        assert_eq!(filtered.files.len(), 1);
        assert_eq!(filtered.total_additions, 5);
    }
}
