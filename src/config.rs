use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    pub api_key: Option<String>,
    pub base_url: Option<String>,

    /// Repository in `owner/name` form.
    pub repo: Option<String>,
    pub github_token: Option<String>,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// YAML corpus of reference snippets, loaded per run into the knowledge
    /// namespaces.
    pub knowledge_path: Option<PathBuf>,

    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,

    #[serde(default = "default_max_retrievals")]
    pub max_retrievals_per_pass: usize,

    #[serde(default = "default_refine_rounds")]
    pub debate_refine_rounds: usize,

    #[serde(default = "default_timeout_secs")]
    pub analysis_timeout_secs: u64,

    /// Whether SUGGESTION findings reach the final comment set (with
    /// reflective tone). This is a product decision, hence configurable.
    #[serde(default = "default_true")]
    pub include_suggestions: bool,

    /// Glob patterns of paths to leave out of the analysis entirely.
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            api_key: None,
            base_url: None,
            repo: None,
            github_token: None,
            embedding_model: default_embedding_model(),
            knowledge_path: None,
            retrieval_k: default_retrieval_k(),
            max_retrievals_per_pass: default_max_retrievals(),
            debate_refine_rounds: default_refine_rounds(),
            analysis_timeout_secs: default_timeout_secs(),
            include_suggestions: default_true(),
            exclude: Vec::new(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        for name in [".prlens.yml", ".prlens.yaml"] {
            let path = PathBuf::from(name);
            if path.exists() {
                let content = std::fs::read_to_string(&path)?;
                return Ok(serde_yaml::from_str(&content)?);
            }
        }

        if let Some(home_dir) = dirs::home_dir() {
            let home_config = home_dir.join(".prlens.yml");
            if home_config.exists() {
                let content = std::fs::read_to_string(&home_config)?;
                return Ok(serde_yaml::from_str(&content)?);
            }
        }

        Ok(Config::default())
    }

    pub fn merge_with_cli(&mut self, model: Option<String>, repo: Option<String>) {
        if let Some(model) = model {
            self.model = model;
        }
        if let Some(repo) = repo {
            self.repo = Some(repo);
        }
        if self.github_token.is_none() {
            self.github_token = std::env::var("GITHUB_TOKEN").ok();
        }
    }

    pub fn should_exclude(&self, path: &str) -> bool {
        self.exclude.iter().any(|pattern| {
            glob::Pattern::new(pattern)
                .map(|p| p.matches(path))
                .unwrap_or(false)
        })
    }

    /// `(owner, name)` from the `owner/name` repo field.
    pub fn repo_parts(&self) -> Result<(String, String)> {
        let repo = self
            .repo
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("no repository configured (use --repo owner/name)"))?;
        match repo.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() => {
                Ok((owner.to_string(), name.to_string()))
            }
            _ => anyhow::bail!("invalid repository format '{}', expected owner/name", repo),
        }
    }
}

fn default_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> usize {
    4000
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_retrieval_k() -> usize {
    6
}

fn default_max_retrievals() -> usize {
    5
}

fn default_refine_rounds() -> usize {
    1
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_fills_defaults() {
        let config: Config =
            serde_yaml::from_str("model: gpt-4o\nexclude:\n  - \"vendor/**\"\n").unwrap();
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.debate_refine_rounds, 1);
        assert_eq!(config.analysis_timeout_secs, 300);
        assert!(config.include_suggestions);
    }

    #[test]
    fn exclude_globs_match_paths() {
        let config: Config =
            serde_yaml::from_str("exclude:\n  - \"vendor/**\"\n  - \"*.lock\"\n").unwrap();
        assert!(config.should_exclude("vendor/lib/mod.rs"));
        assert!(config.should_exclude("Cargo.lock"));
        assert!(!config.should_exclude("src/main.rs"));
    }

    #[test]
    fn repo_parts_requires_owner_slash_name() {
        let mut config = Config::default();
        assert!(config.repo_parts().is_err());
        config.repo = Some("acme/widgets".into());
        assert_eq!(
            config.repo_parts().unwrap(),
            ("acme".to_string(), "widgets".to_string())
        );
        config.repo = Some("nonsense".into());
        assert!(config.repo_parts().is_err());
    }
}
