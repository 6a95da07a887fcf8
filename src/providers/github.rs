use crate::core::pr_data::{ChangeType, FileDiff, PRData};
use crate::providers::source_control::{SourceControlProvider, ThreadId};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

pub struct GithubProvider {
    client: Client,
    token: String,
    owner: String,
    repo: String,
    base_url: String,
}

#[derive(Deserialize)]
struct PullResponse {
    head: RefInfo,
    base: RefInfo,
}

#[derive(Deserialize)]
struct RefInfo {
    #[serde(rename = "ref")]
    branch: String,
    sha: Option<String>,
}

#[derive(Deserialize)]
struct PullFile {
    filename: String,
    status: String,
    additions: usize,
    deletions: usize,
    patch: Option<String>,
}

#[derive(Deserialize)]
struct CommentResponse {
    id: u64,
}

impl GithubProvider {
    pub fn new(token: String, owner: String, repo: String, base_url: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            token,
            owner,
            repo,
            base_url: base_url.unwrap_or_else(|| "https://api.github.com".to_string()),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "prlens")
    }

    async fn send_with_retry<F>(&self, mut make_request: F) -> Result<reqwest::Response>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        const MAX_RETRIES: usize = 2;
        const BASE_DELAY_MS: u64 = 250;

        for attempt in 0..=MAX_RETRIES {
            match make_request().send().await {
                Ok(response) => {
                    if response.status().is_success() {
                        return Ok(response);
                    }

                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    if is_retryable_status(status) && attempt < MAX_RETRIES {
                        sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1))).await;
                        continue;
                    }

                    anyhow::bail!("GitHub API error ({}): {}", status, body);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES {
                        sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1))).await;
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }

        anyhow::bail!("GitHub request failed after retries");
    }

    async fn fetch_pull(&self, pr_id: u64) -> Result<PullResponse> {
        let path = format!("/repos/{}/{}/pulls/{}", self.owner, self.repo, pr_id);
        let response = self
            .send_with_retry(|| self.request(reqwest::Method::GET, &path))
            .await
            .context("Failed to fetch pull request")?;
        response.json().await.context("Failed to parse pull request")
    }
}

#[async_trait]
impl SourceControlProvider for GithubProvider {
    async fn fetch_consolidated_pr(&self, pr_id: u64) -> Result<PRData> {
        let pull = self.fetch_pull(pr_id).await?;

        let path = format!(
            "/repos/{}/{}/pulls/{}/files?per_page=100",
            self.owner, self.repo, pr_id
        );
        let response = self
            .send_with_retry(|| self.request(reqwest::Method::GET, &path))
            .await
            .context("Failed to fetch pull request files")?;
        let raw_files: Vec<PullFile> = response
            .json()
            .await
            .context("Failed to parse pull request files")?;

        let files = raw_files
            .into_iter()
            .map(|f| {
                if f.patch.is_none() {
                    warn!(file = %f.filename, "no patch returned (binary or oversized), diff will be empty");
                }
                FileDiff {
                    change_type: ChangeType::from_status(&f.status),
                    diff_text: f.patch.unwrap_or_default(),
                    path: f.filename,
                    additions: f.additions,
                    deletions: f.deletions,
                }
            })
            .collect();

        Ok(PRData::new(pr_id, pull.head.branch, pull.base.branch, files))
    }

    async fn post_comment(
        &self,
        pr_id: u64,
        file: &str,
        line: usize,
        message: &str,
    ) -> Result<ThreadId> {
        // Review comments anchor to a commit; use the PR head.
        let pull = self.fetch_pull(pr_id).await?;
        let commit_id = pull
            .head
            .sha
            .context("Pull request head has no commit sha")?;

        let body = serde_json::json!({
            "body": message,
            "path": file,
            "line": line,
            "side": "RIGHT",
            "commit_id": commit_id,
        });

        let path = format!("/repos/{}/{}/pulls/{}/comments", self.owner, self.repo, pr_id);
        let response = self
            .send_with_retry(|| self.request(reqwest::Method::POST, &path).json(&body))
            .await
            .context("Failed to post review comment")?;

        let created: CommentResponse = response
            .json()
            .await
            .context("Failed to parse comment response")?;
        Ok(ThreadId(created.id))
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
