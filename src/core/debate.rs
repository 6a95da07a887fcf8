use crate::adapters::llm::{LLMAdapter, LLMRequest};
use crate::core::comment::{Comment, ValidationStatus};
use crate::core::structured::try_parse_structured;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Debate progression. The machine only ever moves forward and the round
/// count is fixed up front, so termination is structural.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebateState {
    Drafted,
    Refining,
    FinalDecision,
    Done,
}

#[derive(Debug, Deserialize)]
struct VerdictOutput {
    #[serde(default)]
    verdicts: Vec<Verdict>,
}

#[derive(Debug, Deserialize)]
struct Verdict {
    index: usize,
    verdict: String,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct RevisionOutput {
    #[serde(default)]
    revisions: Vec<Revision>,
}

#[derive(Debug, Deserialize)]
struct Revision {
    index: usize,
    message: String,
}

/// Adversarial filter between the reviewer's draft and the final comment
/// set: a skeptical validator critiques, the reviewer narrows, the validator
/// makes a terminal call. Any round failing (call error, unparseable output,
/// timeout) degrades to the best known-good prior state instead of emptying
/// the pipeline.
pub struct DebateLoop {
    refine_rounds: usize,
    round_timeout: Duration,
}

impl DebateLoop {
    pub fn new(refine_rounds: usize, round_timeout: Duration) -> Self {
        Self {
            refine_rounds,
            round_timeout,
        }
    }

    pub async fn run(&self, draft: Vec<Comment>, adapter: &dyn LLMAdapter) -> Vec<Comment> {
        if draft.is_empty() {
            return draft;
        }

        let mut state = DebateState::Drafted;
        let mut last_good = draft;
        debug!(?state, comments = last_good.len(), "debate started");

        // Critique: partition the draft against strict acceptance criteria.
        match self.verdict_round(adapter, critique_request(&last_good)).await {
            Ok(output) => {
                let (approved, rejected) = partition(&last_good, &output);
                for comment in &rejected {
                    debug!(file = %comment.file, line = comment.line, "validator rejected draft comment");
                }
                if approved.is_empty() {
                    // A legitimate all-reject verdict, not a failure.
                    info!("validator rejected every draft comment");
                    return approved;
                }
                last_good = approved;
                state = DebateState::Refining;
                debug!(?state, surviving = last_good.len(), "critique complete");
            }
            Err(err) => {
                warn!("critique round failed, keeping reviewer draft: {err}");
                return last_good;
            }
        }

        // Refine: the reviewer rewrites wording, nothing structural.
        for round in 0..self.refine_rounds {
            match self.revision_round(adapter, refine_request(&last_good)).await {
                Ok(output) => apply_revisions(&mut last_good, output),
                Err(err) => {
                    warn!(round, "refine round failed, keeping prior comment set: {err}");
                    break;
                }
            }
        }
        state = DebateState::FinalDecision;
        debug!(?state, "entering terminal pass");

        // Terminal pass: only explicit approval survives.
        let finals = match self
            .verdict_round(adapter, final_decision_request(&last_good))
            .await
        {
            Ok(output) => {
                let (approved, _) = partition(&last_good, &output);
                approved
            }
            Err(err) => {
                warn!("final decision failed, keeping prior comment set: {err}");
                mark_approved(last_good)
            }
        };

        state = DebateState::Done;
        debug!(?state, finals = finals.len(), "debate finished");
        finals
    }

    async fn verdict_round(
        &self,
        adapter: &dyn LLMAdapter,
        request: LLMRequest,
    ) -> Result<VerdictOutput> {
        let response = tokio::time::timeout(self.round_timeout, adapter.complete(request))
            .await
            .context("debate round timed out")??;
        try_parse_structured(&response.content).context("unparseable validator output")
    }

    async fn revision_round(
        &self,
        adapter: &dyn LLMAdapter,
        request: LLMRequest,
    ) -> Result<RevisionOutput> {
        let response = tokio::time::timeout(self.round_timeout, adapter.complete(request))
            .await
            .context("debate round timed out")??;
        try_parse_structured(&response.content).context("unparseable reviewer output")
    }
}

/// Splits `comments` into approved/rejected per the validator's verdicts.
/// Comments the validator did not explicitly approve are rejected: when in
/// doubt, reject.
fn partition(comments: &[Comment], output: &VerdictOutput) -> (Vec<Comment>, Vec<Comment>) {
    let mut approved_indices = std::collections::HashSet::new();
    for verdict in &output.verdicts {
        if verdict.index < comments.len() && verdict.verdict.eq_ignore_ascii_case("approve") {
            approved_indices.insert(verdict.index);
        } else if verdict.index < comments.len() {
            debug!(index = verdict.index, reason = %verdict.reason, "comment rejected");
        }
    }

    let mut approved = Vec::new();
    let mut rejected = Vec::new();
    for (index, comment) in comments.iter().enumerate() {
        let mut comment = comment.clone();
        if approved_indices.contains(&index) {
            comment.validation_status = ValidationStatus::Approved;
            approved.push(comment);
        } else {
            comment.validation_status = ValidationStatus::Rejected;
            rejected.push(comment);
        }
    }
    (approved, rejected)
}

/// Applies message rewrites by index. Structural fields (file, line,
/// priority, sources) are never touched and out-of-range indices are
/// ignored, so the reviewer cannot invent comments here.
fn apply_revisions(comments: &mut [Comment], output: RevisionOutput) {
    for revision in output.revisions {
        if let Some(comment) = comments.get_mut(revision.index) {
            if !revision.message.trim().is_empty() {
                comment.message = revision.message;
            }
        }
    }
}

fn mark_approved(mut comments: Vec<Comment>) -> Vec<Comment> {
    for comment in &mut comments {
        comment.validation_status = ValidationStatus::Approved;
    }
    comments
}

fn render_comments(comments: &[Comment]) -> String {
    let mut rendered = String::new();
    for (index, comment) in comments.iter().enumerate() {
        rendered.push_str(&format!(
            "{}. [{}:{}] ({:?}, from {}) {}\n",
            index,
            comment.file,
            comment.line,
            comment.priority,
            comment
                .source_kinds
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join("+"),
            comment.message
        ));
    }
    rendered
}

fn critique_request(comments: &[Comment]) -> LLMRequest {
    LLMRequest {
        system_prompt: "You are a skeptical validator of code-review comments.\n\
            Approve a comment only if it states a technical fact confirmable from\n\
            the code alone, with evidence, independent of business-rule knowledge.\n\
            When in doubt, reject: a missed issue is better than an unconfirmable\n\
            claim. Respond with JSON only:\n\
            {\"verdicts\": [{\"index\": 0, \"verdict\": \"approve\", \"reason\": \"...\"}]}"
            .to_string(),
        user_prompt: format!("Draft comments:\n{}", render_comments(comments)),
        temperature: Some(0.0),
        max_tokens: None,
    }
}

fn refine_request(comments: &[Comment]) -> LLMRequest {
    LLMRequest {
        system_prompt: "You are the reviewer tightening your own comments after\n\
            validator feedback. Rewrite wording to be narrower and better\n\
            evidenced. Do not add comments, do not change files, lines, or\n\
            priorities. Respond with JSON only:\n\
            {\"revisions\": [{\"index\": 0, \"message\": \"...\"}]}"
            .to_string(),
        user_prompt: format!("Approved comments:\n{}", render_comments(comments)),
        temperature: Some(0.2),
        max_tokens: None,
    }
}

fn final_decision_request(comments: &[Comment]) -> LLMRequest {
    LLMRequest {
        system_prompt: "You make the terminal approve/reject decision on refined\n\
            review comments. Anything you do not explicitly approve is dropped.\n\
            Keep only high-confidence, confirmable comments. Respond with JSON\n\
            only:\n\
            {\"verdicts\": [{\"index\": 0, \"verdict\": \"approve\", \"reason\": \"...\"}]}"
            .to_string(),
        user_prompt: format!("Refined comments:\n{}", render_comments(comments)),
        temperature: Some(0.0),
        max_tokens: None,
    }
}
