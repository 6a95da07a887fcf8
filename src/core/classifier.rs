use crate::adapters::llm::{LLMAdapter, LLMRequest};
use crate::core::finding::{Finding, FindingCategory, PassKind};
use crate::core::structured::parse_structured_output;
use serde::Deserialize;
use tracing::{debug, warn};

const MAX_CONTEXT_CHARS: usize = 8000;

#[derive(Debug, Deserialize)]
struct ClassifierOutput {
    #[serde(default)]
    classifications: Vec<Classification>,
}

#[derive(Debug, Deserialize)]
struct Classification {
    index: usize,
    category: FindingCategory,
}

/// Labels each finding PROBLEM or SUGGESTION with an independent, cheaper
/// classification call. Order and 1:1 correspondence are preserved;
/// classification is by index, and any failure defaults toward SUGGESTION,
/// never toward a false-positive PROBLEM.
pub struct FindingClassifier;

impl FindingClassifier {
    pub async fn classify(
        kind: PassKind,
        mut findings: Vec<Finding>,
        code_context: &str,
        adapter: &dyn LLMAdapter,
    ) -> Vec<Finding> {
        if findings.is_empty() {
            return findings;
        }

        // Conservative baseline; an explicit PROBLEM verdict upgrades it.
        for finding in &mut findings {
            finding.category = Some(FindingCategory::Suggestion);
        }

        let request = LLMRequest {
            system_prompt: Self::system_prompt(),
            user_prompt: Self::user_prompt(kind, &findings, code_context),
            temperature: Some(0.0),
            max_tokens: Some(1000),
        };

        let response = match adapter.complete(request).await {
            Ok(response) => response,
            Err(err) => {
                warn!(kind = %kind, "classification failed, keeping suggestions: {err}");
                return findings;
            }
        };

        let output: ClassifierOutput = parse_structured_output(
            &response.content,
            ClassifierOutput {
                classifications: Vec::new(),
            },
        );

        for classification in output.classifications {
            match findings.get_mut(classification.index) {
                Some(finding) => finding.category = Some(classification.category),
                None => {
                    debug!(
                        kind = %kind,
                        index = classification.index,
                        "ignoring out-of-range classification"
                    );
                }
            }
        }

        findings
    }

    fn system_prompt() -> String {
        "You label code-review findings.\n\
         PROBLEM: confirmable purely by reading the code, such as type errors, unguarded\n\
         null dereference, division by zero, hardcoded secrets, confirmed injection,\n\
         proven high-volume N+1.\n\
         SUGGESTION: anything needing unknown business context, stylistic\n\
         preference, or unproven performance impact.\n\
         When unsure, answer SUGGESTION.\n\
         Respond with JSON only:\n\
         {\"classifications\": [{\"index\": 0, \"category\": \"PROBLEM\"}]}"
            .to_string()
    }

    fn user_prompt(kind: PassKind, findings: &[Finding], code_context: &str) -> String {
        let mut prompt = format!("Findings from the {} pass:\n", kind);
        for (index, finding) in findings.iter().enumerate() {
            prompt.push_str(&format!(
                "{}. [{}:{}] {}\n",
                index, finding.file, finding.line, finding.description
            ));
            if let Some(evidence) = &finding.evidence {
                prompt.push_str(&format!("   evidence: {}\n", evidence));
            }
        }

        if !code_context.is_empty() {
            let mut end = MAX_CONTEXT_CHARS.min(code_context.len());
            while !code_context.is_char_boundary(end) {
                end -= 1;
            }
            prompt.push_str("\nCode under review:\n");
            prompt.push_str(&code_context[..end]);
        }
        prompt
    }
}
