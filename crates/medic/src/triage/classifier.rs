//! Failure classification from a log excerpt.

use tracing::{debug, warn};

use super::types::Classification;
use crate::llm::{ChatMessage, TextGenerator};

/// Excerpt prefix written when the host refused the log download.
pub const LOG_FETCH_FAILED: &str = "Failed to fetch logs";

/// Excerpt prefix written when the log download errored in transport.
pub const LOG_FETCH_ERROR: &str = "Error fetching logs";

const SYSTEM_PROMPT: &str = r#"You are a CI/CD expert analyzing GitHub Actions failure logs.

Classify the failure into one of these categories:
- Workflow YAML syntax error (indentation, unknown keys, invalid expressions)
- Dependency or version mismatch (action versions, runtime versions, lockfiles)
- Build or test failure in the project code

Respond with a single JSON object and nothing else:
{
  "root_cause": "short description of the failure category and cause",
  "error_message": "the most relevant error line from the logs",
  "is_fixable": true or false,
  "fix_suggestion": "concrete change to make"
}

Set "is_fixable" to true ONLY for a clear version mismatch or a simple workflow YAML syntax error that can be fixed by editing the workflow file. Code, test, and infrastructure failures are never fixable."#;

/// True if the excerpt is one of the log-retrieval sentinels.
#[must_use]
pub fn is_log_fetch_failure(excerpt: &str) -> bool {
    excerpt.contains(LOG_FETCH_FAILED) || excerpt.contains(LOG_FETCH_ERROR)
}

/// Classifies failure logs with a text generator.
pub struct FailureClassifier<'a> {
    generator: &'a dyn TextGenerator,
}

impl<'a> FailureClassifier<'a> {
    #[must_use]
    pub fn new(generator: &'a dyn TextGenerator) -> Self {
        Self { generator }
    }

    /// Always returns a verdict; unusable model output degrades to
    /// [`Classification::classification_failed`].
    pub async fn classify(&self, excerpt: &str) -> Classification {
        if is_log_fetch_failure(excerpt) {
            debug!("Logs unavailable, skipping model call");
            return Classification::logs_unavailable(excerpt);
        }

        let messages = [
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(format!("Logs:\n{excerpt}")),
        ];

        let response = match self.generator.generate(&messages).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Classifier call failed");
                return Classification::classification_failed(format!("Classifier unavailable: {e}"));
            }
        };

        parse_classification(&response).unwrap_or_else(|| {
            warn!("Classifier returned no usable JSON object");
            Classification::classification_failed(format!(
                "Unparseable classifier output: {}",
                response.chars().take(200).collect::<String>()
            ))
        })
    }
}

/// Parse the first balanced `{...}` block of `response` as a classification.
#[must_use]
pub fn parse_classification(response: &str) -> Option<Classification> {
    let block = extract_json_block(response)?;
    serde_json::from_str(block).ok()
}

/// First balanced brace-delimited block, ignoring braces inside JSON strings.
#[must_use]
pub fn extract_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }

    None
}
