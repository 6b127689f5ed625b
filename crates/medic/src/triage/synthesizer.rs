//! Corrected workflow generation.

use std::sync::LazyLock;

use regex::Regex;

use crate::llm::{ChatMessage, LlmError, LlmResult, TextGenerator};

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[A-Za-z0-9_+-]*").expect("code fence pattern is valid"));

const SYSTEM_PROMPT: &str = "You are a GitHub Actions expert. Rewrite workflow files to fix the \
described problem. Output only the complete corrected YAML file. No explanations, no markdown.";

/// Produces a full replacement workflow file.
pub struct FixSynthesizer<'a> {
    generator: &'a dyn TextGenerator,
}

impl<'a> FixSynthesizer<'a> {
    #[must_use]
    pub fn new(generator: &'a dyn TextGenerator) -> Self {
        Self { generator }
    }

    /// Rewrite `original` according to `suggestion`.
    ///
    /// # Errors
    ///
    /// Returns the generator's error, or [`LlmError::EmptyResponse`] if
    /// nothing is left once fences are stripped.
    pub async fn synthesize(&self, original: &str, suggestion: &str) -> LlmResult<String> {
        let messages = [
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Original workflow:\n{original}\n\nFix to apply:\n{suggestion}\n\nReturn the corrected workflow YAML only."
            )),
        ];

        let response = self.generator.generate(&messages).await?;
        let fix = strip_code_fences(&response);
        if fix.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(fix)
    }
}

/// Remove markdown code fences and surrounding whitespace.
#[must_use]
pub fn strip_code_fences(text: &str) -> String {
    CODE_FENCE.replace_all(text, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triage::testing::ScriptedGenerator;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```yaml\nname: CI\n```\n"), "name: CI");
        assert_eq!(strip_code_fences("```yml\non: push\n```"), "on: push");
        assert_eq!(strip_code_fences("```\njobs: {}\n```"), "jobs: {}");
        assert_eq!(strip_code_fences("  name: CI  \n"), "name: CI");
    }

    #[tokio::test]
    async fn test_synthesize_returns_clean_yaml() {
        let generator = ScriptedGenerator::new(vec![Ok(
            "```yaml\nname: CI\non: push\njobs:\n  build:\n    runs-on: ubuntu-latest\n```".to_string(),
        )]);
        let fix = FixSynthesizer::new(&generator)
            .synthesize("name: CI\non: push\njobs:\n build:\n", "Fix indentation")
            .await
            .expect("fix");

        assert!(fix.starts_with("name: CI"));
        assert!(!fix.contains("```"));
        assert!(generator.prompts()[0].contains("Fix indentation"));
    }

    #[tokio::test]
    async fn test_synthesize_empty_after_stripping() {
        let generator = ScriptedGenerator::new(vec![Ok("```yaml\n```".to_string())]);
        let result = FixSynthesizer::new(&generator).synthesize("x", "y").await;
        assert!(matches!(result, Err(LlmError::EmptyResponse)));
    }
}
