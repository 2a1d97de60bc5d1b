use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const VALIDATOR_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LintError {
    pub message: String,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub column: Option<u32>,
    #[serde(default)]
    pub rule: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validation {
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<LintError>,
}

impl Validation {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }
}

/// Oracle for generated component source. Only the code-review loop consumes
/// its output.
#[async_trait]
pub trait SyntaxValidator: Send + Sync {
    async fn validate(&self, source: &str) -> Result<Validation>;
}

/// Out-of-process lint check: spawns the configured command, writes the
/// source to stdin and reads a `{valid, errors}` JSON verdict from stdout.
/// The lint profile on the other side pins the closed set of allowed
/// globals (chart, math-rendering and UI-toolkit namespaces).
pub struct EslintValidator {
    command: Vec<String>,
}

impl EslintValidator {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl SyntaxValidator for EslintValidator {
    async fn validate(&self, source: &str) -> Result<Validation> {
        let Some((program, args)) = self.command.split_first() else {
            // No validator configured: everything passes.
            return Ok(Validation::ok());
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow!("failed to spawn syntax validator {program}: {e}"))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(source.as_bytes()).await?;
            drop(stdin);
        }

        let output = tokio::time::timeout(VALIDATOR_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| anyhow!("syntax validator timed out"))??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        serde_json::from_str(stdout.trim()).map_err(|e| {
            anyhow!(
                "syntax validator produced unparsable output: {e} (stderr: {})",
                String::from_utf8_lossy(&output.stderr).trim()
            )
        })
    }
}

/// Normalizes model output into bare component source: markdown fences are
/// stripped and the text is sliced from the first `() =>` through the last
/// closing brace.
pub fn clean_up_response(source: &str) -> String {
    let mut text = source.trim();

    if text.starts_with("```") {
        if let Some(newline) = text.find('\n') {
            text = &text[newline + 1..];
        }
        if let Some(end) = text.rfind("```") {
            text = &text[..end];
        }
        text = text.trim();
    }

    if let Some(start) = text.find("() =>") {
        if let Some(end) = text.rfind('}') {
            if end >= start {
                return text[start..=end].to_string();
            }
        }
    }

    text.to_string()
}

/// A generated question carries component source when it opens with the
/// arrow-component prefix; everything else is treated as plain text and
/// never sent through the repair loop.
pub fn is_component_source(text: &str) -> bool {
    text.trim_start().starts_with("() =>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_command_validates_everything() {
        let validator = EslintValidator::new(vec![]);
        let verdict = validator.validate("() => { return null; }").await.unwrap();
        assert!(verdict.valid);
        assert!(verdict.errors.is_empty());
    }

    #[tokio::test]
    async fn subprocess_verdict_is_parsed() {
        // `cat` is not a linter, so feed the verdict through echo instead:
        // the validator contract only cares about the stdout JSON.
        let validator = EslintValidator::new(vec![
            "sh".into(),
            "-c".into(),
            r#"cat > /dev/null; echo '{"valid": false, "errors": [{"message": "Unexpected token", "line": 3, "rule": "parse"}]}'"#.into(),
        ]);
        let verdict = validator.validate("() => {").await.unwrap();
        assert!(!verdict.valid);
        assert_eq!(verdict.errors.len(), 1);
        assert_eq!(verdict.errors[0].message, "Unexpected token");
        assert_eq!(verdict.errors[0].line, Some(3));
    }

    #[tokio::test]
    async fn unparsable_output_is_an_error() {
        let validator = EslintValidator::new(vec![
            "sh".into(),
            "-c".into(),
            "cat > /dev/null; echo not-json".into(),
        ]);
        assert!(validator.validate("() => {}").await.is_err());
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let validator = EslintValidator::new(vec!["definitely-not-a-real-binary-xyz".into()]);
        assert!(validator.validate("() => {}").await.is_err());
    }

    #[test]
    fn clean_up_strips_markdown_fences() {
        let raw = "```jsx\n() => {\n  return <p>hi</p>;\n}\n```";
        assert_eq!(clean_up_response(raw), "() => {\n  return <p>hi</p>;\n}");
    }

    #[test]
    fn clean_up_slices_surrounding_prose() {
        let raw = "Here is the component:\n() => { return <p>hi</p>; }\nHope that helps!";
        assert_eq!(clean_up_response(raw), "() => { return <p>hi</p>; }");
    }

    #[test]
    fn clean_up_leaves_plain_text_alone() {
        assert_eq!(clean_up_response("  just an answer  "), "just an answer");
    }

    #[test]
    fn component_source_detection() {
        assert!(is_component_source("() => { return null; }"));
        assert!(is_component_source("  () => {}"));
        assert!(!is_component_source("What is a borrow checker?"));
    }

    #[test]
    fn validation_serde_round_trip() {
        let raw = r#"{"valid": true, "errors": []}"#;
        let verdict: Validation = serde_json::from_str(raw).unwrap();
        assert!(verdict.valid);

        let raw = r#"{"valid": false, "errors": [{"message": "bad"}]}"#;
        let verdict: Validation = serde_json::from_str(raw).unwrap();
        assert_eq!(verdict.errors[0].line, None);
        assert_eq!(verdict.errors[0].rule, None);
    }
}
