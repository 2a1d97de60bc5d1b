//! Code-review loop: a free function over a standard agent and the syntax
//! validator, not an agent subclass. The explainer generates inside the loop;
//! tester questions arrive with source already attached and only get
//! repaired.

use anyhow::Result;

use crate::runtime::StandardAgent;
use crate::state::CourseState;
use crate::validator::{clean_up_response, LintError, SyntaxValidator};

/// Builds the repair prompt: previous source verbatim, errors verbatim, full
/// rewrite demanded.
fn repair_prompt(source: &str, errors: &[LintError]) -> String {
    let errors_json = serde_json::to_string_pretty(errors).unwrap_or_else(|_| "[]".to_string());
    format!(
        "You were prompted before, but the code that you output did not pass the syntax validation check.\n\
         Your previous code:\n{source}\n\
         Your code generated the following errors:\n{errors_json}\n\n\
         Please try again and rewrite the code from scratch, without explanation.\n\
         Your response should start with () => and end with a curly brace."
    )
}

/// Generate-and-repair loop used by the explainer. The first iteration sends
/// `initial_prompt`; every further iteration re-prompts with the previous
/// output and the validator errors. Returns the cleaned source on success,
/// `None` when `iterations` runs out.
pub async fn code_review_loop(
    agent: &StandardAgent,
    validator: &dyn SyntaxValidator,
    user_id: &str,
    state: &CourseState,
    initial_prompt: &str,
    iterations: u32,
) -> Result<Option<String>> {
    let mut prompt = initial_prompt.to_string();

    for iteration in 0..iterations {
        let output = match agent.run(user_id, state, &prompt).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!("explainer call failed inside review loop: {e}");
                return Ok(None);
            }
        };

        let verdict = validator.validate(&output).await?;
        if verdict.valid {
            return Ok(Some(clean_up_response(&output)));
        }

        tracing::warn!(
            "component source failed validation (iteration {}/{iterations}): {} error(s)",
            iteration + 1,
            verdict.errors.len()
        );
        prompt = repair_prompt(&output, &verdict.errors);
    }

    Ok(None)
}

/// Repair loop for a single question whose `question` field carries
/// component source. Validates first, repairs on failure; unrepairable
/// source yields `None` and the caller drops the question.
pub async fn repair_question_source(
    agent: &StandardAgent,
    validator: &dyn SyntaxValidator,
    user_id: &str,
    state: &CourseState,
    source: &str,
    iterations: u32,
) -> Result<Option<String>> {
    let mut code = source.to_string();

    for iteration in 0..iterations {
        let verdict = validator.validate(&code).await?;
        if verdict.valid {
            return Ok(Some(clean_up_response(&code)));
        }

        tracing::warn!(
            "question source failed validation (attempt {}/{iterations}): {} error(s)",
            iteration + 1,
            verdict.errors.len()
        );

        let prompt = repair_prompt(&code, &verdict.errors);
        match agent.run(user_id, state, &prompt).await {
            Ok(output) => code = output,
            Err(e) => {
                tracing::warn!("review agent call failed: {e}");
                break;
            }
        }
    }

    Ok(None)
}
