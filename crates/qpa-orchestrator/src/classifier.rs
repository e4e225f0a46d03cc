//! Per-question classification.

use tracing::{debug, warn};

use crate::error::{QpaError, Result};
use crate::gateway::{AiRequest, CallPurpose, Gateway};
use crate::parser;
use crate::prompts;
use crate::rubric::{ClassificationResult, UserPreferences};
use crate::tasks::QuestionTask;

/// Classifies one question.
///
/// Unusable model output yields a degraded result carrying the question's
/// marks rather than an error.
///
/// # Errors
///
/// Returns upstream errors once the gateway's retries are exhausted.
pub async fn classify(
    gateway: &Gateway,
    task: &QuestionTask,
    preferences: &UserPreferences,
) -> Result<ClassificationResult> {
    let request = AiRequest::json(
        CallPurpose::Classification,
        prompts::classification(task, preferences),
        None,
    );
    let raw = gateway.invoke(&request).await?;

    match parser::parse_as::<ClassificationResult>(&raw, "ClassificationResult") {
        Ok(result) => {
            let mut result = result.normalized();
            if result.marks <= 0.0 {
                result.marks = task.marks;
            }
            debug!(
                question = %task.number(),
                question_type = %result.question_type,
                bloom = ?result.bloom_level,
                "Question classified"
            );
            Ok(result)
        }
        Err(e) if e.is_parse_failure() => {
            let degraded = QpaError::ClassificationDegraded {
                question: task.number().to_string(),
                message: e.to_string(),
            };
            warn!(question = %task.number(), error = %degraded, "Using degraded classification");
            Ok(ClassificationResult::degraded(task.marks))
        }
        Err(e) => Err(e),
    }
}
