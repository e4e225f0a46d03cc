//! Rubric and answer-key generation for one classified question.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::QualityMode;
use crate::error::{QpaError, Result};
use crate::gateway::{AiRequest, CallPurpose, Gateway};
use crate::lenient;
use crate::parser;
use crate::prompts;
use crate::rubric::{
    AnswerKey, ClassificationResult, Criterion, PartialMarkingGuidelines, PerformanceLevel,
    RubricKind, RubricResult, UserPreferences,
};
use crate::tasks::QuestionTask;

/// Rubric fields the model is asked for. Kind, standard and total marks are
/// decided locally.
#[derive(Debug, Deserialize)]
struct RubricDraft {
    #[serde(default, deserialize_with = "lenient::null_as_empty")]
    criteria: Vec<Criterion>,
    #[serde(default, deserialize_with = "lenient::mark_map")]
    mark_distribution: BTreeMap<String, f64>,
    #[serde(default)]
    marking_scheme: Option<MarkingScheme>,
    #[serde(default, deserialize_with = "lenient::or_default")]
    partial_marking_guidelines: PartialMarkingGuidelines,
}

#[derive(Debug, Deserialize)]
struct MarkingScheme {
    #[serde(default, deserialize_with = "lenient::mark_map")]
    mark_distribution: BTreeMap<String, f64>,
}

/// Generates the rubric for a classified question.
///
/// # Errors
///
/// Returns `QpaError::RubricGenerationFailed` if the call fails after
/// retries or the response is unusable.
pub async fn generate_rubric(
    gateway: &Gateway,
    task: &QuestionTask,
    classification: &ClassificationResult,
    preferences: &UserPreferences,
    mode: QualityMode,
) -> Result<RubricResult> {
    let kind = RubricKind::for_question_type(&classification.question_type);
    let request = AiRequest::json(
        CallPurpose::Rubric,
        prompts::rubric(task, classification, kind, preferences, mode),
        None,
    );

    let draft = async {
        let raw = gateway.invoke(&request).await?;
        parser::parse_as::<RubricDraft>(&raw, "Rubric")
    }
    .await
    .map_err(|e| QpaError::rubric_failed(task.number(), e.to_string()))?;

    let mut criteria = draft.criteria;
    if criteria.is_empty() {
        warn!(question = %task.number(), "Rubric had no criteria, using a single overall criterion");
        criteria.push(overall_criterion(task.marks));
    }

    let mut mark_distribution = draft.mark_distribution;
    if mark_distribution.is_empty() {
        mark_distribution = draft
            .marking_scheme
            .map(|s| s.mark_distribution)
            .unwrap_or_default();
    }
    if mark_distribution.is_empty() {
        mark_distribution = criteria
            .iter()
            .map(|c| (c.name.clone(), c.marks))
            .collect();
    }

    debug!(
        question = %task.number(),
        kind = %kind,
        criteria = criteria.len(),
        "Rubric generated"
    );

    Ok(RubricResult {
        kind,
        standard: preferences.rubric_standard,
        total_marks: task.marks,
        criteria,
        mark_distribution,
        partial_marking_guidelines: draft.partial_marking_guidelines,
    })
}

/// Generates the answer key for a question, aligned with its rubric.
///
/// # Errors
///
/// Returns `QpaError::AnswerKeyGenerationFailed` if the call fails after
/// retries or the response is unusable.
pub async fn generate_answer_key(
    gateway: &Gateway,
    task: &QuestionTask,
    classification: &ClassificationResult,
    rubric: &RubricResult,
    preferences: &UserPreferences,
) -> Result<AnswerKey> {
    let request = AiRequest::json(
        CallPurpose::AnswerKey,
        prompts::answer_key(task, classification, rubric, preferences),
        None,
    );

    let key = async {
        let raw = gateway.invoke(&request).await?;
        parser::parse_as::<AnswerKey>(&raw, "AnswerKey")
    }
    .await
    .map_err(|e| QpaError::answer_key_failed(task.number(), e.to_string()))?;

    debug!(
        question = %task.number(),
        points = key.expected_outline.len(),
        "Answer key generated"
    );
    Ok(key)
}

/// A single criterion covering the whole answer across the four levels.
fn overall_criterion(marks: f64) -> Criterion {
    let level = |level: &str, range: &str, descriptor: &str| PerformanceLevel {
        level: level.to_string(),
        marks_range: range.to_string(),
        descriptor: descriptor.to_string(),
        indicators: Vec::new(),
    };
    Criterion {
        name: "Answer Quality".to_string(),
        weight: 100.0,
        marks,
        performance_levels: vec![
            level(
                "Excellent",
                "90-100%",
                "Complete and accurate answer with clear understanding",
            ),
            level("Proficient", "75-89%", "Good answer with minor gaps"),
            level("Developing", "60-74%", "Partial answer showing some understanding"),
            level("Beginning", "0-59%", "Incomplete or incorrect answer"),
        ],
    }
}
