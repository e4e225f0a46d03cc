//! Rule-based quality checks for a generated rubric and answer key.

use crate::rubric::{
    AnswerKey, ClassificationResult, QualityMetrics, RubricResult, ValidationStatus,
};

/// Marks are compared with this tolerance.
const MARKS_TOLERANCE: f64 = 0.1;

const MARKS_PENALTY: f64 = 0.2;
const COMPLETENESS_PENALTY: f64 = 0.1;
const LEVELS_PENALTY: f64 = 0.1;
const ANSWER_KEY_PENALTY: f64 = 0.1;
const DEGRADED_PENALTY: f64 = 0.2;

/// Scores below this are reported as failed.
const FAILED_BELOW: f64 = 0.5;

/// Number of rules checked by [`assess`].
const RULES: u8 = 5;

/// Checks one question's outputs and computes its confidence score.
///
/// Each failing rule subtracts its penalty from 1.0; the score is clamped to
/// `[0, 1]`. Completeness is the share of rules that passed.
#[must_use]
pub fn assess(
    marks: f64,
    classification: &ClassificationResult,
    rubric: &RubricResult,
    answer_key: &AnswerKey,
    processing_time: f64,
) -> QualityMetrics {
    let mut issues = Vec::new();
    let mut score: f64 = 1.0;
    let mut rules_passed = 0_u8;

    let criteria_marks = rubric.criteria_marks();
    if rubric.criteria.is_empty() || (criteria_marks - marks).abs() <= MARKS_TOLERANCE {
        rules_passed += 1;
    } else {
        issues.push(format!(
            "Criteria marks ({criteria_marks}) do not match question marks ({marks})"
        ));
        score -= MARKS_PENALTY;
    }

    let mut incomplete = Vec::new();
    if rubric.criteria.is_empty() {
        incomplete.push("No rubric criteria");
    }
    if answer_key.expected_outline.is_empty() {
        incomplete.push("No answer key points");
    }
    if incomplete.is_empty() {
        rules_passed += 1;
    } else {
        issues.extend(incomplete.into_iter().map(String::from));
        score -= COMPLETENESS_PENALTY;
    }

    let level_issues: Vec<String> = rubric
        .criteria
        .iter()
        .filter_map(|c| {
            let missing = c.missing_levels();
            (!missing.is_empty()).then(|| {
                format!(
                    "Missing performance levels in '{}': {}",
                    c.name,
                    missing.join(", ")
                )
            })
        })
        .collect();
    if level_issues.is_empty() {
        rules_passed += 1;
    } else {
        issues.extend(level_issues);
        score -= LEVELS_PENALTY;
    }

    let outline_marks = answer_key.outline_marks();
    if answer_key.expected_outline.is_empty() || (outline_marks - marks).abs() <= MARKS_TOLERANCE {
        rules_passed += 1;
    } else {
        issues.push(format!(
            "Answer key marks ({outline_marks}) do not match question marks ({marks})"
        ));
        score -= ANSWER_KEY_PENALTY;
    }

    if classification.degraded {
        issues.push("Classification degraded".to_string());
        score -= DEGRADED_PENALTY;
    } else {
        rules_passed += 1;
    }

    let score = score.clamp(0.0, 1.0);
    let validation_status = if issues.is_empty() {
        ValidationStatus::Passed
    } else if score < FAILED_BELOW {
        ValidationStatus::Failed
    } else {
        ValidationStatus::Warning
    };

    QualityMetrics {
        completeness: f64::from(rules_passed) / f64::from(RULES),
        validation_status,
        validation_issues: issues,
        processing_time,
        confidence_score: score,
    }
}
