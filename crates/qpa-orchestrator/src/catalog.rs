//! Supported question types.
//!
//! The catalog is embedded in structure and content prompts so the model
//! labels questions with these identifiers, and is served as-is by the
//! `/question-types` endpoint.

use serde::Serialize;

use crate::rubric::normalize_type;

/// One supported question type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuestionType {
    /// Identifier used in extraction output.
    #[serde(rename = "type")]
    pub id: &'static str,
    /// Broad grouping.
    pub category: &'static str,
    /// How to recognise the type on the page.
    pub identify: &'static str,
}

const fn entry(id: &'static str, category: &'static str, identify: &'static str) -> QuestionType {
    QuestionType {
        id,
        category,
        identify,
    }
}

/// All supported question types.
pub const QUESTION_TYPES: &[QuestionType] = &[
    entry(
        "mcq",
        "objective",
        "A stem followed by labelled options (A-D or i-iv); one or more must be chosen",
    ),
    entry(
        "true_false",
        "objective",
        "A statement to be marked true or false, sometimes with a correction",
    ),
    entry(
        "fill_in_blanks",
        "objective",
        "A sentence with blank lines or underscores to be completed",
    ),
    entry(
        "match_the_following",
        "objective",
        "Two columns of items to be paired",
    ),
    entry(
        "assertion_reason",
        "objective",
        "An assertion and a reason whose truth and link must be judged",
    ),
    entry(
        "ordering",
        "objective",
        "Items to be arranged in sequence",
    ),
    entry(
        "one_word",
        "short",
        "Answer in a single word or term",
    ),
    entry(
        "short_answer",
        "short",
        "Answer in a few sentences, typically 2-3 marks",
    ),
    entry(
        "numerical",
        "problem_solving",
        "A calculation or derivation with a numeric result",
    ),
    entry(
        "diagram_based",
        "problem_solving",
        "Answer depends on a figure, graph or diagram, or asks for one",
    ),
    entry(
        "code",
        "problem_solving",
        "Write, trace or debug a program or code fragment",
    ),
    entry(
        "long_answer",
        "extended",
        "Detailed explanation, typically 5 marks or more",
    ),
    entry(
        "essay",
        "extended",
        "Extended prose on a topic, judged on argument and structure",
    ),
    entry(
        "comprehension",
        "extended",
        "A reading passage followed by questions about it",
    ),
    entry(
        "case_study",
        "extended",
        "A scenario or dataset followed by analytical questions",
    ),
    entry(
        "creative",
        "open",
        "Original writing such as a story, poem or letter",
    ),
    entry(
        "open_ended",
        "open",
        "Opinion or design question with no single correct answer",
    ),
];

/// Whether `question_type` names a catalog entry.
///
/// Matching is case-insensitive and treats spaces and hyphens as
/// underscores.
#[must_use]
pub fn is_known_type(question_type: &str) -> bool {
    let normalized = normalize_type(question_type);
    QUESTION_TYPES.iter().any(|t| t.id == normalized)
}

/// The catalog as compact prompt text, one `id: description` per line.
#[must_use]
pub fn prompt_reference() -> String {
    QUESTION_TYPES
        .iter()
        .map(|t| format!("- {}: {}", t.id, t.identify))
        .collect::<Vec<_>>()
        .join("\n")
}
