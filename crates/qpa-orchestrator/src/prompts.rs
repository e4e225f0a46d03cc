//! Prompt builders.
//!
//! Every prompt asks for bare JSON. Identifying lines (`Section: ...`,
//! `Question number: ...`) are kept on their own lines so responses can be
//! correlated in logs.

use std::fmt::Write as _;

use crate::catalog;
use crate::config::QualityMode;
use crate::paper::Section;
use crate::rubric::{
    ClassificationResult, RubricKind, RubricResult, UserPreferences, PERFORMANCE_LEVELS,
};
use crate::tasks::QuestionTask;

/// Longest question text sent in per-question prompts.
const MAX_QUESTION_CHARS: usize = 1000;

const JSON_ONLY: &str = "Return ONLY valid JSON. Do not wrap it in markdown.";

/// Structure-only extraction prompt.
#[must_use]
pub fn structure() -> String {
    format!(
        r#"You are analysing the layout of a question paper. Extract ONLY structural metadata; do not include question text.

QUESTION TYPES:
{types}

Identify:
1. Every section, its heading and instruction.
2. Question numbers and sub-question labels.
3. Optional choices at section, question and sub-question level ("OR", "any 5 of 7").
4. The type of every question and sub-question, using the identifiers above.
5. Marks, time allocation and exam duration where printed.

JSON SCHEMA:
{{
  "sections": [
    {{
      "name": "string",
      "instruction": "string or null",
      "optional_between": false,
      "optional_with": "string or null",
      "total_marks": "number or null",
      "time_allocation": "string or null",
      "questions": [
        {{
          "number": "string",
          "type": "string",
          "marks": "number or null",
          "optional": false,
          "optional_with": "string or null",
          "subquestions": [
            {{"label": "string", "type": "string", "marks": "number or null", "optional": false}}
          ]
        }}
      ]
    }}
  ],
  "summary": {{
    "total_sections": 0,
    "total_questions": 0,
    "total_subquestions": 0,
    "optional_structures": ["string"],
    "total_marks": "number or null",
    "exam_duration": "string or null"
  }}
}}

{JSON_ONLY}"#,
        types = catalog::prompt_reference(),
    )
}

/// Follow-up sent when the structure response could not be used.
#[must_use]
pub fn structure_correction(problem: &str) -> String {
    format!(
        "{}\n\nYOUR PREVIOUS RESPONSE COULD NOT BE USED: {problem}\n\
         Every section needs a \"name\" and a \"questions\" list; every question needs a \"number\".",
        structure()
    )
}

/// Content extraction prompt for one section.
#[must_use]
pub fn content(section: &Section) -> String {
    let mut out = String::from(
        "You are extracting the full content of questions from a question paper.\n\n",
    );
    let _ = writeln!(out, "Section: {}", section.name);
    out.push_str("Extract every question listed below from this section only:\n");
    for question in &section.questions {
        let _ = write!(out, "Question number: {}", question.number);
        if !question.subquestions.is_empty() {
            let labels: Vec<&str> = question
                .subquestions
                .iter()
                .map(|sq| sq.label.as_str())
                .collect();
            let _ = write!(out, " (sub-questions: {})", labels.join(", "));
        }
        out.push('\n');
    }

    let _ = write!(
        out,
        r#"
QUESTION TYPES:
{types}

For each question give the complete text, not a summary. Include choices for
multiple-choice questions, both columns for matching questions, passages for
comprehension and scenarios for case studies. Describe images and diagrams in
detail, keep formulas in their printed notation and preserve code formatting.

JSON SCHEMA:
{{
  "questions": [
    {{
      "number": "string",
      "type": "string",
      "marks": "number or null",
      "content": {{
        "text": "string",
        "images": [{{"description": "string", "position": "string"}}],
        "diagrams": ["string"],
        "tables": ["string"],
        "formulas": ["string"],
        "code_snippets": ["string"],
        "additional_context": "string or null"
      }},
      "options": ["string"],
      "column_a": ["string"],
      "column_b": ["string"],
      "passage": "string or null",
      "case_study_text": "string or null",
      "time_suggested": "string or null",
      "subquestions": [{{"label": "string", "type": "string", "marks": "number or null", "content": {{"text": "string"}}, "options": ["string"]}}]
    }}
  ]
}}

{JSON_ONLY}"#,
        types = catalog::prompt_reference(),
    );
    out
}

/// Classification prompt for one question.
#[must_use]
pub fn classification(task: &QuestionTask, preferences: &UserPreferences) -> String {
    format!(
        r#"You are an educational assessment expert. Classify this question.

{details}

JSON SCHEMA:
{{
  "question_type": "string, snake_case",
  "subject": "string",
  "topic": "string",
  "difficulty_level": "basic | intermediate | advanced",
  "bloom_level": "knowledge | comprehension | application | analysis | synthesis | evaluation",
  "cognitive_skills": ["string"],
  "marks": {marks},
  "estimated_time": "string, e.g. 10 minutes"
}}

{JSON_ONLY}"#,
        details = question_details(task, preferences),
        marks = task.marks,
    )
}

/// Rubric prompt for one classified question.
#[must_use]
pub fn rubric(
    task: &QuestionTask,
    classification: &ClassificationResult,
    kind: RubricKind,
    preferences: &UserPreferences,
    mode: QualityMode,
) -> String {
    let shape = match kind {
        RubricKind::Analytical => "an analytical rubric: several independent criteria",
        RubricKind::Holistic => "a holistic rubric: one overall criterion judging the whole answer",
        RubricKind::Checklist => "a checklist rubric: short pass/fail criteria",
    };
    format!(
        r#"You are an educational assessment expert. Write {shape} for this question.

{details}
Classification: {qtype}, bloom level {bloom}, difficulty {difficulty}
Standard: {standard}

Use at most {budget} criteria. Criterion marks must add up to {marks}. Every criterion
needs exactly these performance levels: {levels}.

JSON SCHEMA:
{{
  "total_marks": {marks},
  "criteria": [
    {{
      "criterion": "string",
      "weight": "percentage",
      "marks": "number",
      "performance_levels": [
        {{"level": "Excellent", "marks_range": "string", "descriptor": "string", "indicators": ["string"]}}
      ]
    }}
  ],
  "mark_distribution": [{{"component": "string", "marks": "number"}}],
  "partial_marking_guidelines": {{
    "minimum_pass_criteria": "string",
    "partial_credit_rules": ["string"]
  }}
}}

{JSON_ONLY}"#,
        details = question_details(task, preferences),
        qtype = classification.question_type,
        bloom = classification.bloom_level.as_deref().unwrap_or("unspecified"),
        difficulty = classification
            .difficulty_level
            .as_deref()
            .unwrap_or("unspecified"),
        standard = preferences.rubric_standard,
        budget = mode.criteria_budget(),
        marks = task.marks,
        levels = PERFORMANCE_LEVELS.join(", "),
    )
}

/// Answer-key prompt for one question, aligned with its rubric.
#[must_use]
pub fn answer_key(
    task: &QuestionTask,
    classification: &ClassificationResult,
    rubric: &RubricResult,
    preferences: &UserPreferences,
) -> String {
    let criteria: Vec<String> = rubric
        .criteria
        .iter()
        .map(|c| format!("{} ({} marks)", c.name, c.marks))
        .collect();
    format!(
        r#"You are an educational assessment expert. Write the answer key for this question.

{details}
Classification: {qtype}
Rubric criteria: {criteria}

Scoring-point marks must add up to {marks}.

JSON SCHEMA:
{{
  "expected_outline": [
    {{"point": "string", "marks": "number", "sub_points": ["string"], "keywords": ["string"], "detail_level": "string"}}
  ],
  "key_concepts": ["string"],
  "alternative_answers": ["string"],
  "mark_distribution_guide": [{{"component": "string", "marks": "number"}}]
}}

{JSON_ONLY}"#,
        details = question_details(task, preferences),
        qtype = classification.question_type,
        criteria = criteria.join("; "),
        marks = task.marks,
    )
}

fn question_details(task: &QuestionTask, preferences: &UserPreferences) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Section: {}", task.section_name());
    let _ = writeln!(out, "Question number: {}", task.number());
    let _ = writeln!(out, "Question type: {}", task.question_type);
    let _ = writeln!(out, "Total marks: {}", task.marks);
    let _ = writeln!(
        out,
        "Subject: {}",
        preferences.subject_hint.as_deref().unwrap_or("General")
    );
    let _ = writeln!(
        out,
        "Grade level: {}",
        preferences.grade_level.as_deref().unwrap_or("Secondary")
    );
    if let Some(context) = &task.context {
        let _ = writeln!(out, "Context: {}", flatten(context));
    }
    let _ = writeln!(out, "Question text: {}", flatten(&task.content.text));
    if !task.options.is_empty() {
        let _ = writeln!(out, "Options: {}", task.options.join(" | "));
    }
    for formula in &task.content.formulas {
        let _ = writeln!(out, "Formula: {formula}");
    }
    for image in &task.content.images {
        let _ = writeln!(out, "Image: {}", flatten(&image.description));
    }
    out
}

/// Single-line text capped at [`MAX_QUESTION_CHARS`].
fn flatten(text: &str) -> String {
    let single_line = text.replace(['\r', '\n'], " ");
    let trimmed = single_line.trim();
    if trimmed.is_empty() {
        return "No question text provided".to_string();
    }
    if trimmed.chars().count() > MAX_QUESTION_CHARS {
        let cut: String = trimmed.chars().take(MAX_QUESTION_CHARS).collect();
        format!("{cut}...")
    } else {
        trimmed.to_string()
    }
}
