//! Question paper data model.
//!
//! A run moves through three shapes: the uploaded [`Document`], the
//! [`PaperStructure`] recovered by structure extraction, and the
//! [`EnrichedPaper`] produced by content extraction. Each shape is created
//! from the previous one and never mutated afterwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{QpaError, Result};
use crate::lenient;

/// Leading bytes of every PDF file.
const PDF_MAGIC: &[u8] = b"%PDF-";

// ============================================================================
// Document
// ============================================================================

/// An uploaded question paper.
#[derive(Clone)]
pub struct Document {
    /// Client-supplied file name.
    pub filename: String,
    /// Raw PDF bytes.
    pub content: Vec<u8>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("filename", &self.filename)
            .field("size", &self.content.len())
            .finish()
    }
}

impl Document {
    /// Validates an upload and wraps it as a document.
    ///
    /// # Errors
    ///
    /// Returns `QpaError::InvalidDocument` if the upload is empty, larger than
    /// `max_bytes`, or neither named `.pdf` nor starting with the PDF magic.
    pub fn from_upload(
        filename: impl Into<String>,
        content: Vec<u8>,
        max_bytes: u64,
    ) -> Result<Self> {
        let filename = filename.into();

        if content.is_empty() {
            return Err(QpaError::invalid_document(filename, "file is empty"));
        }

        let size = content.len() as u64;
        if size > max_bytes {
            return Err(QpaError::invalid_document(
                filename,
                format!("file is {size} bytes, larger than the {max_bytes} byte limit"),
            ));
        }

        if !Self::looks_like_pdf(&filename, &content) {
            return Err(QpaError::invalid_document(
                filename,
                "only PDF files are accepted",
            ));
        }

        Ok(Self { filename, content })
    }

    /// A PDF by extension or by magic bytes.
    #[must_use]
    pub fn looks_like_pdf(filename: &str, content: &[u8]) -> bool {
        filename.to_lowercase().ends_with(".pdf") || content.starts_with(PDF_MAGIC)
    }

    /// Size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

// ============================================================================
// Structure
// ============================================================================

/// Layout of a paper: sections and question stubs, without full content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperStructure {
    /// Sections in paper order.
    pub sections: Vec<Section>,
    /// Paper-level totals.
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub summary: PaperSummary,
}

/// One section of a paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Section heading, e.g. "Section A".
    #[serde(deserialize_with = "lenient::string")]
    pub name: String,
    /// Instruction printed under the heading.
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub instruction: Option<String>,
    /// Whether the section offers a choice between questions.
    #[serde(default, deserialize_with = "lenient::flag")]
    pub optional_between: bool,
    /// Description of the choice, e.g. "Attempt any 3".
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub optional_with: Option<String>,
    /// Marks for the section as printed.
    #[serde(default, deserialize_with = "lenient::opt_number")]
    pub total_marks: Option<f64>,
    /// Suggested time for the section.
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub time_allocation: Option<String>,
    /// Question stubs in paper order.
    pub questions: Vec<QuestionStub>,
}

/// A question as recovered by structure extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionStub {
    /// Printed question number.
    #[serde(deserialize_with = "lenient::string")]
    pub number: String,
    /// Question type guess from the catalog.
    #[serde(rename = "type", default, deserialize_with = "lenient::string")]
    pub question_type: String,
    /// Marks allocated.
    #[serde(default, deserialize_with = "lenient::marks")]
    pub marks: f64,
    /// Whether the question is part of an either/or choice.
    #[serde(default, deserialize_with = "lenient::flag")]
    pub optional: bool,
    /// Number of the alternative question, if any.
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub optional_with: Option<String>,
    /// Sub-question stubs.
    #[serde(default, deserialize_with = "lenient::null_as_empty")]
    pub subquestions: Vec<SubQuestionStub>,
}

/// A sub-question stub, e.g. part (a) of question 3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuestionStub {
    /// Label such as "a" or "(ii)".
    #[serde(default, deserialize_with = "lenient::string")]
    pub label: String,
    /// Question type guess.
    #[serde(rename = "type", default, deserialize_with = "lenient::string")]
    pub question_type: String,
    /// Marks allocated.
    #[serde(default, deserialize_with = "lenient::marks")]
    pub marks: f64,
    /// Whether the sub-question is optional.
    #[serde(default, deserialize_with = "lenient::flag")]
    pub optional: bool,
}

/// Paper-level totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaperSummary {
    /// Number of sections.
    #[serde(default)]
    pub total_sections: usize,
    /// Number of top-level questions.
    #[serde(default)]
    pub total_questions: usize,
    /// Number of sub-questions.
    #[serde(default)]
    pub total_subquestions: usize,
    /// Human-readable descriptions of choice structures.
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub optional_structures: Vec<String>,
    /// Count of questions per type.
    #[serde(default)]
    pub question_type_distribution: BTreeMap<String, usize>,
    /// Total marks as printed or summed.
    #[serde(default, deserialize_with = "lenient::opt_number")]
    pub total_marks: Option<f64>,
    /// Exam duration as printed.
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub exam_duration: Option<String>,
    /// Overall difficulty estimate.
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub difficulty_level: Option<String>,
}

impl PaperSummary {
    /// Recounts totals from the given sections, keeping printed metadata.
    fn recount<'a, I>(&mut self, sections: I)
    where
        I: IntoIterator<Item = Vec<(&'a str, usize, f64)>>,
    {
        let mut total_sections = 0;
        let mut total_questions = 0;
        let mut total_subquestions = 0;
        let mut summed_marks = 0.0;
        let mut distribution = BTreeMap::new();

        for questions in sections {
            total_sections += 1;
            for (question_type, subquestions, marks) in questions {
                total_questions += 1;
                total_subquestions += subquestions;
                summed_marks += marks;
                let key = if question_type.trim().is_empty() {
                    "unknown".to_string()
                } else {
                    question_type.to_string()
                };
                *distribution.entry(key).or_insert(0) += 1;
            }
        }

        self.total_sections = total_sections;
        self.total_questions = total_questions;
        self.total_subquestions = total_subquestions;
        self.question_type_distribution = distribution;
        if self.total_marks.is_none() && summed_marks > 0.0 {
            self.total_marks = Some(summed_marks);
        }
    }
}

impl PaperStructure {
    /// Recomputes the summary counts from the sections.
    ///
    /// Model-reported counts are not trusted; printed metadata such as the
    /// exam duration is kept.
    #[must_use]
    pub fn with_recounted_summary(mut self) -> Self {
        let sections = self.sections.iter().map(|s| {
            s.questions
                .iter()
                .map(|q| (q.question_type.as_str(), q.subquestions.len(), q.marks))
                .collect::<Vec<_>>()
        });
        let mut summary = self.summary.clone();
        summary.recount(sections);
        self.summary = summary;
        self
    }

    /// Total number of top-level question stubs.
    #[must_use]
    pub fn question_count(&self) -> usize {
        self.sections.iter().map(|s| s.questions.len()).sum()
    }

    /// Section names with their question numbers, for structural comparison.
    #[must_use]
    pub fn outline(&self) -> Vec<(String, Vec<String>)> {
        self.sections
            .iter()
            .map(|s| {
                (
                    s.name.clone(),
                    s.questions.iter().map(|q| q.number.clone()).collect(),
                )
            })
            .collect()
    }

    /// Question types used anywhere in the paper.
    pub fn question_types(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().flat_map(|s| {
            s.questions.iter().flat_map(|q| {
                std::iter::once(q.question_type.as_str())
                    .chain(q.subquestions.iter().map(|sq| sq.question_type.as_str()))
            })
        })
    }
}

/// Normalizes a printed question number for matching: `"Q 3."` and `"3"`
/// compare equal.
#[must_use]
pub fn question_key(number: &str) -> String {
    let lowered: String = number
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    let compact = lowered.trim_start_matches('(');
    let stripped = compact
        .strip_prefix("question")
        .or_else(|| compact.strip_prefix("q."))
        .or_else(|| compact.strip_prefix('q'))
        .unwrap_or(compact);
    stripped
        .trim_end_matches(|c| c == '.' || c == ')' || c == ':')
        .to_string()
}

// ============================================================================
// Content
// ============================================================================

/// Full content of a question or sub-question.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionContent {
    /// Question text.
    #[serde(default, deserialize_with = "lenient::string")]
    pub text: String,
    /// Images attached to the question.
    #[serde(default, deserialize_with = "images")]
    pub images: Vec<ImageDescription>,
    /// Diagram descriptions.
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub diagrams: Vec<String>,
    /// Tables rendered as text.
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub tables: Vec<String>,
    /// Formulas as printed.
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub formulas: Vec<String>,
    /// Code blocks.
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub code_snippets: Vec<String>,
    /// Extra context, e.g. an assertion and reason pair.
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub additional_context: Option<String>,
}

impl QuestionContent {
    /// `true` when there is no question text.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// An image described by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDescription {
    /// What the image shows.
    pub description: String,
    /// Position relative to the text (before, after, inline).
    pub position: String,
    /// Alternative text if printed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
}

/// Content as an object, or a bare string taken as the question text.
fn content<'de, D>(deserializer: D) -> std::result::Result<QuestionContent, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    use serde_json::Value;

    match Value::deserialize(deserializer)? {
        Value::Null => Ok(QuestionContent::default()),
        Value::String(text) => Ok(QuestionContent {
            text,
            ..QuestionContent::default()
        }),
        other @ Value::Object(_) => serde_json::from_value(other).map_err(D::Error::custom),
        other => Err(D::Error::custom(format!(
            "expected question content, found {other}"
        ))),
    }
}

fn images<'de, D>(deserializer: D) -> std::result::Result<Vec<ImageDescription>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde_json::Value;

    let value = Value::deserialize(deserializer)?;
    let items = match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        other => vec![other],
    };

    Ok(items
        .iter()
        .map(|item| match item {
            Value::Object(map) => ImageDescription {
                description: map.get("description").map_or_else(
                    || "Image description not available".to_string(),
                    lenient::value_to_text,
                ),
                position: map
                    .get("position")
                    .map_or_else(|| "inline".to_string(), lenient::value_to_text),
                alt_text: map
                    .get("alt_text")
                    .map(lenient::value_to_text)
                    .filter(|s| !s.is_empty()),
            },
            other => ImageDescription {
                description: lenient::value_to_text(other),
                position: "inline".to_string(),
                alt_text: None,
            },
        })
        .collect())
}

/// A question with its full content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedQuestion {
    /// Printed question number.
    #[serde(deserialize_with = "lenient::string")]
    pub number: String,
    /// Question type.
    #[serde(rename = "type", default, deserialize_with = "lenient::string")]
    pub question_type: String,
    /// Marks allocated.
    #[serde(default, deserialize_with = "lenient::marks")]
    pub marks: f64,
    /// Whether the question is part of an either/or choice.
    #[serde(default, deserialize_with = "lenient::flag")]
    pub optional: bool,
    /// Number of the alternative question, if any.
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub optional_with: Option<String>,
    /// Question content.
    #[serde(default, deserialize_with = "content")]
    pub content: QuestionContent,
    /// Choices for multiple-choice questions.
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub options: Vec<String>,
    /// Left column of a matching question.
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub column_a: Vec<String>,
    /// Right column of a matching question.
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub column_b: Vec<String>,
    /// Number of blanks in a fill-in question.
    #[serde(default, deserialize_with = "lenient::opt_number")]
    pub blanks_count: Option<f64>,
    /// Items of an ordering question.
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub items_to_order: Vec<String>,
    /// Reading passage the question refers to.
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub passage: Option<String>,
    /// Case study the question refers to.
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub case_study_text: Option<String>,
    /// Suggested answering time.
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub time_suggested: Option<String>,
    /// Sub-questions with content.
    #[serde(default, deserialize_with = "lenient::null_as_empty")]
    pub subquestions: Vec<EnrichedSubQuestion>,
}

/// A sub-question with its full content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedSubQuestion {
    /// Label such as "a".
    #[serde(default, deserialize_with = "lenient::string")]
    pub label: String,
    /// Question type.
    #[serde(rename = "type", default, deserialize_with = "lenient::string")]
    pub question_type: String,
    /// Marks allocated.
    #[serde(default, deserialize_with = "lenient::marks")]
    pub marks: f64,
    /// Whether the sub-question is optional.
    #[serde(default, deserialize_with = "lenient::flag")]
    pub optional: bool,
    /// Optional group this sub-question belongs to.
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub optional_group: Option<String>,
    /// Sub-question content.
    #[serde(default, deserialize_with = "content")]
    pub content: QuestionContent,
    /// Choices for multiple-choice sub-questions.
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub options: Vec<String>,
}

impl EnrichedQuestion {
    /// A question carrying only what the stub knows; content left empty.
    #[must_use]
    pub fn from_stub(stub: &QuestionStub) -> Self {
        Self {
            number: stub.number.clone(),
            question_type: stub.question_type.clone(),
            marks: stub.marks,
            optional: stub.optional,
            optional_with: stub.optional_with.clone(),
            content: QuestionContent::default(),
            options: Vec::new(),
            column_a: Vec::new(),
            column_b: Vec::new(),
            blanks_count: None,
            items_to_order: Vec::new(),
            passage: None,
            case_study_text: None,
            time_suggested: None,
            subquestions: stub
                .subquestions
                .iter()
                .map(|sq| EnrichedSubQuestion {
                    label: sq.label.clone(),
                    question_type: sq.question_type.clone(),
                    marks: sq.marks,
                    optional: sq.optional,
                    optional_group: None,
                    content: QuestionContent::default(),
                    options: Vec::new(),
                })
                .collect(),
        }
    }

    /// Merges model-provided content onto a stub.
    ///
    /// Layout facts (number, marks, optional flags, sub-question labels) come
    /// from the stub; content comes from the extraction. A type or marks value
    /// missing from the stub is filled from the extraction.
    #[must_use]
    pub fn merge(stub: &QuestionStub, extracted: Self) -> Self {
        let mut merged = Self::from_stub(stub);
        if merged.question_type.trim().is_empty() {
            merged.question_type = extracted.question_type;
        }
        if merged.marks <= 0.0 {
            merged.marks = extracted.marks;
        }
        merged.content = extracted.content;
        merged.options = extracted.options;
        merged.column_a = extracted.column_a;
        merged.column_b = extracted.column_b;
        merged.blanks_count = extracted.blanks_count;
        merged.items_to_order = extracted.items_to_order;
        merged.passage = extracted.passage;
        merged.case_study_text = extracted.case_study_text;
        merged.time_suggested = extracted.time_suggested;

        let mut extracted_subs = extracted.subquestions;
        for sub in &mut merged.subquestions {
            let key = question_key(&sub.label);
            if let Some(idx) = extracted_subs
                .iter()
                .position(|e| question_key(&e.label) == key)
            {
                let found = extracted_subs.swap_remove(idx);
                sub.content = found.content;
                sub.options = found.options;
                sub.optional_group = found.optional_group;
                if sub.marks <= 0.0 {
                    sub.marks = found.marks;
                }
            }
        }
        // Sub-questions the layout missed are kept rather than dropped.
        if merged.subquestions.is_empty() {
            merged.subquestions = extracted_subs;
        }
        merged
    }

    /// `true` when the question has no text.
    #[must_use]
    pub fn has_empty_content(&self) -> bool {
        self.content.is_empty()
    }
}

/// A section whose questions carry full content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedSection {
    /// Section heading.
    #[serde(deserialize_with = "lenient::string")]
    pub name: String,
    /// Instruction printed under the heading.
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub instruction: Option<String>,
    /// Whether the section offers a choice between questions.
    #[serde(default, deserialize_with = "lenient::flag")]
    pub optional_between: bool,
    /// Description of the choice.
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub optional_with: Option<String>,
    /// Marks for the section.
    #[serde(default, deserialize_with = "lenient::opt_number")]
    pub total_marks: Option<f64>,
    /// Suggested time for the section.
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub time_allocation: Option<String>,
    /// Questions in paper order.
    #[serde(default, deserialize_with = "lenient::null_as_empty")]
    pub questions: Vec<EnrichedQuestion>,
}

impl EnrichedSection {
    /// Copies section metadata from the structure with the given questions.
    #[must_use]
    pub fn from_section(section: &Section, questions: Vec<EnrichedQuestion>) -> Self {
        Self {
            name: section.name.clone(),
            instruction: section.instruction.clone(),
            optional_between: section.optional_between,
            optional_with: section.optional_with.clone(),
            total_marks: section.total_marks,
            time_allocation: section.time_allocation.clone(),
            questions,
        }
    }
}

/// A fully extracted paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedPaper {
    /// Sections in paper order.
    pub sections: Vec<EnrichedSection>,
    /// Paper-level totals.
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub summary: PaperSummary,
    /// Free-form metadata about the run.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl EnrichedPaper {
    /// Total number of top-level questions.
    #[must_use]
    pub fn question_count(&self) -> usize {
        self.sections.iter().map(|s| s.questions.len()).sum()
    }

    /// Recomputes the summary counts from the sections.
    #[must_use]
    pub fn with_recounted_summary(mut self) -> Self {
        let sections = self.sections.iter().map(|s| {
            s.questions
                .iter()
                .map(|q| (q.question_type.as_str(), q.subquestions.len(), q.marks))
                .collect::<Vec<_>>()
        });
        let mut summary = self.summary.clone();
        summary.recount(sections);
        self.summary = summary;
        self
    }

    /// Structure view of the paper (content dropped).
    #[must_use]
    pub fn to_structure(&self) -> PaperStructure {
        PaperStructure {
            sections: self
                .sections
                .iter()
                .map(|s| Section {
                    name: s.name.clone(),
                    instruction: s.instruction.clone(),
                    optional_between: s.optional_between,
                    optional_with: s.optional_with.clone(),
                    total_marks: s.total_marks,
                    time_allocation: s.time_allocation.clone(),
                    questions: s
                        .questions
                        .iter()
                        .map(|q| QuestionStub {
                            number: q.number.clone(),
                            question_type: q.question_type.clone(),
                            marks: q.marks,
                            optional: q.optional,
                            optional_with: q.optional_with.clone(),
                            subquestions: q
                                .subquestions
                                .iter()
                                .map(|sq| SubQuestionStub {
                                    label: sq.label.clone(),
                                    question_type: sq.question_type.clone(),
                                    marks: sq.marks,
                                    optional: sq.optional,
                                })
                                .collect(),
                        })
                        .collect(),
                })
                .collect(),
            summary: self.summary.clone(),
        }
    }
}
