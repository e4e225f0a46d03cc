//! Rubric generation data model.
//!
//! Per-question results ([`RubricResponse`]) and the job-level
//! [`JobSummary`] streamed to clients of the rubric endpoint.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::QualityMode;
use crate::lenient;

/// The four performance levels every criterion is graded against.
pub const PERFORMANCE_LEVELS: [&str; 4] = ["Excellent", "Proficient", "Developing", "Beginning"];

// ============================================================================
// Request
// ============================================================================

/// Rubric standard requested by the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RubricStandard {
    /// Criteria aligned with Bloom's taxonomy levels (default).
    #[default]
    BloomTaxonomy,
    /// Criteria derived from the question alone.
    Custom,
}

impl std::fmt::Display for RubricStandard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BloomTaxonomy => write!(f, "bloom_taxonomy"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// Per-request preferences. Never mutates the service configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    /// Subject to assume when the paper does not say.
    #[serde(default)]
    pub subject_hint: Option<String>,
    /// Grade level of the candidates.
    #[serde(default)]
    pub grade_level: Option<String>,
    /// Quality mode; the configured default applies when absent.
    #[serde(default)]
    pub quality_mode: Option<QualityMode>,
    /// Rubric standard.
    #[serde(default)]
    pub rubric_standard: RubricStandard,
}

// ============================================================================
// Classification
// ============================================================================

/// Educational classification of one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Normalized question type, `"unknown"` when degraded.
    #[serde(default, deserialize_with = "lenient::string")]
    pub question_type: String,
    /// Subject area.
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub subject: Option<String>,
    /// Topic within the subject.
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub topic: Option<String>,
    /// easy, medium or hard.
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub difficulty_level: Option<String>,
    /// Bloom level (knowledge .. evaluation).
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub bloom_level: Option<String>,
    /// Cognitive skills exercised.
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub cognitive_skills: Vec<String>,
    /// Marks for the question.
    #[serde(default, deserialize_with = "lenient::marks")]
    pub marks: f64,
    /// Expected answering time.
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub estimated_time: Option<String>,
    /// Set when the model's answer could not be used.
    #[serde(default)]
    pub degraded: bool,
}

impl ClassificationResult {
    /// The result used when classification output is unusable.
    #[must_use]
    pub fn degraded(marks: f64) -> Self {
        Self {
            question_type: "unknown".to_string(),
            subject: None,
            topic: None,
            difficulty_level: None,
            bloom_level: None,
            cognitive_skills: Vec::new(),
            marks,
            estimated_time: None,
            degraded: true,
        }
    }

    /// Lower-cases labels and snake-cases the question type.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.question_type = normalize_type(&self.question_type);
        if self.question_type.is_empty() {
            self.question_type = "unknown".to_string();
        }
        self.bloom_level = self.bloom_level.map(|b| b.trim().to_lowercase());
        self.difficulty_level = self.difficulty_level.map(|d| d.trim().to_lowercase());
        self
    }
}

/// `"Multiple Choice"` and `"multiple-choice"` become `"multiple_choice"`.
#[must_use]
pub fn normalize_type(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

// ============================================================================
// Rubric
// ============================================================================

/// Shape of the rubric generated for a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RubricKind {
    /// Several criteria, each graded across performance levels.
    Analytical,
    /// A single overall judgement.
    Holistic,
    /// Pass/fail items.
    Checklist,
}

impl RubricKind {
    /// Picks the rubric shape for a classified question type.
    ///
    /// Unknown and unlisted types get a checklist.
    #[must_use]
    pub fn for_question_type(question_type: &str) -> Self {
        match normalize_type(question_type).as_str() {
            "essay" | "case_study" | "long_answer" | "analytical" | "descriptive"
            | "comprehension" => Self::Analytical,
            "creative" | "creative_writing" | "open_ended" | "open_response" => Self::Holistic,
            _ => Self::Checklist,
        }
    }

    /// Name used in prompts and on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Analytical => "analytical",
            Self::Holistic => "holistic",
            Self::Checklist => "checklist",
        }
    }
}

impl std::fmt::Display for RubricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One level of achievement within a criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceLevel {
    /// Excellent, Proficient, Developing or Beginning.
    #[serde(default, deserialize_with = "lenient::string")]
    pub level: String,
    /// Marks or percentage band.
    #[serde(default, deserialize_with = "lenient::string")]
    pub marks_range: String,
    /// What an answer at this level looks like.
    #[serde(default, deserialize_with = "lenient::string")]
    pub descriptor: String,
    /// Observable indicators.
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub indicators: Vec<String>,
}

/// A scoring criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    /// Criterion name.
    #[serde(rename = "criterion", alias = "name", deserialize_with = "lenient::string")]
    pub name: String,
    /// Relative weight in percent.
    #[serde(default, deserialize_with = "lenient::marks")]
    pub weight: f64,
    /// Marks attached to the criterion.
    #[serde(default, deserialize_with = "lenient::marks")]
    pub marks: f64,
    /// Performance levels, best first.
    #[serde(default, deserialize_with = "lenient::null_as_empty")]
    pub performance_levels: Vec<PerformanceLevel>,
}

impl Criterion {
    /// Performance levels from [`PERFORMANCE_LEVELS`] that are absent.
    #[must_use]
    pub fn missing_levels(&self) -> Vec<&'static str> {
        PERFORMANCE_LEVELS
            .iter()
            .copied()
            .filter(|wanted| {
                !self
                    .performance_levels
                    .iter()
                    .any(|l| l.level.trim().eq_ignore_ascii_case(wanted))
            })
            .collect()
    }
}

/// Rules for awarding partial credit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialMarkingGuidelines {
    /// Minimum an answer needs for any credit.
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub minimum_pass_criteria: Option<String>,
    /// Partial-credit rules.
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub partial_credit_rules: Vec<String>,
}

/// A generated rubric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricResult {
    /// Rubric shape.
    #[serde(rename = "type")]
    pub kind: RubricKind,
    /// Standard the rubric follows.
    pub standard: RubricStandard,
    /// Marks the rubric distributes.
    pub total_marks: f64,
    /// Criteria in order.
    pub criteria: Vec<Criterion>,
    /// Marks per component.
    pub mark_distribution: BTreeMap<String, f64>,
    /// Partial-credit rules.
    pub partial_marking_guidelines: PartialMarkingGuidelines,
}

impl RubricResult {
    /// Sum of criterion marks.
    #[must_use]
    pub fn criteria_marks(&self) -> f64 {
        self.criteria.iter().map(|c| c.marks).sum()
    }
}

// ============================================================================
// Answer key
// ============================================================================

/// One expected point in an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringPoint {
    /// The point itself.
    #[serde(default, deserialize_with = "lenient::string")]
    pub point: String,
    /// Marks for making the point.
    #[serde(default, deserialize_with = "lenient::marks")]
    pub marks: f64,
    /// Supporting detail.
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub sub_points: Vec<String>,
    /// Words an examiner should look for.
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub keywords: Vec<String>,
    /// Expected depth, e.g. "brief" or "detailed".
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub detail_level: Option<String>,
}

/// Expected answer outline with mark allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerKey {
    /// Scoring points in order.
    #[serde(default, deserialize_with = "lenient::null_as_empty")]
    pub expected_outline: Vec<ScoringPoint>,
    /// Concepts the answer must show.
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub key_concepts: Vec<String>,
    /// Acceptable alternative answers.
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub alternative_answers: Vec<String>,
    /// Marks per dimension of the answer.
    #[serde(default, deserialize_with = "lenient::mark_map")]
    pub mark_distribution_guide: BTreeMap<String, f64>,
}

impl AnswerKey {
    /// Sum of scoring-point marks.
    #[must_use]
    pub fn outline_marks(&self) -> f64 {
        self.expected_outline.iter().map(|p| p.marks).sum()
    }
}

// ============================================================================
// Guidelines and quality
// ============================================================================

/// Suggested examiner time per answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeAllocation {
    /// Time to read the question.
    pub reading_question: String,
    /// Time to evaluate the answer.
    pub evaluation_time: String,
    /// Time to write feedback.
    pub feedback_writing: String,
}

/// Examiner guidance derived locally from the classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationGuidelines {
    /// Mistakes candidates commonly make.
    pub common_mistakes: Vec<String>,
    /// Tips for the examiner.
    pub evaluation_tips: Vec<String>,
    /// Suggested time budget.
    pub time_allocation: TimeAllocation,
    /// Signs of a seriously deficient answer.
    pub red_flags: Vec<String>,
}

/// Outcome of the rule-based rubric checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// No issues.
    Passed,
    /// Issues found, result still usable.
    Warning,
    /// Result unusable.
    Failed,
}

/// Quality report for one generated rubric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Fraction of expected parts present, 0 to 1.
    pub completeness: f64,
    /// Overall check outcome.
    pub validation_status: ValidationStatus,
    /// Issues found by the checks.
    pub validation_issues: Vec<String>,
    /// Seconds spent on the question.
    pub processing_time: f64,
    /// Confidence in the result, 0 to 1.
    pub confidence_score: f64,
}

/// Quality bucket used in the job summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityBucket {
    /// Confidence of at least 0.9.
    Excellent,
    /// At least 0.7.
    Good,
    /// At least 0.5.
    Fair,
    /// Anything lower.
    Poor,
}

impl QualityBucket {
    /// Buckets a confidence score.
    #[must_use]
    pub fn for_score(score: f64) -> Self {
        if score >= 0.9 {
            Self::Excellent
        } else if score >= 0.7 {
            Self::Good
        } else if score >= 0.5 {
            Self::Fair
        } else {
            Self::Poor
        }
    }
}

// ============================================================================
// Per-question result
// ============================================================================

/// Section context for a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionMetadata {
    /// Section heading.
    pub section_name: String,
    /// Section instruction.
    pub section_instruction: Option<String>,
    /// Section marks.
    pub section_marks: Option<f64>,
    /// Section time allocation.
    pub section_time_allocation: Option<String>,
}

/// Identity of a question within the paper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionMetadata {
    /// Printed number; sub-questions append their label (`"3a"`).
    pub question_number: String,
    /// Stable identifier, `q_<number>`.
    pub question_id: String,
    /// Whether the question is optional.
    pub is_optional: bool,
    /// Optional group or alternative.
    pub optional_group: Option<String>,
    /// Sub-question label, when this is a sub-question.
    pub subquestion_label: Option<String>,
    /// Parent number, when this is a sub-question.
    pub parent_question: Option<String>,
}

/// Everything generated for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricResponse {
    /// Section context.
    pub section_metadata: SectionMetadata,
    /// Question identity.
    pub question_metadata: QuestionMetadata,
    /// Classification.
    pub classification: ClassificationResult,
    /// Rubric.
    pub rubric: RubricResult,
    /// Answer key.
    pub answer_key: AnswerKey,
    /// Examiner guidance.
    pub evaluation_guidelines: EvaluationGuidelines,
    /// Quality report.
    pub quality_metrics: QualityMetrics,
    /// Always `"completed"` for a streamed result.
    pub processing_status: String,
}

// ============================================================================
// Job summary
// ============================================================================

/// Histogram of per-question quality buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityDistribution {
    /// Confidence of at least 0.9.
    pub excellent: usize,
    /// At least 0.7.
    pub good: usize,
    /// At least 0.5.
    pub fair: usize,
    /// Anything lower.
    pub poor: usize,
}

impl QualityDistribution {
    /// Counts one score.
    pub fn record(&mut self, score: f64) {
        match QualityBucket::for_score(score) {
            QualityBucket::Excellent => self.excellent += 1,
            QualityBucket::Good => self.good += 1,
            QualityBucket::Fair => self.fair += 1,
            QualityBucket::Poor => self.poor += 1,
        }
    }
}

/// Totals for a finished rubric job, sent once as the last message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    /// Questions that finished, successfully or not.
    pub total_questions_processed: usize,
    /// Questions with a full result.
    pub successful_generations: usize,
    /// Questions that failed.
    pub failed_generations: usize,
    /// Questions never worked on (filtered out or left at the deadline).
    pub skipped_questions: usize,
    /// Wall-clock seconds for the job.
    pub total_processing_time: f64,
    /// Mean seconds per processed question.
    pub average_time_per_question: f64,
    /// Quality histogram over successful questions.
    pub quality_distribution: QualityDistribution,
    /// Set when the job deadline stopped dequeuing.
    pub timed_out: bool,
}
