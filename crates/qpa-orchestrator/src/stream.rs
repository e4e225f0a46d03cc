//! Streaming events for rubric jobs, the sink they are sent through and the
//! flag used to cancel a job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::rubric::{JobSummary, RubricResponse};
use crate::tasks::{QuestionTask, SkippedQuestion};

// ============================================================================
// Event Payloads
// ============================================================================

/// Stage reported by a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    /// Request accepted, queue not built yet.
    Started,
    /// Queue built, workers about to start.
    ParsingComplete,
    /// A worker picked up a question.
    Processing,
}

/// Payload for `progress` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPayload {
    /// Stage.
    pub status: ProgressStatus,
    /// Human-readable message.
    pub message: String,
    /// 1-based queue position of the question being processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_question: Option<usize>,
    /// Number of queued questions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_questions: Option<usize>,
    /// Printed question number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_number: Option<String>,
    /// Section of the question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Questions finished so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<usize>,
    /// Rough seconds left, once at least one question has finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_remaining_time: Option<f64>,
    /// Questions left out of the queue.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedQuestion>,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
}

/// Payload for `question_complete` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionCompletePayload {
    /// 1-based queue position.
    pub question_index: usize,
    /// Number of queued questions.
    pub total_questions: usize,
    /// Printed question number.
    pub question_number: String,
    /// Section of the question.
    pub section: String,
    /// Questions finished so far, this one included.
    pub completed: usize,
    /// Everything generated for the question.
    pub result: Box<RubricResponse>,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
}

/// Payload for `error` events.
///
/// Question fields are present for per-question failures and absent when the
/// whole request was rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// What went wrong.
    pub message: String,
    /// 1-based queue position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_index: Option<usize>,
    /// Printed question number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_number: Option<String>,
    /// Section of the question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Questions finished so far, this one included.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<usize>,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
}

/// Payload for the `final_summary` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalSummaryPayload {
    /// Job totals.
    pub summary: JobSummary,
    /// Human-readable message.
    pub message: String,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Event Enum
// ============================================================================

/// A message sent to the client of a rubric job.
///
/// Serialized as `{"type": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Job or question progress.
    Progress(ProgressPayload),
    /// A question finished successfully.
    QuestionComplete(QuestionCompletePayload),
    /// A question failed, or the request was rejected.
    Error(ErrorPayload),
    /// Last message of a finished job.
    FinalSummary(FinalSummaryPayload),
}

impl StreamEvent {
    /// A job-level progress event.
    #[must_use]
    pub fn progress(status: ProgressStatus, message: impl Into<String>) -> Self {
        Self::Progress(progress_payload(status, message.into()))
    }

    /// Reports the queue size and what was left out of it.
    #[must_use]
    pub fn parsing_complete(total: usize, skipped: Vec<SkippedQuestion>) -> Self {
        let message = if skipped.is_empty() {
            format!("Found {total} questions to process")
        } else {
            format!(
                "Found {total} questions to process, skipped {}",
                skipped.len()
            )
        };
        Self::Progress(ProgressPayload {
            total_questions: Some(total),
            skipped,
            ..progress_payload(ProgressStatus::ParsingComplete, message)
        })
    }

    /// A worker picked up `task`.
    #[must_use]
    pub fn processing(
        task: &QuestionTask,
        total: usize,
        completed: usize,
        estimated_remaining_time: Option<f64>,
    ) -> Self {
        Self::Progress(ProgressPayload {
            current_question: Some(task.position),
            total_questions: Some(total),
            question_number: Some(task.number().to_string()),
            section: Some(task.section_name().to_string()),
            completed: Some(completed),
            estimated_remaining_time,
            ..progress_payload(
                ProgressStatus::Processing,
                format!("Processing question {}", task.number()),
            )
        })
    }

    /// `task` finished with `result`.
    #[must_use]
    pub fn question_complete(
        task: &QuestionTask,
        total: usize,
        completed: usize,
        result: RubricResponse,
    ) -> Self {
        Self::QuestionComplete(QuestionCompletePayload {
            question_index: task.position,
            total_questions: total,
            question_number: task.number().to_string(),
            section: task.section_name().to_string(),
            completed,
            result: Box::new(result),
            timestamp: Utc::now(),
        })
    }

    /// `task` failed.
    #[must_use]
    pub fn question_failed(task: &QuestionTask, completed: usize, message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
            question_index: Some(task.position),
            question_number: Some(task.number().to_string()),
            section: Some(task.section_name().to_string()),
            completed: Some(completed),
            timestamp: Utc::now(),
        })
    }

    /// The request itself was rejected.
    #[must_use]
    pub fn request_error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
            question_index: None,
            question_number: None,
            section: None,
            completed: None,
            timestamp: Utc::now(),
        })
    }

    /// Last message of a job.
    #[must_use]
    pub fn final_summary(summary: JobSummary) -> Self {
        let message = if summary.timed_out {
            format!(
                "Rubric generation stopped at the time limit after {} questions",
                summary.total_questions_processed
            )
        } else {
            format!(
                "Rubric generation complete: {} succeeded, {} failed",
                summary.successful_generations, summary.failed_generations
            )
        };
        Self::FinalSummary(FinalSummaryPayload {
            summary,
            message,
            timestamp: Utc::now(),
        })
    }

    /// Wire name of the event type.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Progress(_) => "progress",
            Self::QuestionComplete(_) => "question_complete",
            Self::Error(_) => "error",
            Self::FinalSummary(_) => "final_summary",
        }
    }

    /// `true` for the event that ends a job.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::FinalSummary(_))
    }
}

fn progress_payload(status: ProgressStatus, message: String) -> ProgressPayload {
    ProgressPayload {
        status,
        message,
        current_question: None,
        total_questions: None,
        question_number: None,
        section: None,
        completed: None,
        estimated_remaining_time: None,
        skipped: Vec::new(),
        timestamp: Utc::now(),
    }
}

// ============================================================================
// Sink and Cancellation
// ============================================================================

/// Destination for job events.
pub trait EventSink: Send + Sync {
    /// Delivers one event. Returns `false` once the receiver is gone.
    fn emit(&self, event: StreamEvent) -> bool;
}

impl EventSink for UnboundedSender<StreamEvent> {
    fn emit(&self, event: StreamEvent) -> bool {
        self.send(event).is_ok()
    }
}

/// Shared cancellation flag for one job.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// A flag that is not set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
