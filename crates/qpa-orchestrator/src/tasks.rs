//! Turning an enriched paper into the rubric work queue.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::EmptyContentPolicy;
use crate::paper::{EnrichedPaper, EnrichedSection, QuestionContent};
use crate::rubric::{QuestionMetadata, SectionMetadata};

/// One question or sub-question queued for rubric generation.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionTask {
    /// 1-based position in the queue.
    pub position: usize,
    /// Section context.
    pub section: SectionMetadata,
    /// Question identity.
    pub metadata: QuestionMetadata,
    /// Type reported by extraction.
    pub question_type: String,
    /// Marks allocated.
    pub marks: f64,
    /// Full content.
    pub content: QuestionContent,
    /// Choices, for choice questions.
    pub options: Vec<String>,
    /// Passage or case study the question depends on.
    pub context: Option<String>,
}

impl QuestionTask {
    /// Printed number, with the sub-question label appended.
    #[must_use]
    pub fn number(&self) -> &str {
        &self.metadata.question_number
    }

    /// Section heading.
    #[must_use]
    pub fn section_name(&self) -> &str {
        &self.section.section_name
    }

    /// Why the question cannot be processed, if it cannot.
    #[must_use]
    pub fn empty_reason(&self) -> Option<&'static str> {
        if self.content.is_empty() {
            Some("no content text")
        } else if self.marks <= 0.0 {
            Some("no marks allocated")
        } else {
            None
        }
    }
}

/// A question left out of the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedQuestion {
    /// Printed number.
    pub question_number: String,
    /// Section heading.
    pub section_name: String,
    /// Why it was skipped.
    pub reason: String,
}

/// The queue for one rubric job.
#[derive(Debug, Clone, Default)]
pub struct WorkQueue {
    /// Questions to process, in paper order.
    pub tasks: Vec<QuestionTask>,
    /// Questions left out by the empty-content policy.
    pub skipped: Vec<SkippedQuestion>,
}

/// Flattens a paper into tasks: each question is followed by its
/// sub-questions, sections in paper order.
#[must_use]
pub fn build_queue(paper: &EnrichedPaper, policy: EmptyContentPolicy) -> WorkQueue {
    let mut queue = WorkQueue::default();

    for section in &paper.sections {
        let section_meta = section_metadata(section);
        for question in &section.questions {
            let context = question
                .passage
                .clone()
                .or_else(|| question.case_study_text.clone());

            let parent = QuestionTask {
                position: 0,
                section: section_meta.clone(),
                metadata: QuestionMetadata {
                    question_number: question.number.clone(),
                    question_id: format!("q_{}", question.number),
                    is_optional: question.optional,
                    optional_group: question.optional_with.clone(),
                    subquestion_label: None,
                    parent_question: None,
                },
                question_type: question.question_type.clone(),
                marks: question.marks,
                content: question.content.clone(),
                options: question.options.clone(),
                context: context.clone(),
            };
            enqueue(&mut queue, parent, policy);

            for sub in &question.subquestions {
                let number = format!("{}{}", question.number, sub.label);
                let task = QuestionTask {
                    position: 0,
                    section: section_meta.clone(),
                    metadata: QuestionMetadata {
                        question_id: format!("q_{number}"),
                        question_number: number,
                        is_optional: sub.optional,
                        optional_group: sub.optional_group.clone(),
                        subquestion_label: Some(sub.label.clone()),
                        parent_question: Some(question.number.clone()),
                    },
                    question_type: sub.question_type.clone(),
                    marks: sub.marks,
                    content: sub.content.clone(),
                    options: sub.options.clone(),
                    context: context.clone(),
                };
                enqueue(&mut queue, task, policy);
            }
        }
    }

    info!(
        queued = queue.tasks.len(),
        skipped = queue.skipped.len(),
        sections = paper.sections.len(),
        "Built rubric work queue"
    );
    queue
}

fn enqueue(queue: &mut WorkQueue, mut task: QuestionTask, policy: EmptyContentPolicy) {
    if policy == EmptyContentPolicy::Skip {
        if let Some(reason) = task.empty_reason() {
            debug!(question = %task.number(), reason, "Skipping question");
            queue.skipped.push(SkippedQuestion {
                question_number: task.metadata.question_number,
                section_name: task.section.section_name,
                reason: reason.to_string(),
            });
            return;
        }
    }
    task.position = queue.tasks.len() + 1;
    queue.tasks.push(task);
}

fn section_metadata(section: &EnrichedSection) -> SectionMetadata {
    SectionMetadata {
        section_name: section.name.clone(),
        section_instruction: section.instruction.clone(),
        section_marks: section.total_marks,
        section_time_allocation: section.time_allocation.clone(),
    }
}
