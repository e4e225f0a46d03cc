//! In-memory model used by pool, reporter and router tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::json;

use crate::config::{RetryPolicy, UploadConfig};
use crate::error::{QpaError, Result};
use crate::gateway::{AiGateway, AiRequest, CallPurpose, DocumentHandle, DocumentState, Gateway};
use crate::paper::{Document, EnrichedPaper};

/// Answers classification, rubric and answer-key prompts with consistent
/// JSON sized to the question's marks.
#[derive(Default)]
pub struct QuestionModel {
    /// Classification fails for this question number.
    pub fail_classification_for: Option<String>,
    /// Delay applied to every call.
    pub delay: Duration,
    /// Calls currently running.
    pub in_flight: AtomicUsize,
    /// Highest value `in_flight` reached.
    pub peak: AtomicUsize,
    /// Total calls.
    pub calls: AtomicUsize,
    /// Reports missing credentials.
    pub unconfigured: bool,
}

impl QuestionModel {
    pub fn gateway(self: &Arc<Self>) -> Gateway {
        Gateway::with_policies(
            Arc::clone(self) as Arc<dyn AiGateway>,
            RetryPolicy::immediate(1),
            UploadConfig::default(),
        )
    }

    fn answer(&self, request: &AiRequest) -> Result<String> {
        let line = |prefix: &str| {
            request
                .prompt
                .lines()
                .find_map(|l| l.strip_prefix(prefix))
                .unwrap_or_default()
                .trim()
                .to_string()
        };
        let number = line("Question number: ");
        let marks: f64 = line("Total marks: ").parse().unwrap_or(0.0);
        let levels = json!([
            {"level": "Excellent", "marks_range": "90-100%"},
            {"level": "Proficient", "marks_range": "75-89%"},
            {"level": "Developing", "marks_range": "60-74%"},
            {"level": "Beginning", "marks_range": "0-59%"}
        ]);

        let body = match request.purpose {
            CallPurpose::Classification => {
                if self.fail_classification_for.as_deref() == Some(number.as_str()) {
                    return Err(QpaError::upstream_unavailable(
                        CallPurpose::Classification,
                        "model overloaded",
                    ));
                }
                json!({
                    "question_type": "short_answer",
                    "subject": "Science",
                    "bloom_level": "application",
                    "difficulty_level": "medium",
                    "marks": marks
                })
            }
            CallPurpose::Rubric => json!({
                "criteria": [{"criterion": "Accuracy", "weight": 100, "marks": marks, "performance_levels": levels}],
                "mark_distribution": {"accuracy": marks}
            }),
            CallPurpose::AnswerKey => json!({
                "expected_outline": [{"point": format!("Answer to {number}"), "marks": marks}],
                "key_concepts": ["concept"]
            }),
            CallPurpose::Structure => json!({
                "sections": [
                    {"name": "Section A", "total_marks": 4, "questions": [
                        {"number": "1", "type": "short_answer", "marks": 2},
                        {"number": "2", "type": "short_answer", "marks": 2}
                    ]},
                    {"name": "Section B", "total_marks": 5, "questions": [
                        {"number": "3", "type": "essay", "marks": 5}
                    ]}
                ]
            }),
            CallPurpose::Content => {
                let numbers: &[&str] = if line("Section: ") == "Section A" {
                    &["1", "2"]
                } else {
                    &["3"]
                };
                let questions: Vec<_> = numbers
                    .iter()
                    .map(|n| json!({"number": n, "content": {"text": format!("Question {n} text")}}))
                    .collect();
                json!({ "questions": questions })
            }
            CallPurpose::Upload => {
                return Err(QpaError::upstream_malformed(CallPurpose::Upload, "unexpected call"));
            }
        };
        Ok(format!("```json\n{body}\n```"))
    }
}

impl AiGateway for QuestionModel {
    fn invoke<'a>(&'a self, request: &'a AiRequest) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let answer = self.answer(request);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            answer
        })
    }

    fn upload<'a>(&'a self, document: &'a Document) -> BoxFuture<'a, Result<DocumentHandle>> {
        Box::pin(async move {
            Ok(DocumentHandle {
                name: format!("files/{}", document.filename),
                uri: "mem://doc".to_string(),
                mime_type: "application/pdf".to_string(),
            })
        })
    }

    fn document_state<'a>(
        &'a self,
        _handle: &'a DocumentHandle,
    ) -> BoxFuture<'a, Result<DocumentState>> {
        Box::pin(async { Ok(DocumentState::Active) })
    }

    fn is_configured(&self) -> bool {
        !self.unconfigured
    }

    fn model(&self) -> &str {
        "question-model"
    }
}

/// A paper with the given sections, each holding `count` two-mark questions
/// numbered consecutively across the paper.
pub fn paper(sections: &[(&str, usize)]) -> EnrichedPaper {
    let mut number = 0;
    let sections: Vec<_> = sections
        .iter()
        .map(|(name, count)| {
            let questions: Vec<_> = (0..*count)
                .map(|_| {
                    number += 1;
                    json!({
                        "number": number.to_string(),
                        "type": "short_answer",
                        "marks": 2,
                        "content": {"text": format!("Explain concept {number}.")}
                    })
                })
                .collect();
            json!({"name": name, "questions": questions})
        })
        .collect();
    serde_json::from_value(json!({ "sections": sections })).unwrap()
}
