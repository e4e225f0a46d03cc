//! Examiner guidance derived locally from a classification. No model call.

use crate::rubric::{ClassificationResult, EvaluationGuidelines, TimeAllocation};

const MAX_MISTAKES: usize = 6;
const MAX_TIPS: usize = 6;
const MAX_RED_FLAGS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubjectFamily {
    Quantitative,
    Language,
    Humanities,
    Other,
}

impl SubjectFamily {
    fn of(subject: &str) -> Self {
        let subject = subject.to_lowercase();
        let has = |needle: &str| subject.contains(needle);
        if has("math") || has("science") || has("physics") || has("chemistry") {
            Self::Quantitative
        } else if has("english") || has("literature") {
            Self::Language
        } else if has("history") || has("social") {
            Self::Humanities
        } else {
            Self::Other
        }
    }
}

fn is_higher_order(bloom_level: &str) -> bool {
    matches!(bloom_level, "analysis" | "synthesis" | "evaluation")
}

/// Builds guidelines from the classification's subject, bloom level and
/// marks.
#[must_use]
pub fn evaluation_guidelines(classification: &ClassificationResult) -> EvaluationGuidelines {
    let family = SubjectFamily::of(classification.subject.as_deref().unwrap_or_default());
    let bloom = classification
        .bloom_level
        .as_deref()
        .unwrap_or("comprehension")
        .to_lowercase();

    EvaluationGuidelines {
        common_mistakes: common_mistakes(family, &bloom),
        evaluation_tips: evaluation_tips(family, &bloom),
        time_allocation: time_allocation(classification.marks),
        red_flags: red_flags(family),
    }
}

fn common_mistakes(family: SubjectFamily, bloom: &str) -> Vec<String> {
    let mut out = vec![
        "Incomplete answer missing key components",
        "Misreading what the question asks for",
        "Poorly organised response",
        "No supporting evidence or examples",
    ];
    match family {
        SubjectFamily::Quantitative => out.extend([
            "Calculation errors or wrong formula",
            "Missing units in the final answer",
            "Working steps not shown",
        ]),
        SubjectFamily::Language => out.extend([
            "Grammar and spelling errors",
            "No textual evidence",
            "Weak central argument",
        ]),
        SubjectFamily::Humanities => out.extend([
            "Incorrect dates or facts",
            "Events described without context",
            "Unacknowledged bias",
        ]),
        SubjectFamily::Other => {}
    }
    if is_higher_order(bloom) {
        out.extend([
            "Superficial analysis without depth",
            "No connections drawn between ideas",
        ]);
    }
    out.into_iter().take(MAX_MISTAKES).map(String::from).collect()
}

fn evaluation_tips(family: SubjectFamily, bloom: &str) -> Vec<String> {
    let mut out = vec![
        format!("Look for {bloom}-level thinking"),
        "Check understanding of the key concepts".to_string(),
        "Credit clear reasoning and explanation".to_string(),
        "Check that terminology is used correctly".to_string(),
    ];
    let extra: &[&str] = match family {
        SubjectFamily::Quantitative => &[
            "Verify calculations and the formulas chosen",
            "Check units and significant figures",
        ],
        SubjectFamily::Language => &[
            "Judge clarity and coherence of the writing",
            "Check the use of literary devices",
        ],
        SubjectFamily::Humanities => &["Check claims against the period or source cited"],
        SubjectFamily::Other => &[],
    };
    out.extend(extra.iter().map(|s| (*s).to_string()));
    out.truncate(MAX_TIPS);
    out
}

fn red_flags(family: SubjectFamily) -> Vec<String> {
    let mut out = vec![
        "Response is off-topic",
        "No attempt at the question",
        "Copied material without understanding",
        "Major factual errors or misconceptions",
    ];
    match family {
        SubjectFamily::Quantitative => out.push("Wrong underlying principle applied"),
        SubjectFamily::Language => out.push("Plagiarised text"),
        SubjectFamily::Humanities | SubjectFamily::Other => {}
    }
    out.into_iter().take(MAX_RED_FLAGS).map(String::from).collect()
}

/// Reading, evaluation and feedback time scaled by marks.
fn time_allocation(marks: f64) -> TimeAllocation {
    let marks = marks.max(0.0);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let whole = marks.floor() as u64;
    TimeAllocation {
        reading_question: format!("{} seconds", (whole * 10).max(30)),
        evaluation_time: format!("{} minutes", (whole / 2).max(1)),
        feedback_writing: format!("{} seconds", (whole * 15).max(30)),
    }
}
