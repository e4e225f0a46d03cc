//! Two-stage extraction: paper structure first, then per-section content.

use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::catalog;
use crate::error::{QpaError, Result};
use crate::gateway::{AiRequest, CallPurpose, DocumentHandle, Gateway};
use crate::paper::{
    question_key, Document, EnrichedPaper, EnrichedQuestion, EnrichedSection, PaperStructure,
    Section,
};
use crate::parser;
use crate::prompts;

/// Result of a structure-only analysis.
#[derive(Debug, Clone)]
pub struct StructureReport {
    /// Paper layout.
    pub structure: PaperStructure,
    /// Wall time in seconds, upload included.
    pub processing_time: f64,
}

/// Result of content extraction over a structure.
#[derive(Debug, Clone)]
pub struct ContentReport {
    /// Paper with content merged onto every stub.
    pub paper: EnrichedPaper,
    /// `section/number` of stubs that received no content.
    pub unmatched: Vec<String>,
    /// Wall time of the content stage, in seconds.
    pub content_extraction_time: f64,
}

impl ContentReport {
    /// The partial-extraction warning, if any stub went unmatched.
    #[must_use]
    pub fn warning(&self) -> Option<QpaError> {
        (!self.unmatched.is_empty()).then(|| QpaError::ContentExtractionPartial {
            unmatched: self.unmatched.clone(),
        })
    }
}

/// Result of the full two-stage analysis.
#[derive(Debug, Clone)]
pub struct EnhancedReport {
    /// Paper with content.
    pub paper: EnrichedPaper,
    /// Total wall time in seconds, upload included.
    pub processing_time: f64,
    /// Time spent on structure extraction.
    pub structure_extraction_time: f64,
    /// Time spent on content extraction.
    pub content_extraction_time: f64,
    /// Non-fatal problems, as display strings.
    pub warnings: Vec<String>,
}

/// Drives one document through the extraction stages.
#[derive(Debug, Clone)]
pub struct Pipeline {
    gateway: Gateway,
}

impl Pipeline {
    /// Creates a pipeline over the given gateway.
    #[must_use]
    pub const fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// Uploads the document and extracts its structure.
    ///
    /// # Errors
    ///
    /// Returns upstream errors from the upload or the model call, and
    /// `QpaError::StructureExtractionFailed` when the response is unusable
    /// even after the corrective retry.
    pub async fn analyze_structure(&self, document: &Document) -> Result<StructureReport> {
        let started = Instant::now();
        let handle = self.gateway.prepare(document).await?;
        let structure = self.extract_structure(&handle).await?;
        Ok(StructureReport {
            structure,
            processing_time: started.elapsed().as_secs_f64(),
        })
    }

    /// Uploads the document, extracts its structure, then its content.
    ///
    /// # Errors
    ///
    /// As [`Self::analyze_structure`], plus the last upstream error when
    /// every content call failed.
    pub async fn analyze_enhanced(&self, document: &Document) -> Result<EnhancedReport> {
        let started = Instant::now();
        let handle = self.gateway.prepare(document).await?;

        info!(file = %document.filename, "Step 1: extracting paper structure");
        let structure_started = Instant::now();
        let structure = self.extract_structure(&handle).await?;
        let structure_extraction_time = structure_started.elapsed().as_secs_f64();
        info!(
            sections = structure.sections.len(),
            questions = structure.question_count(),
            elapsed = structure_extraction_time,
            "Structure extraction complete"
        );

        info!(file = %document.filename, "Step 2: extracting question content");
        let content = self.extract_content(&handle, &structure).await?;
        let warnings = content.warning().map(|w| w.to_string()).into_iter().collect();

        let mut paper = content.paper;
        paper
            .metadata
            .insert("source_file".to_string(), Value::from(document.filename.clone()));

        Ok(EnhancedReport {
            paper,
            processing_time: started.elapsed().as_secs_f64(),
            structure_extraction_time,
            content_extraction_time: content.content_extraction_time,
            warnings,
        })
    }

    /// Recovers the paper layout from an uploaded document.
    ///
    /// One corrective retry is made when the response is unparseable or has
    /// the wrong shape.
    ///
    /// # Errors
    ///
    /// Returns upstream errors unchanged and
    /// `QpaError::StructureExtractionFailed` when both attempts are unusable.
    pub async fn extract_structure(&self, document: &DocumentHandle) -> Result<PaperStructure> {
        let first = self.request_structure(document, prompts::structure()).await?;
        let problem = match first {
            Ok(structure) => return Ok(structure),
            Err(e) => e,
        };

        warn!(error = %problem, "Structure response unusable, retrying with correction");
        let retry = self
            .request_structure(document, prompts::structure_correction(&problem.to_string()))
            .await?;
        retry.map_err(|e| QpaError::structure_failed(e.to_string()))
    }

    /// Upstream failures are the outer error; parse and shape failures the
    /// inner one.
    async fn request_structure(
        &self,
        document: &DocumentHandle,
        prompt: String,
    ) -> Result<Result<PaperStructure>> {
        let request = AiRequest::json(CallPurpose::Structure, prompt, Some(document));
        let raw = self.gateway.invoke(&request).await?;
        Ok(parser::parse_as::<PaperStructure>(&raw, "PaperStructure")
            .and_then(validate_structure)
            .map(PaperStructure::with_recounted_summary))
    }

    /// Fills every stub in `structure` with content, one call per section.
    ///
    /// # Errors
    ///
    /// Returns the last upstream error if every section call failed with
    /// one; any other failure leaves the affected stubs empty.
    pub async fn extract_content(
        &self,
        document: &DocumentHandle,
        structure: &PaperStructure,
    ) -> Result<ContentReport> {
        let started = Instant::now();
        let mut sections = Vec::with_capacity(structure.sections.len());
        let mut unmatched = Vec::new();
        let mut upstream_failures = 0;
        let mut last_upstream = None;

        for section in &structure.sections {
            let extracted = match self.request_section(document, section).await {
                Ok(questions) => questions,
                Err(e) => {
                    warn!(section = %section.name, error = %e, "Content extraction failed for section");
                    if e.is_upstream() {
                        upstream_failures += 1;
                        last_upstream = Some(e);
                    }
                    Vec::new()
                }
            };
            let (enriched, missing) = merge_section(section, extracted);
            unmatched.extend(missing);
            sections.push(enriched);
        }

        if upstream_failures == structure.sections.len() {
            if let Some(e) = last_upstream {
                return Err(e);
            }
        }

        let paper = EnrichedPaper {
            sections,
            summary: structure.summary.clone(),
            metadata: serde_json::Map::new(),
        }
        .with_recounted_summary();

        if !unmatched.is_empty() {
            warn!(count = unmatched.len(), "Some questions received no content");
        }

        Ok(ContentReport {
            paper,
            unmatched,
            content_extraction_time: started.elapsed().as_secs_f64(),
        })
    }

    async fn request_section(
        &self,
        document: &DocumentHandle,
        section: &Section,
    ) -> Result<Vec<EnrichedQuestion>> {
        let request = AiRequest::json(CallPurpose::Content, prompts::content(section), Some(document));
        let raw = self.gateway.invoke(&request).await?;
        let value = parser::parse(&raw)?;
        section_questions(value)
    }
}

/// Accepts `{"questions": [...]}`, a bare list, or a `{"sections": [...]}`
/// wrapper around either.
fn section_questions(value: Value) -> Result<Vec<EnrichedQuestion>> {
    let list = match value {
        list @ Value::Array(_) => list,
        Value::Object(mut map) => {
            if let Some(questions) = map.remove("questions") {
                questions
            } else if let Some(Value::Array(sections)) = map.remove("sections") {
                Value::Array(
                    sections
                        .into_iter()
                        .filter_map(|mut s| s.get_mut("questions").map(Value::take))
                        .flat_map(|q| match q {
                            Value::Array(items) => items,
                            _ => Vec::new(),
                        })
                        .collect(),
                )
            } else {
                return Err(QpaError::shape_mismatch(
                    "section content",
                    "expected a \"questions\" list",
                ));
            }
        }
        _ => {
            return Err(QpaError::shape_mismatch(
                "section content",
                "expected an object or list",
            ))
        }
    };
    let Value::Array(items) = list else {
        return Err(QpaError::shape_mismatch(
            "section content",
            "\"questions\" is not a list",
        ));
    };

    // Items are decoded one by one so a malformed entry only costs its own
    // question; its stub is then reported as unmatched.
    Ok(items
        .into_iter()
        .enumerate()
        .filter_map(|(idx, item)| match serde_json::from_value::<EnrichedQuestion>(item) {
            Ok(question) => Some(question),
            Err(e) => {
                warn!(index = idx, error = %e, "Dropping malformed question content");
                None
            }
        })
        .collect())
}

fn merge_section(section: &Section, extracted: Vec<EnrichedQuestion>) -> (EnrichedSection, Vec<String>) {
    let mut pool = extracted;
    let mut unmatched = Vec::new();
    let questions = section
        .questions
        .iter()
        .map(|stub| {
            let key = question_key(&stub.number);
            match pool.iter().position(|q| question_key(&q.number) == key) {
                Some(idx) => EnrichedQuestion::merge(stub, pool.remove(idx)),
                None => {
                    debug!(section = %section.name, question = %stub.number, "No content for question");
                    unmatched.push(format!("{}/{}", section.name, stub.number));
                    EnrichedQuestion::from_stub(stub)
                }
            }
        })
        .collect();
    (EnrichedSection::from_section(section, questions), unmatched)
}

fn validate_structure(structure: PaperStructure) -> Result<PaperStructure> {
    if structure.sections.is_empty() {
        return Err(QpaError::shape_mismatch("PaperStructure", "no sections found"));
    }
    for (idx, section) in structure.sections.iter().enumerate() {
        if section.name.trim().is_empty() {
            return Err(QpaError::shape_mismatch(
                "PaperStructure",
                format!("section {} has no name", idx + 1),
            ));
        }
        if let Some(q) = section.questions.iter().find(|q| q.number.trim().is_empty()) {
            return Err(QpaError::shape_mismatch(
                "PaperStructure",
                format!("a question in '{}' has no number (type '{}')", section.name, q.question_type),
            ));
        }
    }

    let unknown: Vec<&str> = structure
        .question_types()
        .filter(|t| !t.trim().is_empty() && !catalog::is_known_type(t))
        .collect();
    if !unknown.is_empty() {
        warn!(types = ?unknown, "Structure uses question types outside the catalog");
    }
    Ok(structure)
}
