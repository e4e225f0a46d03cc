//! JSON bodies exchanged with the Gemini REST API.

use qpa_orchestrator::{DocumentHandle, DocumentState};
use serde::{Deserialize, Serialize};

use crate::GeminiError;

// ============================================================================
// generateContent
// ============================================================================

/// Body of `models/{model}:generateContent`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    /// Conversation turns; always a single user turn here.
    pub contents: Vec<Content>,
    /// Sampling settings.
    pub generation_config: GenerationConfig,
}

/// One conversation turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    /// `"user"` or `"model"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Ordered parts of the turn.
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// Text or a reference to an uploaded file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Text content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Uploaded file reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_data: Option<FileData>,
}

/// Reference to an uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    /// MIME type of the file.
    pub mime_type: String,
    /// URI returned by the upload.
    pub file_uri: String,
}

/// Sampling settings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Sampling temperature.
    pub temperature: f32,
    /// `application/json` when JSON output is requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<&'static str>,
}

/// Response of `generateContent`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    /// Generated candidates.
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    /// Set when the prompt itself was blocked.
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
}

/// One generated candidate.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// Generated content.
    #[serde(default)]
    pub content: Option<Content>,
    /// Why generation ended, e.g. `STOP` or `SAFETY`.
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Feedback about the prompt.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    /// Reason the prompt was blocked.
    #[serde(default)]
    pub block_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate.
    ///
    /// # Errors
    ///
    /// `Blocked` when the prompt was blocked or generation stopped for any
    /// reason but `STOP`; `EmptyResponse` when there is no text.
    pub fn into_text(self) -> Result<String, GeminiError> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(GeminiError::Blocked(reason));
        }
        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or(GeminiError::EmptyResponse)?;
        if let Some(reason) = candidate.finish_reason.filter(|r| r != "STOP") {
            return Err(GeminiError::Blocked(reason));
        }

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(GeminiError::EmptyResponse);
        }
        Ok(text)
    }
}

// ============================================================================
// Files
// ============================================================================

/// Response of the raw upload endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    /// The stored file.
    pub file: FileResource,
}

/// A stored file as described by the Files API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResource {
    /// Resource name, `files/{id}`.
    pub name: String,
    /// URI used in `fileData` parts.
    #[serde(default)]
    pub uri: String,
    /// MIME type.
    #[serde(default)]
    pub mime_type: String,
    /// `PROCESSING`, `ACTIVE` or `FAILED`.
    #[serde(default)]
    pub state: Option<String>,
}

impl FileResource {
    /// Processing state. Unknown or missing states count as processing.
    #[must_use]
    pub fn document_state(&self) -> DocumentState {
        match self.state.as_deref() {
            Some("ACTIVE") => DocumentState::Active,
            Some("FAILED") => DocumentState::Failed,
            _ => DocumentState::Processing,
        }
    }

    /// Handle used by the orchestrator.
    #[must_use]
    pub fn into_handle(self, fallback_mime: &str) -> DocumentHandle {
        let mime_type = if self.mime_type.is_empty() {
            fallback_mime.to_string()
        } else {
            self.mime_type
        };
        DocumentHandle {
            name: self.name,
            uri: self.uri,
            mime_type,
        }
    }
}

/// Error body returned with non-success statuses.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    /// Error detail.
    pub error: ErrorDetail,
}

/// Error detail.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Status name, e.g. `RESOURCE_EXHAUSTED`.
    #[serde(default)]
    pub status: Option<String>,
}
