//! Error types for the question paper analyzer.
//!
//! Variants are grouped by the stage that raises them: the AI gateway, the
//! response parser, the extraction pipeline, per-question rubric work, request
//! validation and configuration loading.

use std::path::PathBuf;

/// A specialized `Result` type for analyzer operations.
pub type Result<T> = std::result::Result<T, QpaError>;

/// Errors that can occur while analyzing a question paper.
///
/// Messages carry an actionable suggestion where the caller can do something
/// about the failure.
#[derive(Debug, thiserror::Error)]
pub enum QpaError {
    // ========================================================================
    // Gateway Errors
    // ========================================================================
    /// The AI provider could not be reached, rejected the credentials, or
    /// returned a server error.
    #[error("AI provider unavailable during {purpose}: {message}\n\nSuggestion: Check GEMINI_API_KEY and network connectivity, then retry")]
    UpstreamUnavailable {
        /// What the call was for (e.g. "structure", "classification").
        purpose: String,
        /// Detail from the transport or provider.
        message: String,
    },

    /// The AI provider throttled the request.
    #[error("AI provider rate limited the {purpose} call: {message}\n\nSuggestion: Reduce rubric.workerCount or wait before retrying")]
    UpstreamRateLimited {
        /// What the call was for.
        purpose: String,
        /// Detail from the provider.
        message: String,
    },

    /// An uploaded document never became ready on the provider side.
    #[error("Document '{name}' was not ready after {timeout_secs}s\n\nSuggestion: Retry the upload or raise upload.readyTimeoutSecs")]
    UpstreamTimeout {
        /// Provider-side document name.
        name: String,
        /// How long readiness was awaited.
        timeout_secs: u64,
    },

    /// The provider answered, but with an empty or error payload.
    #[error("AI provider returned an unusable {purpose} response: {message}")]
    UpstreamMalformed {
        /// What the call was for.
        purpose: String,
        /// Why the payload was rejected.
        message: String,
    },

    /// No AI provider credentials are configured.
    #[error("AI gateway is not configured\n\nSuggestion: Set GEMINI_API_KEY or gemini.apiKey in qpa.json")]
    GatewayNotConfigured,

    // ========================================================================
    // Parser Errors
    // ========================================================================
    /// Model output could not be decoded as JSON by any strategy.
    #[error("Model response is not parseable JSON: {message}")]
    ResponseNotParseable {
        /// Decoder error from the last strategy attempted.
        message: String,
        /// Leading slice of the raw text, for logging.
        excerpt: String,
    },

    /// Model output decoded as JSON but not into the expected shape.
    #[error("Model response has unexpected shape for {expected}: {message}")]
    ResponseShapeMismatch {
        /// Name of the expected type.
        expected: String,
        /// Description of the mismatch.
        message: String,
    },

    // ========================================================================
    // Pipeline Errors
    // ========================================================================
    /// Structure extraction failed, including the corrective retry.
    #[error("Structure extraction failed: {message}\n\nSuggestion: Check that the PDF is a readable question paper")]
    StructureExtractionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Some question stubs received no content. Non-fatal.
    #[error("Content extraction incomplete: {} question(s) without content ({})", .unmatched.len(), .unmatched.join(", "))]
    ContentExtractionPartial {
        /// `section/number` identifiers of the unmatched stubs.
        unmatched: Vec<String>,
    },

    // ========================================================================
    // Per-question Errors
    // ========================================================================
    /// Classification output was unusable; a degraded result was used.
    #[error("Classification degraded for question {question}: {message}")]
    ClassificationDegraded {
        /// Question identifier.
        question: String,
        /// Why the classification was degraded.
        message: String,
    },

    /// Rubric generation for a question failed.
    #[error("Rubric generation failed for question {question}: {message}")]
    RubricGenerationFailed {
        /// Question identifier.
        question: String,
        /// Description of the failure.
        message: String,
    },

    /// Answer-key generation for a question failed.
    #[error("Answer key generation failed for question {question}: {message}")]
    AnswerKeyGenerationFailed {
        /// Question identifier.
        question: String,
        /// Description of the failure.
        message: String,
    },

    /// Work was abandoned because the client went away.
    #[error("Processing cancelled")]
    Cancelled,

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// The uploaded file is not an acceptable PDF.
    #[error("Invalid document '{filename}': {message}")]
    InvalidDocument {
        /// Name of the uploaded file.
        filename: String,
        /// Why it was rejected.
        message: String,
    },

    /// A request body was malformed.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of the problem.
        message: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your qpa.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Maximum number of characters kept in a parse-failure excerpt.
const EXCERPT_CHARS: usize = 200;

impl QpaError {
    /// Creates a new `UpstreamUnavailable` error.
    #[must_use]
    pub fn upstream_unavailable(purpose: impl ToString, message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            purpose: purpose.to_string(),
            message: message.into(),
        }
    }

    /// Creates a new `UpstreamRateLimited` error.
    #[must_use]
    pub fn upstream_rate_limited(purpose: impl ToString, message: impl Into<String>) -> Self {
        Self::UpstreamRateLimited {
            purpose: purpose.to_string(),
            message: message.into(),
        }
    }

    /// Creates a new `UpstreamTimeout` error.
    #[must_use]
    pub fn upstream_timeout(name: impl Into<String>, timeout_secs: u64) -> Self {
        Self::UpstreamTimeout {
            name: name.into(),
            timeout_secs,
        }
    }

    /// Creates a new `UpstreamMalformed` error.
    #[must_use]
    pub fn upstream_malformed(purpose: impl ToString, message: impl Into<String>) -> Self {
        Self::UpstreamMalformed {
            purpose: purpose.to_string(),
            message: message.into(),
        }
    }

    /// Creates a new `ResponseNotParseable` error, keeping a short excerpt of
    /// the raw text.
    #[must_use]
    pub fn not_parseable(message: impl Into<String>, raw: &str) -> Self {
        Self::ResponseNotParseable {
            message: message.into(),
            excerpt: raw.chars().take(EXCERPT_CHARS).collect(),
        }
    }

    /// Creates a new `ResponseShapeMismatch` error.
    #[must_use]
    pub fn shape_mismatch(expected: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ResponseShapeMismatch {
            expected: expected.into(),
            message: message.into(),
        }
    }

    /// Creates a new `StructureExtractionFailed` error.
    #[must_use]
    pub fn structure_failed(message: impl Into<String>) -> Self {
        Self::StructureExtractionFailed {
            message: message.into(),
        }
    }

    /// Creates a new `RubricGenerationFailed` error.
    #[must_use]
    pub fn rubric_failed(question: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RubricGenerationFailed {
            question: question.into(),
            message: message.into(),
        }
    }

    /// Creates a new `AnswerKeyGenerationFailed` error.
    #[must_use]
    pub fn answer_key_failed(question: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AnswerKeyGenerationFailed {
            question: question.into(),
            message: message.into(),
        }
    }

    /// Creates a new `InvalidDocument` error.
    #[must_use]
    pub fn invalid_document(filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            filename: filename.into(),
            message: message.into(),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Returns `true` if the gateway should retry the call that produced this error.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable { .. } | Self::UpstreamRateLimited { .. }
        )
    }

    /// Returns `true` if the error came from the AI provider rather than from
    /// interpreting its output.
    #[must_use]
    pub const fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable { .. }
                | Self::UpstreamRateLimited { .. }
                | Self::UpstreamTimeout { .. }
                | Self::UpstreamMalformed { .. }
                | Self::GatewayNotConfigured
        )
    }

    /// Returns `true` if the model output could not be interpreted.
    #[must_use]
    pub const fn is_parse_failure(&self) -> bool {
        matches!(
            self,
            Self::ResponseNotParseable { .. } | Self::ResponseShapeMismatch { .. }
        )
    }

    /// Returns `true` if this error is fatal and the process cannot start.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError { .. } | Self::ConfigValidationError { .. }
        )
    }
}
