//! Google Gemini provider for the question paper analyzer.
//!
//! Implements [`qpa_orchestrator::AiGateway`] over the Gemini REST API:
//! raw file upload, file state polling and `generateContent`.
//!
//! This crate only translates calls. Retries, readiness polling and
//! response parsing live in the orchestrator.

mod client;
pub mod wire;

pub use client::GeminiClient;

use qpa_orchestrator::{CallPurpose, QpaError};
use thiserror::Error;

/// Errors from a single Gemini call.
#[derive(Debug, Error)]
pub enum GeminiError {
    /// No API key is configured.
    #[error("Gemini API key is not configured")]
    MissingApiKey,

    /// The HTTP request could not be completed.
    #[error("request to Gemini failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Gemini answered with a non-success status.
    #[error("Gemini returned HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error message from the response body.
        message: String,
    },

    /// The response carried no text.
    #[error("Gemini returned an empty response")]
    EmptyResponse,

    /// Generation stopped for a reason other than completion.
    #[error("Gemini stopped generating: {0}")]
    Blocked(String),

    /// The response body did not have the expected shape.
    #[error("unexpected Gemini payload: {0}")]
    Payload(String),
}

impl GeminiError {
    /// Maps onto the gateway error taxonomy.
    ///
    /// Throttling becomes rate limited; network failures, authentication
    /// failures and 5xx become unavailable; everything else is malformed.
    #[must_use]
    pub fn into_qpa(self, purpose: CallPurpose) -> QpaError {
        match self {
            Self::MissingApiKey => QpaError::GatewayNotConfigured,
            Self::Status { status: 429, message } => {
                QpaError::upstream_rate_limited(purpose, message)
            }
            Self::Status { status, message }
                if status == 401 || status == 403 || status == 408 || status >= 500 =>
            {
                QpaError::upstream_unavailable(purpose, format!("HTTP {status}: {message}"))
            }
            Self::Transport(e) if e.is_decode() => {
                QpaError::upstream_malformed(purpose, e.to_string())
            }
            Self::Transport(e) => QpaError::upstream_unavailable(purpose, e.to_string()),
            other => QpaError::upstream_malformed(purpose, other.to_string()),
        }
    }
}
