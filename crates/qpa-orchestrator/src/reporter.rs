//! Runs one streamed rubric job from its request message to the final
//! summary.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::RubricConfig;
use crate::error::{QpaError, Result};
use crate::gateway::Gateway;
use crate::paper::EnrichedPaper;
use crate::rubric::{JobSummary, UserPreferences};
use crate::stream::{CancelFlag, EventSink, ProgressStatus, StreamEvent};
use crate::tasks::build_queue;
use crate::worker_pool::{run_pool, PoolSettings};

/// The client's request message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RubricJobRequest {
    /// Output of enhanced extraction. A full `/upload-enhanced` response
    /// envelope is accepted too.
    #[serde(deserialize_with = "enriched_paper")]
    pub enhanced_api_response: EnrichedPaper,
    /// Per-request preferences.
    #[serde(default)]
    pub user_preferences: UserPreferences,
}

impl RubricJobRequest {
    /// Decodes and checks a request message.
    ///
    /// # Errors
    ///
    /// Returns `QpaError::InvalidRequest` for invalid JSON, missing fields or
    /// a paper without sections.
    pub fn parse(text: &str) -> Result<Self> {
        let request: Self = serde_json::from_str(text)
            .map_err(|e| QpaError::invalid_request(format!("Invalid request: {e}")))?;
        if request.enhanced_api_response.sections.is_empty() {
            return Err(QpaError::invalid_request(
                "Request contains no sections to process",
            ));
        }
        Ok(request)
    }
}

fn enriched_paper<'de, D>(deserializer: D) -> std::result::Result<EnrichedPaper, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let mut value = Value::deserialize(deserializer)?;
    if value.get("sections").is_none() {
        if let Some(data) = value.get_mut("data").map(Value::take) {
            value = data;
        }
    }
    serde_json::from_value(value).map_err(serde::de::Error::custom)
}

/// Runs the job described by `raw`, sending every event to `sink`.
///
/// A malformed request or an empty queue yields a single `error` event.
/// Otherwise the sink sees `started`, `parsing_complete`, the per-question
/// events and finally `final_summary`. Nothing more is sent once `cancel`
/// is set.
///
/// # Errors
///
/// Returns the request error when the request is rejected, and
/// `QpaError::Cancelled` when the job was cancelled.
pub async fn run_rubric_job(
    gateway: Gateway,
    config: &RubricConfig,
    raw: &str,
    sink: Arc<dyn EventSink>,
    cancel: CancelFlag,
) -> Result<JobSummary> {
    let request = match RubricJobRequest::parse(raw) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Rejected rubric request");
            sink.emit(StreamEvent::request_error(e.to_string()));
            return Err(e);
        }
    };

    sink.emit(StreamEvent::progress(
        ProgressStatus::Started,
        "Starting rubric generation",
    ));

    let queue = build_queue(&request.enhanced_api_response, config.empty_content_policy);
    if queue.tasks.is_empty() {
        let e = QpaError::invalid_request("No valid questions found");
        sink.emit(StreamEvent::request_error(e.to_string()));
        return Err(e);
    }

    let skipped = queue.skipped.len();
    info!(
        questions = queue.tasks.len(),
        skipped,
        "Rubric request accepted"
    );
    if !sink.emit(StreamEvent::parsing_complete(queue.tasks.len(), queue.skipped)) {
        cancel.cancel();
        return Err(QpaError::Cancelled);
    }

    let settings = PoolSettings::from_config(config, request.user_preferences.quality_mode);
    let summary = run_pool(
        gateway,
        queue.tasks,
        skipped,
        request.user_preferences,
        settings,
        Arc::clone(&sink),
        cancel.clone(),
    )
    .await?;

    if cancel.is_cancelled() {
        return Err(QpaError::Cancelled);
    }
    sink.emit(StreamEvent::final_summary(summary.clone()));
    Ok(summary)
}
