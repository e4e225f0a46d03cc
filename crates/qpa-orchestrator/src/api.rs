//! HTTP API for the question paper analyzer.
//!
//! Every REST response uses the same envelope,
//! `{"success": bool, "data"?: ..., "error"?: string, "processing_time"?: number}`.
//!
//! # Endpoints
//!
//! - `POST /api/v1/upload` - Extract the paper structure from a PDF
//! - `POST /api/v1/upload-enhanced` - Extract structure and full question content
//! - `GET /api/v1/question-types` - Question type catalog
//! - `GET /api/v1/capabilities` - Enabled features and processing limits
//! - `GET /api/v1/health` - Whether the AI gateway is usable
//! - `GET /api/v1/rubric-info` - Rubric standards, kinds, levels and quality modes
//! - `GET /api/v1/ws/rubric-generation` - Rubric streaming (see [`crate::websocket`])
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use qpa_orchestrator::{create_router, AiGateway, AppState, Config, Gateway};
//!
//! # async fn example(provider: Arc<dyn AiGateway>) {
//! let config = Config::default();
//! let gateway = Gateway::new(provider, &config);
//! let router = create_router(AppState::new(config, gateway));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await.unwrap();
//! axum::serve(listener, router).await.unwrap();
//! # }
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::catalog::{QuestionType, QUESTION_TYPES};
use crate::config::Config;
use crate::error::QpaError;
use crate::extraction::Pipeline;
use crate::gateway::Gateway;
use crate::paper::{Document, EnrichedPaper, PaperStructure};
use crate::rubric::PERFORMANCE_LEVELS;
use crate::websocket::ws_handler;

/// Version reported by `/health` and `/capabilities`.
pub const API_VERSION: &str = "3.0.0";

/// Path prefix of every route.
pub const API_PREFIX: &str = "/api/v1";

/// Room left for multipart framing on top of the file size limit.
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Standard response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request succeeded.
    pub success: bool,
    /// Payload, present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Description of the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Seconds spent handling the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
}

impl<T> ApiResponse<T> {
    /// A successful response.
    #[must_use]
    pub const fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            processing_time: None,
        }
    }

    /// A failed response.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            processing_time: None,
        }
    }

    /// Adds the processing time.
    #[must_use]
    pub const fn with_processing_time(mut self, seconds: f64) -> Self {
        self.processing_time = Some(seconds);
        self
    }
}

/// Response of `POST /upload-enhanced`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedAnalysisResponse {
    /// Always `true`; failures use the plain envelope.
    pub success: bool,
    /// The extracted paper.
    pub data: EnrichedPaper,
    /// Seconds for the whole run.
    pub processing_time: f64,
    /// Seconds spent on structure extraction.
    pub structure_extraction_time: f64,
    /// Seconds spent on content extraction.
    pub content_extraction_time: f64,
    /// Non-fatal problems, such as questions whose content was not found.
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Query string of `POST /upload`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct UploadQuery {
    /// Also extract question content.
    #[serde(default)]
    pub extract_content: bool,
}

/// Payload of `GET /question-types`.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionTypeCatalog {
    /// Every known type.
    pub question_types: &'static [QuestionType],
    /// Distinct categories, sorted.
    pub categories: Vec<&'static str>,
    /// Number of types.
    pub total_types: usize,
}

/// Payload of a healthy `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Always `"healthy"`.
    pub status: String,
    /// API version.
    pub version: String,
    /// When the check ran.
    pub timestamp: DateTime<Utc>,
    /// Model in use.
    pub model: String,
    /// Whether enhanced extraction is enabled.
    pub enhanced_extraction: bool,
    /// Whether rubric streaming is enabled.
    pub rubric_generation: bool,
    /// Number of catalog question types.
    pub question_types: usize,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,
    /// AI gateway shared by all requests.
    pub gateway: Gateway,
    /// Extraction pipeline over the same gateway.
    pub pipeline: Pipeline,
    /// Permits for concurrent streaming connections.
    pub(crate) connections: Arc<Semaphore>,
}

impl AppState {
    /// Creates the state for a configuration and gateway.
    #[must_use]
    pub fn new(config: Config, gateway: Gateway) -> Self {
        let connections = Arc::new(Semaphore::new(config.websocket.max_connections.max(1)));
        Self {
            pipeline: Pipeline::new(gateway.clone()),
            config,
            gateway,
            connections,
        }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Internal error type for API handlers.
#[derive(Debug)]
pub(crate) enum ApiError {
    /// The client sent something unusable.
    BadRequest(String),
    /// A pipeline stage failed.
    Upstream(String),
    /// The feature is disabled or the service is not usable.
    Unavailable(String),
}

impl From<QpaError> for ApiError {
    fn from(e: QpaError) -> Self {
        match e {
            QpaError::InvalidDocument { .. } | QpaError::InvalidRequest { .. } => {
                Self::BadRequest(e.to_string())
            }
            QpaError::GatewayNotConfigured => Self::Unavailable(e.to_string()),
            other => Self::Upstream(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = Json(ApiResponse::<()>::failure(message));
        (status, body).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all API endpoints.
///
/// Routes live under `/api/v1`, with CORS allowing any origin, request
/// tracing, and a body limit derived from `max_file_size_mb`.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = usize::try_from(
        state
            .config
            .max_file_size_bytes()
            .saturating_add(MULTIPART_OVERHEAD_BYTES),
    )
    .unwrap_or(usize::MAX);

    let api_routes = Router::new()
        .route("/upload", post(handle_upload))
        .route("/upload-enhanced", post(handle_upload_enhanced))
        .route("/question-types", get(handle_question_types))
        .route("/capabilities", get(handle_capabilities))
        .route("/health", get(handle_health))
        .route("/rubric-info", get(handle_rubric_info))
        .route("/ws/rubric-generation", get(ws_handler));

    Router::new()
        .nest(API_PREFIX, api_routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// Reads the `file` field of a multipart upload.
async fn read_upload(mut multipart: Multipart, max_bytes: u64) -> Result<Document, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload.pdf").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {e}")))?;
        return Ok(Document::from_upload(filename, bytes.to_vec(), max_bytes)?);
    }
    Err(ApiError::BadRequest(
        "Missing multipart field 'file'".to_string(),
    ))
}

/// Handler for `POST /api/v1/upload`.
async fn handle_upload(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UploadQuery>,
    multipart: Multipart,
) -> Result<Json<ApiResponse<PaperStructure>>, ApiError> {
    let started = Instant::now();
    let document = read_upload(multipart, state.config.max_file_size_bytes()).await?;
    info!(
        file = %document.filename,
        size = document.size(),
        extract_content = query.extract_content,
        "Received question paper"
    );

    let structure = if query.extract_content {
        state.pipeline.analyze_enhanced(&document).await?.paper.to_structure()
    } else {
        state.pipeline.analyze_structure(&document).await?.structure
    };

    let elapsed = started.elapsed().as_secs_f64();
    info!(
        file = %document.filename,
        sections = structure.sections.len(),
        elapsed,
        "Analysis complete"
    );
    Ok(Json(ApiResponse::ok(structure).with_processing_time(elapsed)))
}

/// Handler for `POST /api/v1/upload-enhanced`.
async fn handle_upload_enhanced(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<EnhancedAnalysisResponse>, ApiError> {
    if !state.config.features.enhanced_extraction {
        return Err(ApiError::Unavailable(
            "Enhanced extraction is currently disabled".to_string(),
        ));
    }

    let document = read_upload(multipart, state.config.max_file_size_bytes()).await?;
    info!(file = %document.filename, size = document.size(), "Received paper for enhanced analysis");

    let report = state.pipeline.analyze_enhanced(&document).await?;
    for warning in &report.warnings {
        warn!(file = %document.filename, "{}", warning);
    }

    let mut paper = report.paper;
    if state.config.features.rubric_generation {
        paper
            .metadata
            .insert("rubric_generation_available".to_string(), Value::Bool(true));
        paper.metadata.insert(
            "websocket_endpoint".to_string(),
            Value::from(format!("{API_PREFIX}/ws/rubric-generation")),
        );
    }

    info!(
        file = %document.filename,
        questions = paper.question_count(),
        structure_time = report.structure_extraction_time,
        content_time = report.content_extraction_time,
        "Enhanced analysis complete"
    );
    Ok(Json(EnhancedAnalysisResponse {
        success: true,
        data: paper,
        processing_time: report.processing_time,
        structure_extraction_time: report.structure_extraction_time,
        content_extraction_time: report.content_extraction_time,
        warnings: report.warnings,
    }))
}

/// Handler for `GET /api/v1/question-types`.
async fn handle_question_types() -> Json<ApiResponse<QuestionTypeCatalog>> {
    let categories: BTreeSet<&'static str> = QUESTION_TYPES.iter().map(|t| t.category).collect();
    Json(ApiResponse::ok(QuestionTypeCatalog {
        question_types: QUESTION_TYPES,
        categories: categories.into_iter().collect(),
        total_types: QUESTION_TYPES.len(),
    }))
}

/// Handler for `GET /api/v1/capabilities`.
async fn handle_capabilities(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Value>> {
    let config = &state.config;
    let rubrics = config.features.rubric_generation;
    Json(ApiResponse::ok(json!({
        "supported_formats": [".pdf"],
        "max_file_size_mb": config.max_file_size_mb,
        "model": state.gateway.provider().model(),
        "features": {
            "structure_analysis": true,
            "content_extraction": config.features.enhanced_extraction,
            "rubric_generation": rubrics,
            "image_description": true,
            "formula_extraction": true,
            "table_extraction": true,
            "code_extraction": true,
            "optional_logic_detection": true,
            "marks_allocation_detection": true,
            "real_time_processing": rubrics,
            "bloom_taxonomy": rubrics
        },
        "processing": {
            "max_retries": config.retry.max_attempts,
            "retry_base_delay_ms": config.retry.base_delay_ms,
            "rubric_worker_count": if rubrics { config.rubric.worker_count } else { 0 },
            "rubric_quality_mode": rubrics.then(|| config.rubric.quality_mode.as_str()),
            "rubric_timeout_seconds": rubrics.then_some(config.rubric.timeout_seconds)
        },
        "question_types_supported": QUESTION_TYPES.len(),
        "api_version": API_VERSION,
        "websocket_support": rubrics
    })))
}

/// Handler for `GET /api/v1/health`.
async fn handle_health(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<HealthReport>>, ApiError> {
    let started = Instant::now();
    if !state.gateway.provider().is_configured() {
        warn!("Health check failed: AI gateway has no credentials");
        return Err(ApiError::Unavailable(
            "unhealthy: AI gateway API key is not configured".to_string(),
        ));
    }

    let report = HealthReport {
        status: "healthy".to_string(),
        version: API_VERSION.to_string(),
        timestamp: Utc::now(),
        model: state.gateway.provider().model().to_string(),
        enhanced_extraction: state.config.features.enhanced_extraction,
        rubric_generation: state.config.features.rubric_generation,
        question_types: QUESTION_TYPES.len(),
    };
    Ok(Json(
        ApiResponse::ok(report).with_processing_time(started.elapsed().as_secs_f64()),
    ))
}

/// Handler for `GET /api/v1/rubric-info`.
async fn handle_rubric_info(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    if !state.config.features.rubric_generation {
        return Err(ApiError::Unavailable(
            "Rubric generation is not enabled".to_string(),
        ));
    }

    let levels: Vec<Value> = PERFORMANCE_LEVELS
        .iter()
        .zip([
            ("90-100%", "Exceeds expectations, demonstrates mastery"),
            ("75-89%", "Meets expectations, shows competence"),
            ("60-74%", "Approaching expectations, partial understanding"),
            ("Below 60%", "Below expectations, minimal understanding"),
        ])
        .map(|(level, (range, description))| {
            json!({"level": level, "range": range, "description": description})
        })
        .collect();

    Ok(Json(ApiResponse::ok(json!({
        "supported_standards": {
            "bloom_taxonomy": {
                "description": "Based on Bloom's Taxonomy cognitive levels",
                "levels": ["knowledge", "comprehension", "application", "analysis", "synthesis", "evaluation"]
            },
            "custom": {
                "description": "Custom rubric based on question content and type",
                "flexible": true
            }
        },
        "rubric_types": {
            "analytical": {
                "description": "Detailed criteria-based rubric with multiple performance levels",
                "best_for": ["essay", "case_study", "long_answer"]
            },
            "holistic": {
                "description": "Overall performance assessment with single score",
                "best_for": ["creative", "open_ended"]
            },
            "checklist": {
                "description": "Basic checklist format for straightforward assessment",
                "best_for": ["mcq", "short_answer", "fill_in_blanks", "true_false"]
            }
        },
        "performance_levels": levels,
        "quality_modes": {
            "high": {
                "description": "Maximum quality with detailed analysis",
                "processing_time": "Slower but comprehensive"
            },
            "balanced": {
                "description": "Good quality with reasonable speed",
                "processing_time": "Moderate"
            },
            "fast": {
                "description": "Quick generation with basic quality",
                "processing_time": "Faster but less detailed"
            }
        },
        "default_quality_mode": state.config.rubric.quality_mode.as_str(),
        "worker_count": state.config.rubric.worker_count,
        "websocket_endpoint": format!("{API_PREFIX}/ws/rubric-generation")
    }))))
}

// ============================================================================
// Tests
// ============================================================================
