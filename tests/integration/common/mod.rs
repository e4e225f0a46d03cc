//! Shared fixtures: a local stand-in for the Gemini REST API and a helper
//! that serves the analyzer router against it.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use qpa_gemini::GeminiClient;
use qpa_orchestrator::config::UploadConfig;
use qpa_orchestrator::{create_router, AppState, Config, Gateway, RetryPolicy};
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// API key the test server is configured with.
pub const TEST_API_KEY: &str = "integration-test-key";

/// Minimal bytes accepted as a PDF upload.
pub const PDF_BYTES: &[u8] = b"%PDF-1.4\n1 0 obj\n<<>>\nendobj\n%%EOF\n";

/// Knobs and counters of the mock Gemini API.
#[derive(Default)]
pub struct MockGemini {
    /// `generateContent` calls answered with 429 before normal replies.
    pub rate_limited_calls: AtomicUsize,
    /// File polls answered with `PROCESSING` before `ACTIVE`.
    pub processing_polls: usize,
    /// Delay before every `generateContent` reply.
    pub delay: Duration,
    /// Uploads received.
    pub uploads: AtomicUsize,
    /// File state polls received.
    pub polls: AtomicUsize,
    /// `generateContent` calls received, including rejected ones.
    pub generate_calls: AtomicUsize,
    /// API keys seen on every request.
    pub api_keys: Mutex<Vec<String>>,
    /// Bodies of every `generateContent` call.
    pub requests: Mutex<Vec<Value>>,
}

impl MockGemini {
    fn record_key(&self, headers: &HeaderMap) {
        let key = headers
            .get("x-goog-api-key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.api_keys.lock().unwrap().push(key);
    }

    /// Prompts of every `generateContent` call so far.
    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|body| prompt_of(body).to_string())
            .collect()
    }
}

/// Serves the mock Gemini API on an ephemeral port and returns its base URL.
pub async fn spawn_gemini(mock: Arc<MockGemini>) -> String {
    let router = Router::new()
        .route("/upload/v1beta/files", post(upload_file))
        .route("/v1beta/files/:id", get(file_state))
        .route("/v1beta/models/:target", post(generate_content))
        .with_state(mock);
    serve(router).await
}

/// Analyzer configuration pointing at a mock Gemini base URL.
pub fn test_config(gemini_url: &str) -> Config {
    let mut config = Config::default();
    config.gemini.api_key = Some(TEST_API_KEY.to_string());
    config.gemini.base_url = gemini_url.to_string();
    config.gemini.request_timeout_secs = 10;
    config.retry = RetryPolicy::immediate(3);
    config.upload = UploadConfig {
        poll_interval_ms: 10,
        ready_timeout_secs: 5,
    };
    config
}

/// Serves the analyzer router with the real Gemini client and returns the
/// server address (`127.0.0.1:port`).
pub async fn spawn_app(config: Config) -> String {
    let client = GeminiClient::from_config(&config.gemini).expect("Failed to build Gemini client");
    let gateway = Gateway::new(Arc::new(client), &config);
    let router = create_router(AppState::new(config, gateway));
    let url = serve(router).await;
    url.trim_start_matches("http://").to_string()
}

async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });
    format!("http://{addr}")
}

// ============================================================================
// Mock handlers
// ============================================================================

async fn upload_file(
    State(mock): State<Arc<MockGemini>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    mock.record_key(&headers);
    let n = mock.uploads.fetch_add(1, Ordering::SeqCst) + 1;
    if !body.starts_with(b"%PDF") {
        return gemini_error(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", "not a PDF");
    }
    Json(json!({
        "file": {
            "name": format!("files/doc{n}"),
            "uri": format!("https://mock.invalid/files/doc{n}"),
            "mimeType": "application/pdf",
            "state": "PROCESSING"
        }
    }))
    .into_response()
}

async fn file_state(
    State(mock): State<Arc<MockGemini>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    mock.record_key(&headers);
    let polls = mock.polls.fetch_add(1, Ordering::SeqCst) + 1;
    let state = if polls > mock.processing_polls {
        "ACTIVE"
    } else {
        "PROCESSING"
    };
    Json(json!({
        "name": format!("files/{id}"),
        "uri": format!("https://mock.invalid/files/{id}"),
        "mimeType": "application/pdf",
        "state": state
    }))
    .into_response()
}

async fn generate_content(
    State(mock): State<Arc<MockGemini>>,
    Path(target): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    mock.record_key(&headers);
    mock.generate_calls.fetch_add(1, Ordering::SeqCst);

    if !target.ends_with(":generateContent") {
        return gemini_error(StatusCode::NOT_FOUND, "NOT_FOUND", "unknown method");
    }
    if mock
        .rate_limited_calls
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        return gemini_error(
            StatusCode::TOO_MANY_REQUESTS,
            "RESOURCE_EXHAUSTED",
            "Resource has been exhausted",
        );
    }
    if !mock.delay.is_zero() {
        tokio::time::sleep(mock.delay).await;
    }

    let reply = answer(prompt_of(&body));
    mock.requests.lock().unwrap().push(body);
    Json(json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": reply}]},
            "finishReason": "STOP"
        }]
    }))
    .into_response()
}

fn gemini_error(status: StatusCode, name: &str, message: &str) -> Response {
    let body = json!({
        "error": {"code": status.as_u16(), "message": message, "status": name}
    });
    (status, Json(body)).into_response()
}

fn prompt_of(body: &Value) -> &str {
    body["contents"][0]["parts"]
        .as_array()
        .and_then(|parts| parts.iter().rev().find_map(|p| p["text"].as_str()))
        .unwrap_or_default()
}

fn line<'a>(prompt: &'a str, prefix: &str) -> &'a str {
    prompt
        .lines()
        .find_map(|l| l.strip_prefix(prefix))
        .unwrap_or_default()
        .trim()
}

/// Answers a prompt the way a cooperative model would, recognising the
/// prompt by its opening instruction.
fn answer(prompt: &str) -> String {
    let marks: f64 = line(prompt, "Total marks: ").parse().unwrap_or(0.0);
    let number = line(prompt, "Question number: ");
    let levels = json!([
        {"level": "Excellent", "marks_range": "90-100%", "descriptor": "Complete"},
        {"level": "Proficient", "marks_range": "75-89%", "descriptor": "Mostly complete"},
        {"level": "Developing", "marks_range": "60-74%", "descriptor": "Partial"},
        {"level": "Beginning", "marks_range": "0-59%", "descriptor": "Minimal"}
    ]);

    let body = if prompt.contains("analysing the layout") {
        json!({
            "sections": [
                {"name": "Section A", "instruction": "Answer all questions", "total_marks": 4, "questions": [
                    {"number": "1", "type": "short_answer", "marks": 2},
                    {"number": "2", "type": "short_answer", "marks": 2}
                ]},
                {"name": "Section B", "total_marks": 5, "questions": [
                    {"number": "3", "type": "essay", "marks": 5}
                ]}
            ],
            "exam_duration": "1 hour"
        })
    } else if prompt.contains("extracting the full content") {
        let numbers: &[&str] = if line(prompt, "Section: ") == "Section A" {
            &["1", "2"]
        } else {
            &["3"]
        };
        let questions: Vec<Value> = numbers
            .iter()
            .map(|n| json!({"number": n, "content": {"text": format!("Explain topic {n} in detail.")}}))
            .collect();
        json!({ "questions": questions })
    } else if prompt.contains("Classify this question") {
        json!({
            "question_type": if marks >= 5.0 { "essay" } else { "short_answer" },
            "subject": "Biology",
            "topic": "Cells",
            "difficulty_level": "intermediate",
            "bloom_level": "comprehension",
            "cognitive_skills": ["recall"],
            "marks": marks,
            "estimated_time": "5 minutes"
        })
    } else if prompt.contains("Write the answer key") {
        json!({
            "expected_outline": [{"point": format!("Main idea of question {number}"), "marks": marks}],
            "key_concepts": ["cell membrane"],
            "alternative_answers": []
        })
    } else if prompt.contains("rubric") {
        json!({
            "total_marks": marks,
            "criteria": [{"criterion": "Understanding", "weight": 100, "marks": marks, "performance_levels": levels}],
            "mark_distribution": [{"component": "Understanding", "marks": marks}]
        })
    } else {
        json!({})
    };
    format!("```json\n{body}\n```")
}
