//! Integration tests for the REST API.
//!
//! Each test serves the real router with the real Gemini client, pointed at
//! a local mock of the Gemini REST API, and talks to it over HTTP.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{spawn_app, spawn_gemini, test_config, MockGemini, PDF_BYTES, TEST_API_KEY};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::Value;

/// Starts a mock Gemini API and the analyzer in front of it.
async fn start(mock: MockGemini) -> (String, Arc<MockGemini>) {
    let mock = Arc::new(mock);
    let gemini_url = spawn_gemini(Arc::clone(&mock)).await;
    let addr = spawn_app(test_config(&gemini_url)).await;
    (format!("http://{addr}/api/v1"), mock)
}

fn pdf_form(filename: &str, bytes: &'static [u8]) -> Form {
    let part = Part::bytes(bytes)
        .file_name(filename.to_string())
        .mime_str("application/pdf")
        .expect("Invalid mime type");
    Form::new().part("file", part)
}

async fn post_upload(url: &str, form: Form) -> (StatusCode, Value) {
    let response = reqwest::Client::new()
        .post(url)
        .multipart(form)
        .send()
        .await
        .expect("Request failed");
    let status = response.status();
    let body = response.json().await.expect("Body is not JSON");
    (status, body)
}

async fn get_json(url: &str) -> (StatusCode, Value) {
    let response = reqwest::get(url).await.expect("Request failed");
    let status = response.status();
    let body = response.json().await.expect("Body is not JSON");
    (status, body)
}

// ============================================================================
// Upload
// ============================================================================

#[tokio::test]
async fn test_upload_extracts_structure_after_document_is_ready() {
    let (base, mock) = start(MockGemini {
        processing_polls: 2,
        ..MockGemini::default()
    })
    .await;

    let (status, body) = post_upload(&format!("{base}/upload"), pdf_form("paper.pdf", PDF_BYTES)).await;

    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["success"], true);
    assert!(body["processing_time"].as_f64().is_some());
    let sections = body["data"]["sections"].as_array().expect("sections");
    assert_eq!(sections.len(), 2);
    assert_eq!(sections[0]["name"], "Section A");
    assert_eq!(sections[0]["questions"].as_array().map(Vec::len), Some(2));
    assert_eq!(sections[1]["questions"][0]["number"], "3");

    assert_eq!(mock.uploads.load(Ordering::SeqCst), 1);
    assert_eq!(mock.polls.load(Ordering::SeqCst), 3);
    assert_eq!(mock.generate_calls.load(Ordering::SeqCst), 1);

    // The structure prompt references the uploaded file.
    let requests = mock.requests.lock().unwrap();
    let parts = &requests[0]["contents"][0]["parts"];
    assert_eq!(parts[0]["fileData"]["fileUri"], "https://mock.invalid/files/doc1");
    assert_eq!(requests[0]["generationConfig"]["responseMimeType"], "application/json");
}

#[tokio::test]
async fn test_every_gemini_call_carries_the_api_key() {
    let (base, mock) = start(MockGemini::default()).await;

    let (status, _) = post_upload(
        &format!("{base}/upload?extract_content=true"),
        pdf_form("paper.pdf", PDF_BYTES),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let keys = mock.api_keys.lock().unwrap();
    assert!(!keys.is_empty());
    assert!(keys.iter().all(|k| k == TEST_API_KEY));
}

#[tokio::test]
async fn test_upload_with_content_includes_question_text() {
    let (base, mock) = start(MockGemini::default()).await;

    let (status, body) = post_upload(
        &format!("{base}/upload?extract_content=true"),
        pdf_form("paper.pdf", PDF_BYTES),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["data"]["sections"].as_array().map(Vec::len), Some(2));
    // Structure plus one content call per section.
    assert_eq!(mock.generate_calls.load(Ordering::SeqCst), 3);
    let prompts = mock.prompts();
    assert!(prompts.iter().any(|p| p.contains("Section: Section A")));
    assert!(prompts.iter().any(|p| p.contains("Section: Section B")));
}

#[tokio::test]
async fn test_upload_enhanced_returns_content_and_timings() {
    let (base, _mock) = start(MockGemini::default()).await;

    let (status, body) =
        post_upload(&format!("{base}/upload-enhanced"), pdf_form("paper.pdf", PDF_BYTES)).await;

    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["success"], true);
    assert!(body["structure_extraction_time"].as_f64().is_some());
    assert!(body["content_extraction_time"].as_f64().is_some());
    let data = &body["data"];
    assert_eq!(
        data["sections"][0]["questions"][1]["content"]["text"],
        "Explain topic 2 in detail."
    );
    assert_eq!(data["sections"][1]["questions"][0]["marks"], 5.0);
    assert_eq!(data["metadata"]["rubric_generation_available"], true);
    assert_eq!(
        data["metadata"]["websocket_endpoint"],
        "/api/v1/ws/rubric-generation"
    );
}

#[tokio::test]
async fn test_transient_rate_limit_is_retried() {
    let (base, mock) = start(MockGemini {
        rate_limited_calls: 2.into(),
        ..MockGemini::default()
    })
    .await;

    let (status, body) = post_upload(&format!("{base}/upload"), pdf_form("paper.pdf", PDF_BYTES)).await;

    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(mock.generate_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_persistent_rate_limit_fails_with_bad_gateway() {
    let (base, mock) = start(MockGemini {
        rate_limited_calls: 100.into(),
        ..MockGemini::default()
    })
    .await;

    let (status, body) = post_upload(&format!("{base}/upload"), pdf_form("paper.pdf", PDF_BYTES)).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["success"], false);
    let error = body["error"].as_str().unwrap_or_default();
    assert!(error.contains("rate limited"), "error: {error}");
    assert_eq!(mock.generate_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_non_pdf_upload_is_rejected_before_gemini() {
    let (base, mock) = start(MockGemini::default()).await;

    let (status, body) =
        post_upload(&format!("{base}/upload"), pdf_form("notes.txt", b"plain text")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap_or_default().contains("notes.txt"));
    assert_eq!(mock.uploads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_oversized_upload_is_rejected() {
    let mock = Arc::new(MockGemini::default());
    let gemini_url = spawn_gemini(Arc::clone(&mock)).await;
    let mut config = test_config(&gemini_url);
    config.max_file_size_mb = 1;
    let addr = spawn_app(config).await;

    let mut big = b"%PDF-1.4\n".to_vec();
    big.resize(1024 * 1024 + 1, b'0');
    let part = Part::bytes(big)
        .file_name("big.pdf")
        .mime_str("application/pdf")
        .expect("Invalid mime type");
    let (status, body) = post_upload(
        &format!("http://{addr}/api/v1/upload"),
        Form::new().part("file", part),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(mock.uploads.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Informational endpoints
// ============================================================================

#[tokio::test]
async fn test_health_reports_model_and_features() {
    let (base, mock) = start(MockGemini::default()).await;

    let (status, body) = get_json(&format!("{base}/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["version"], "3.0.0");
    assert_eq!(body["data"]["model"], "gemini-2.5-flash");
    // Health never calls the provider.
    assert_eq!(mock.generate_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_health_without_api_key_is_unavailable() {
    let mock = Arc::new(MockGemini::default());
    let gemini_url = spawn_gemini(mock).await;
    let mut config = test_config(&gemini_url);
    config.gemini.api_key = None;
    let addr = spawn_app(config).await;

    let (status, body) = get_json(&format!("http://{addr}/api/v1/health")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap_or_default().starts_with("unhealthy"));
}

#[tokio::test]
async fn test_capabilities_and_catalog() {
    let (base, _mock) = start(MockGemini::default()).await;

    let (status, capabilities) = get_json(&format!("{base}/capabilities")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(capabilities["data"]["api_version"], "3.0.0");
    assert_eq!(capabilities["data"]["websocket_support"], true);

    let (status, catalog) = get_json(&format!("{base}/question-types")).await;
    assert_eq!(status, StatusCode::OK);
    let total = catalog["data"]["total_types"].as_u64().expect("total_types");
    assert_eq!(
        capabilities["data"]["question_types_supported"].as_u64(),
        Some(total)
    );
}

#[tokio::test]
async fn test_disabled_rubric_generation_hides_rubric_routes() {
    let mock = Arc::new(MockGemini::default());
    let gemini_url = spawn_gemini(mock).await;
    let mut config = test_config(&gemini_url);
    config.features.rubric_generation = false;
    let addr = spawn_app(config).await;

    let (status, _) = get_json(&format!("http://{addr}/api/v1/rubric-info")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (_, capabilities) = get_json(&format!("http://{addr}/api/v1/capabilities")).await;
    assert_eq!(capabilities["data"]["websocket_support"], false);
}
