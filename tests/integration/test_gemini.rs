//! Integration tests for the Gemini client against a local mock of the
//! Gemini REST API.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{spawn_gemini, test_config, MockGemini, PDF_BYTES, TEST_API_KEY};
use qpa_gemini::{GeminiClient, GeminiError};
use qpa_orchestrator::{
    AiGateway, AiRequest, CallPurpose, Document, DocumentState, Gateway, QpaError, ResponseMode,
};

async fn client_for(mock: &Arc<MockGemini>) -> (GeminiClient, qpa_orchestrator::Config) {
    let url = spawn_gemini(Arc::clone(mock)).await;
    let config = test_config(&url);
    let client = GeminiClient::from_config(&config.gemini).expect("Failed to build client");
    (client, config)
}

fn document() -> Document {
    Document::from_upload("paper.pdf", PDF_BYTES.to_vec(), 1024 * 1024).expect("valid document")
}

#[tokio::test]
async fn test_generate_returns_candidate_text() {
    let mock = Arc::new(MockGemini::default());
    let (client, _) = client_for(&mock).await;

    let request = AiRequest::json(
        CallPurpose::Classification,
        "Classify this question.\nQuestion number: 4\nTotal marks: 3\n",
        None,
    );
    let text = client.generate(&request).await.expect("generate failed");

    assert!(text.contains("\"question_type\""));
    assert!(text.contains("\"marks\":3.0"));
    assert_eq!(mock.api_keys.lock().unwrap().as_slice(), [TEST_API_KEY]);

    let requests = mock.requests.lock().unwrap();
    assert_eq!(requests[0]["contents"][0]["role"], "user");
    assert_eq!(requests[0]["generationConfig"]["responseMimeType"], "application/json");
    assert!(requests[0]["contents"][0]["parts"][0].get("fileData").is_none());
}

#[tokio::test]
async fn test_text_mode_omits_json_mime_type() {
    let mock = Arc::new(MockGemini::default());
    let (client, _) = client_for(&mock).await;

    let request = AiRequest {
        purpose: CallPurpose::Rubric,
        prompt: "Write a rubric".to_string(),
        document: None,
        mode: ResponseMode::Text,
    };
    client.generate(&request).await.expect("generate failed");

    let requests = mock.requests.lock().unwrap();
    assert!(requests[0]["generationConfig"].get("responseMimeType").is_none());
    assert!(requests[0]["generationConfig"]["temperature"].is_number());
}

#[tokio::test]
async fn test_upload_then_poll_until_active() {
    let mock = Arc::new(MockGemini {
        processing_polls: 1,
        ..MockGemini::default()
    });
    let (client, _) = client_for(&mock).await;

    let handle = client.upload_file(&document()).await.expect("upload failed");
    assert_eq!(handle.name, "files/doc1");
    assert_eq!(handle.uri, "https://mock.invalid/files/doc1");
    assert_eq!(handle.mime_type, "application/pdf");

    let first = client.file_state(&handle).await.expect("poll failed");
    let second = client.file_state(&handle).await.expect("poll failed");
    assert_eq!(first, DocumentState::Processing);
    assert_eq!(second, DocumentState::Active);
}

#[tokio::test]
async fn test_gateway_prepare_waits_for_ready_document() {
    let mock = Arc::new(MockGemini {
        processing_polls: 3,
        ..MockGemini::default()
    });
    let (client, config) = client_for(&mock).await;
    let gateway = Gateway::new(Arc::new(client), &config);

    let handle = gateway.prepare(&document()).await.expect("prepare failed");

    assert_eq!(handle.name, "files/doc1");
    assert_eq!(mock.uploads.load(Ordering::SeqCst), 1);
    assert_eq!(mock.polls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_rate_limit_maps_to_transient_error() {
    let mock = Arc::new(MockGemini {
        rate_limited_calls: 1.into(),
        ..MockGemini::default()
    });
    let (client, _) = client_for(&mock).await;
    let request = AiRequest::json(CallPurpose::Rubric, "Write a rubric", None);

    let err = client.generate(&request).await.expect_err("expected 429");
    assert!(matches!(
        err,
        GeminiError::Status { status: 429, ref message } if message == "Resource has been exhausted"
    ));

    let mock = Arc::new(MockGemini {
        rate_limited_calls: 1.into(),
        ..MockGemini::default()
    });
    let (client, _) = client_for(&mock).await;
    let err = client.invoke(&request).await.expect_err("expected 429");
    assert!(matches!(err, QpaError::UpstreamRateLimited { .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_gateway_retries_through_rate_limit() {
    let mock = Arc::new(MockGemini {
        rate_limited_calls: 2.into(),
        ..MockGemini::default()
    });
    let (client, config) = client_for(&mock).await;
    let gateway = Gateway::new(Arc::new(client), &config);

    let request = AiRequest::json(
        CallPurpose::AnswerKey,
        "Write the answer key for this question.\nQuestion number: 1\nTotal marks: 2\n",
        None,
    );
    let text = gateway.invoke(&request).await.expect("retries should succeed");

    assert!(text.contains("expected_outline"));
    assert_eq!(mock.generate_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_document_reference_is_sent_as_file_data() {
    let mock = Arc::new(MockGemini::default());
    let (client, _) = client_for(&mock).await;

    let handle = client.upload_file(&document()).await.expect("upload failed");
    let request = AiRequest::json(CallPurpose::Structure, "analysing the layout", Some(&handle));
    client.generate(&request).await.expect("generate failed");

    let requests = mock.requests.lock().unwrap();
    let parts = &requests[0]["contents"][0]["parts"];
    assert_eq!(parts[0]["fileData"]["fileUri"], handle.uri);
    assert_eq!(parts[0]["fileData"]["mimeType"], "application/pdf");
    assert_eq!(parts[1]["text"], "analysing the layout");
}
