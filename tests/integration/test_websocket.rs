//! Integration tests for the rubric generation WebSocket.
//!
//! These tests validate the streaming endpoint end to end: a paper is
//! analyzed through the REST API, sent back over the socket, and the
//! per-question events are read until the server closes the connection.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{spawn_app, spawn_gemini, test_config, MockGemini, PDF_BYTES};
use futures::{SinkExt, StreamExt};
use qpa_orchestrator::Config;
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;

/// Helper type for WebSocket client
type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the client observed on one connection.
#[derive(Debug, Default)]
struct Transcript {
    events: Vec<Value>,
    pings: usize,
    closed_by_server: bool,
}

impl Transcript {
    fn of_type(&self, kind: &str) -> Vec<&Value> {
        self.events.iter().filter(|e| e["type"] == kind).collect()
    }
}

async fn start(mock: MockGemini, configure: impl FnOnce(&mut Config)) -> (String, Arc<MockGemini>) {
    let mock = Arc::new(mock);
    let gemini_url = spawn_gemini(Arc::clone(&mock)).await;
    let mut config = test_config(&gemini_url);
    configure(&mut config);
    let addr = spawn_app(config).await;
    (addr, mock)
}

/// Connects a WebSocket client to the rubric stream.
async fn connect_client(addr: &str) -> WsClient {
    let url = format!("ws://{addr}/api/v1/ws/rubric-generation");
    let (ws_stream, _) = connect_async(url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

/// Runs enhanced extraction over HTTP and returns the response body.
async fn analyze(addr: &str) -> Value {
    let part = Part::bytes(PDF_BYTES)
        .file_name("paper.pdf")
        .mime_str("application/pdf")
        .expect("Invalid mime type");
    reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/upload-enhanced"))
        .multipart(Form::new().part("file", part))
        .send()
        .await
        .expect("Upload failed")
        .json()
        .await
        .expect("Body is not JSON")
}

/// Reads until the server closes the connection or the stream ends.
async fn read_until_closed(client: &mut WsClient) -> Transcript {
    let mut transcript = Transcript::default();
    loop {
        let next = timeout(Duration::from_secs(10), client.next())
            .await
            .expect("Timeout waiting for message");
        match next {
            Some(Ok(Message::Text(text))) => {
                transcript
                    .events
                    .push(serde_json::from_str(&text).expect("Failed to parse event"));
            }
            Some(Ok(Message::Ping(_))) => transcript.pings += 1,
            Some(Ok(Message::Close(_))) => {
                transcript.closed_by_server = true;
                return transcript;
            }
            Some(Ok(_)) => {}
            Some(Err(_)) | None => return transcript,
        }
    }
}

/// Receives the next text message as JSON, skipping control frames.
async fn receive_event(client: &mut WsClient) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("Failed to parse event");
        }
    }
}

// ============================================================================
// Streaming
// ============================================================================

#[tokio::test]
async fn test_full_stream_from_uploaded_paper() {
    let (addr, mock) = start(MockGemini::default(), |c| c.rubric.worker_count = 2).await;
    let analysis = analyze(&addr).await;
    assert_eq!(analysis["success"], true, "analysis: {analysis}");
    let extraction_calls = mock.generate_calls.load(Ordering::SeqCst);

    let mut client = connect_client(&addr).await;
    let request = json!({
        "enhanced_api_response": analysis,
        "user_preferences": {"subject_hint": "Biology", "quality_mode": "fast"}
    });
    client
        .send(Message::Text(request.to_string()))
        .await
        .expect("Failed to send request");

    let transcript = read_until_closed(&mut client).await;
    assert!(transcript.closed_by_server);

    let first = &transcript.events[0];
    assert_eq!(first["type"], "progress");
    assert_eq!(first["data"]["status"], "started");

    let parsed = &transcript.events[1];
    assert_eq!(parsed["data"]["status"], "parsing_complete");
    assert_eq!(parsed["data"]["total_questions"], 3);

    let completes = transcript.of_type("question_complete");
    assert_eq!(completes.len(), 3);
    let mut ids: Vec<&str> = completes
        .iter()
        .filter_map(|e| e["data"]["result"]["question_metadata"]["question_id"].as_str())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, ["q_1", "q_2", "q_3"]);
    for event in &completes {
        let result = &event["data"]["result"];
        assert_eq!(result["processing_status"], "completed");
        assert_eq!(result["classification"]["subject"], "Biology");
        assert!(result["rubric"]["criteria"].as_array().is_some_and(|c| !c.is_empty()));
    }
    assert!(transcript.of_type("error").is_empty());

    let last = transcript.events.last().expect("no events");
    assert_eq!(last["type"], "final_summary");
    assert_eq!(last["data"]["summary"]["total_questions_processed"], 3);
    assert_eq!(last["data"]["summary"]["successful_generations"], 3);
    assert_eq!(last["data"]["summary"]["failed_generations"], 0);
    assert_eq!(last["data"]["summary"]["timed_out"], false);

    // Classification, rubric and answer key for each question.
    assert_eq!(
        mock.generate_calls.load(Ordering::SeqCst) - extraction_calls,
        9
    );
    let prompts = mock.prompts();
    assert!(prompts
        .iter()
        .any(|p| p.contains("Classify this question") && p.contains("Subject: Biology")));
}

#[tokio::test]
async fn test_completed_counter_reaches_total() {
    let (addr, _mock) = start(MockGemini::default(), |c| c.rubric.worker_count = 3).await;
    let analysis = analyze(&addr).await;

    let mut client = connect_client(&addr).await;
    let request = json!({"enhanced_api_response": analysis["data"]});
    client
        .send(Message::Text(request.to_string()))
        .await
        .expect("Failed to send request");

    let transcript = read_until_closed(&mut client).await;
    let mut completed: Vec<u64> = transcript
        .of_type("question_complete")
        .iter()
        .filter_map(|e| e["data"]["completed"].as_u64())
        .collect();
    completed.sort_unstable();
    assert_eq!(completed, [1, 2, 3]);
    assert!(transcript
        .of_type("question_complete")
        .iter()
        .all(|e| e["data"]["total_questions"] == 3));
}

#[tokio::test]
async fn test_invalid_request_gets_one_error_then_close() {
    let (addr, mock) = start(MockGemini::default(), |_| {}).await;
    let mut client = connect_client(&addr).await;

    client
        .send(Message::Text("{not json".to_string()))
        .await
        .expect("Failed to send request");

    let transcript = read_until_closed(&mut client).await;
    assert!(transcript.closed_by_server);
    assert_eq!(transcript.events.len(), 1);
    assert_eq!(transcript.events[0]["type"], "error");
    assert!(transcript.events[0]["data"]["message"]
        .as_str()
        .unwrap_or_default()
        .starts_with("Invalid request"));
    assert_eq!(mock.generate_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_paper_without_content_reports_no_valid_questions() {
    let (addr, _mock) = start(MockGemini::default(), |_| {}).await;
    let mut client = connect_client(&addr).await;

    let request = json!({
        "enhanced_api_response": {
            "sections": [{"name": "A", "questions": [{"number": "1", "marks": 2, "content": {"text": ""}}]}]
        }
    });
    client
        .send(Message::Text(request.to_string()))
        .await
        .expect("Failed to send request");

    let transcript = read_until_closed(&mut client).await;
    let errors = transcript.of_type("error");
    assert_eq!(errors.len(), 1);
    assert!(errors[0]["data"]["message"]
        .as_str()
        .unwrap_or_default()
        .contains("No valid questions"));
    assert!(transcript.of_type("final_summary").is_empty());
}

// ============================================================================
// Connection lifecycle
// ============================================================================

#[tokio::test]
async fn test_client_close_cancels_job() {
    let (addr, mock) = start(
        MockGemini {
            delay: Duration::from_millis(200),
            ..MockGemini::default()
        },
        |c| c.rubric.worker_count = 1,
    )
    .await;
    let analysis = analyze(&addr).await;
    let extraction_calls = mock.generate_calls.load(Ordering::SeqCst);

    let mut client = connect_client(&addr).await;
    client
        .send(Message::Text(
            json!({"enhanced_api_response": analysis}).to_string(),
        ))
        .await
        .expect("Failed to send request");

    // Wait until the first question is being worked on, then leave.
    loop {
        let event = receive_event(&mut client).await;
        if event["data"]["status"] == "processing" {
            break;
        }
    }
    client.close(None).await.expect("Failed to close");

    tokio::time::sleep(Duration::from_millis(800)).await;
    let after_close = mock.generate_calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(800)).await;
    let later = mock.generate_calls.load(Ordering::SeqCst);

    assert_eq!(after_close, later, "job kept calling the model after close");
    assert!(later - extraction_calls < 9);
}

#[tokio::test]
async fn test_idle_connection_times_out() {
    let (addr, _mock) = start(MockGemini::default(), |c| c.websocket.idle_timeout_secs = 1).await;
    let mut client = connect_client(&addr).await;

    let transcript = read_until_closed(&mut client).await;
    assert!(transcript.closed_by_server);
    assert_eq!(transcript.events.len(), 1);
    assert_eq!(transcript.events[0]["type"], "error");
    assert!(transcript.events[0]["data"]["message"]
        .as_str()
        .unwrap_or_default()
        .contains("timed out"));
}

#[tokio::test]
async fn test_heartbeat_pings_during_long_job() {
    let (addr, _mock) = start(
        MockGemini {
            delay: Duration::from_millis(400),
            ..MockGemini::default()
        },
        |c| {
            c.rubric.worker_count = 1;
            c.websocket.heartbeat_secs = 1;
        },
    )
    .await;
    let analysis = analyze(&addr).await;

    let mut client = connect_client(&addr).await;
    client
        .send(Message::Text(
            json!({"enhanced_api_response": analysis}).to_string(),
        ))
        .await
        .expect("Failed to send request");

    // Three questions at three 400ms calls each outlast several heartbeats;
    // the client answers pings automatically, so the job runs to the end.
    let transcript = read_until_closed(&mut client).await;
    assert!(transcript.pings >= 2, "pings: {}", transcript.pings);
    assert_eq!(
        transcript.events.last().map(|e| e["type"].clone()),
        Some(json!("final_summary"))
    );
}

#[tokio::test]
async fn test_connection_limit_refuses_upgrade() {
    let (addr, _mock) = start(MockGemini::default(), |c| c.websocket.max_connections = 1).await;

    let _first = connect_client(&addr).await;
    let url = format!("ws://{addr}/api/v1/ws/rubric-generation");
    let second = connect_async(url).await;

    match second {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 503),
        other => assert!(other.is_err(), "second connection was accepted"),
    }
}

#[tokio::test]
async fn test_disabled_rubric_generation_refuses_upgrade() {
    let (addr, _mock) = start(MockGemini::default(), |c| {
        c.features.rubric_generation = false;
    })
    .await;

    let url = format!("ws://{addr}/api/v1/ws/rubric-generation");
    let result = connect_async(url).await;
    assert!(matches!(
        result,
        Err(tungstenite::Error::Http(ref response)) if response.status() == 503
    ));
}
