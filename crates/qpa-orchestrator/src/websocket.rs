//! WebSocket endpoint streaming rubric generation.
//!
//! One connection runs one job. The client sends a single request message
//! (`{"enhanced_api_response": ..., "user_preferences": ...}`) and receives
//! `progress`, `question_complete` and `error` messages as questions are
//! processed, then a `final_summary`, after which the server closes the
//! socket. Closing the socket early cancels the job.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

use crate::api::{ApiError, AppState};
use crate::error::QpaError;
use crate::reporter::run_rubric_job;
use crate::stream::{CancelFlag, StreamEvent};

/// Maximum number of missed pong responses before disconnecting.
const MAX_MISSED_PONGS: u8 = 3;

/// Upgrade handler for `/ws/rubric-generation`.
///
/// Refuses the upgrade with 503 when rubric generation is disabled or the
/// connection limit is reached.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    if !state.config.features.rubric_generation {
        return ApiError::Unavailable("Rubric generation is not enabled".to_string())
            .into_response();
    }
    let Ok(permit) = Arc::clone(&state.connections).try_acquire_owned() else {
        warn!(
            limit = state.config.websocket.max_connections,
            "Rejecting rubric stream, connection limit reached"
        );
        return ApiError::Unavailable("Too many rubric generation connections".to_string())
            .into_response();
    };

    info!("New rubric stream connection");
    ws.on_upgrade(move |socket| handle_socket(socket, state, permit))
}

type Sender = SplitSink<WebSocket, Message>;
type Receiver = SplitStream<WebSocket>;

async fn send_event(sender: &mut Sender, event: &StreamEvent) -> bool {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(json)).await.is_ok()
}

/// Waits for the client's request text, answering pings meanwhile.
async fn next_request(sender: &mut Sender, receiver: &mut Receiver) -> Option<String> {
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => return Some(text),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => return Some(text),
                Err(_) => debug!("Ignoring non-UTF-8 binary message"),
            },
            Ok(Message::Ping(data)) => {
                if sender.send(Message::Pong(data)).await.is_err() {
                    return None;
                }
            }
            Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) | Err(_) => return None,
        }
    }
    None
}

/// Handles a single streaming connection.
///
/// - Waits up to `idle_timeout_secs` for the request message
/// - Runs the job in its own task and forwards its events
/// - Sends heartbeat pings and closes after 3 missed pongs
/// - Cancels the job if the client goes away
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, _permit: OwnedSemaphorePermit) {
    let (mut sender, mut receiver) = socket.split();
    let settings = state.config.websocket;

    let idle = Duration::from_secs(settings.idle_timeout_secs);
    let raw = match timeout(idle, next_request(&mut sender, &mut receiver)).await {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            debug!("Client left before sending a request");
            return;
        }
        Err(_) => {
            info!(
                timeout_secs = settings.idle_timeout_secs,
                "No rubric request received, closing connection"
            );
            let event = StreamEvent::request_error("Connection timed out waiting for a request");
            let _ = send_event(&mut sender, &event).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    let (tx, mut events) = mpsc::unbounded_channel::<StreamEvent>();
    let cancel = CancelFlag::new();
    let job = {
        let gateway = state.gateway.clone();
        let rubric = state.config.rubric;
        let cancel = cancel.clone();
        tokio::spawn(async move {
            run_rubric_job(gateway, &rubric, &raw, Arc::new(tx), cancel).await
        })
    };

    let mut heartbeat_interval = interval(Duration::from_secs(settings.heartbeat_secs.max(1)));
    let mut missed_pongs = 0u8;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        missed_pongs = 0;
                        debug!("Received pong from client");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            cancel.cancel();
                            break;
                        }
                    }
                    Some(Ok(Message::Text(_) | Message::Binary(_))) => {
                        debug!("Ignoring message, a job is already running on this connection");
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client closed the stream, cancelling job");
                        cancel.cancel();
                        break;
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        cancel.cancel();
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        cancel.cancel();
                        break;
                    }
                }
            }

            event = events.recv() => {
                let Some(event) = event else {
                    // Job ended without a summary: rejected request or cancellation.
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                };
                if !send_event(&mut sender, &event).await {
                    debug!("Failed to send event, client disconnected");
                    cancel.cancel();
                    break;
                }
                if event.is_terminal() {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }

            _ = heartbeat_interval.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    cancel.cancel();
                    break;
                }
                missed_pongs += 1;
                if missed_pongs >= MAX_MISSED_PONGS {
                    info!("Client missed {} pongs, closing connection", MAX_MISSED_PONGS);
                    cancel.cancel();
                    break;
                }
            }
        }
    }

    drop(events);
    match job.await {
        Ok(Ok(summary)) => info!(
            processed = summary.total_questions_processed,
            "Rubric stream finished"
        ),
        Ok(Err(QpaError::Cancelled)) => info!("Rubric stream cancelled"),
        Ok(Err(e)) => debug!(error = %e, "Rubric stream rejected"),
        Err(e) => warn!(error = %e, "Rubric job task failed"),
    }
}
