//! AI gateway: the single seam between the analyzer and the model provider.
//!
//! Providers implement [`AiGateway`]. The rest of the crate talks to a
//! [`Gateway`], which adds the retry policy for transient failures and the
//! upload-then-wait-until-ready handshake on top of any provider.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::{Config, RetryPolicy, UploadConfig};
use crate::error::{QpaError, Result};
use crate::paper::Document;
use crate::stream::CancelFlag;

/// What a gateway call is for. Carried for logging and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallPurpose {
    /// Uploading a document.
    Upload,
    /// Structure extraction.
    Structure,
    /// Content extraction for one section.
    Content,
    /// Question classification.
    Classification,
    /// Rubric generation.
    Rubric,
    /// Answer-key generation.
    AnswerKey,
}

impl std::fmt::Display for CallPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Upload => write!(f, "upload"),
            Self::Structure => write!(f, "structure"),
            Self::Content => write!(f, "content"),
            Self::Classification => write!(f, "classification"),
            Self::Rubric => write!(f, "rubric"),
            Self::AnswerKey => write!(f, "answer_key"),
        }
    }
}

/// Requested response format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Ask the provider for a JSON document.
    Json,
    /// Free text.
    Text,
}

/// Provider-side reference to an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentHandle {
    /// Provider resource name, e.g. `files/abc123`.
    pub name: String,
    /// URI used to reference the document in prompts.
    pub uri: String,
    /// MIME type of the document.
    pub mime_type: String,
}

/// Provider-side processing state of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    /// Still being processed.
    Processing,
    /// Ready to be referenced.
    Active,
    /// Rejected by the provider.
    Failed,
}

/// One prompt sent to the model.
#[derive(Debug, Clone)]
pub struct AiRequest {
    /// What the call is for.
    pub purpose: CallPurpose,
    /// Prompt text.
    pub prompt: String,
    /// Document the prompt refers to, if any.
    pub document: Option<DocumentHandle>,
    /// Requested response format.
    pub mode: ResponseMode,
}

impl AiRequest {
    /// A JSON-mode request, optionally referencing a document.
    #[must_use]
    pub fn json(
        purpose: CallPurpose,
        prompt: impl Into<String>,
        document: Option<&DocumentHandle>,
    ) -> Self {
        Self {
            purpose,
            prompt: prompt.into(),
            document: document.cloned(),
            mode: ResponseMode::Json,
        }
    }
}

/// A generative-AI provider.
///
/// Implementations map transport failures onto the gateway error variants:
/// network, authentication and 5xx errors become
/// [`QpaError::UpstreamUnavailable`], throttling becomes
/// [`QpaError::UpstreamRateLimited`], and empty or error payloads become
/// [`QpaError::UpstreamMalformed`]. They do not retry.
pub trait AiGateway: Send + Sync {
    /// Sends a prompt and returns the raw response text.
    fn invoke<'a>(&'a self, request: &'a AiRequest) -> BoxFuture<'a, Result<String>>;

    /// Uploads a document blob.
    fn upload<'a>(&'a self, document: &'a Document) -> BoxFuture<'a, Result<DocumentHandle>>;

    /// Reports the processing state of an uploaded document.
    fn document_state<'a>(
        &'a self,
        handle: &'a DocumentHandle,
    ) -> BoxFuture<'a, Result<DocumentState>>;

    /// Whether credentials are present.
    fn is_configured(&self) -> bool;

    /// Model identifier, for capability reporting.
    fn model(&self) -> &str;
}

/// Runs `op` until it succeeds, fails with a non-transient error, or the
/// policy's attempts are exhausted.
///
/// A set `cancel` flag stops the loop before the next attempt and before any
/// backoff sleep with `QpaError::Cancelled`.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    purpose: CallPurpose,
    cancel: Option<&CancelFlag>,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let cancelled = || cancel.is_some_and(CancelFlag::is_cancelled);
    let mut attempt = 1;
    loop {
        if cancelled() {
            debug!(%purpose, attempt, "Gateway call cancelled");
            return Err(QpaError::Cancelled);
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                if cancelled() {
                    debug!(%purpose, attempt, error = %e, "Gateway call cancelled, not retrying");
                    return Err(QpaError::Cancelled);
                }
                let delay = policy.delay_after(attempt);
                warn!(
                    %purpose,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "Transient gateway failure, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// A provider wrapped with retries and document readiness polling.
#[derive(Clone)]
pub struct Gateway {
    provider: Arc<dyn AiGateway>,
    retry: RetryPolicy,
    upload: UploadConfig,
    cancel: Option<CancelFlag>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("model", &self.provider.model())
            .field("retry", &self.retry)
            .field("upload", &self.upload)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Wraps a provider with the configured retry and upload policies.
    #[must_use]
    pub fn new(provider: Arc<dyn AiGateway>, config: &Config) -> Self {
        Self {
            provider,
            retry: config.retry,
            upload: config.upload,
            cancel: None,
        }
    }

    /// Wraps a provider with explicit policies.
    #[must_use]
    pub fn with_policies(
        provider: Arc<dyn AiGateway>,
        retry: RetryPolicy,
        upload: UploadConfig,
    ) -> Self {
        Self {
            provider,
            retry,
            upload,
            cancel: None,
        }
    }

    /// A copy of this gateway whose calls stop retrying once `cancel` is set.
    #[must_use]
    pub fn with_cancel(&self, cancel: CancelFlag) -> Self {
        Self {
            cancel: Some(cancel),
            ..self.clone()
        }
    }

    /// The underlying provider.
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn AiGateway> {
        &self.provider
    }

    /// Sends a request, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns the last gateway error once retries are exhausted, or the
    /// first non-transient one. Returns `QpaError::Cancelled` if the
    /// gateway's cancel flag is set before an attempt or a retry.
    pub async fn invoke(&self, request: &AiRequest) -> Result<String> {
        if !self.provider.is_configured() {
            return Err(QpaError::GatewayNotConfigured);
        }
        debug!(purpose = %request.purpose, prompt_len = request.prompt.len(), "Invoking model");
        with_retry(&self.retry, request.purpose, self.cancel.as_ref(), || {
            self.provider.invoke(request)
        })
        .await
    }

    /// Uploads a document and waits until the provider reports it ready.
    ///
    /// # Errors
    ///
    /// Returns `QpaError::UpstreamTimeout` if the document is still
    /// processing after the configured timeout, and
    /// `QpaError::UpstreamMalformed` if the provider marks it failed.
    pub async fn prepare(&self, document: &Document) -> Result<DocumentHandle> {
        if !self.provider.is_configured() {
            return Err(QpaError::GatewayNotConfigured);
        }

        let handle = with_retry(&self.retry, CallPurpose::Upload, self.cancel.as_ref(), || {
            self.provider.upload(document)
        })
        .await?;
        info!(
            file = %document.filename,
            size = document.size(),
            handle = %handle.name,
            "Document uploaded"
        );

        self.wait_until_ready(&handle).await?;
        Ok(handle)
    }

    async fn wait_until_ready(&self, handle: &DocumentHandle) -> Result<()> {
        let timeout = Duration::from_secs(self.upload.ready_timeout_secs);
        let interval = Duration::from_millis(self.upload.poll_interval_ms);
        let deadline = Instant::now() + timeout;

        loop {
            let state = with_retry(&self.retry, CallPurpose::Upload, self.cancel.as_ref(), || {
                self.provider.document_state(handle)
            })
            .await?;

            match state {
                DocumentState::Active => {
                    debug!(handle = %handle.name, "Document ready");
                    return Ok(());
                }
                DocumentState::Failed => {
                    return Err(QpaError::upstream_malformed(
                        CallPurpose::Upload,
                        format!("provider failed to process document '{}'", handle.name),
                    ));
                }
                DocumentState::Processing => {
                    if Instant::now() + interval > deadline {
                        return Err(QpaError::upstream_timeout(
                            handle.name.clone(),
                            self.upload.ready_timeout_secs,
                        ));
                    }
                    debug!(handle = %handle.name, "Document still processing");
                    sleep(interval).await;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use tokio_test::{assert_err, assert_ok};

    use super::*;

    /// Provider that replays scripted outcomes in order.
    struct Scripted {
        invocations: Mutex<Vec<Result<String>>>,
        states: Mutex<Vec<DocumentState>>,
        calls: AtomicUsize,
        configured: bool,
        cancel_on_call: Option<CancelFlag>,
    }

    impl Scripted {
        fn new(invocations: Vec<Result<String>>) -> Self {
            Self {
                invocations: Mutex::new(invocations),
                states: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                configured: true,
                cancel_on_call: None,
            }
        }
    }

    impl AiGateway for Scripted {
        fn invoke<'a>(&'a self, _request: &'a AiRequest) -> BoxFuture<'a, Result<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(flag) = &self.cancel_on_call {
                flag.cancel();
            }
            let next = self.invocations.lock().unwrap().remove(0);
            Box::pin(async move { next })
        }

        fn upload<'a>(&'a self, document: &'a Document) -> BoxFuture<'a, Result<DocumentHandle>> {
            Box::pin(async move {
                Ok(DocumentHandle {
                    name: format!("files/{}", document.filename),
                    uri: "mem://doc".to_string(),
                    mime_type: "application/pdf".to_string(),
                })
            })
        }

        fn document_state<'a>(
            &'a self,
            _handle: &'a DocumentHandle,
        ) -> BoxFuture<'a, Result<DocumentState>> {
            let mut states = self.states.lock().unwrap();
            let next = if states.len() > 1 {
                states.remove(0)
            } else {
                states.first().copied().unwrap_or(DocumentState::Active)
            };
            Box::pin(async move { Ok(next) })
        }

        fn is_configured(&self) -> bool {
            self.configured
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn gateway(provider: Arc<Scripted>, attempts: u32) -> Gateway {
        Gateway::with_policies(
            provider,
            RetryPolicy::immediate(attempts),
            UploadConfig {
                poll_interval_ms: 1,
                ready_timeout_secs: 1,
            },
        )
    }

    fn request() -> AiRequest {
        AiRequest::json(CallPurpose::Classification, "classify", None)
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let provider = Arc::new(Scripted::new(vec![
            Err(QpaError::upstream_unavailable("classification", "503")),
            Err(QpaError::upstream_rate_limited("classification", "429")),
            Ok("{}".to_string()),
        ]));
        let gw = gateway(Arc::clone(&provider), 3);

        let text = assert_ok!(gw.invoke(&request()).await);
        assert_eq!(text, "{}");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_stop_at_max_attempts() {
        let provider = Arc::new(Scripted::new(vec![
            Err(QpaError::upstream_unavailable("classification", "503")),
            Err(QpaError::upstream_unavailable("classification", "503")),
            Ok("never reached".to_string()),
        ]));
        let gw = gateway(Arc::clone(&provider), 2);

        let err = gw.invoke(&request()).await.unwrap_err();
        assert!(matches!(err, QpaError::UpstreamUnavailable { .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_malformed_is_not_retried() {
        let provider = Arc::new(Scripted::new(vec![
            Err(QpaError::upstream_malformed("classification", "no candidates")),
            Ok("{}".to_string()),
        ]));
        let gw = gateway(Arc::clone(&provider), 3);

        let err = gw.invoke(&request()).await.unwrap_err();
        assert!(matches!(err, QpaError::UpstreamMalformed { .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_call_stops_retries() {
        let cancel = CancelFlag::new();
        let mut scripted = Scripted::new(vec![
            Err(QpaError::upstream_rate_limited("classification", "429")),
            Ok("{}".to_string()),
        ]);
        scripted.cancel_on_call = Some(cancel.clone());
        let provider = Arc::new(scripted);
        let gw = gateway(Arc::clone(&provider), 5).with_cancel(cancel);

        let err = assert_err!(gw.invoke(&request()).await);
        assert!(matches!(err, QpaError::Cancelled));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_gateway_makes_no_call() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let provider = Arc::new(Scripted::new(vec![Ok("{}".to_string())]));
        let gw = gateway(Arc::clone(&provider), 3).with_cancel(cancel);

        let err = assert_err!(gw.invoke(&request()).await);
        assert!(matches!(err, QpaError::Cancelled));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);

        // The original gateway is unaffected.
        let plain = gateway(Arc::clone(&provider), 3);
        assert_ok!(plain.invoke(&request()).await);
    }

    #[tokio::test]
    async fn test_unconfigured_provider_is_rejected() {
        let mut scripted = Scripted::new(Vec::new());
        scripted.configured = false;
        let gw = gateway(Arc::new(scripted), 3);

        let err = assert_err!(gw.invoke(&request()).await);
        assert!(matches!(err, QpaError::GatewayNotConfigured));
    }

    #[tokio::test]
    async fn test_prepare_waits_for_active_state() {
        let provider = Arc::new(Scripted::new(Vec::new()));
        *provider.states.lock().unwrap() = vec![
            DocumentState::Processing,
            DocumentState::Processing,
            DocumentState::Active,
        ];
        let gw = gateway(Arc::clone(&provider), 3);
        let doc = Document::from_upload("paper.pdf", b"%PDF-1.4".to_vec(), 1024).unwrap();

        let handle = assert_ok!(gw.prepare(&doc).await);
        assert_eq!(handle.name, "files/paper.pdf");
    }

    #[tokio::test]
    async fn test_prepare_times_out_when_never_ready() {
        let provider = Arc::new(Scripted::new(Vec::new()));
        *provider.states.lock().unwrap() = vec![DocumentState::Processing];
        let gw = gateway(Arc::clone(&provider), 3);
        let doc = Document::from_upload("paper.pdf", b"%PDF-1.4".to_vec(), 1024).unwrap();

        let err = gw.prepare(&doc).await.unwrap_err();
        assert!(matches!(err, QpaError::UpstreamTimeout { .. }));
    }

    #[tokio::test]
    async fn test_prepare_fails_when_provider_rejects_document() {
        let provider = Arc::new(Scripted::new(Vec::new()));
        *provider.states.lock().unwrap() = vec![DocumentState::Failed];
        let gw = gateway(Arc::clone(&provider), 3);
        let doc = Document::from_upload("paper.pdf", b"%PDF-1.4".to_vec(), 1024).unwrap();

        let err = gw.prepare(&doc).await.unwrap_err();
        assert!(matches!(err, QpaError::UpstreamMalformed { .. }));
    }
}
