//! HTTP client for the Gemini REST API.

use std::time::Duration;

use futures::future::BoxFuture;
use qpa_orchestrator::{
    AiGateway, AiRequest, CallPurpose, Document, DocumentHandle, DocumentState, GeminiConfig,
    QpaError, ResponseMode,
};
use reqwest::{Client, Response};
use tracing::{debug, info, instrument};

use crate::wire::{
    Content, ErrorEnvelope, FileData, FileResource, GenerateContentRequest,
    GenerateContentResponse, GenerationConfig, Part, UploadResponse,
};
use crate::GeminiError;

const API_KEY_HEADER: &str = "x-goog-api-key";
const PDF_MIME: &str = "application/pdf";

/// Longest error body kept in an error message.
const MAX_ERROR_CHARS: usize = 500;

/// Gemini implementation of [`AiGateway`].
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use qpa_gemini::GeminiClient;
/// use qpa_orchestrator::{Config, Gateway};
///
/// # fn example() -> Result<(), qpa_gemini::GeminiError> {
/// let config = Config::default();
/// let client = GeminiClient::from_config(&config.gemini)?;
/// let gateway = Gateway::new(Arc::new(client), &config);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    temperature: f32,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    /// Builds a client from the `gemini` configuration section.
    ///
    /// A missing API key is allowed; calls then fail with
    /// `GatewayNotConfigured` and `/health` reports unhealthy.
    ///
    /// # Errors
    ///
    /// Returns `GeminiError::Transport` if the HTTP client cannot be built.
    pub fn from_config(config: &GeminiConfig) -> Result<Self, GeminiError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        let api_key = config
            .has_credentials()
            .then(|| config.api_key.clone())
            .flatten();
        debug!(model = %config.model, base_url = %config.base_url, "Gemini client ready");
        Ok(Self {
            http,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
        })
    }

    fn key(&self) -> Result<&str, GeminiError> {
        self.api_key.as_deref().ok_or(GeminiError::MissingApiKey)
    }

    /// Sends one prompt to `generateContent` and returns the text.
    ///
    /// # Errors
    ///
    /// Returns a [`GeminiError`] for transport failures, non-success
    /// statuses, blocked generations and empty responses.
    #[instrument(skip(self, request), fields(purpose = %request.purpose, model = %self.model))]
    pub async fn generate(&self, request: &AiRequest) -> Result<String, GeminiError> {
        let key = self.key()?;

        let mut parts = Vec::with_capacity(2);
        if let Some(document) = &request.document {
            parts.push(Part {
                file_data: Some(FileData {
                    mime_type: document.mime_type.clone(),
                    file_uri: document.uri.clone(),
                }),
                ..Part::default()
            });
        }
        parts.push(Part {
            text: Some(request.prompt.clone()),
            ..Part::default()
        });

        let body = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                response_mime_type: match request.mode {
                    ResponseMode::Json => Some("application/json"),
                    ResponseMode::Text => None,
                },
            },
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, key)
            .json(&body)
            .send()
            .await?;
        let response: GenerateContentResponse = check(response).await?.json().await?;
        let text = response.into_text()?;
        debug!(response_len = text.len(), "Gemini response received");
        Ok(text)
    }

    /// Uploads a document with the raw upload protocol.
    ///
    /// # Errors
    ///
    /// Returns a [`GeminiError`] for transport failures and non-success
    /// statuses.
    #[instrument(skip(self, document), fields(file = %document.filename, size = document.size()))]
    pub async fn upload_file(&self, document: &Document) -> Result<DocumentHandle, GeminiError> {
        let key = self.key()?;
        let url = format!("{}/upload/v1beta/files", self.base_url);
        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, key)
            .header("X-Goog-Upload-Protocol", "raw")
            .header(reqwest::header::CONTENT_TYPE, PDF_MIME)
            .body(document.content.clone())
            .send()
            .await?;
        let uploaded: UploadResponse = check(response).await?.json().await?;
        info!(name = %uploaded.file.name, "Uploaded document to Gemini");
        Ok(uploaded.file.into_handle(PDF_MIME))
    }

    /// Fetches the processing state of an uploaded file.
    ///
    /// # Errors
    ///
    /// Returns a [`GeminiError`] for transport failures and non-success
    /// statuses.
    #[instrument(skip(self, handle), fields(name = %handle.name))]
    pub async fn file_state(&self, handle: &DocumentHandle) -> Result<DocumentState, GeminiError> {
        let key = self.key()?;
        let url = format!("{}/v1beta/{}", self.base_url, handle.name);
        let response = self
            .http
            .get(url)
            .header(API_KEY_HEADER, key)
            .send()
            .await?;
        let file: FileResource = check(response).await?.json().await?;
        let state = file.document_state();
        debug!(state = ?state, "Polled document state");
        Ok(state)
    }
}

/// Passes successful responses through and turns the rest into
/// `GeminiError::Status`.
async fn check(response: Response) -> Result<Response, GeminiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);
    Err(GeminiError::Status {
        status: status.as_u16(),
        message: message.chars().take(MAX_ERROR_CHARS).collect(),
    })
}

impl AiGateway for GeminiClient {
    fn invoke<'a>(&'a self, request: &'a AiRequest) -> BoxFuture<'a, qpa_orchestrator::Result<String>> {
        Box::pin(async move {
            self.generate(request)
                .await
                .map_err(|e| e.into_qpa(request.purpose))
        })
    }

    fn upload<'a>(
        &'a self,
        document: &'a Document,
    ) -> BoxFuture<'a, qpa_orchestrator::Result<DocumentHandle>> {
        Box::pin(async move {
            self.upload_file(document)
                .await
                .map_err(|e| e.into_qpa(CallPurpose::Upload))
        })
    }

    fn document_state<'a>(
        &'a self,
        handle: &'a DocumentHandle,
    ) -> BoxFuture<'a, qpa_orchestrator::Result<DocumentState>> {
        Box::pin(async move {
            self.file_state(handle)
                .await
                .map_err(|e| e.into_qpa(CallPurpose::Upload))
        })
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn model(&self) -> &str {
        &self.model
    }
}
