//! Configuration types for the question paper analyzer.
//!
//! Configuration is read once at startup from `qpa.json` (optional), overlaid
//! with environment variables, validated, and then shared immutably with the
//! pipeline, the worker pool and the HTTP layer.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QpaError, Result};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "qpa.json";

/// Upper bound on rubric workers; beyond this the provider throttles anyway.
const MAX_WORKER_COUNT: usize = 32;

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

const fn default_temperature() -> f32 {
    0.1
}

const fn default_request_timeout() -> u64 {
    120
}

const fn default_max_file_size_mb() -> u64 {
    20
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    2000
}

const fn default_max_delay_ms() -> u64 {
    10_000
}

const fn default_poll_interval_ms() -> u64 {
    2000
}

const fn default_ready_timeout() -> u64 {
    120
}

const fn default_worker_count() -> usize {
    4
}

const fn default_rubric_timeout() -> u64 {
    300
}

const fn default_heartbeat() -> u64 {
    30
}

const fn default_idle_timeout() -> u64 {
    300
}

const fn default_max_connections() -> usize {
    10
}

const fn default_true() -> bool {
    true
}

/// Main configuration for the analyzer service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// AI provider settings.
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Largest accepted upload, in megabytes.
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,

    /// Retry policy for transient provider failures.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Provider-side document readiness polling.
    #[serde(default)]
    pub upload: UploadConfig,

    /// Feature switches.
    #[serde(default)]
    pub features: FeatureFlags,

    /// Rubric worker pool settings.
    #[serde(default)]
    pub rubric: RubricConfig,

    /// Streaming endpoint settings.
    #[serde(default)]
    pub websocket: WebSocketConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini: GeminiConfig::default(),
            max_file_size_mb: default_max_file_size_mb(),
            retry: RetryPolicy::default(),
            upload: UploadConfig::default(),
            features: FeatureFlags::default(),
            rubric: RubricConfig::default(),
            websocket: WebSocketConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `qpa.json` in the current directory and falls back to
    /// defaults when it is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            QpaError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `qpa.json` in a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `QpaError::ConfigParseError` if the file cannot be read or
    /// decoded, and `QpaError::ConfigValidationError` if a value is out of
    /// range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(QpaError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| QpaError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Overlays process environment variables onto this configuration.
    ///
    /// # Errors
    ///
    /// Returns `QpaError::ConfigValidationError` if a variable is set to a
    /// value that cannot be parsed.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Overlays values from an arbitrary lookup (used for testing).
    ///
    /// # Errors
    ///
    /// Returns `QpaError::ConfigValidationError` if a value cannot be parsed.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("GEMINI_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.gemini.api_key = Some(key);
        }
        if let Some(model) = lookup("GEMINI_MODEL") {
            self.gemini.model = model;
        }
        if let Some(v) = lookup("MAX_FILE_SIZE_MB") {
            self.max_file_size_mb = parse_env("MAX_FILE_SIZE_MB", &v)?;
        }
        if let Some(v) = lookup("RUBRIC_WORKER_COUNT") {
            self.rubric.worker_count = parse_env("RUBRIC_WORKER_COUNT", &v)?;
        }
        if let Some(v) = lookup("RUBRIC_TIMEOUT_SECONDS") {
            self.rubric.timeout_seconds = parse_env("RUBRIC_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = lookup("RUBRIC_QUALITY_MODE") {
            self.rubric.quality_mode = QualityMode::from_str_case_insensitive(&v)
                .ok_or_else(|| {
                    QpaError::config_validation(
                        format!("RUBRIC_QUALITY_MODE has invalid value '{v}'"),
                        "Use one of 'high', 'balanced', 'fast'",
                    )
                })?;
        }
        if let Some(v) = lookup("ENABLE_ENHANCED_EXTRACTION") {
            self.features.enhanced_extraction = parse_flag("ENABLE_ENHANCED_EXTRACTION", &v)?;
        }
        if let Some(v) = lookup("ENABLE_RUBRIC_GENERATION") {
            self.features.rubric_generation = parse_flag("ENABLE_RUBRIC_GENERATION", &v)?;
        }
        Ok(self)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `QpaError::ConfigValidationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        if self.gemini.model.trim().is_empty() {
            return Err(QpaError::config_validation(
                "gemini.model must not be empty",
                "Set gemini.model in your qpa.json (e.g. \"gemini-2.5-flash\")",
            ));
        }

        if self.gemini.base_url.trim().is_empty() {
            return Err(QpaError::config_validation(
                "gemini.baseUrl must not be empty",
                "Remove gemini.baseUrl from your qpa.json to use the public endpoint",
            ));
        }

        if !(0.0..=2.0).contains(&self.gemini.temperature) {
            return Err(QpaError::config_validation(
                format!(
                    "gemini.temperature must be between 0 and 2 (got {})",
                    self.gemini.temperature
                ),
                "Set gemini.temperature to a value such as 0.1 in your qpa.json",
            ));
        }

        if self.max_file_size_mb == 0 {
            return Err(QpaError::config_validation(
                "maxFileSizeMb must be greater than 0",
                "Set maxFileSizeMb to at least 1 in your qpa.json",
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(QpaError::config_validation(
                "retry.maxAttempts must be greater than 0",
                "Set retry.maxAttempts to at least 1 in your qpa.json",
            ));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(QpaError::config_validation(
                "retry.baseDelayMs must not exceed retry.maxDelayMs",
                "Lower retry.baseDelayMs or raise retry.maxDelayMs in your qpa.json",
            ));
        }

        if self.upload.poll_interval_ms == 0 || self.upload.ready_timeout_secs == 0 {
            return Err(QpaError::config_validation(
                "upload.pollIntervalMs and upload.readyTimeoutSecs must be greater than 0",
                "Remove the upload section from your qpa.json to use the defaults",
            ));
        }

        if self.rubric.worker_count == 0 || self.rubric.worker_count > MAX_WORKER_COUNT {
            return Err(QpaError::config_validation(
                format!(
                    "rubric.workerCount must be between 1 and {MAX_WORKER_COUNT} (got {})",
                    self.rubric.worker_count
                ),
                "Set rubric.workerCount (or RUBRIC_WORKER_COUNT) to a value such as 4",
            ));
        }

        if self.rubric.timeout_seconds == 0 {
            return Err(QpaError::config_validation(
                "rubric.timeoutSeconds must be greater than 0",
                "Set rubric.timeoutSeconds to at least 1 second in your qpa.json",
            ));
        }

        if self.websocket.heartbeat_secs == 0
            || self.websocket.idle_timeout_secs == 0
            || self.websocket.max_connections == 0
        {
            return Err(QpaError::config_validation(
                "websocket.heartbeatSecs, websocket.idleTimeoutSecs and websocket.maxConnections must be greater than 0",
                "Remove the websocket section from your qpa.json to use the defaults",
            ));
        }

        Ok(())
    }

    /// Largest accepted upload, in bytes.
    #[must_use]
    pub const fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        QpaError::config_validation(
            format!("{key} has invalid value '{value}'"),
            format!("Set {key} to a positive integer"),
        )
    })
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(QpaError::config_validation(
            format!("{key} has invalid value '{value}'"),
            format!("Set {key} to 'true' or 'false'"),
        )),
    }
}

/// Google Gemini provider settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiConfig {
    /// API key. Usually supplied through `GEMINI_API_KEY`.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Model name used for every call.
    #[serde(default = "default_model")]
    pub model: String,

    /// Provider base URL, overridable for tests.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            base_url: default_base_url(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl GeminiConfig {
    /// Returns `true` when an API key is present.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

/// Exponential backoff policy for transient provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Ceiling for any single delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never waits, for tests.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay to wait after the given failed attempt (1-based):
    /// `min(base * 2^(attempt-1), max)`.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Provider-side document readiness polling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadConfig {
    /// Interval between state checks.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long to wait for the document to become ready.
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            ready_timeout_secs: default_ready_timeout(),
        }
    }
}

/// Feature switches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlags {
    /// Enables the two-stage enhanced extraction endpoint.
    #[serde(default = "default_true")]
    pub enhanced_extraction: bool,

    /// Enables the rubric streaming endpoint.
    #[serde(default = "default_true")]
    pub rubric_generation: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enhanced_extraction: true,
            rubric_generation: true,
        }
    }
}

/// Rubric worker pool settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricConfig {
    /// Number of concurrent workers.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Default quality mode when the request does not choose one.
    #[serde(default)]
    pub quality_mode: QualityMode,

    /// Wall-clock budget for one rubric job.
    #[serde(default = "default_rubric_timeout")]
    pub timeout_seconds: u64,

    /// What to do with questions that have no text or no marks.
    #[serde(default)]
    pub empty_content_policy: EmptyContentPolicy,
}

impl Default for RubricConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            quality_mode: QualityMode::default(),
            timeout_seconds: default_rubric_timeout(),
            empty_content_policy: EmptyContentPolicy::default(),
        }
    }
}

/// Streaming endpoint settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketConfig {
    /// Interval between server pings.
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,

    /// How long to wait for the client's request message.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Concurrent streaming connections allowed.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat(),
            idle_timeout_secs: default_idle_timeout(),
            max_connections: default_max_connections(),
        }
    }
}

/// Trade-off between rubric depth and speed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QualityMode {
    /// Detailed rubrics with more criteria.
    High,
    /// Default.
    #[default]
    Balanced,
    /// Fewer criteria, shorter prompts.
    Fast,
}

impl QualityMode {
    /// Parses a string into a `QualityMode`, case-insensitively.
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "high" => Some(Self::High),
            "balanced" => Some(Self::Balanced),
            "fast" => Some(Self::Fast),
            _ => None,
        }
    }

    /// Lowercase name used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Balanced => "balanced",
            Self::Fast => "fast",
        }
    }

    /// Maximum number of rubric criteria requested from the model.
    #[must_use]
    pub const fn criteria_budget(self) -> usize {
        match self {
            Self::High => 6,
            Self::Balanced => 4,
            Self::Fast => 3,
        }
    }
}

impl std::fmt::Display for QualityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for QualityMode {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid quality mode '{s}': expected one of 'high', 'balanced', 'fast'"
            ))
        })
    }
}

impl Serialize for QualityMode {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// Handling of questions that have no text or carry zero marks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmptyContentPolicy {
    /// Leave them out of the rubric job and count them as skipped (default).
    #[default]
    Skip,
    /// Queue them like any other question.
    Attempt,
}

impl EmptyContentPolicy {
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "skip" => Some(Self::Skip),
            "attempt" => Some(Self::Attempt),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for EmptyContentPolicy {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid empty content policy '{s}': expected 'skip' or 'attempt'"
            ))
        })
    }
}

impl Serialize for EmptyContentPolicy {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(match self {
            Self::Skip => "skip",
            Self::Attempt => "attempt",
        })
    }
}
