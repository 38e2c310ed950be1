//! Pipeline configuration.
//!
//! All components receive an immutable config value at construction time;
//! there is no process-wide settings singleton. Loading (env, TOML, etc.) is
//! the embedding application's concern — this module only defines the values
//! and their defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// OCR engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrSettings {
    /// Tesseract language setting (e.g. "ita+eng").
    #[serde(default = "default_language")]
    pub language: String,
    /// Rendering resolution for PDF pages, in DPI.
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    /// Tesseract page segmentation mode. 6 = assume a uniform block of text.
    #[serde(default = "default_psm")]
    pub psm: u32,
}

fn default_language() -> String {
    "ita+eng".to_string()
}
fn default_dpi() -> u32 {
    300
}
fn default_psm() -> u32 {
    6
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            language: default_language(),
            dpi: default_dpi(),
            psm: default_psm(),
        }
    }
}

/// Structuring collaborator (chat-completions service) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuringConfig {
    /// Service endpoint, e.g. "https://myorg.openai.azure.com".
    pub endpoint: String,
    /// API key sent in the `api-key` header.
    pub api_key: String,
    /// Deployment (model) name.
    #[serde(default = "default_deployment")]
    pub deployment: String,
    /// API version query parameter.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Maximum tokens in the structuring response.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature. Low keeps extraction deterministic.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_deployment() -> String {
    "gpt-4".to_string()
}
fn default_api_version() -> String {
    "2024-02-15-preview".to_string()
}
fn default_max_tokens() -> u32 {
    2000
}
fn default_temperature() -> f32 {
    0.1
}
fn default_request_timeout_secs() -> u64 {
    60
}

impl StructuringConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            deployment: default_deployment(),
            api_version: default_api_version(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    pub fn with_deployment(mut self, deployment: &str) -> Self {
        self.deployment = deployment.to_string();
        self
    }
}

/// Business rule thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Default VAT rate used when the collaborator omits one (Italian standard).
    #[serde(default = "default_vat_rate")]
    pub vat_rate: f64,
    /// Invoices above this total always require a human.
    #[serde(default = "default_auto_approve_threshold")]
    pub auto_approve_threshold: f64,
    /// Hard upper bound on plausible invoice totals.
    #[serde(default = "default_max_invoice_amount")]
    pub max_invoice_amount: f64,
    /// Minimum acceptable mean OCR confidence (0..100).
    #[serde(default = "default_ocr_confidence_threshold")]
    pub ocr_confidence_threshold: f64,
}

fn default_vat_rate() -> f64 {
    0.22
}
fn default_auto_approve_threshold() -> f64 {
    5000.0
}
fn default_max_invoice_amount() -> f64 {
    100_000.0
}
fn default_ocr_confidence_threshold() -> f64 {
    70.0
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            vat_rate: default_vat_rate(),
            auto_approve_threshold: default_auto_approve_threshold(),
            max_invoice_amount: default_max_invoice_amount(),
            ocr_confidence_threshold: default_ocr_confidence_threshold(),
        }
    }
}

/// Retry policy for the structuring call. Applies only to transient service
/// failures, never to schema validation failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each attempt.
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
    /// Upper bound on a single backoff sleep.
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_secs() -> u64 {
    2
}
fn default_max_delay_secs() -> u64 {
    10
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

impl RetryConfig {
    /// Backoff before retrying after `attempt` (1-based) failed attempts.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let secs = self
            .base_delay_secs
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_secs);
        Duration::from_secs(secs)
    }
}

/// Batch execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Number of documents processed concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Wall-clock bound on a single document's processing.
    #[serde(default = "default_document_timeout_secs")]
    pub document_timeout_secs: u64,
}

fn default_workers() -> usize {
    3
}
fn default_document_timeout_secs() -> u64 {
    120
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            document_timeout_secs: default_document_timeout_secs(),
        }
    }
}

impl BatchConfig {
    pub fn document_timeout(&self) -> Duration {
        Duration::from_secs(self.document_timeout_secs)
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub ocr: OcrSettings,
    pub structuring: StructuringConfig,
    #[serde(default)]
    pub rules: RuleConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

impl PipelineConfig {
    /// Build a config with defaults everywhere except the structuring service
    /// credentials, which have no sensible default.
    pub fn new(structuring: StructuringConfig) -> Self {
        Self {
            ocr: OcrSettings::default(),
            structuring,
            rules: RuleConfig::default(),
            retry: RetryConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}
