//! AI-assisted structuring with defensive validation.
//!
//! Sends OCR text and candidate fields to the structuring collaborator,
//! parses the reply as an [`InvoiceDraft`], and enforces every schema and
//! arithmetic invariant before trusting it. Transient service failures are
//! retried with exponential backoff; validation failures are not — they
//! fall back to a lenient, review-flagged record so the document is never
//! discarded.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::client::{StructuringClient, StructuringError};
use crate::config::RetryConfig;
use crate::models::{ExtractedField, FieldKind, InvoiceDraft, InvoiceRecord, SchemaViolation};

/// Maximum OCR characters forwarded in the structuring request.
const MAX_OCR_CHARS: usize = 12_000;

/// Portion of the OCR text used for the coherence check.
const SIMILARITY_OCR_CHARS: usize = 1_000;

/// System instructions for the structuring call. `{vat_rate}` is filled
/// from configuration.
const VALIDATION_PROMPT: &str = r#"You are an expert accountant specializing in the analysis and validation of Italian invoices.

Your task:
1. Analyze the OCR text extracted from an invoice
2. Validate and correct the automatically extracted fields
3. Identify inconsistencies or errors
4. Return structured data as JSON

VALIDATION RULES:

**Invoice number:**
- Must be present and unique
- Typical format: progressive number with year (e.g. 2024/001, FT-2024-123)

**Dates:**
- ISO format: YYYY-MM-DD
- The invoice date must be valid and not in the future
- The due date must come after the invoice date

**VAT ids:**
- Exactly 11 digits, numbers only; remove spaces and separators

**Amounts:**
- subtotal: pre-VAT amount
- vat_amount: must equal subtotal * vat_rate
- total_amount: must equal subtotal + vat_amount
- Standard Italian VAT rate: {vat_rate}
- Rounding tolerance: ±0.01

**Required JSON output:**
{
  "invoice_number": "string",
  "invoice_date": "YYYY-MM-DD",
  "supplier_name": "string",
  "supplier_vat": "11 digits",
  "customer_name": "string",
  "customer_vat": "11 digits",
  "subtotal": float,
  "vat_rate": float,
  "vat_amount": float,
  "total_amount": float,
  "line_items": [
    {"description": "string", "quantity": int, "unit_price": float, "total": float}
  ],
  "payment_terms": "string (optional)",
  "due_date": "YYYY-MM-DD (optional)",
  "currency": "EUR",
  "confidence_score": float (0-1, your confidence in the validation),
  "validation_notes": ["list of notes or corrections applied"],
  "requires_manual_review": boolean (true when in significant doubt)
}

IMPORTANT:
- Use null for missing critical data
- If a value looks wrong but you are unsure, report it in validation_notes
- If confidence_score < 0.7, set requires_manual_review = true"#;

/// Structures and validates collaborator output into invoice records.
pub struct StructuringValidator {
    client: Arc<dyn StructuringClient>,
    retry: RetryConfig,
    vat_rate: f64,
}

impl StructuringValidator {
    pub fn new(client: Arc<dyn StructuringClient>, retry: RetryConfig, vat_rate: f64) -> Self {
        Self {
            client,
            retry,
            vat_rate,
        }
    }

    /// Structure the OCR output into a validated record.
    ///
    /// Fails with [`StructuringError`] only when the collaborator stays
    /// unreachable through every retry. A reply that fails schema or
    /// arithmetic validation still produces a record — lenient, flagged
    /// for manual review, with the violation appended to its notes.
    pub async fn validate(
        &self,
        ocr_text: &str,
        candidate_fields: &HashMap<FieldKind, ExtractedField>,
        ocr_confidence: f64,
    ) -> Result<InvoiceRecord, StructuringError> {
        info!("starting AI structuring validation");

        let system = VALIDATION_PROMPT.replace("{vat_rate}", &format!("{:.2}", self.vat_rate));
        let user = format_payload(ocr_text, candidate_fields);

        let raw = self.call_with_retry(&system, &user).await?;
        Ok(self.parse_response(&raw, ocr_confidence))
    }

    /// Ask the collaborator how coherent the structured record is with the
    /// first portion of the OCR text (0..1). An unparseable score defaults
    /// to the conservative mid-point 0.5, not a silent success.
    pub async fn semantic_similarity(
        &self,
        ocr_text: &str,
        record: &InvoiceRecord,
    ) -> Result<f64, StructuringError> {
        let prompt = format!(
            "Compare the original OCR text with the extracted data and rate their coherence.\n\n\
             ORIGINAL TEXT:\n{}\n\n\
             EXTRACTED DATA:\n\
             Number: {}\n\
             Date: {}\n\
             Supplier: {}\n\
             Customer: {}\n\
             Total: {} {:.2}\n\n\
             Reply with a coherence score from 0 to 1, where:\n\
             - 1.0 = data fully consistent with the text\n\
             - 0.5 = some minor discrepancies\n\
             - 0.0 = data completely inconsistent\n\n\
             Return ONLY the number (e.g. 0.85)",
            truncate_utf8(ocr_text, SIMILARITY_OCR_CHARS),
            record.invoice_number,
            record
                .invoice_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            record.supplier.name,
            record.customer.name,
            record.currency,
            record.total_amount,
        );

        let raw = self.client.complete("", &prompt).await?;
        let score = match raw.trim().parse::<f64>() {
            Ok(v) => v.clamp(0.0, 1.0),
            Err(_) => {
                warn!(reply = %raw.trim(), "unparseable similarity score, defaulting to 0.5");
                0.5
            }
        };
        Ok(score)
    }

    /// Explicit retry loop: up to `max_attempts` calls, exponential backoff
    /// doubling from the base delay and capped, applied only to transient
    /// service failures.
    async fn call_with_retry(&self, system: &str, user: &str) -> Result<String, StructuringError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.client.complete(system, user).await {
                Ok(raw) => return Ok(raw),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "transient structuring failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Decode and validate the collaborator reply. Never fails: anything
    /// that does not validate becomes a lenient record flagged for review.
    fn parse_response(&self, raw: &str, ocr_confidence: f64) -> InvoiceRecord {
        let cleaned = strip_code_fences(raw);

        let draft: InvoiceDraft = match serde_json::from_str(cleaned) {
            Ok(draft) => draft,
            Err(e) => {
                warn!(error = %e, "structuring reply is not valid JSON");
                let violation = SchemaViolation {
                    field: "response",
                    expected: "a JSON object".to_string(),
                    actual: truncate_utf8(cleaned, 120).to_string(),
                };
                return InvoiceDraft::default().into_lenient(
                    ocr_confidence,
                    self.vat_rate,
                    &violation,
                );
            }
        };

        match draft.validate(ocr_confidence, self.vat_rate) {
            Ok(record) => {
                debug!(
                    invoice_number = %record.invoice_number,
                    ai_score = record.ai_validation_score,
                    "structuring reply validated"
                );
                record
            }
            Err(violation) => {
                warn!(%violation, "schema validation failed, falling back to lenient record");
                draft.into_lenient(ocr_confidence, self.vat_rate, &violation)
            }
        }
    }
}

/// Format the user payload: bounded OCR text plus the candidate fields as
/// a JSON object keyed by field kind.
fn format_payload(ocr_text: &str, fields: &HashMap<FieldKind, ExtractedField>) -> String {
    let candidates: serde_json::Map<String, serde_json::Value> = fields
        .iter()
        .map(|(kind, field)| {
            (
                kind.as_str().to_string(),
                serde_json::Value::String(field.value.clone()),
            )
        })
        .collect();
    let candidates =
        serde_json::to_string_pretty(&candidates).unwrap_or_else(|_| "{}".to_string());

    format!(
        "Validate this invoice extracted via OCR.\n\n\
         FULL OCR TEXT:\n{}\n\n\
         AUTOMATICALLY EXTRACTED FIELDS:\n{}\n\n\
         Analyze the text, validate the extracted fields, correct any errors \
         and return the validated JSON.",
        truncate_utf8(ocr_text, MAX_OCR_CHARS),
        candidates
    )
}

/// Truncate at a char boundary at or before `max_bytes`.
fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Collaborators sometimes wrap JSON in markdown fences despite the JSON
/// response format; strip them before decoding.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    /// Client that plays back a script of responses.
    struct ScriptedClient {
        script: Mutex<VecDeque<Result<String, StructuringError>>>,
        calls: AtomicU32,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<String, StructuringError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StructuringClient for ScriptedClient {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, StructuringError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(StructuringError::Parse("script exhausted".into())))
        }
    }

    fn valid_reply() -> String {
        r#"{
            "invoice_number": "2024/001",
            "invoice_date": "2024-03-15",
            "supplier_name": "ACME Srl",
            "supplier_vat": "12345678901",
            "customer_name": "Beta SpA",
            "customer_vat": "10987654321",
            "subtotal": 1000.0,
            "vat_rate": 0.22,
            "vat_amount": 220.0,
            "total_amount": 1220.0,
            "currency": "EUR",
            "confidence_score": 0.95
        }"#
        .to_string()
    }

    fn validator(client: Arc<ScriptedClient>) -> StructuringValidator {
        StructuringValidator::new(client, RetryConfig::default(), 0.22)
    }

    fn transient() -> StructuringError {
        StructuringError::Connection("connection reset".into())
    }

    #[tokio::test]
    async fn test_valid_reply_produces_clean_record() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(valid_reply())]));
        let record = validator(client.clone())
            .validate("Fattura n. 2024/001 ...", &HashMap::new(), 85.0)
            .await
            .unwrap();

        assert_eq!(record.invoice_number, "2024/001");
        assert!(!record.requires_manual_review());
        assert_eq!(record.ocr_confidence, 85.0);
        assert_eq!(record.ai_validation_score, 0.95);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_transient_failures_then_success() {
        let client = Arc::new(ScriptedClient::new(vec![
            Err(transient()),
            Err(transient()),
            Ok(valid_reply()),
        ]));
        let record = validator(client.clone())
            .validate("...", &HashMap::new(), 85.0)
            .await
            .unwrap();

        assert_eq!(client.calls(), 3);
        // Retries themselves leave no review flag behind.
        assert!(!record.requires_manual_review());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_surfaces_error() {
        let client = Arc::new(ScriptedClient::new(vec![
            Err(transient()),
            Err(transient()),
            Err(transient()),
        ]));
        let err = validator(client.clone())
            .validate("...", &HashMap::new(), 85.0)
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn test_non_transient_error_is_not_retried() {
        let client = Arc::new(ScriptedClient::new(vec![Err(StructuringError::Service {
            status: 401,
            body: "bad key".into(),
        })]));
        let result = validator(client.clone())
            .validate("...", &HashMap::new(), 85.0)
            .await;

        assert!(result.is_err());
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_schema_failure_falls_back_to_flagged_record() {
        // vat_amount does not match subtotal * vat_rate.
        let reply = valid_reply().replace("220.0,", "300.0,");
        let client = Arc::new(ScriptedClient::new(vec![Ok(reply)]));
        let record = validator(client.clone())
            .validate("...", &HashMap::new(), 85.0)
            .await
            .unwrap();

        assert!(record.requires_manual_review());
        assert!(record
            .validation_notes()
            .iter()
            .any(|n| n.contains("vat_amount")));
        // Schema failures are not retried.
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_garbage_reply_falls_back_to_flagged_record() {
        let client = Arc::new(ScriptedClient::new(vec![Ok("sorry, no JSON here".into())]));
        let record = validator(client)
            .validate("...", &HashMap::new(), 42.0)
            .await
            .unwrap();

        assert!(record.requires_manual_review());
        assert_eq!(record.ocr_confidence, 42.0);
    }

    #[tokio::test]
    async fn test_fenced_json_is_accepted() {
        let fenced = format!("```json\n{}\n```", valid_reply());
        let client = Arc::new(ScriptedClient::new(vec![Ok(fenced)]));
        let record = validator(client)
            .validate("...", &HashMap::new(), 85.0)
            .await
            .unwrap();
        assert!(!record.requires_manual_review());
    }

    #[tokio::test]
    async fn test_similarity_parses_score() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(valid_reply()), Ok("0.85".into())]));
        let v = validator(client);
        let record = v.validate("...", &HashMap::new(), 85.0).await.unwrap();
        let score = v.semantic_similarity("testo", &record).await.unwrap();
        assert!((score - 0.85).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_similarity_defaults_to_midpoint_on_parse_failure() {
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(valid_reply()),
            Ok("the data looks consistent".into()),
        ]));
        let v = validator(client);
        let record = v.validate("...", &HashMap::new(), 85.0).await.unwrap();
        let score = v.semantic_similarity("testo", &record).await.unwrap();
        assert_eq!(score, 0.5);
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn test_payload_is_bounded() {
        let huge = "x".repeat(MAX_OCR_CHARS * 2);
        let payload = format_payload(&huge, &HashMap::new());
        assert!(payload.len() < MAX_OCR_CHARS + 500);
    }
}
