//! Structured invoice record and its construction-time validation.
//!
//! The structuring collaborator returns untrusted free-form JSON. It is
//! parsed into the permissive [`InvoiceDraft`] first; [`InvoiceDraft::validate`]
//! then performs every schema and arithmetic check and only on success
//! produces an [`InvoiceRecord`]. Validation failures are values
//! ([`SchemaViolation`]), not exceptions — the caller decides whether to
//! reject or fall back to a flagged lenient record.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Arithmetic tolerance for VAT and total cross-checks, in currency units.
pub const AMOUNT_TOLERANCE: f64 = 0.01;

/// A schema or arithmetic violation found while validating collaborator
/// output. Names the offending field with expected vs. actual values.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{field}: expected {expected}, got {actual}")]
pub struct SchemaViolation {
    pub field: &'static str,
    pub expected: String,
    pub actual: String,
}

impl SchemaViolation {
    fn new(field: &'static str, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            field,
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// One invoice line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub unit_price: f64,
    #[serde(default)]
    pub total: f64,
}

/// Supplier or customer identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    /// Italian VAT id: exactly 11 digits on validated records, possibly
    /// empty on lenient fallback records.
    pub vat: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Append-only review accumulator.
///
/// `requires_manual_review` is monotonic within a pipeline run: [`flag`]
/// sets it, nothing clears it. Notes can only be appended. Gating stages
/// thread this through rather than mutating a shared list.
///
/// [`flag`]: ReviewTrail::flag
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewTrail {
    #[serde(rename = "validation_notes", default)]
    notes: Vec<String>,
    #[serde(rename = "requires_manual_review", default)]
    requires_review: bool,
}

impl ReviewTrail {
    pub(crate) fn from_parts(notes: Vec<String>, requires_review: bool) -> Self {
        Self {
            notes,
            requires_review,
        }
    }

    /// Mark the record for manual review with an explanatory note.
    pub fn flag(&mut self, note: impl Into<String>) {
        self.requires_review = true;
        self.notes.push(note.into());
    }

    /// Append a note without changing the review flag.
    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn requires_review(&self) -> bool {
        self.requires_review
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }
}

/// A validated (or lenient, review-flagged) invoice record.
///
/// Every record accepted without `requires_manual_review` satisfies:
/// `|vat_amount − subtotal·vat_rate| ≤ 0.01`,
/// `|total_amount − (subtotal + vat_amount)| ≤ 0.01`,
/// both VAT ids exactly 11 digits, subtotal and total positive.
/// Lenient fallback records may hold empty strings / zero amounts for
/// missing data, but are always flagged for review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub invoice_number: String,
    /// ISO 8601 date. `None` only on lenient fallback records.
    pub invoice_date: Option<NaiveDate>,
    pub supplier: Party,
    pub customer: Party,
    pub subtotal: f64,
    pub vat_rate: f64,
    pub vat_amount: f64,
    pub total_amount: f64,
    pub currency: String,
    pub line_items: Vec<LineItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_terms: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    /// Mean OCR confidence of the source text, 0..100.
    pub ocr_confidence: f64,
    /// Collaborator's self-reported confidence, 0..1.
    pub ai_validation_score: f64,
    #[serde(flatten)]
    pub review: ReviewTrail,
}

impl InvoiceRecord {
    /// Mark the record for manual review. Monotonic: once set, no later
    /// stage can clear it.
    pub fn flag_for_review(&mut self, note: impl Into<String>) {
        self.review.flag(note);
    }

    pub fn requires_manual_review(&self) -> bool {
        self.review.requires_review()
    }

    pub fn validation_notes(&self) -> &[String] {
        self.review.notes()
    }
}

/// Permissive decode target for the collaborator's JSON reply. Every field
/// is optional; strictness lives in [`validate`](Self::validate).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceDraft {
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>,
    pub supplier_name: Option<String>,
    pub supplier_vat: Option<String>,
    pub supplier_address: Option<String>,
    pub customer_name: Option<String>,
    pub customer_vat: Option<String>,
    pub customer_address: Option<String>,
    pub subtotal: Option<f64>,
    pub vat_rate: Option<f64>,
    pub vat_amount: Option<f64>,
    pub total_amount: Option<f64>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    pub payment_terms: Option<String>,
    pub due_date: Option<String>,
    pub currency: Option<String>,
    /// Collaborator's self-reported confidence (0..1).
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub validation_notes: Vec<String>,
    #[serde(default)]
    pub requires_manual_review: bool,
}

impl InvoiceDraft {
    /// Validate the draft into a record, rejecting at the first violating
    /// field. `default_vat_rate` fills a missing rate before the arithmetic
    /// cross-checks run.
    pub fn validate(
        &self,
        ocr_confidence: f64,
        default_vat_rate: f64,
    ) -> Result<InvoiceRecord, SchemaViolation> {
        let invoice_number = require_str("invoice_number", &self.invoice_number)?;
        let invoice_date = parse_iso_date("invoice_date", &self.invoice_date)?;

        let supplier = Party {
            name: require_str("supplier_name", &self.supplier_name)?,
            vat: check_vat("supplier_vat", &self.supplier_vat)?,
            address: self.supplier_address.clone(),
        };
        let customer = Party {
            name: require_str("customer_name", &self.customer_name)?,
            vat: check_vat("customer_vat", &self.customer_vat)?,
            address: self.customer_address.clone(),
        };

        let subtotal = require_positive("subtotal", self.subtotal)?;
        let vat_rate = self.vat_rate.unwrap_or(default_vat_rate);
        if !(0.0..=1.0).contains(&vat_rate) {
            return Err(SchemaViolation::new(
                "vat_rate",
                "a rate in 0..1",
                format!("{vat_rate}"),
            ));
        }
        let vat_amount = self.vat_amount.ok_or_else(|| {
            SchemaViolation::new("vat_amount", "a non-negative amount", "missing")
        })?;
        if vat_amount < 0.0 {
            return Err(SchemaViolation::new(
                "vat_amount",
                "a non-negative amount",
                format!("{vat_amount}"),
            ));
        }
        let total_amount = require_positive("total_amount", self.total_amount)?;

        let expected_vat = subtotal * vat_rate;
        if (vat_amount - expected_vat).abs() > AMOUNT_TOLERANCE {
            return Err(SchemaViolation::new(
                "vat_amount",
                format!("{expected_vat:.2} (subtotal × vat_rate)"),
                format!("{vat_amount:.2}"),
            ));
        }
        let expected_total = subtotal + vat_amount;
        if (total_amount - expected_total).abs() > AMOUNT_TOLERANCE {
            return Err(SchemaViolation::new(
                "total_amount",
                format!("{expected_total:.2} (subtotal + vat_amount)"),
                format!("{total_amount:.2}"),
            ));
        }

        let currency = self.currency.clone().unwrap_or_else(|| "EUR".to_string());
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(SchemaViolation::new(
                "currency",
                "a 3-letter uppercase code",
                currency,
            ));
        }

        Ok(InvoiceRecord {
            invoice_number,
            invoice_date: Some(invoice_date),
            supplier,
            customer,
            subtotal,
            vat_rate,
            vat_amount,
            total_amount,
            currency,
            line_items: self.line_items.clone(),
            payment_terms: self.payment_terms.clone(),
            due_date: parse_optional_date(&self.due_date),
            ocr_confidence,
            ai_validation_score: self.ai_score(),
            review: ReviewTrail::from_parts(
                self.validation_notes.clone(),
                self.requires_manual_review,
            ),
        })
    }

    /// Build a lenient record from whatever fields parsed, flagged for
    /// manual review with the violation recorded. Used when the strict
    /// path rejects — the document is never discarded.
    pub fn into_lenient(
        self,
        ocr_confidence: f64,
        default_vat_rate: f64,
        violation: &SchemaViolation,
    ) -> InvoiceRecord {
        let ai_validation_score = self.ai_score();
        let mut review =
            ReviewTrail::from_parts(self.validation_notes, self.requires_manual_review);
        review.flag(violation.to_string());

        InvoiceRecord {
            invoice_number: self.invoice_number.unwrap_or_default(),
            invoice_date: parse_optional_date(&self.invoice_date),
            supplier: Party {
                name: self.supplier_name.unwrap_or_default(),
                vat: self.supplier_vat.unwrap_or_default(),
                address: self.supplier_address,
            },
            customer: Party {
                name: self.customer_name.unwrap_or_default(),
                vat: self.customer_vat.unwrap_or_default(),
                address: self.customer_address,
            },
            subtotal: self.subtotal.unwrap_or(0.0),
            vat_rate: self.vat_rate.unwrap_or(default_vat_rate),
            vat_amount: self.vat_amount.unwrap_or(0.0),
            total_amount: self.total_amount.unwrap_or(0.0),
            currency: self.currency.unwrap_or_else(|| "EUR".to_string()),
            line_items: self.line_items,
            payment_terms: self.payment_terms,
            due_date: parse_optional_date(&self.due_date),
            ocr_confidence,
            ai_validation_score,
            review,
        }
    }

    fn ai_score(&self) -> f64 {
        self.confidence_score.unwrap_or(0.9).clamp(0.0, 1.0)
    }
}

fn require_str(field: &'static str, value: &Option<String>) -> Result<String, SchemaViolation> {
    match value {
        Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(SchemaViolation::new(field, "a non-empty string", "missing")),
    }
}

fn require_positive(field: &'static str, value: Option<f64>) -> Result<f64, SchemaViolation> {
    match value {
        Some(v) if v > 0.0 => Ok(v),
        Some(v) => Err(SchemaViolation::new(
            field,
            "a positive amount",
            format!("{v}"),
        )),
        None => Err(SchemaViolation::new(field, "a positive amount", "missing")),
    }
}

fn check_vat(field: &'static str, value: &Option<String>) -> Result<String, SchemaViolation> {
    let raw = value.as_deref().unwrap_or("");
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 11 {
        Ok(digits)
    } else {
        Err(SchemaViolation::new(
            field,
            "exactly 11 digits",
            if raw.is_empty() { "missing" } else { raw }.to_string(),
        ))
    }
}

fn parse_iso_date(field: &'static str, value: &Option<String>) -> Result<NaiveDate, SchemaViolation> {
    let raw = value.as_deref().unwrap_or("");
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        SchemaViolation::new(
            field,
            "an ISO date (YYYY-MM-DD)",
            if raw.is_empty() { "missing" } else { raw }.to_string(),
        )
    })
}

fn parse_optional_date(value: &Option<String>) -> Option<NaiveDate> {
    value
        .as_deref()
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn good_draft() -> InvoiceDraft {
        InvoiceDraft {
            invoice_number: Some("2024/001".to_string()),
            invoice_date: Some("2024-03-15".to_string()),
            supplier_name: Some("ACME Srl".to_string()),
            supplier_vat: Some("12345678901".to_string()),
            customer_name: Some("Beta SpA".to_string()),
            customer_vat: Some("10987654321".to_string()),
            subtotal: Some(1000.0),
            vat_rate: Some(0.22),
            vat_amount: Some(220.0),
            total_amount: Some(1220.0),
            currency: Some("EUR".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_draft_produces_record() {
        let record = good_draft().validate(85.0, 0.22).unwrap();
        assert_eq!(record.invoice_number, "2024/001");
        assert_eq!(
            record.invoice_date,
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
        assert_eq!(record.supplier.vat, "12345678901");
        assert!(!record.requires_manual_review());
        assert_eq!(record.ocr_confidence, 85.0);
        // collaborator did not report a score: default 0.9
        assert_eq!(record.ai_validation_score, 0.9);
    }

    #[test]
    fn test_vat_arithmetic_mismatch_rejected_at_field() {
        let mut draft = good_draft();
        draft.vat_amount = Some(300.0);
        draft.total_amount = Some(1300.0);
        let err = draft.validate(85.0, 0.22).unwrap_err();
        assert_eq!(err.field, "vat_amount");
        assert!(err.expected.contains("220.00"));
        assert!(err.actual.contains("300.00"));
    }

    #[test]
    fn test_total_arithmetic_mismatch_rejected_at_field() {
        let mut draft = good_draft();
        draft.total_amount = Some(1500.0);
        let err = draft.validate(85.0, 0.22).unwrap_err();
        assert_eq!(err.field, "total_amount");
    }

    #[test]
    fn test_rounding_within_tolerance_accepted() {
        let mut draft = good_draft();
        draft.vat_amount = Some(220.01);
        draft.total_amount = Some(1220.01);
        assert!(draft.validate(85.0, 0.22).is_ok());
    }

    #[test]
    fn test_short_vat_rejected() {
        let mut draft = good_draft();
        draft.supplier_vat = Some("1234567890".to_string());
        let err = draft.validate(85.0, 0.22).unwrap_err();
        assert_eq!(err.field, "supplier_vat");
    }

    #[test]
    fn test_vat_digits_extracted_from_noisy_value() {
        let mut draft = good_draft();
        draft.supplier_vat = Some("IT 12345678901".to_string());
        let record = draft.validate(85.0, 0.22).unwrap();
        assert_eq!(record.supplier.vat, "12345678901");
    }

    #[test]
    fn test_missing_vat_rate_defaults_before_arithmetic() {
        let mut draft = good_draft();
        draft.vat_rate = None;
        let record = draft.validate(85.0, 0.22).unwrap();
        assert_eq!(record.vat_rate, 0.22);
    }

    #[test]
    fn test_non_iso_date_rejected() {
        let mut draft = good_draft();
        draft.invoice_date = Some("15/03/2024".to_string());
        let err = draft.validate(85.0, 0.22).unwrap_err();
        assert_eq!(err.field, "invoice_date");
    }

    #[test]
    fn test_lenient_fallback_is_flagged_and_keeps_partials() {
        let mut draft = good_draft();
        draft.total_amount = None;
        let violation = draft.validate(60.0, 0.22).unwrap_err();
        let record = draft.into_lenient(60.0, 0.22, &violation);
        assert!(record.requires_manual_review());
        assert_eq!(record.invoice_number, "2024/001");
        assert_eq!(record.total_amount, 0.0);
        assert!(record
            .validation_notes()
            .iter()
            .any(|n| n.contains("total_amount")));
    }

    #[test]
    fn test_review_flag_is_monotonic() {
        let mut record = good_draft().validate(85.0, 0.22).unwrap();
        assert!(!record.requires_manual_review());
        record.flag_for_review("first check");
        record.flag_for_review("second check");
        assert!(record.requires_manual_review());
        assert_eq!(record.validation_notes().len(), 2);
    }

    #[test]
    fn test_collaborator_flag_carries_through() {
        let mut draft = good_draft();
        draft.requires_manual_review = true;
        draft.validation_notes = vec!["supplier name uncertain".to_string()];
        let record = draft.validate(85.0, 0.22).unwrap();
        assert!(record.requires_manual_review());
        assert_eq!(record.validation_notes().len(), 1);
    }

    #[test]
    fn test_draft_decodes_from_partial_json() {
        let raw = r#"{"invoice_number": "42", "subtotal": 10.5, "unknown_key": true}"#;
        let draft: InvoiceDraft = serde_json::from_str(raw).unwrap();
        assert_eq!(draft.invoice_number.as_deref(), Some("42"));
        assert_eq!(draft.subtotal, Some(10.5));
        assert!(draft.invoice_date.is_none());
    }

    #[test]
    fn test_record_serializes_nested_parties_and_flat_review() {
        let record = good_draft().validate(85.0, 0.22).unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["supplier"]["vat"], "12345678901");
        assert_eq!(json["requires_manual_review"], false);
        assert!(json["validation_notes"].as_array().unwrap().is_empty());
    }
}
