//! Business-rule gating.
//!
//! Threshold checks that decide whether a record can flow downstream
//! unattended. Checks are independent and order-insensitive: each may only
//! set the manual-review flag and append one note. Nothing here can clear
//! the flag or remove notes — review routing is monotonic.

use crate::config::RuleConfig;
use crate::models::InvoiceRecord;

/// Minimum collaborator self-confidence before a human checks the record.
const MIN_AI_SCORE: f64 = 0.7;

/// Applies configured threshold checks to validated records.
#[derive(Debug, Clone)]
pub struct BusinessRuleGate {
    config: RuleConfig,
}

impl BusinessRuleGate {
    pub fn new(config: RuleConfig) -> Self {
        Self { config }
    }

    /// Run every check against the record. Pure: the input record plus the
    /// configured thresholds fully determine the output.
    pub fn apply(&self, mut record: InvoiceRecord) -> InvoiceRecord {
        if record.total_amount > self.config.auto_approve_threshold {
            record.flag_for_review(format!(
                "Total €{:.2} exceeds auto-approve threshold €{:.2}",
                record.total_amount, self.config.auto_approve_threshold
            ));
        }

        if record.total_amount > self.config.max_invoice_amount {
            record.flag_for_review(format!(
                "Total €{:.2} exceeds maximum invoice amount €{:.2}",
                record.total_amount, self.config.max_invoice_amount
            ));
        }

        if record.ocr_confidence < self.config.ocr_confidence_threshold {
            record.flag_for_review(format!(
                "Low OCR confidence: {:.1}%",
                record.ocr_confidence
            ));
        }

        if record.ai_validation_score < MIN_AI_SCORE {
            record.flag_for_review(format!(
                "Low AI validation score: {:.2}",
                record.ai_validation_score
            ));
        }

        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InvoiceDraft;

    fn record(total: f64, ocr_confidence: f64, ai_score: f64) -> InvoiceRecord {
        let subtotal = total / 1.22;
        let draft = InvoiceDraft {
            invoice_number: Some("2024/007".to_string()),
            invoice_date: Some("2024-05-02".to_string()),
            supplier_name: Some("ACME Srl".to_string()),
            supplier_vat: Some("12345678901".to_string()),
            customer_name: Some("Beta SpA".to_string()),
            customer_vat: Some("10987654321".to_string()),
            subtotal: Some(subtotal),
            vat_rate: Some(0.22),
            vat_amount: Some(total - subtotal),
            total_amount: Some(total),
            confidence_score: Some(ai_score),
            ..Default::default()
        };
        draft.validate(ocr_confidence, 0.22).unwrap()
    }

    fn gate() -> BusinessRuleGate {
        BusinessRuleGate::new(RuleConfig::default())
    }

    #[test]
    fn test_healthy_record_passes_clean() {
        let result = gate().apply(record(1000.0, 85.0, 0.9));
        assert!(!result.requires_manual_review());
        assert!(result.validation_notes().is_empty());
    }

    #[test]
    fn test_low_ocr_confidence_flags_without_amount_note() {
        // OCR 50 against threshold 70, everything else healthy.
        let result = gate().apply(record(1000.0, 50.0, 0.9));
        assert!(result.requires_manual_review());
        assert!(result
            .validation_notes()
            .iter()
            .any(|n| n.contains("OCR confidence")));
        assert!(!result
            .validation_notes()
            .iter()
            .any(|n| n.contains("auto-approve")));
    }

    #[test]
    fn test_auto_approve_threshold_flags() {
        let result = gate().apply(record(6000.0, 85.0, 0.9));
        assert!(result.requires_manual_review());
        assert!(result
            .validation_notes()
            .iter()
            .any(|n| n.contains("auto-approve")));
    }

    #[test]
    fn test_excessive_total_gets_both_amount_notes() {
        let result = gate().apply(record(150_000.0, 85.0, 0.9));
        let notes = result.validation_notes();
        assert!(notes.iter().any(|n| n.contains("auto-approve")));
        assert!(notes.iter().any(|n| n.contains("maximum invoice amount")));
    }

    #[test]
    fn test_low_ai_score_flags() {
        let result = gate().apply(record(1000.0, 85.0, 0.5));
        assert!(result.requires_manual_review());
        assert!(result
            .validation_notes()
            .iter()
            .any(|n| n.contains("AI validation score")));
    }

    #[test]
    fn test_gate_never_clears_existing_flag() {
        let mut flagged = record(1000.0, 85.0, 0.9);
        flagged.flag_for_review("earlier stage doubt");
        let result = gate().apply(flagged);
        assert!(result.requires_manual_review());
        assert!(result
            .validation_notes()
            .iter()
            .any(|n| n == "earlier stage doubt"));
    }
}
