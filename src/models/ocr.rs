//! OCR output types: word-level geometry and extracted candidate fields.

use serde::{Deserialize, Serialize};

/// Word bounding box in image coordinates (left, top, width, height).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Placeholder box used when a field has no overlapping OCR word.
    pub fn zero() -> Self {
        Self::default()
    }
}

/// A single recognized word with its confidence and layout position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrWord {
    pub text: String,
    /// Engine confidence, 0..100.
    pub confidence: f64,
    pub bbox: BoundingBox,
    /// Block number within the page layout.
    pub block: u32,
    /// Line number within the block.
    pub line: u32,
}

/// Full-page OCR result: raw text plus word-level detail.
#[derive(Debug, Clone, Default)]
pub struct OcrOutcome {
    pub text: String,
    /// Mean word confidence, 0..100. Zero when no words were recognized.
    pub confidence: f64,
    pub words: Vec<OcrWord>,
}

impl OcrOutcome {
    /// Build an outcome, deriving the aggregate confidence from the words.
    ///
    /// Zero-confidence entries are layout artifacts, not text; callers filter
    /// them out before this point, so the mean runs over every word given.
    pub fn from_words(text: String, words: Vec<OcrWord>) -> Self {
        let confidence = if words.is_empty() {
            0.0
        } else {
            words.iter().map(|w| w.confidence).sum::<f64>() / words.len() as f64
        };
        Self {
            text,
            confidence,
            words,
        }
    }
}

/// Kinds of candidate fields the pattern extractor recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    InvoiceNumber,
    Date,
    VatNumber,
    Amount,
    Email,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvoiceNumber => "invoice_number",
            Self::Date => "date",
            Self::VatNumber => "vat_number",
            Self::Amount => "amount",
            Self::Email => "email",
        }
    }
}

/// A candidate field located in the OCR text. Absence of a field kind means
/// "not found" — the extractor never fabricates placeholder values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedField {
    pub value: String,
    /// Mean confidence of the OCR words overlapping the value, 0..100.
    pub confidence: f64,
    pub bbox: BoundingBox,
    pub kind: FieldKind,
    /// Set when normalization could not parse the matched value (the raw
    /// match is kept as-is).
    #[serde(default)]
    pub unparsed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, confidence: f64) -> OcrWord {
        OcrWord {
            text: text.to_string(),
            confidence,
            bbox: BoundingBox::zero(),
            block: 1,
            line: 1,
        }
    }

    #[test]
    fn test_aggregate_confidence_is_mean() {
        let outcome = OcrOutcome::from_words(
            "a b c".to_string(),
            vec![word("a", 90.0), word("b", 70.0), word("c", 80.0)],
        );
        assert!((outcome.confidence - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_word_set_means_zero_confidence() {
        let outcome = OcrOutcome::from_words(String::new(), vec![]);
        assert_eq!(outcome.confidence, 0.0);
    }
}
