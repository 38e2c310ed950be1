//! Pattern-based candidate field extraction.
//!
//! Patterns per field kind are ordered most-specific-first; the first match
//! wins and no runtime re-ranking happens. Matched values are normalized
//! (VAT digit-stripping, date coercion to ISO, amount decimal cleanup) and
//! scored by the OCR confidence of the words they overlap.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use tracing::warn;

use crate::models::{BoundingBox, ExtractedField, FieldKind, LineItem, OcrWord};

/// Ordered extraction patterns. Italian invoices first, English fallbacks
/// second, matching the documents this pipeline actually sees.
static FIELD_PATTERNS: LazyLock<Vec<(FieldKind, Vec<Regex>)>> = LazyLock::new(|| {
    vec![
        (
            FieldKind::InvoiceNumber,
            vec![
                Regex::new(r"(?i)(?:fattura|invoice|n[°\.º]?)\s*[:\-]?\s*(\d{4,}[/\-]?\d*)")
                    .unwrap(),
                Regex::new(r"(?i)(?:FT|INV|DOC)[:\-\s]*(\d{4,})").unwrap(),
                Regex::new(r"(?i)numero\s+(?:fattura|documento)[:\s]+(\d+)").unwrap(),
            ],
        ),
        (
            FieldKind::Date,
            vec![
                Regex::new(r"(\d{1,2}[/\-\.]\d{1,2}[/\-\.]\d{2,4})").unwrap(),
                Regex::new(r"(\d{4}[/\-\.]\d{1,2}[/\-\.]\d{1,2})").unwrap(),
            ],
        ),
        (
            FieldKind::VatNumber,
            vec![
                Regex::new(r"(?i)(?:p\.?\s*iva|partita\s+iva|vat)[:\s]*(\d{11})").unwrap(),
                Regex::new(r"(?i)(?:tax\s+id|fiscal\s+code)[:\s]*(\d{11})").unwrap(),
            ],
        ),
        (
            FieldKind::Amount,
            vec![
                Regex::new(r"(?i)(?:totale|total|importo)[:\s]+€?\s*([\d\.,]+)").unwrap(),
                Regex::new(r"(?i)(?:grand\s+total|net\s+amount)[:\s]+€?\s*([\d\.,]+)").unwrap(),
            ],
        ),
        (
            FieldKind::Email,
            vec![Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap()],
        ),
    ]
});

/// Line-item candidate: description, quantity, unit price.
static LINE_ITEM_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.+?)\s+(\d+)\s+€?\s*([\d\.,]+)").unwrap());

/// Words below this confidence are too unreliable for line grouping.
const LINE_ITEM_MIN_CONFIDENCE: f64 = 30.0;

/// Source date formats tried in order; first successful parse wins.
const DATE_INPUT_FORMATS: [&str; 5] = ["%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%Y-%m-%d", "%d/%m/%y"];

/// Pattern-based candidate extractor. Stateless; patterns are compiled once
/// per process.
#[derive(Debug, Default, Clone, Copy)]
pub struct FieldExtractor;

impl FieldExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract every recognizable field from the OCR text. A field kind is
    /// absent from the map when nothing matched or normalization discarded
    /// the match — never present with a fabricated value.
    pub fn extract_fields(
        &self,
        text: &str,
        words: &[OcrWord],
    ) -> HashMap<FieldKind, ExtractedField> {
        let mut fields = HashMap::new();

        for (kind, patterns) in FIELD_PATTERNS.iter() {
            let Some(value) = first_match(text, patterns) else {
                continue;
            };
            let field = ExtractedField {
                confidence: field_confidence(&value, words),
                bbox: field_bbox(&value, words),
                kind: *kind,
                value,
                unparsed: false,
            };
            if let Some(field) = normalize_field(field) {
                fields.insert(*kind, field);
            }
        }

        fields
    }

    /// Heuristic line-item extraction: group words by (block, line), join
    /// each line, and match description/quantity/price rows. This is
    /// deliberately line-based — no table layout understanding.
    pub fn extract_line_items(&self, words: &[OcrWord]) -> Vec<LineItem> {
        let mut lines: BTreeMap<(u32, u32), Vec<&str>> = BTreeMap::new();
        for word in words {
            if word.confidence > LINE_ITEM_MIN_CONFIDENCE {
                lines
                    .entry((word.block, word.line))
                    .or_default()
                    .push(&word.text);
            }
        }

        let mut items = Vec::new();
        for parts in lines.values() {
            let line_text = parts.join(" ");
            let Some(caps) = LINE_ITEM_PATTERN.captures(&line_text) else {
                continue;
            };
            let Ok(quantity) = caps[2].parse::<u32>() else {
                continue;
            };
            let Ok(unit_price) = caps[3].replace(',', ".").parse::<f64>() else {
                continue;
            };
            items.push(LineItem {
                description: caps[1].trim().to_string(),
                quantity: quantity as f64,
                unit_price,
                total: round2(quantity as f64 * unit_price),
            });
        }
        items
    }
}

/// First pattern that matches wins. Capture group 1 when present, whole
/// match otherwise (the email pattern has no group).
fn first_match(text: &str, patterns: &[Regex]) -> Option<String> {
    for pattern in patterns {
        if let Some(caps) = pattern.captures(text) {
            let m = caps.get(1).or_else(|| caps.get(0))?;
            return Some(m.as_str().trim().to_string());
        }
    }
    None
}

/// Mean OCR confidence over words overlapping any token of the value;
/// zero when no word overlaps.
fn field_confidence(value: &str, words: &[OcrWord]) -> f64 {
    let tokens: Vec<String> = value
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .collect();

    let matching: Vec<f64> = words
        .iter()
        .filter(|w| {
            let text = w.text.to_lowercase();
            tokens.iter().any(|t| text.contains(t.as_str()))
        })
        .map(|w| w.confidence)
        .collect();

    if matching.is_empty() {
        0.0
    } else {
        matching.iter().sum::<f64>() / matching.len() as f64
    }
}

/// Bounding box of the first word overlapping the value, or a zero box.
fn field_bbox(value: &str, words: &[OcrWord]) -> BoundingBox {
    let tokens: Vec<String> = value
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .collect();

    words
        .iter()
        .find(|w| {
            let text = w.text.to_lowercase();
            tokens.iter().any(|t| text.contains(t.as_str()))
        })
        .map(|w| w.bbox)
        .unwrap_or_else(BoundingBox::zero)
}

/// Per-kind normalization. Returns `None` to drop the field entirely.
fn normalize_field(mut field: ExtractedField) -> Option<ExtractedField> {
    match field.kind {
        FieldKind::VatNumber => {
            let digits: String = field.value.chars().filter(|c| c.is_ascii_digit()).collect();
            if digits.len() == 11 {
                field.value = digits;
                Some(field)
            } else {
                warn!(vat = %field.value, "discarding VAT id that is not 11 digits");
                None
            }
        }
        FieldKind::Date => {
            match normalize_date(&field.value) {
                Some(iso) => field.value = iso,
                None => {
                    warn!(date = %field.value, "date did not match any known format");
                    field.unparsed = true;
                }
            }
            Some(field)
        }
        FieldKind::Amount => {
            match normalize_amount(&field.value) {
                Some(amount) => field.value = amount,
                None => warn!(amount = %field.value, "could not parse amount"),
            }
            Some(field)
        }
        FieldKind::InvoiceNumber | FieldKind::Email => Some(field),
    }
}

/// Coerce a date string to ISO `YYYY-MM-DD` using the ordered source
/// formats. `None` when nothing parses.
pub(crate) fn normalize_date(value: &str) -> Option<String> {
    for format in DATE_INPUT_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }
    None
}

/// Strip thousands separators, convert the decimal comma, and round to
/// two decimals. `None` when the remainder is not a number.
pub(crate) fn normalize_amount(value: &str) -> Option<String> {
    let cleaned = value.replace('.', "").replace(',', ".");
    let amount: f64 = cleaned.parse().ok()?;
    Some(format!("{:.2}", round2(amount)))
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
