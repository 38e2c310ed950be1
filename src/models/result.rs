//! Per-document pipeline outcome.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::invoice::InvoiceRecord;

/// Outcome of processing one document.
///
/// A document needing manual review is still `Success`; `Failed` is reserved
/// for documents the pipeline could not process at all. Results are
/// correlated to inputs by `source_path`, never by position.
#[derive(Debug, Clone)]
pub enum ProcessingResult {
    Success {
        record: InvoiceRecord,
        /// Mean OCR confidence, 0..100.
        ocr_confidence: f64,
        /// Coherence score between OCR text and the structured record, 0..1.
        semantic_similarity: f64,
        elapsed: Duration,
        source_path: PathBuf,
    },
    Failed {
        error: String,
        source_path: PathBuf,
    },
}

impl ProcessingResult {
    pub fn source_path(&self) -> &Path {
        match self {
            Self::Success { source_path, .. } | Self::Failed { source_path, .. } => source_path,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// The record, when processing succeeded.
    pub fn record(&self) -> Option<&InvoiceRecord> {
        match self {
            Self::Success { record, .. } => Some(record),
            Self::Failed { .. } => None,
        }
    }
}
