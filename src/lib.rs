//! Invoice OCR extraction and AI validation pipeline.
//!
//! Converts scanned or photographed invoices into validated, structured
//! financial records:
//!
//! 1. [`preprocess::ImageNormalizer`] — deterministic image cleanup
//!    (resize, grayscale, denoise, deskew, binarize, crop, contrast).
//! 2. [`ocr::TextExtractor`] — OCR with word-level confidence and geometry.
//! 3. [`ocr::FieldExtractor`] — pattern-based candidate field extraction.
//! 4. [`llm::StructuringValidator`] — AI-assisted structuring, defensively
//!    schema- and arithmetic-validated, with retry on transient failures.
//! 5. [`rules::BusinessRuleGate`] — threshold checks that can only ever
//!    escalate a record to manual review.
//! 6. [`pipeline::InvoiceProcessor`] — per-document execution and bounded
//!    concurrent batches with per-document failure isolation.
//!
//! Downstream consumers (storage, database, mail routing) receive
//! [`models::ProcessingResult`] values and must treat
//! `requires_manual_review` as the sole gating signal for human routing.

pub mod config;
pub mod llm;
pub mod models;
pub mod ocr;
pub mod pipeline;
pub mod preprocess;
pub mod rules;

pub use config::PipelineConfig;
pub use models::{InvoiceRecord, ProcessingResult};
pub use pipeline::{BatchStats, InvoiceProcessor};
