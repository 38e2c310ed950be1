//! OCR text and field extraction.
//!
//! - [`OcrEngine`] is the seam to the external recognition engine;
//!   [`TesseractEngine`] shells out to the `tesseract` binary.
//! - [`TextExtractor`] runs a normalized image through the engine and
//!   aggregates word confidences.
//! - [`FieldExtractor`] pulls candidate invoice fields out of the raw text
//!   with ordered regex patterns and normalizes them.

mod engine;
mod extractor;
mod fields;

pub use engine::{EngineOutput, OcrEngine, OcrError, TesseractEngine};
pub use extractor::TextExtractor;
pub use fields::FieldExtractor;
