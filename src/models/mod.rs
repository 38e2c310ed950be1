//! Data model for the invoice extraction pipeline.

mod invoice;
mod ocr;
mod result;

pub use invoice::{
    InvoiceDraft, InvoiceRecord, LineItem, Party, ReviewTrail, SchemaViolation,
};
pub use ocr::{BoundingBox, ExtractedField, FieldKind, OcrOutcome, OcrWord};
pub use result::ProcessingResult;
