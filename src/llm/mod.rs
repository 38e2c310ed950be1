//! Structuring collaborator: client seam and defensive validation.
//!
//! The collaborator (a chat-completions deployment) turns OCR text and
//! candidate fields into a structured record. Its output is untrusted:
//! everything it returns goes through schema and arithmetic validation
//! before the pipeline accepts it.

mod client;
mod validator;

pub use client::{ChatCompletionClient, StructuringClient, StructuringError};
pub use validator::StructuringValidator;
