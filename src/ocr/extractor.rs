//! Text extraction over a normalized image.

use std::path::Path;
use std::sync::Arc;

use image::GrayImage;
use tempfile::TempDir;
use tracing::info;

use super::engine::{OcrEngine, OcrError};
use crate::config::OcrSettings;
use crate::models::OcrOutcome;

/// Runs the OCR engine over normalized images and aggregates confidence.
///
/// The engine instance is shared across workers; engines are required to be
/// reentrant, so the extractor itself is cheap to clone per task.
#[derive(Clone)]
pub struct TextExtractor {
    engine: Arc<dyn OcrEngine>,
    settings: OcrSettings,
}

impl TextExtractor {
    pub fn new(engine: Arc<dyn OcrEngine>, settings: OcrSettings) -> Self {
        Self { engine, settings }
    }

    /// OCR a normalized in-memory image.
    ///
    /// The image is written to a temporary file for the engine; the file is
    /// removed when the call returns.
    pub fn extract(&self, image: &GrayImage) -> Result<OcrOutcome, OcrError> {
        let temp_dir = TempDir::new()?;
        let image_path = temp_dir.path().join("page.png");
        image.save(&image_path)?;
        self.extract_file(&image_path)
    }

    /// OCR an image file already on disk.
    pub fn extract_file(&self, image_path: &Path) -> Result<OcrOutcome, OcrError> {
        let output = self.engine.recognize(image_path, &self.settings)?;
        let outcome = OcrOutcome::from_words(output.text, output.words);

        info!(
            words_extracted = outcome.words.len(),
            avg_confidence = format!("{:.2}%", outcome.confidence),
            "OCR extraction complete"
        );

        Ok(outcome)
    }
}
