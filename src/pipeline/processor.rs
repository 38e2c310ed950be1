//! Single-document pipeline execution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tempfile::TempDir;
use thiserror::Error;
use tracing::{info, warn};

use super::batch::BatchCounters;
use super::render::{PageRenderer, PdftoppmRenderer, RenderError};
use crate::config::PipelineConfig;
use crate::llm::{ChatCompletionClient, StructuringClient, StructuringError, StructuringValidator};
use crate::models::{ExtractedField, FieldKind, InvoiceRecord, OcrOutcome, ProcessingResult};
use crate::ocr::{FieldExtractor, OcrEngine, OcrError, TesseractEngine, TextExtractor};
use crate::preprocess::{ImageNormalizer, PreprocessError};
use crate::rules::BusinessRuleGate;

/// Records whose coherence score falls below this go to manual review.
const SIMILARITY_THRESHOLD: f64 = 0.6;

/// Any stage failure for one document. Converted to a
/// [`ProcessingResult::Failed`] inside `process_one`; nothing escapes to
/// the batch caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Preprocess(#[from] PreprocessError),

    #[error(transparent)]
    Ocr(#[from] OcrError),

    #[error(transparent)]
    Structuring(#[from] StructuringError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker task failed: {0}")]
    Worker(String),

    #[error("document processing timed out after {0}s")]
    Timeout(u64),
}

/// Full document → record pipeline.
///
/// Collaborator clients (OCR engine, structuring service, page renderer)
/// are shared across workers behind `Arc` and required to be reentrant;
/// everything else a document touches is owned by its own task.
#[derive(Clone)]
pub struct InvoiceProcessor {
    pub(super) config: PipelineConfig,
    normalizer: ImageNormalizer,
    text_extractor: TextExtractor,
    field_extractor: FieldExtractor,
    validator: Arc<StructuringValidator>,
    gate: BusinessRuleGate,
    renderer: Arc<dyn PageRenderer>,
    pub(super) counters: Arc<BatchCounters>,
}

impl InvoiceProcessor {
    /// Processor wired to the production collaborators: Tesseract, the
    /// configured chat-completions deployment, and pdftoppm.
    pub fn new(config: PipelineConfig) -> Self {
        let client = Arc::new(ChatCompletionClient::new(config.structuring.clone()));
        Self::with_collaborators(
            config,
            Arc::new(TesseractEngine::new()),
            client,
            Arc::new(PdftoppmRenderer::new()),
        )
    }

    /// Processor with explicit collaborators (tests substitute mocks here).
    pub fn with_collaborators(
        config: PipelineConfig,
        engine: Arc<dyn OcrEngine>,
        client: Arc<dyn StructuringClient>,
        renderer: Arc<dyn PageRenderer>,
    ) -> Self {
        let text_extractor = TextExtractor::new(engine, config.ocr.clone());
        let validator = Arc::new(StructuringValidator::new(
            client,
            config.retry.clone(),
            config.rules.vat_rate,
        ));
        let gate = BusinessRuleGate::new(config.rules.clone());

        Self {
            config,
            normalizer: ImageNormalizer::new(),
            text_extractor,
            field_extractor: FieldExtractor::new(),
            validator,
            gate,
            renderer,
            counters: Arc::new(BatchCounters::default()),
        }
    }

    /// Process one document end to end. Never fails: every stage error,
    /// including the per-document timeout, becomes a `Failed` result for
    /// this document alone.
    pub async fn process_one(&self, path: &Path) -> ProcessingResult {
        info!(file = %path.display(), "processing invoice");
        let started = Instant::now();
        let timeout = self.config.batch.document_timeout();

        let result = match tokio::time::timeout(timeout, self.run_stages(path)).await {
            Ok(Ok((record, ocr_confidence, similarity))) => {
                let elapsed = started.elapsed();
                info!(
                    invoice_number = %record.invoice_number,
                    amount = record.total_amount,
                    requires_review = record.requires_manual_review(),
                    elapsed = format!("{:.2}s", elapsed.as_secs_f64()),
                    "invoice processed"
                );
                ProcessingResult::Success {
                    record,
                    ocr_confidence,
                    semantic_similarity: similarity,
                    elapsed,
                    source_path: path.to_path_buf(),
                }
            }
            Ok(Err(e)) => {
                warn!(file = %path.display(), error = %e, "invoice processing failed");
                ProcessingResult::Failed {
                    error: e.to_string(),
                    source_path: path.to_path_buf(),
                }
            }
            Err(_) => {
                let e = PipelineError::Timeout(self.config.batch.document_timeout_secs);
                warn!(file = %path.display(), error = %e, "invoice processing failed");
                ProcessingResult::Failed {
                    error: e.to_string(),
                    source_path: path.to_path_buf(),
                }
            }
        };

        self.counters.record(&result);
        result
    }

    /// The fatal-error path of the pipeline: render → normalize → OCR →
    /// fields → structuring → similarity → rule gate.
    async fn run_stages(
        &self,
        path: &Path,
    ) -> Result<(InvoiceRecord, f64, f64), PipelineError> {
        // Page images and debug output live only as long as this document.
        let scratch = TempDir::new()?;

        let (ocr, candidate_fields) = self.blocking_stages(path, scratch.path()).await?;

        let record = self
            .validator
            .validate(&ocr.text, &candidate_fields, ocr.confidence)
            .await?;

        let similarity = self.validator.semantic_similarity(&ocr.text, &record).await?;

        let mut record = self.gate.apply(record);
        if similarity < SIMILARITY_THRESHOLD {
            record.flag_for_review(format!("Low semantic coherence: {similarity:.2}"));
        }

        Ok((record, ocr.confidence, similarity))
    }

    /// CPU- and subprocess-bound stages, moved off the async workers.
    async fn blocking_stages(
        &self,
        path: &Path,
        scratch: &Path,
    ) -> Result<(OcrOutcome, HashMap<FieldKind, ExtractedField>), PipelineError> {
        let renderer = self.renderer.clone();
        let normalizer = self.normalizer;
        let text_extractor = self.text_extractor.clone();
        let field_extractor = self.field_extractor;
        let dpi = self.config.ocr.dpi;
        let path = path.to_path_buf();
        let scratch = scratch.to_path_buf();

        tokio::task::spawn_blocking(
            move || -> Result<(OcrOutcome, HashMap<FieldKind, ExtractedField>), PipelineError> {
                let image_path = prepare_image(renderer.as_ref(), &path, dpi, &scratch)?;
                let normalized = normalizer.normalize_file(&image_path, None)?;
                let ocr = text_extractor.extract(&normalized)?;
                let fields = field_extractor.extract_fields(&ocr.text, &ocr.words);
                Ok((ocr, fields))
            },
        )
        .await
        .map_err(|e| PipelineError::Worker(e.to_string()))?
    }
}

/// Convert a paginated document to its first page image; raster inputs
/// pass straight through.
fn prepare_image(
    renderer: &dyn PageRenderer,
    path: &Path,
    dpi: u32,
    scratch: &Path,
) -> Result<PathBuf, RenderError> {
    if is_pdf(path) {
        renderer.render_page(path, 1, dpi, scratch)
    } else {
        Ok(path.to_path_buf())
    }
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}
