//! Page rendering for paginated document formats.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

/// Errors from the format-conversion collaborator.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("external tool not found: {0}")]
    ToolNotFound(String),

    #[error("page rendering failed: {0}")]
    RenderFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Renders one page of a paginated document to a raster image. Shared
/// across workers; implementations must be reentrant.
pub trait PageRenderer: Send + Sync {
    /// Render `page` (1-based) of `document` into `output_dir` at the
    /// given DPI, returning the image path.
    fn render_page(
        &self,
        document: &Path,
        page: u32,
        dpi: u32,
        output_dir: &Path,
    ) -> Result<PathBuf, RenderError>;
}

/// PDF page rendering via Poppler's `pdftoppm`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdftoppmRenderer;

impl PdftoppmRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Find the image file for a specific page number.
    /// pdftoppm names files page-01.png, page-001.png, ... depending on
    /// the document's page count.
    fn find_page_image(&self, output_dir: &Path, page: u32) -> Option<PathBuf> {
        for digits in [1, 2, 3, 4] {
            let filename = format!("page-{:0width$}.png", page, width = digits);
            let path = output_dir.join(&filename);
            if path.exists() {
                return Some(path);
            }
        }
        None
    }
}

impl PageRenderer for PdftoppmRenderer {
    fn render_page(
        &self,
        document: &Path,
        page: u32,
        dpi: u32,
        output_dir: &Path,
    ) -> Result<PathBuf, RenderError> {
        let page_str = page.to_string();
        let dpi_str = dpi.to_string();
        let output_prefix = output_dir.join("page");

        let status = Command::new("pdftoppm")
            .args(["-png", "-r", &dpi_str, "-f", &page_str, "-l", &page_str])
            .arg(document)
            .arg(&output_prefix)
            .status();

        match status {
            Ok(s) if s.success() => self.find_page_image(output_dir, page).ok_or_else(|| {
                RenderError::RenderFailed(format!("no image generated for page {}", page))
            }),
            Ok(_) => Err(RenderError::RenderFailed(
                "pdftoppm failed to convert PDF page".to_string(),
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RenderError::ToolNotFound(
                "pdftoppm (install poppler-utils)".to_string(),
            )),
            Err(e) => Err(RenderError::Io(e)),
        }
    }
}
