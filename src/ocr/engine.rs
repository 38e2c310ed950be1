//! OCR engine abstraction and the Tesseract implementation.

use std::path::Path;
use std::process::Command;

use thiserror::Error;

use crate::config::OcrSettings;
use crate::models::{BoundingBox, OcrWord};

/// Errors from the OCR engine. Engine failures are fatal for the document;
/// this layer does not retry.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR engine not available: {0}")]
    EngineNotAvailable(String),

    #[error("OCR engine failed: {0}")]
    EngineFailed(String),

    #[error("malformed engine output: {0}")]
    MalformedOutput(String),

    #[error("failed to encode image for OCR: {0}")]
    ImageWrite(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw engine output: page text plus word-level geometry.
#[derive(Debug, Clone)]
pub struct EngineOutput {
    pub text: String,
    pub words: Vec<OcrWord>,
}

/// External OCR engine seam. Implementations must be safe to call from
/// several worker tasks at once.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image_path: &Path, settings: &OcrSettings)
        -> Result<EngineOutput, OcrError>;
}

/// Tesseract invoked via the command line.
///
/// Two passes over the same image: plain text for the full-page reading
/// order, TSV for word boxes and confidences. Each invocation is an
/// independent subprocess, so concurrent use needs no locking.
#[derive(Debug, Default, Clone, Copy)]
pub struct TesseractEngine;

impl TesseractEngine {
    pub fn new() -> Self {
        Self
    }

    fn run_tesseract(
        &self,
        image_path: &Path,
        settings: &OcrSettings,
        extra: &[&str],
    ) -> Result<String, OcrError> {
        let psm = settings.psm.to_string();
        let output = Command::new("tesseract")
            .arg(image_path)
            .arg("stdout")
            .args(["-l", &settings.language])
            .args(["--oem", "3", "--psm", &psm])
            .args(extra)
            .output();

        match output {
            Ok(output) => {
                if output.status.success() {
                    Ok(String::from_utf8_lossy(&output.stdout).to_string())
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    Err(OcrError::EngineFailed(format!("tesseract: {}", stderr)))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(OcrError::EngineNotAvailable(
                "tesseract not found (install tesseract-ocr)".to_string(),
            )),
            Err(e) => Err(OcrError::Io(e)),
        }
    }
}

impl OcrEngine for TesseractEngine {
    fn recognize(
        &self,
        image_path: &Path,
        settings: &OcrSettings,
    ) -> Result<EngineOutput, OcrError> {
        let text = self.run_tesseract(image_path, settings, &[])?;
        let tsv = self.run_tesseract(image_path, settings, &["tsv"])?;
        let words = parse_tsv(&tsv)?;
        Ok(EngineOutput { text, words })
    }
}

/// Parse Tesseract TSV output into word records.
///
/// Columns: level, page_num, block_num, par_num, line_num, word_num,
/// left, top, width, height, conf, text. Only level-5 (word) rows with
/// positive confidence carry text; the rest are layout artifacts and are
/// dropped here so downstream confidence means never see them.
pub(crate) fn parse_tsv(tsv: &str) -> Result<Vec<OcrWord>, OcrError> {
    let mut words = Vec::new();

    for line in tsv.lines().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 12 {
            return Err(OcrError::MalformedOutput(format!(
                "expected 12 TSV columns, got {}",
                cols.len()
            )));
        }

        let level: u32 = cols[0].parse().unwrap_or(0);
        if level != 5 {
            continue;
        }
        let confidence: f64 = cols[10].parse().unwrap_or(-1.0);
        let text = cols[11].trim();
        if confidence <= 0.0 || text.is_empty() {
            continue;
        }

        let parse_coord = |s: &str| -> Result<u32, OcrError> {
            s.parse()
                .map_err(|_| OcrError::MalformedOutput(format!("bad coordinate '{s}'")))
        };

        words.push(OcrWord {
            text: text.to_string(),
            confidence,
            bbox: BoundingBox::new(
                parse_coord(cols[6])?,
                parse_coord(cols[7])?,
                parse_coord(cols[8])?,
                parse_coord(cols[9])?,
            ),
            block: cols[2].parse().unwrap_or(0),
            line: cols[4].parse().unwrap_or(0),
        });
    }

    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    #[test]
    fn test_parse_tsv_keeps_word_rows_only() {
        let tsv = format!(
            "{HEADER}\n\
             1\t1\t0\t0\t0\t0\t0\t0\t600\t800\t-1\t\n\
             5\t1\t1\t1\t1\t1\t10\t20\t80\t14\t91.5\tFattura\n\
             5\t1\t1\t1\t1\t2\t100\t20\t60\t14\t85\tn.\n\
             5\t1\t1\t1\t2\t1\t10\t40\t50\t14\t0\t|||\n"
        );
        let words = parse_tsv(&tsv).unwrap();
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].text, "Fattura");
        assert_eq!(words[0].confidence, 91.5);
        assert_eq!(words[0].bbox, BoundingBox::new(10, 20, 80, 14));
        assert_eq!(words[0].block, 1);
        assert_eq!(words[1].line, 1);
    }

    #[test]
    fn test_parse_tsv_rejects_truncated_rows() {
        let tsv = format!("{HEADER}\n5\t1\t1\t1\n");
        assert!(matches!(
            parse_tsv(&tsv),
            Err(OcrError::MalformedOutput(_))
        ));
    }

    #[test]
    fn test_parse_tsv_empty_page() {
        let words = parse_tsv(&format!("{HEADER}\n")).unwrap();
        assert!(words.is_empty());
    }
}
