//! Image normalization pipeline.
//!
//! Deterministic, fixed-order preparation of a scanned invoice for OCR:
//! resize → grayscale → denoise → deskew → binarize → crop borders →
//! enhance contrast. Every step is a pure function over the pixel buffer;
//! the normalizer holds no state across calls.

mod contrast;
mod geometry;

pub use contrast::intensity_std_dev;
pub use geometry::{estimate_skew_angle, rotate_about_center};

use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::filter::bilateral_filter;
use thiserror::Error;
use tracing::debug;

use contrast::{adaptive_binarize, clahe, otsu_binarize};

/// Images wider than this are downscaled before any other step.
const MAX_WIDTH: u32 = 3000;
/// Bilateral filter window diameter and sigmas (edge-preserving denoise).
const DENOISE_WINDOW: u32 = 9;
const DENOISE_SIGMA: f32 = 75.0;
/// Rotations below this are noise, not skew.
const MIN_ROTATION_DEG: f64 = 0.5;
/// Std-dev above which global Otsu is reliable; below it, illumination is
/// likely uneven and local adaptive thresholding is used instead.
const CONTRAST_SPLIT: f64 = 50.0;
/// Local adaptive threshold window and offset.
const ADAPTIVE_BLOCK: u32 = 11;
const ADAPTIVE_C: f64 = 2.0;
/// Margin kept around the detected document contour when cropping.
const BORDER_MARGIN: u32 = 10;
/// CLAHE tile grid and clip limit.
const CLAHE_GRID: u32 = 8;
const CLAHE_CLIP: f64 = 2.0;

/// Errors from the normalization stage.
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("cannot decode image {path}: {source}")]
    UndecodableImage {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("failed to write debug image {path}: {source}")]
    DebugWrite {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// Header/body/footer split of a normalized page, for targeted extraction.
#[derive(Debug)]
pub struct DocumentRegions {
    pub header: GrayImage,
    pub body: GrayImage,
    pub footer: GrayImage,
}

/// Stateless image → image normalizer.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageNormalizer;

impl ImageNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Load and normalize an image file. When `debug_output` is given the
    /// normalized image is also written there for inspection.
    pub fn normalize_file(
        &self,
        path: &Path,
        debug_output: Option<&Path>,
    ) -> Result<GrayImage, PreprocessError> {
        let img = image::open(path).map_err(|source| PreprocessError::UndecodableImage {
            path: path.to_path_buf(),
            source,
        })?;

        let normalized = self.normalize(img);

        if let Some(out) = debug_output {
            normalized
                .save(out)
                .map_err(|source| PreprocessError::DebugWrite {
                    path: out.to_path_buf(),
                    source,
                })?;
            debug!(path = %out.display(), "saved normalized debug image");
        }

        Ok(normalized)
    }

    /// Run the full normalization pipeline on a decoded image.
    pub fn normalize(&self, img: DynamicImage) -> GrayImage {
        let img = resize_if_needed(img);
        let gray = img.into_luma8();
        let gray = bilateral_filter(&gray, DENOISE_WINDOW, DENOISE_SIGMA, DENOISE_SIGMA);
        let gray = deskew(gray);
        let gray = binarize(&gray);
        let gray = crop_borders(gray);
        clahe(&gray, CLAHE_CLIP, CLAHE_GRID)
    }

    /// Split a page into header (top 25%), body, and footer (bottom 25%).
    pub fn document_regions(&self, img: &GrayImage) -> DocumentRegions {
        let (w, h) = img.dimensions();
        let top = h / 4;
        let bottom = h * 3 / 4;
        DocumentRegions {
            header: image::imageops::crop_imm(img, 0, 0, w, top.max(1)).to_image(),
            body: image::imageops::crop_imm(img, 0, top, w, (bottom - top).max(1)).to_image(),
            footer: image::imageops::crop_imm(img, 0, bottom, w, (h - bottom).max(1)).to_image(),
        }
    }
}

/// Downscale if the width exceeds [`MAX_WIDTH`], preserving aspect ratio.
fn resize_if_needed(img: DynamicImage) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    if w <= MAX_WIDTH {
        return img;
    }
    let ratio = MAX_WIDTH as f64 / w as f64;
    let new_h = ((h as f64 * ratio).round() as u32).max(1);
    debug!(original_width = w, new_width = MAX_WIDTH, "downscaling oversized image");
    img.resize_exact(MAX_WIDTH, new_h, image::imageops::FilterType::Triangle)
}

/// Estimate and correct skew. Rotations below [`MIN_ROTATION_DEG`] are
/// skipped: interpolation would only blur the glyphs.
fn deskew(img: GrayImage) -> GrayImage {
    let angle = estimate_skew_angle(&img);
    if angle.abs() <= MIN_ROTATION_DEG {
        return img;
    }
    debug!(angle = format!("{angle:.2}°"), "deskewing image");
    rotate_about_center(&img, -angle)
}

/// Binarize with global Otsu when contrast is good, local adaptive
/// thresholding otherwise.
fn binarize(img: &GrayImage) -> GrayImage {
    if intensity_std_dev(img) > CONTRAST_SPLIT {
        otsu_binarize(img)
    } else {
        adaptive_binarize(img, ADAPTIVE_BLOCK, ADAPTIVE_C)
    }
}

/// Crop to the bounding box of the largest outer contour plus a margin,
/// removing dark scan borders. Pass-through when nothing is found.
fn crop_borders(img: GrayImage) -> GrayImage {
    let contours = find_contours::<u32>(&img);

    let mut best: Option<(u32, u32, u32, u32, u64)> = None;
    for contour in contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer)
    {
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0u32, 0u32);
        for p in &contour.points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        if contour.points.is_empty() {
            continue;
        }
        let area = (max_x - min_x + 1) as u64 * (max_y - min_y + 1) as u64;
        if best.map(|b| area > b.4).unwrap_or(true) {
            best = Some((min_x, min_y, max_x, max_y, area));
        }
    }

    let Some((min_x, min_y, max_x, max_y, _)) = best else {
        return img;
    };

    let (w, h) = img.dimensions();
    let x = min_x.saturating_sub(BORDER_MARGIN);
    let y = min_y.saturating_sub(BORDER_MARGIN);
    let crop_w = (max_x + BORDER_MARGIN + 1).min(w) - x;
    let crop_h = (max_y + BORDER_MARGIN + 1).min(h) - y;
    image::imageops::crop_imm(&img, x, y, crop_w, crop_h).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// A white page with a few black "text lines".
    fn synthetic_page(width: u32, height: u32) -> DynamicImage {
        let mut img = GrayImage::from_pixel(width, height, Luma([255]));
        for row in 0..4u32 {
            let y0 = 30 + row * 25;
            for y in y0..y0 + 6 {
                for x in 20..width - 20 {
                    if y < height {
                        img.put_pixel(x, y, Luma([10]));
                    }
                }
            }
        }
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn test_undecodable_file_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.png");
        std::fs::write(&path, b"not an image at all").unwrap();

        let err = ImageNormalizer::new()
            .normalize_file(&path, None)
            .unwrap_err();
        assert!(matches!(err, PreprocessError::UndecodableImage { .. }));
    }

    #[test]
    fn test_normalize_produces_binary_style_output() {
        let normalized = ImageNormalizer::new().normalize(synthetic_page(200, 160));
        assert!(normalized.width() > 0 && normalized.height() > 0);
        // After binarization + CLAHE the image should stay strongly bimodal.
        let dark = normalized.pixels().filter(|p| p.0[0] < 64).count();
        let bright = normalized.pixels().filter(|p| p.0[0] > 192).count();
        let total = (normalized.width() * normalized.height()) as usize;
        assert!(dark + bright > total * 9 / 10);
    }

    #[test]
    fn test_oversized_image_is_downscaled() {
        let wide = DynamicImage::ImageLuma8(GrayImage::from_pixel(4000, 1000, Luma([255])));
        let resized = resize_if_needed(wide);
        assert_eq!(resized.width(), 3000);
        assert_eq!(resized.height(), 750);
    }

    #[test]
    fn test_small_image_not_resized() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(800, 600, Luma([255])));
        let resized = resize_if_needed(img);
        assert_eq!((resized.width(), resized.height()), (800, 600));
    }

    #[test]
    fn test_crop_passes_through_without_contours() {
        let blank = GrayImage::from_pixel(50, 50, Luma([0]));
        let cropped = crop_borders(blank.clone());
        assert_eq!(cropped.dimensions(), blank.dimensions());
    }

    #[test]
    fn test_crop_trims_scan_border() {
        // Bright document area inset in a dark border.
        let mut img = GrayImage::from_pixel(100, 100, Luma([0]));
        for y in 30..70 {
            for x in 25..75 {
                img.put_pixel(x, y, Luma([255]));
            }
        }
        let cropped = crop_borders(img);
        assert!(cropped.width() < 100);
        assert!(cropped.height() < 100);
        assert!(cropped.width() >= 50);
        assert!(cropped.height() >= 40);
    }

    #[test]
    fn test_document_regions_split() {
        let img = GrayImage::from_pixel(80, 100, Luma([255]));
        let regions = ImageNormalizer::new().document_regions(&img);
        assert_eq!(regions.header.height(), 25);
        assert_eq!(regions.body.height(), 50);
        assert_eq!(regions.footer.height(), 25);
        assert_eq!(regions.header.width(), 80);
    }
}
