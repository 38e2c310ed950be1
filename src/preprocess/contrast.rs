//! Binarization helpers and local contrast enhancement.

use image::GrayImage;
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::filter::gaussian_blur_f32;

/// RMS contrast: standard deviation of pixel intensities.
pub fn intensity_std_dev(img: &GrayImage) -> f64 {
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let count = img.pixels().len() as f64;
    if count == 0.0 {
        return 0.0;
    }
    for pixel in img.pixels() {
        let v = pixel.0[0] as f64;
        sum += v;
        sum_sq += v * v;
    }
    let mean = sum / count;
    ((sum_sq / count) - mean * mean).max(0.0).sqrt()
}

/// Global Otsu binarization. Works well when the histogram is bimodal,
/// i.e. the page has decent contrast.
pub fn otsu_binarize(img: &GrayImage) -> GrayImage {
    let level = otsu_level(img);
    threshold(img, level, ThresholdType::Binary)
}

/// Gaussian-weighted local adaptive threshold.
///
/// Each pixel is compared against the Gaussian-weighted mean of its
/// neighborhood minus a small constant. Tolerates uneven illumination
/// that a single global threshold cannot.
pub fn adaptive_binarize(img: &GrayImage, block_size: u32, c: f64) -> GrayImage {
    // Sigma chosen for the block size the same way OpenCV derives it.
    let sigma = 0.3 * ((block_size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let local_mean = gaussian_blur_f32(img, sigma);

    let mut out = GrayImage::new(img.width(), img.height());
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let v = img.get_pixel(x, y).0[0] as f64;
        let mean = local_mean.get_pixel(x, y).0[0] as f64;
        pixel.0[0] = if v > mean - c { 255 } else { 0 };
    }
    out
}

/// Clip-limited adaptive histogram equalization (CLAHE).
///
/// The image is divided into a `grid`×`grid` tile grid; each tile gets a
/// clip-limited equalization lookup table, and pixels are mapped by
/// bilinear interpolation between the four surrounding tile tables to
/// avoid visible tile seams.
pub fn clahe(img: &GrayImage, clip_limit: f64, grid: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }
    let grid = grid.max(1);
    let tile_w = w.div_ceil(grid).max(1);
    let tile_h = h.div_ceil(grid).max(1);

    // Per-tile lookup tables.
    let mut luts = vec![[0u8; 256]; (grid * grid) as usize];
    for ty in 0..grid {
        for tx in 0..grid {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);
            if x0 >= w || y0 >= h {
                continue;
            }

            let mut hist = [0u64; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[img.get_pixel(x, y).0[0] as usize] += 1;
                }
            }
            let tile_pixels = ((x1 - x0) * (y1 - y0)) as u64;
            clip_histogram(&mut hist, clip_limit, tile_pixels);

            // Cumulative distribution → lookup table.
            let lut = &mut luts[(ty * grid + tx) as usize];
            let mut cumulative = 0u64;
            for (value, count) in hist.iter().enumerate() {
                cumulative += count;
                lut[value] = ((cumulative * 255) / tile_pixels.max(1)) as u8;
            }
        }
    }

    // Map each pixel by bilinear interpolation between tile tables.
    let mut out = GrayImage::new(w, h);
    let max_tile = grid as i64 - 1;
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let v = img.get_pixel(x, y).0[0] as usize;

        let gx = (x as f64 + 0.5) / tile_w as f64 - 0.5;
        let gy = (y as f64 + 0.5) / tile_h as f64 - 0.5;
        let tx0 = gx.floor() as i64;
        let ty0 = gy.floor() as i64;
        let fx = gx - tx0 as f64;
        let fy = gy - ty0 as f64;

        let tx0c = tx0.clamp(0, max_tile) as u32;
        let tx1c = (tx0 + 1).clamp(0, max_tile) as u32;
        let ty0c = ty0.clamp(0, max_tile) as u32;
        let ty1c = (ty0 + 1).clamp(0, max_tile) as u32;

        let top = luts[(ty0c * grid + tx0c) as usize][v] as f64 * (1.0 - fx)
            + luts[(ty0c * grid + tx1c) as usize][v] as f64 * fx;
        let bottom = luts[(ty1c * grid + tx0c) as usize][v] as f64 * (1.0 - fx)
            + luts[(ty1c * grid + tx1c) as usize][v] as f64 * fx;
        pixel.0[0] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Clip histogram bins at `clip_limit` times the uniform bin height and
/// redistribute the excess evenly.
fn clip_histogram(hist: &mut [u64; 256], clip_limit: f64, tile_pixels: u64) {
    let limit = ((clip_limit * tile_pixels as f64 / 256.0).ceil() as u64).max(1);
    let mut excess = 0u64;
    for count in hist.iter_mut() {
        if *count > limit {
            excess += *count - limit;
            *count = limit;
        }
    }
    let per_bin = excess / 256;
    let mut remainder = (excess % 256) as usize;
    for count in hist.iter_mut() {
        *count += per_bin;
        if remainder > 0 {
            *count += 1;
            remainder -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_std_dev_of_uniform_image_is_zero() {
        let img = GrayImage::from_pixel(32, 32, Luma([128]));
        assert!(intensity_std_dev(&img) < 1e-9);
    }

    #[test]
    fn test_std_dev_of_split_image() {
        // Half black, half white: std dev is 127.5.
        let mut img = GrayImage::new(32, 32);
        for (x, _, pixel) in img.enumerate_pixels_mut() {
            pixel.0[0] = if x < 16 { 0 } else { 255 };
        }
        assert!((intensity_std_dev(&img) - 127.5).abs() < 0.1);
    }

    #[test]
    fn test_otsu_binarize_yields_two_levels() {
        let mut img = GrayImage::new(32, 32);
        for (x, _, pixel) in img.enumerate_pixels_mut() {
            pixel.0[0] = if x < 16 { 40 } else { 210 };
        }
        let binary = otsu_binarize(&img);
        assert!(binary.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
        assert_eq!(binary.get_pixel(0, 0).0[0], 0);
        assert_eq!(binary.get_pixel(31, 0).0[0], 255);
    }

    #[test]
    fn test_adaptive_binarize_handles_illumination_gradient() {
        // Background brightness ramps across the page; dark dots on it
        // should binarize to ink on both the dim and bright side.
        let mut img = GrayImage::new(64, 64);
        for (x, _, pixel) in img.enumerate_pixels_mut() {
            pixel.0[0] = 100 + (x * 2) as u8;
        }
        img.put_pixel(10, 32, Luma([20]));
        img.put_pixel(54, 32, Luma([120]));
        let binary = adaptive_binarize(&img, 11, 2.0);
        assert_eq!(binary.get_pixel(10, 32).0[0], 0);
        assert_eq!(binary.get_pixel(54, 32).0[0], 0);
    }

    #[test]
    fn test_clahe_preserves_dimensions_and_spreads_histogram() {
        let mut img = GrayImage::new(64, 64);
        // Low-contrast content clustered around mid gray.
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            pixel.0[0] = 120 + ((x + y) % 16) as u8;
        }
        let out = clahe(&img, 2.0, 8);
        assert_eq!(out.dimensions(), (64, 64));
        let before = intensity_std_dev(&img);
        let after = intensity_std_dev(&out);
        assert!(after > before, "CLAHE should increase local contrast");
    }
}
