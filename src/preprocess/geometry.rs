//! Skew estimation and correction.
//!
//! The skew angle is the orientation of the minimum-area rectangle bounding
//! the document's ink pixels, normalized to (−45°, 45°]. Correction rotates
//! the content by the negated angle with bicubic sampling; out-of-bounds
//! reads replicate the nearest edge pixel so rotation never introduces
//! black corners that would confuse binarization.

use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::geometry::min_area_rect;
use imageproc::point::Point;

/// Estimate the document skew in degrees, normalized to (−45°, 45°].
///
/// Foreground is the dark side of the Otsu split (ink on paper). Returns
/// 0.0 when there is too little ink to orient.
pub fn estimate_skew_angle(img: &GrayImage) -> f64 {
    let level = otsu_level(img);

    let mut points: Vec<Point<i32>> = Vec::new();
    for (x, y, pixel) in img.enumerate_pixels() {
        if pixel.0[0] < level {
            points.push(Point::new(x as i32, y as i32));
        }
    }
    if points.len() < 3 {
        return 0.0;
    }

    let corners = min_area_rect(&points);

    // Orientation of the rectangle's longer edge.
    let e0 = (
        (corners[1].x - corners[0].x) as f64,
        (corners[1].y - corners[0].y) as f64,
    );
    let e1 = (
        (corners[2].x - corners[1].x) as f64,
        (corners[2].y - corners[1].y) as f64,
    );
    let (dx, dy) = if e0.0.hypot(e0.1) >= e1.0.hypot(e1.1) {
        e0
    } else {
        e1
    };
    if dx == 0.0 && dy == 0.0 {
        return 0.0;
    }

    let mut angle = dy.atan2(dx).to_degrees();
    while angle > 45.0 {
        angle -= 90.0;
    }
    while angle <= -45.0 {
        angle += 90.0;
    }
    angle
}

/// Rotate image content by `angle_deg` about the center, keeping the
/// original dimensions. Bicubic interpolation, edge-replicate borders.
pub fn rotate_about_center(img: &GrayImage, angle_deg: f64) -> GrayImage {
    let (w, h) = img.dimensions();
    let cx = (w as f64 - 1.0) / 2.0;
    let cy = (h as f64 - 1.0) / 2.0;
    let theta = angle_deg.to_radians();
    let (sin, cos) = theta.sin_cos();

    let mut out = GrayImage::new(w, h);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        // Inverse mapping: sample the source at the un-rotated position.
        let sx = cx + dx * cos + dy * sin;
        let sy = cy - dx * sin + dy * cos;
        *pixel = Luma([sample_bicubic_replicate(img, sx, sy)]);
    }
    out
}

/// Catmull-Rom cubic kernel (a = −0.5, the classic bicubic choice).
fn cubic_weight(t: f64) -> f64 {
    let a = -0.5;
    let t = t.abs();
    if t < 1.0 {
        (a + 2.0) * t * t * t - (a + 3.0) * t * t + 1.0
    } else if t < 2.0 {
        a * t * t * t - 5.0 * a * t * t + 8.0 * a * t - 4.0 * a
    } else {
        0.0
    }
}

/// Sample with a 4×4 bicubic kernel, clamping reads to the image bounds
/// (edge replication).
fn sample_bicubic_replicate(img: &GrayImage, sx: f64, sy: f64) -> u8 {
    let (w, h) = img.dimensions();
    let x0 = sx.floor() as i64;
    let y0 = sy.floor() as i64;
    let fx = sx - x0 as f64;
    let fy = sy - y0 as f64;

    let mut value = 0.0;
    let mut weight_sum = 0.0;
    for j in -1..=2i64 {
        let wy = cubic_weight(fy - j as f64);
        if wy == 0.0 {
            continue;
        }
        let py = (y0 + j).clamp(0, h as i64 - 1) as u32;
        for i in -1..=2i64 {
            let wx = cubic_weight(fx - i as f64);
            if wx == 0.0 {
                continue;
            }
            let px = (x0 + i).clamp(0, w as i64 - 1) as u32;
            let weight = wx * wy;
            value += weight * img.get_pixel(px, py).0[0] as f64;
            weight_sum += weight;
        }
    }
    if weight_sum == 0.0 {
        return img.get_pixel(
            (x0.clamp(0, w as i64 - 1)) as u32,
            (y0.clamp(0, h as i64 - 1)) as u32,
        )
        .0[0];
    }
    (value / weight_sum).round().clamp(0.0, 255.0) as u8
}
