//! Aspect-ratio check against the reference's dominant contour.

use image::{imageops, RgbImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use tracing::debug;

/// Sigma equivalent to a 5x5 Gaussian kernel.
const BLUR_SIGMA: f32 = 1.1;
const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct ShapeValidator;

impl ShapeValidator {
    /// Width / height of the bounding rectangle of the largest external
    /// contour, or of the whole image when no contour is found.
    pub fn aspect_ratio(image: &RgbImage) -> f32 {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return 1.0;
        }

        let gray = imageops::grayscale(image);
        let blurred = gaussian_blur_f32(&gray, BLUR_SIGMA);
        let edges = canny(&blurred, CANNY_LOW, CANNY_HIGH);
        let contours = find_contours::<i32>(&edges);

        let mut best: Option<(f64, &Contour<i32>)> = None;
        for contour in contours
            .iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        {
            let area = polygon_area(contour);
            if best.map_or(true, |(best_area, _)| area > best_area) {
                best = Some((area, contour));
            }
        }

        if let Some((_, contour)) = best {
            if let Some((bw, bh)) = bounding_size(contour) {
                if bh > 0 {
                    return bw as f32 / bh as f32;
                }
            }
        }
        w as f32 / h as f32
    }

    /// `expected <= 0` means "no constraint". Otherwise `actual` must lie in
    /// `[expected * (1 - tolerance), expected * (1 + tolerance)]`, inclusive.
    pub fn validate(actual: f32, expected: f32, tolerance: f32) -> bool {
        if expected <= 0.0 {
            return true;
        }
        let min = expected * (1.0 - tolerance);
        let max = expected * (1.0 + tolerance);
        let valid = min <= actual && actual <= max;
        debug!(actual, expected, tolerance, valid, "shape validation");
        valid
    }
}

/// Shoelace area of the contour polygon.
fn polygon_area(contour: &Contour<i32>) -> f64 {
    let points = &contour.points;
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0i64;
    for i in 0..points.len() {
        let a = points[i];
        let b = points[(i + 1) % points.len()];
        twice += a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64;
    }
    (twice as f64 / 2.0).abs()
}

/// Inclusive pixel width and height spanned by the contour.
fn bounding_size(contour: &Contour<i32>) -> Option<(i32, i32)> {
    let first = contour.points.first()?;
    let (mut min_x, mut max_x, mut min_y, mut max_y) = (first.x, first.x, first.y, first.y);
    for p in &contour.points {
        min_x = min_x.min(p.x);
        max_x = max_x.max(p.x);
        min_y = min_y.min(p.y);
        max_y = max_y.max(p.y);
    }
    Some((max_x - min_x + 1, max_y - min_y + 1))
}
