//! Contour helpers for the prey search and the backlight detection.

use image::GrayImage;
use imageproc::contours::find_contours;
use imageproc::point::Point;

/// Contours below this area are noise, not prey.
pub const MIN_PREY_CONTOUR_AREA: f64 = 10.0;

/// Shoelace area of a traced contour.
pub fn contour_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }

    let mut sum = 0i64;
    for i in 0..points.len() {
        let p = points[i];
        let q = points[(i + 1) % points.len()];
        sum += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }

    (sum.abs() as f64) / 2.0
}

/// Count the contours in a binary image with an area above
/// [`MIN_PREY_CONTOUR_AREA`]. More than one of these splitting the bright
/// background apart means something (a prey) is hanging into the frame.
pub fn count_significant_contours(img: &GrayImage) -> usize {
    find_contours::<i32>(img)
        .iter()
        .filter(|c| contour_area(&c.points) > MIN_PREY_CONTOUR_AREA)
        .count()
}

/// All contours of a binary image with their areas, for callers that need
/// the biggest blob.
pub fn contours_with_areas(img: &GrayImage) -> Vec<(Vec<Point<i32>>, f64)> {
    find_contours::<i32>(img)
        .into_iter()
        .map(|c| {
            let area = contour_area(&c.points);
            (c.points, area)
        })
        .collect()
}
