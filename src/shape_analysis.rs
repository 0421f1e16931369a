// src/shape_analysis.rs - Contour geometry and the leaf-shape sub-score

use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::geometry::{arc_length, convex_hull};
use imageproc::point::Point;
use std::f64::consts::PI;

use crate::config::ValidatorConfig;
use crate::errors::{DiagnosisError, Result};

/// Geometry of one candidate contour
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeMeasures {
    pub area: f64,
    /// Bounding box width / height
    pub aspect_ratio: f64,
    /// 4π·area / perimeter², corrected for digitization, capped at 1.0
    pub circularity: f64,
    /// area / convex hull area
    pub solidity: f64,
}

/// Area of a closed polygon (shoelace formula)
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }

    let n = points.len();
    let twice_area: i64 = (0..n)
        .map(|i| {
            let (a, b) = (points[i], points[(i + 1) % n]);
            a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64
        })
        .sum();

    twice_area.abs() as f64 / 2.0
}

/// Calculate the perimeter of a closed contour
pub fn calculate_perimeter(contour_points: &[Point<i32>]) -> f64 {
    arc_length(contour_points, true)
}

/// Adjust a pixel-traced perimeter for digitization artifacts
pub fn correct_perimeter(perimeter: f64, circularity_estimate: f64) -> f64 {
    // Stair-stepped outlines overestimate smooth boundaries, most for round shapes
    if circularity_estimate > 0.75 {
        perimeter * 0.945
    } else if circularity_estimate > 0.5 {
        perimeter * 0.975
    } else {
        perimeter * 0.99
    }
}

/// Calculate circularity of the shape (4π * Area / Perimeter²)
/// 1.0 for a perfect circle, < 1.0 for other shapes
pub fn calculate_circularity(area: f64, perimeter: f64) -> f64 {
    if perimeter <= 0.0 {
        return 0.0;
    }

    let initial_circularity = (4.0 * PI * area) / (perimeter * perimeter);
    let corrected_perimeter = correct_perimeter(perimeter, initial_circularity);

    ((4.0 * PI * area) / (corrected_perimeter * corrected_perimeter)).min(1.0)
}

/// Bounding box (width, height) in pixels, both ends inclusive
pub fn bounding_box_dimensions(points: &[Point<i32>]) -> (f64, f64) {
    let xs = points.iter().map(|p| p.x);
    let ys = points.iter().map(|p| p.y);
    match (xs.clone().min(), xs.max(), ys.clone().min(), ys.max()) {
        (Some(min_x), Some(max_x), Some(min_y), Some(max_y)) => {
            ((max_x - min_x + 1) as f64, (max_y - min_y + 1) as f64)
        }
        _ => (0.0, 0.0),
    }
}

/// Measure aspect ratio, circularity and solidity of a closed contour.
/// Returns None for degenerate contours with no enclosed area.
pub fn measure_contour(points: &[Point<i32>]) -> Option<ShapeMeasures> {
    let area = polygon_area(points);
    if area <= 0.0 {
        return None;
    }

    let (width, height) = bounding_box_dimensions(points);
    let hull_area = polygon_area(&convex_hull(points));
    let solidity = if hull_area > 0.0 { (area / hull_area).min(1.0) } else { 0.0 };

    Some(ShapeMeasures {
        area,
        aspect_ratio: width / height,
        circularity: calculate_circularity(area, calculate_perimeter(points)),
        solidity,
    })
}

/// Score one candidate: the mean of how well each measure sits in its acceptable range
pub fn score_measures(measures: &ShapeMeasures, config: &ValidatorConfig) -> f64 {
    let falloff = config.range_falloff;
    let aspect = config.aspect_ratio_range.score(measures.aspect_ratio, falloff);
    let circularity = config.circularity_range.score(measures.circularity, falloff);
    let solidity = config.solidity_range.score(measures.solidity, falloff);

    (aspect + circularity + solidity) / 3.0
}

/// Outer, top-level contours of the edge map
pub fn external_contours(gray: &GrayImage, config: &ValidatorConfig) -> Vec<Vec<Point<i32>>> {
    let edges = imageproc::edges::canny(gray, config.canny_low, config.canny_high);

    // close one-pixel gaps so a leaf outline traces as a single closed border
    let edges = if config.edge_dilation > 0 {
        imageproc::morphology::dilate(&edges, Norm::LInf, config.edge_dilation)
    } else {
        edges
    };

    find_contours::<i32>(&edges)
        .into_iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer) && c.parent.is_none())
        .map(|c| c.points)
        .collect()
}

/// Shape sub-score: best leaf-likeness among the largest external contours
pub fn shape_score(gray: &GrayImage, config: &ValidatorConfig) -> Result<f64> {
    let (width, height) = gray.dimensions();
    let image_area = width as f64 * height as f64;
    if image_area == 0.0 {
        return Err(DiagnosisError::Analysis("shape analysis of an empty image".to_string()));
    }

    let contours = external_contours(gray, config);
    if contours.is_empty() {
        log::debug!("No contours found");
        return Ok(config.no_contour_score);
    }

    let mut candidates: Vec<ShapeMeasures> = contours
        .iter()
        .filter_map(|points| measure_contour(points))
        .filter(|m| {
            let fraction = m.area / image_area;
            fraction >= config.min_contour_area_fraction && fraction <= config.max_contour_area_fraction
        })
        .collect();

    candidates.sort_by(|a, b| b.area.total_cmp(&a.area));
    candidates.truncate(config.max_contours);

    let best = candidates
        .iter()
        .map(|m| {
            let score = score_measures(m, config);
            log::debug!(
                "Contour area {:.0}: aspect {:.2}, circularity {:.2}, solidity {:.2} -> {:.2}",
                m.area, m.aspect_ratio, m.circularity, m.solidity, score
            );
            score
        })
        .fold(None, |best: Option<f64>, s| Some(best.map_or(s, |b| b.max(s))));

    Ok(best.unwrap_or(config.no_candidate_score))
}
