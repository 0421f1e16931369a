use image::GrayImage;

use crate::config::ValidatorConfig;
use crate::errors::{DiagnosisError, Result};

/// Variance of the 4-neighbour Laplacian response, borders replicated.
///
/// Low values mean a blurry or flat image, very high values mean noise or a
/// busy scene.
pub fn laplacian_variance(gray: &GrayImage) -> Result<f64> {
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return Err(DiagnosisError::Analysis(format!(
            "Laplacian needs at least 3x3 pixels, got {}x{}",
            width, height
        )));
    }

    let at = |x: u32, y: u32| gray.get_pixel(x, y)[0] as f64;

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for y in 0..height {
        let up = y.saturating_sub(1);
        let down = (y + 1).min(height - 1);
        for x in 0..width {
            let left = x.saturating_sub(1);
            let right = (x + 1).min(width - 1);

            let response = at(x, up) + at(x, down) + at(left, y) + at(right, y) - 4.0 * at(x, y);
            sum += response;
            sum_sq += response * response;
        }
    }

    let n = (width * height) as f64;
    let mean = sum / n;
    Ok((sum_sq / n - mean * mean).max(0.0))
}

/// Mean Sobel gradient magnitude
pub fn mean_gradient_magnitude(gray: &GrayImage) -> Result<f64> {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return Err(DiagnosisError::Analysis("gradient of an empty image".to_string()));
    }

    let gradients = imageproc::gradients::sobel_gradients(gray);
    let total: f64 = gradients.pixels().map(|p| p[0] as f64).sum();

    Ok(total / (width as f64 * height as f64))
}

/// Texture sub-score: half from Laplacian variance, half from gradient magnitude
pub fn texture_score(gray: &GrayImage, config: &ValidatorConfig) -> Result<f64> {
    let variance = laplacian_variance(gray)?;
    let gradient = mean_gradient_magnitude(gray)?;
    log::debug!("Texture: Laplacian variance {:.1}, mean gradient {:.1}", variance, gradient);

    let score = 0.5 * config.laplacian_band.score(variance) + 0.5 * config.gradient_band.score(gradient);
    Ok(score.clamp(0.0, 1.0))
}
