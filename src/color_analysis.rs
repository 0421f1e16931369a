// Color-based validator checks: green content and channel distribution

use image::RgbImage;

use crate::config::ValidatorConfig;
use crate::errors::{DiagnosisError, Result};
use crate::image_utils::{channel_histograms, histogram_mean_std, luma, rgb_to_hsv};

/// Fraction of pixels falling inside any of the configured leaf-colour HSV ranges
pub fn green_fraction(image: &RgbImage, config: &ValidatorConfig) -> Result<f64> {
    let total = image.width() as u64 * image.height() as u64;
    if total == 0 {
        return Err(DiagnosisError::Analysis("green content of an empty image".to_string()));
    }

    let green = image
        .pixels()
        .filter(|p| {
            let hsv = rgb_to_hsv(p);
            config.green_ranges.iter().any(|range| range.contains(hsv))
        })
        .count() as u64;

    Ok(green as f64 / total as f64)
}

/// Map a green fraction to a score.
///
/// Near-zero green scores 0, a frame that is almost entirely green scores
/// `green_saturated_score` (whole plant rather than a single leaf), anything
/// in between earns `fraction * green_gain`, capped at 1.0.
pub fn score_green_fraction(fraction: f64, config: &ValidatorConfig) -> f64 {
    if fraction < config.green_min_fraction {
        0.0
    } else if fraction > config.green_max_fraction {
        config.green_saturated_score
    } else {
        (fraction * config.green_gain).min(1.0)
    }
}

/// Green-content sub-score
pub fn green_content_score(image: &RgbImage, config: &ValidatorConfig) -> Result<f64> {
    let fraction = green_fraction(image, config)?;
    log::debug!("Green pixel fraction: {:.3}", fraction);
    Ok(score_green_fraction(fraction, config))
}

/// Raw measures behind the color-distribution sub-score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorStats {
    /// Mean green minus mean of red and blue over mid-intensity pixels, scaled to [-1, 1]
    pub green_dominance: f64,
    /// Per-channel standard deviation averaged over R, G and B
    pub channel_std: f64,
}

/// Compute green dominance and channel spread from per-channel histograms
pub fn color_stats(image: &RgbImage, config: &ValidatorConfig) -> Result<ColorStats> {
    let [low, high] = config.mid_intensity;

    let all = channel_histograms(image, |_| true);
    let mut std_sum = 0.0;
    for histogram in &all {
        let (_, std) = histogram_mean_std(histogram).ok_or_else(|| {
            DiagnosisError::Analysis("color distribution of an empty image".to_string())
        })?;
        std_sum += std;
    }

    let mid = channel_histograms(image, |p| {
        let y = luma(p);
        y >= low && y <= high
    });
    let green_dominance = match (
        histogram_mean_std(&mid[0]),
        histogram_mean_std(&mid[1]),
        histogram_mean_std(&mid[2]),
    ) {
        (Some((r, _)), Some((g, _)), Some((b, _))) => (g - (r + b) / 2.0) / 255.0,
        // nothing in the mid band: no evidence either way
        _ => 0.0,
    };

    Ok(ColorStats {
        green_dominance,
        channel_std: std_sum / 3.0,
    })
}

/// Color-distribution sub-score: half from green dominance, half from channel spread
pub fn color_distribution_score(image: &RgbImage, config: &ValidatorConfig) -> Result<f64> {
    let stats = color_stats(image, config)?;
    log::debug!(
        "Color stats: green dominance {:.3}, channel std {:.1}",
        stats.green_dominance,
        stats.channel_std
    );

    let dominance = config.green_dominance_band.score(stats.green_dominance);
    let spread = config.channel_std_band.score(stats.channel_std);

    Ok((0.5 * dominance + 0.5 * spread).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use image::Rgb;

    fn config() -> ValidatorConfig {
        ValidatorConfig::default()
    }

    #[test]
    fn red_image_has_no_green() {
        let red = RgbImage::from_pixel(100, 100, Rgb([220, 20, 20]));
        assert_approx_eq!(green_fraction(&red, &config()).unwrap(), 0.0);
        assert_approx_eq!(green_content_score(&red, &config()).unwrap(), 0.0);
    }

    #[test]
    fn yellowing_tissue_counts_as_leaf_colour() {
        // hue ~ 27 on the OpenCV scale
        let yellowing = RgbImage::from_pixel(10, 10, Rgb([170, 160, 40]));
        assert_approx_eq!(green_fraction(&yellowing, &config()).unwrap(), 1.0);
    }

    #[test]
    fn green_score_piecewise() {
        let c = config();
        assert_approx_eq!(score_green_fraction(0.05, &c), 0.0);
        assert_approx_eq!(score_green_fraction(0.25, &c), 0.5);
        assert_approx_eq!(score_green_fraction(0.6, &c), 1.0);
        assert_approx_eq!(score_green_fraction(0.95, &c), c.green_saturated_score);
    }

    #[test]
    fn half_green_frame_scores_full() {
        let mut image = RgbImage::from_pixel(100, 100, Rgb([240, 240, 240]));
        for y in 0..50 {
            for x in 0..100 {
                image.put_pixel(x, y, Rgb([40, 140, 40]));
            }
        }
        assert_approx_eq!(green_fraction(&image, &config()).unwrap(), 0.5);
        assert_approx_eq!(green_content_score(&image, &config()).unwrap(), 1.0);
    }

    #[test]
    fn empty_image_is_an_analysis_error() {
        let empty = RgbImage::new(0, 0);
        assert!(green_fraction(&empty, &config()).is_err());
        assert!(color_stats(&empty, &config()).is_err());
    }

    #[test]
    fn green_dominates_on_leaf_pixels() {
        let mut image = RgbImage::from_pixel(60, 60, Rgb([235, 235, 235]));
        for y in 10..50 {
            for x in 10..50 {
                image.put_pixel(x, y, Rgb([40, 140, 40]));
            }
        }

        let stats = color_stats(&image, &config()).unwrap();
        assert_approx_eq!(stats.green_dominance, 100.0 / 255.0, 1e-9);
        assert!(stats.channel_std > 10.0);
        assert!(color_distribution_score(&image, &config()).unwrap() > 0.9);
    }

    #[test]
    fn flat_gray_image_scores_low() {
        let gray = RgbImage::from_pixel(60, 60, Rgb([128, 128, 128]));
        let stats = color_stats(&gray, &config()).unwrap();
        assert_approx_eq!(stats.green_dominance, 0.0);
        assert_approx_eq!(stats.channel_std, 0.0);
        assert_approx_eq!(color_distribution_score(&gray, &config()).unwrap(), 0.1);
    }
}
