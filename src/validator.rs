// Heuristic pre-filter deciding whether a photo plausibly shows a single coffee leaf

use image::RgbImage;
use serde::Serialize;

use crate::color_analysis::{color_distribution_score, green_content_score};
use crate::config::{ScoreWeights, ValidatorConfig};
use crate::errors::Result;
use crate::image_utils::to_grayscale;
use crate::shape_analysis::shape_score;
use crate::texture_analysis::texture_score;

/// The five independent sub-scores, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct SubScores {
    pub green_content: f64,
    pub shape: f64,
    pub texture: f64,
    pub color_distribution: f64,
    pub size_quality: f64,
}

impl SubScores {
    pub fn weighted_total(&self, weights: &ScoreWeights) -> f64 {
        self.green_content * weights.green
            + self.shape * weights.shape
            + self.texture * weights.texture
            + self.color_distribution * weights.color
            + self.size_quality * weights.size
    }
}

/// Why an image was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Unreadable,
    TooSmall,
    NoPlantMaterial,
    NoLeafShape,
    Unsuitable,
}

impl RejectReason {
    pub fn message(&self) -> &'static str {
        match self {
            RejectReason::Unreadable => "Could not load image file",
            RejectReason::TooSmall => "Image is too small for analysis",
            RejectReason::NoPlantMaterial => "Image doesn't appear to contain plant/leaf material",
            RejectReason::NoLeafShape => {
                "No leaf-like shape found; the image may show the whole plant or multiple leaves"
            }
            RejectReason::Unsuitable => "Image quality or content not suitable for analysis",
        }
    }

    pub fn suggestion(&self) -> &'static str {
        match self {
            RejectReason::Unreadable => "Please upload a valid image file (JPG, PNG, etc.)",
            RejectReason::TooSmall => "Please upload a higher-resolution photo of a single coffee leaf",
            RejectReason::NoPlantMaterial => "Please upload a clear photo of a coffee leaf",
            RejectReason::NoLeafShape => {
                "Please upload a photo focusing on a single coffee leaf for better accuracy"
            }
            RejectReason::Unsuitable => "Please upload a clear, well-lit photo of a single coffee leaf",
        }
    }
}

/// Verdict of the leaf validator. Created once per image, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationScore {
    #[serde(flatten)]
    pub scores: SubScores,
    /// Weighted sum of the sub-scores
    #[serde(rename = "total")]
    pub confidence: f64,
    #[serde(skip)]
    pub is_valid: bool,
    #[serde(skip)]
    pub reason: Option<RejectReason>,
}

impl ValidationScore {
    /// Immediate rejection with every score at zero
    pub fn rejected(reason: RejectReason) -> Self {
        Self {
            scores: SubScores::default(),
            confidence: 0.0,
            is_valid: false,
            reason: Some(reason),
        }
    }
}

/// Scores photos against the configured leaf heuristics
#[derive(Debug, Clone)]
pub struct LeafValidator {
    config: ValidatorConfig,
}

impl LeafValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Score a decoded image
    pub fn validate(&self, image: &RgbImage) -> ValidationScore {
        let (width, height) = image.dimensions();
        if width.min(height) < self.config.min_dimension {
            log::info!(
                "Image {}x{} is below the {} pixel minimum",
                width, height, self.config.min_dimension
            );
            return ValidationScore::rejected(RejectReason::TooSmall);
        }

        let gray = to_grayscale(image);
        let scores = SubScores {
            green_content: self.guarded("green content", green_content_score(image, &self.config)),
            shape: self.guarded("shape", shape_score(&gray, &self.config)),
            texture: self.guarded("texture", texture_score(&gray, &self.config)),
            color_distribution: self.guarded(
                "color distribution",
                color_distribution_score(image, &self.config),
            ),
            size_quality: self.size_score(width, height),
        };

        self.decide(scores)
    }

    /// Size and aspect sub-score
    pub fn size_score(&self, width: u32, height: u32) -> f64 {
        let c = &self.config;
        let short = width.min(height);
        if short < c.min_dimension || short == 0 {
            return 0.0;
        }

        let aspect = width.max(height) as f64 / short as f64;
        if aspect <= c.size_full_credit_aspect {
            1.0
        } else if aspect > c.size_extreme_aspect {
            c.size_extreme_score
        } else {
            let t = (aspect - c.size_full_credit_aspect) / (c.size_extreme_aspect - c.size_full_credit_aspect);
            1.0 - t * (1.0 - c.size_slide_floor)
        }
    }

    /// Combine sub-scores into the verdict
    pub fn decide(&self, scores: SubScores) -> ValidationScore {
        let c = &self.config;
        let confidence = scores.weighted_total(&c.weights).clamp(0.0, 1.0);

        log::info!(
            "Validation scores - green: {:.2}, shape: {:.2}, texture: {:.2}, color: {:.2}, size: {:.2} -> {:.2}",
            scores.green_content,
            scores.shape,
            scores.texture,
            scores.color_distribution,
            scores.size_quality,
            confidence
        );

        let too_little_green = scores.green_content < c.green_floor;
        if confidence >= c.reject_threshold && !too_little_green {
            return ValidationScore {
                scores,
                confidence,
                is_valid: true,
                reason: None,
            };
        }

        let reason = if too_little_green {
            RejectReason::NoPlantMaterial
        } else if scores.shape < c.shape_floor {
            RejectReason::NoLeafShape
        } else {
            RejectReason::Unsuitable
        };

        ValidationScore {
            scores,
            confidence,
            is_valid: false,
            reason: Some(reason),
        }
    }

    /// A failed sub-check never aborts validation; it takes the configured score
    fn guarded(&self, check: &str, result: Result<f64>) -> f64 {
        match result {
            Ok(score) if score.is_finite() => score.clamp(0.0, 1.0),
            Ok(score) => {
                log::warn!("{} check produced {}, using {:.2}", check, score, self.config.failed_check_score);
                self.config.failed_check_score
            }
            Err(e) => {
                log::warn!("{} check failed ({}), using {:.2}", check, e, self.config.failed_check_score);
                self.config.failed_check_score
            }
        }
    }
}

impl Default for LeafValidator {
    fn default() -> Self {
        Self::new(ValidatorConfig::default())
    }
}
