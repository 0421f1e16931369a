// Thresholds, weights and service settings for the diagnosis pipeline

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{DiagnosisError, Result};

/// Top-level configuration, loaded from TOML
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub validator: ValidatorConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub advice: AdviceConfig,
}

/// Inclusive box in HSV space, OpenCV scale (H 0-180, S and V 0-255)
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvRange {
    #[inline]
    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|i| hsv[i] >= self.lower[i] && hsv[i] <= self.upper[i])
    }
}

/// Acceptable interval for a shape measure
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// 1.0 inside the range, decaying linearly to 0.0 over `falloff` outside it
    pub fn score(&self, value: f64, falloff: f64) -> f64 {
        let distance = if value < self.min {
            self.min - value
        } else if value > self.max {
            value - self.max
        } else {
            return 1.0;
        };

        if falloff <= 0.0 {
            return 0.0;
        }
        (1.0 - distance / falloff).clamp(0.0, 1.0)
    }
}

/// Banded score: values below `min` or above `max` get a fixed penalty score,
/// values in between earn `value / saturation`, capped at 1.0
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct Band {
    pub min: f64,
    pub max: f64,
    pub saturation: f64,
    pub below_score: f64,
    pub above_score: f64,
}

impl Band {
    pub fn score(&self, value: f64) -> f64 {
        if !value.is_finite() || value < self.min {
            self.below_score
        } else if value > self.max {
            self.above_score
        } else {
            (value / self.saturation).min(1.0)
        }
    }

    fn check(&self, name: &str) -> Result<()> {
        if self.min > self.max {
            return Err(DiagnosisError::Config(format!("{} band: min must be <= max", name)));
        }
        if self.saturation <= 0.0 {
            return Err(DiagnosisError::Config(format!("{} band: saturation must be > 0.0", name)));
        }
        check_unit(&format!("{} band below_score", name), self.below_score)?;
        check_unit(&format!("{} band above_score", name), self.above_score)
    }
}

/// Weights of the five validator sub-scores
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub green: f64,
    pub shape: f64,
    pub texture: f64,
    pub color: f64,
    pub size: f64,
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.green + self.shape + self.texture + self.color + self.size
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            green: 0.35,
            shape: 0.25,
            texture: 0.15,
            color: 0.15,
            size: 0.10,
        }
    }
}

/// Leaf validator thresholds
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Images narrower or shorter than this are rejected with confidence 0
    pub min_dimension: u32,

    // Green content
    pub green_ranges: Vec<HsvRange>,
    pub green_min_fraction: f64,
    pub green_max_fraction: f64,
    pub green_saturated_score: f64,
    pub green_gain: f64,

    // Shape
    pub canny_low: f32,
    pub canny_high: f32,
    pub edge_dilation: u8,
    pub max_contours: usize,
    pub min_contour_area_fraction: f64,
    pub max_contour_area_fraction: f64,
    pub aspect_ratio_range: ValueRange,
    pub circularity_range: ValueRange,
    pub solidity_range: ValueRange,
    pub range_falloff: f64,
    pub no_contour_score: f64,
    pub no_candidate_score: f64,

    // Texture
    pub laplacian_band: Band,
    pub gradient_band: Band,

    // Color distribution
    pub mid_intensity: [u8; 2],
    pub green_dominance_band: Band,
    pub channel_std_band: Band,

    // Size and aspect
    pub size_full_credit_aspect: f64,
    pub size_extreme_aspect: f64,
    pub size_slide_floor: f64,
    pub size_extreme_score: f64,

    // Combination
    pub weights: ScoreWeights,
    pub reject_threshold: f64,
    pub green_floor: f64,
    pub shape_floor: f64,

    /// Score given to a sub-check whose computation failed
    pub failed_check_score: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_dimension: 50,
            green_ranges: vec![
                // healthy green
                HsvRange { lower: [35, 40, 40], upper: [85, 255, 255] },
                // yellowing leaf tissue
                HsvRange { lower: [20, 40, 40], upper: [34, 255, 255] },
            ],
            green_min_fraction: 0.10,
            green_max_fraction: 0.80,
            green_saturated_score: 0.30,
            green_gain: 2.0,
            canny_low: 50.0,
            canny_high: 150.0,
            edge_dilation: 1,
            max_contours: 5,
            min_contour_area_fraction: 0.01,
            max_contour_area_fraction: 0.98,
            aspect_ratio_range: ValueRange::new(0.3, 3.0),
            circularity_range: ValueRange::new(0.3, 1.0),
            solidity_range: ValueRange::new(0.6, 1.0),
            range_falloff: 0.5,
            no_contour_score: 0.1,
            no_candidate_score: 0.2,
            laplacian_band: Band {
                min: 50.0,
                max: 3000.0,
                saturation: 1500.0,
                below_score: 0.1,
                above_score: 0.3,
            },
            gradient_band: Band {
                min: 8.0,
                max: 250.0,
                saturation: 40.0,
                below_score: 0.1,
                above_score: 0.3,
            },
            mid_intensity: [50, 200],
            green_dominance_band: Band {
                min: 0.02,
                max: 0.70,
                saturation: 0.15,
                below_score: 0.1,
                above_score: 0.4,
            },
            channel_std_band: Band {
                min: 10.0,
                max: 90.0,
                saturation: 35.0,
                below_score: 0.1,
                above_score: 0.3,
            },
            size_full_credit_aspect: 2.0,
            size_extreme_aspect: 5.0,
            size_slide_floor: 0.5,
            size_extreme_score: 0.2,
            weights: ScoreWeights::default(),
            reject_threshold: 0.30,
            green_floor: 0.20,
            shape_floor: 0.20,
            failed_check_score: 0.0,
        }
    }
}

/// Decision policy thresholds
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PolicyConfig {
    #[serde(default = "default_reliability_threshold")]
    pub reliability_threshold: f64,

    #[serde(default = "default_cross_check_floor")]
    pub cross_check_floor: f64,

    #[serde(default = "default_entropy_ceiling")]
    pub entropy_ceiling: f64,
}

fn default_reliability_threshold() -> f64 {
    0.70
}

fn default_cross_check_floor() -> f64 {
    0.40
}

fn default_entropy_ceiling() -> f64 {
    0.70
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            reliability_threshold: default_reliability_threshold(),
            cross_check_floor: default_cross_check_floor(),
            entropy_ceiling: default_entropy_ceiling(),
        }
    }
}

/// Classifier model settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ClassifierConfig {
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// Model input as [width, height]
    #[serde(default = "default_input_size")]
    pub input_size: [u32; 2],

    #[serde(default = "default_class_names")]
    pub class_names: Vec<String>,

    /// Label the model uses for "not a coffee leaf", if it has one
    #[serde(default)]
    pub reject_class: Option<String>,

    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
}

fn default_model_path() -> PathBuf {
    PathBuf::from("models/coffee_disease.onnx")
}

fn default_input_size() -> [u32; 2] {
    [128, 128]
}

fn default_class_names() -> Vec<String> {
    ["miner", "nodisease", "phoma", "rust"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_intra_threads() -> usize {
    1
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            input_size: default_input_size(),
            class_names: default_class_names(),
            reject_class: None,
            intra_threads: default_intra_threads(),
        }
    }
}

/// Remote language-model settings (OpenAI-compatible chat completions)
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AdviceConfig {
    #[serde(default = "default_advice_enabled")]
    pub enabled: bool,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Maximum chat messages sent upstream, the leading system message included
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_advice_enabled() -> bool {
    true
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    500
}

fn default_history_limit() -> usize {
    20
}

impl Default for AdviceConfig {
    fn default() -> Self {
        Self {
            enabled: default_advice_enabled(),
            api_base: default_api_base(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            history_limit: default_history_limit(),
        }
    }
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(DiagnosisError::Config(format!(
            "{} must be between 0.0 and 1.0 (got {})",
            name, value
        )));
    }
    Ok(())
}

fn check_range(name: &str, range: &ValueRange) -> Result<()> {
    if range.min > range.max {
        return Err(DiagnosisError::Config(format!("{}: min must be <= max", name)));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            DiagnosisError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;

        toml::from_str(&content).map_err(|source| DiagnosisError::ConfigLoad {
            source,
            path: path.to_path_buf(),
        })
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            DiagnosisError::Config(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, content)?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_validator()?;
        self.validate_policy()?;
        self.validate_classifier()?;
        self.validate_advice()
    }

    fn validate_validator(&self) -> Result<()> {
        let v = &self.validator;

        if v.min_dimension == 0 {
            return Err(DiagnosisError::Config("validator.min_dimension must be > 0".to_string()));
        }

        if v.green_ranges.is_empty() {
            return Err(DiagnosisError::Config(
                "validator.green_ranges must contain at least one range".to_string(),
            ));
        }
        for range in &v.green_ranges {
            if (0..3).any(|i| range.lower[i] > range.upper[i]) {
                return Err(DiagnosisError::Config(format!(
                    "validator.green_ranges: lower {:?} exceeds upper {:?}",
                    range.lower, range.upper
                )));
            }
        }

        check_unit("validator.green_min_fraction", v.green_min_fraction)?;
        check_unit("validator.green_max_fraction", v.green_max_fraction)?;
        if v.green_min_fraction >= v.green_max_fraction {
            return Err(DiagnosisError::Config(
                "validator.green_min_fraction must be < green_max_fraction".to_string(),
            ));
        }
        check_unit("validator.green_saturated_score", v.green_saturated_score)?;
        if v.green_gain <= 0.0 {
            return Err(DiagnosisError::Config("validator.green_gain must be > 0.0".to_string()));
        }

        if v.canny_low <= 0.0 || v.canny_low > v.canny_high {
            return Err(DiagnosisError::Config(
                "validator.canny_low must be > 0.0 and <= canny_high".to_string(),
            ));
        }
        if v.max_contours == 0 {
            return Err(DiagnosisError::Config("validator.max_contours must be > 0".to_string()));
        }
        check_unit("validator.min_contour_area_fraction", v.min_contour_area_fraction)?;
        check_unit("validator.max_contour_area_fraction", v.max_contour_area_fraction)?;
        if v.min_contour_area_fraction >= v.max_contour_area_fraction {
            return Err(DiagnosisError::Config(
                "validator.min_contour_area_fraction must be < max_contour_area_fraction".to_string(),
            ));
        }
        check_range("validator.aspect_ratio_range", &v.aspect_ratio_range)?;
        check_range("validator.circularity_range", &v.circularity_range)?;
        check_range("validator.solidity_range", &v.solidity_range)?;
        if v.range_falloff <= 0.0 {
            return Err(DiagnosisError::Config("validator.range_falloff must be > 0.0".to_string()));
        }
        check_unit("validator.no_contour_score", v.no_contour_score)?;
        check_unit("validator.no_candidate_score", v.no_candidate_score)?;

        v.laplacian_band.check("validator.laplacian")?;
        v.gradient_band.check("validator.gradient")?;
        v.green_dominance_band.check("validator.green_dominance")?;
        v.channel_std_band.check("validator.channel_std")?;
        if v.mid_intensity[0] > v.mid_intensity[1] {
            return Err(DiagnosisError::Config(
                "validator.mid_intensity must be [low, high] with low <= high".to_string(),
            ));
        }

        if v.size_full_credit_aspect < 1.0 || v.size_extreme_aspect <= v.size_full_credit_aspect {
            return Err(DiagnosisError::Config(
                "validator.size_extreme_aspect must be > size_full_credit_aspect >= 1.0".to_string(),
            ));
        }
        check_unit("validator.size_slide_floor", v.size_slide_floor)?;
        check_unit("validator.size_extreme_score", v.size_extreme_score)?;

        let w = &v.weights;
        for (name, value) in [
            ("green", w.green),
            ("shape", w.shape),
            ("texture", w.texture),
            ("color", w.color),
            ("size", w.size),
        ] {
            check_unit(&format!("validator.weights.{}", name), value)?;
        }
        if (w.sum() - 1.0).abs() > 1e-6 {
            return Err(DiagnosisError::Config(format!(
                "validator.weights must sum to 1.0 (got {:.6})",
                w.sum()
            )));
        }

        check_unit("validator.reject_threshold", v.reject_threshold)?;
        check_unit("validator.green_floor", v.green_floor)?;
        check_unit("validator.shape_floor", v.shape_floor)?;
        check_unit("validator.failed_check_score", v.failed_check_score)
    }

    fn validate_policy(&self) -> Result<()> {
        let p = &self.policy;
        check_unit("policy.reliability_threshold", p.reliability_threshold)?;
        check_unit("policy.cross_check_floor", p.cross_check_floor)?;
        check_unit("policy.entropy_ceiling", p.entropy_ceiling)?;

        if p.cross_check_floor < self.validator.reject_threshold {
            return Err(DiagnosisError::Config(
                "policy.cross_check_floor must be >= validator.reject_threshold".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_classifier(&self) -> Result<()> {
        let c = &self.classifier;

        if c.input_size[0] == 0 || c.input_size[1] == 0 {
            return Err(DiagnosisError::Config("classifier.input_size must be non-zero".to_string()));
        }
        if c.class_names.len() < 2 {
            return Err(DiagnosisError::Config(
                "classifier.class_names must list at least two classes".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for name in &c.class_names {
            if name.trim().is_empty() {
                return Err(DiagnosisError::Config("classifier.class_names contains an empty name".to_string()));
            }
            if !seen.insert(name.as_str()) {
                return Err(DiagnosisError::Config(format!(
                    "classifier.class_names contains '{}' twice",
                    name
                )));
            }
        }

        if let Some(reject) = &c.reject_class {
            if !seen.contains(reject.as_str()) {
                return Err(DiagnosisError::Config(format!(
                    "classifier.reject_class '{}' is not one of class_names",
                    reject
                )));
            }
        }

        if c.intra_threads == 0 {
            return Err(DiagnosisError::Config("classifier.intra_threads must be > 0".to_string()));
        }
        Ok(())
    }

    fn validate_advice(&self) -> Result<()> {
        let a = &self.advice;

        if a.timeout_secs == 0 {
            return Err(DiagnosisError::Config("advice.timeout_secs must be > 0".to_string()));
        }
        if a.api_base.trim().is_empty() || a.model.trim().is_empty() {
            return Err(DiagnosisError::Config("advice.api_base and advice.model must be set".to_string()));
        }
        if !(0.0..=2.0).contains(&a.temperature) {
            return Err(DiagnosisError::Config("advice.temperature must be between 0.0 and 2.0".to_string()));
        }
        if a.history_limit < 2 {
            return Err(DiagnosisError::Config("advice.history_limit must be >= 2".to_string()));
        }
        Ok(())
    }
}
