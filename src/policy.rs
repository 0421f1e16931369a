// Decision policy: maps a validator verdict and a classifier prediction to a diagnosis status

use serde::Serialize;

use crate::classifier::PredictionResult;
use crate::config::PolicyConfig;
use crate::validator::ValidationScore;

/// Overall outcome of one diagnosis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisStatus {
    Success,
    LowQualityPrediction,
    InvalidImage,
}

impl DiagnosisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosisStatus::Success => "success",
            DiagnosisStatus::LowQualityPrediction => "low_quality_prediction",
            DiagnosisStatus::InvalidImage => "invalid_image",
        }
    }
}

/// Why the policy landed where it did
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accepted,
    /// Validator rejected the image outright
    ValidatorRejected,
    /// The model itself placed the image in its reject class
    RejectClass(String),
    /// Validator passed the image, but without enough margin to trust the classifier
    WeakValidation { confidence: f64 },
    LowConfidence { confidence: f64 },
    Ambiguous { entropy: f64 },
}

impl Verdict {
    pub fn status(&self) -> DiagnosisStatus {
        match self {
            Verdict::Accepted => DiagnosisStatus::Success,
            Verdict::ValidatorRejected | Verdict::RejectClass(_) | Verdict::WeakValidation { .. } => {
                DiagnosisStatus::InvalidImage
            }
            Verdict::LowConfidence { .. } | Verdict::Ambiguous { .. } => {
                DiagnosisStatus::LowQualityPrediction
            }
        }
    }

    /// User-facing explanation, None when accepted or when the validator supplies its own
    pub fn message(&self) -> Option<String> {
        match self {
            Verdict::Accepted | Verdict::ValidatorRejected => None,
            Verdict::RejectClass(label) => Some(format!(
                "The model recognised this image as '{}', not a coffee leaf",
                label
            )),
            Verdict::WeakValidation { confidence } => Some(format!(
                "Image quality is questionable (validation score {:.2}), so the prediction is not trusted",
                confidence
            )),
            Verdict::LowConfidence { confidence } => Some(format!(
                "Low confidence prediction ({:.1}%)",
                confidence * 100.0
            )),
            Verdict::Ambiguous { entropy } => Some(format!(
                "Prediction is split between several classes (entropy {:.2})",
                entropy
            )),
        }
    }
}

/// Pure function of (validation, prediction); holds no state between requests
#[derive(Debug, Clone)]
pub struct DecisionPolicy {
    config: PolicyConfig,
    reject_class: Option<String>,
}

impl DecisionPolicy {
    pub fn new(config: PolicyConfig, reject_class: Option<String>) -> Self {
        Self { config, reject_class }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Evaluate in order: validator rejection, reject class, top-1
    /// confidence, entropy, validator cross-check.
    pub fn evaluate(&self, validation: &ValidationScore, prediction: &PredictionResult) -> Verdict {
        if !validation.is_valid {
            return Verdict::ValidatorRejected;
        }

        if let Some(reject) = &self.reject_class {
            if &prediction.label == reject {
                return Verdict::RejectClass(reject.clone());
            }
        }

        if prediction.confidence < self.config.reliability_threshold {
            return Verdict::LowConfidence {
                confidence: prediction.confidence,
            };
        }

        if prediction.entropy > self.config.entropy_ceiling {
            return Verdict::Ambiguous {
                entropy: prediction.entropy,
            };
        }

        // only a confident prediction reaches the cross-check
        if validation.confidence < self.config.cross_check_floor {
            return Verdict::WeakValidation {
                confidence: validation.confidence,
            };
        }

        Verdict::Accepted
    }

    /// Top-1 confidence is high enough to act on
    pub fn is_reliable(&self, prediction: &PredictionResult) -> bool {
        prediction.confidence >= self.config.reliability_threshold
    }
}
