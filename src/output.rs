use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::classifier::PredictionResult;
use crate::errors::{DiagnosisError, Result};
use crate::policy::DiagnosisStatus;
use crate::validator::ValidationScore;

/// Result of one diagnosis, rendered as the single JSON document on stdout
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosisOutcome {
    pub status: DiagnosisStatus,

    /// Null unless a prediction was made
    pub predicted_class: Option<String>,

    pub confidence: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_probabilities: Option<BTreeMap<String, f64>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub entropy: Option<f64>,

    pub reliable: bool,

    /// Validator confidence
    pub image_quality: f64,

    /// Validator sub-scores and their weighted total
    pub validation: ValidationScore,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,

    pub advice: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_response: Option<String>,
}

pub const RETRY_SUGGESTION: &str =
    "For better accuracy, please upload a clearer photo of a single coffee leaf";

const UNCERTAIN_ADVICE: &str =
    "Prediction is uncertain. Try uploading a sharper photo of just one coffee leaf.";

impl DiagnosisOutcome {
    /// Image turned away before or despite classification; no label is reported
    pub fn invalid_image(validation: &ValidationScore, error: String, suggestion: &str) -> Self {
        Self {
            status: DiagnosisStatus::InvalidImage,
            predicted_class: None,
            confidence: 0.0,
            all_probabilities: None,
            entropy: None,
            reliable: false,
            image_quality: validation.confidence,
            validation: validation.clone(),
            error: Some(error),
            warning: None,
            suggestion: Some(suggestion.to_string()),
            advice: suggestion.to_string(),
            llm_response: None,
        }
    }

    /// Confident diagnosis
    pub fn success(validation: &ValidationScore, prediction: &PredictionResult, reliable: bool) -> Self {
        Self {
            status: DiagnosisStatus::Success,
            predicted_class: Some(prediction.label.clone()),
            confidence: prediction.confidence,
            all_probabilities: Some(prediction.probability_map()),
            entropy: Some(prediction.entropy),
            reliable,
            image_quality: validation.confidence,
            validation: validation.clone(),
            error: None,
            warning: None,
            suggestion: None,
            advice: format!(
                "The leaf is classified as **{}** with {:.1}% confidence.",
                prediction.label,
                prediction.confidence * 100.0
            ),
            llm_response: None,
        }
    }

    /// Best-guess label attached as advisory only
    pub fn low_quality(
        validation: &ValidationScore,
        prediction: &PredictionResult,
        reliable: bool,
        warning: String,
    ) -> Self {
        Self {
            status: DiagnosisStatus::LowQualityPrediction,
            warning: Some(warning),
            suggestion: Some(RETRY_SUGGESTION.to_string()),
            advice: UNCERTAIN_ADVICE.to_string(),
            ..Self::success(validation, prediction, reliable)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DiagnosisStatus::Success
    }

    /// Why the diagnosis is not a clean success, if it isn't
    pub fn problem(&self) -> Option<&str> {
        self.error.as_deref().or(self.warning.as_deref())
    }
}

/// Error document: `{"error": ..., "details": ..., "type": ...}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub error: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl ErrorReport {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
            kind: None,
        }
    }

    /// Summary line plus the underlying error's message and kind
    pub fn from_error(summary: &str, err: &DiagnosisError) -> Self {
        Self {
            error: summary.to_string(),
            details: Some(err.to_string()),
            kind: Some(err.kind().to_string()),
        }
    }
}

/// Anything the binary may print as its one result document
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Report {
    Diagnosis(DiagnosisOutcome),
    Error(ErrorReport),
}

impl Report {
    pub fn as_outcome(&self) -> Option<&DiagnosisOutcome> {
        match self {
            Report::Diagnosis(outcome) => Some(outcome),
            Report::Error(_) => None,
        }
    }
}

/// Write one compact JSON document and a newline
pub fn write_json<W: Write, T: Serialize>(mut writer: W, value: &T) -> Result<()> {
    serde_json::to_writer(&mut writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Print one JSON document to stdout
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let stdout = std::io::stdout();
    write_json(stdout.lock(), value)
}

/// Write pretty JSON to a file, creating parent directories
pub fn write_json_file<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> Result<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::{RejectReason, SubScores};
    use serde_json::Value;

    fn prediction() -> PredictionResult {
        let classes: Vec<String> = ["miner", "nodisease", "phoma", "rust"].iter().map(|s| s.to_string()).collect();
        PredictionResult::from_scores(&classes, &[0.02, 0.03, 0.05, 0.90]).unwrap()
    }

    fn passed() -> ValidationScore {
        ValidationScore {
            scores: SubScores {
                green_content: 0.9,
                shape: 0.7,
                texture: 0.5,
                color_distribution: 0.6,
                size_quality: 1.0,
            },
            confidence: 0.73,
            is_valid: true,
            reason: None,
        }
    }

    fn to_value<T: Serialize>(value: &T) -> Value {
        let mut buffer = Vec::new();
        write_json(&mut buffer, value).unwrap();
        assert_eq!(buffer.last(), Some(&b'\n'));
        serde_json::from_slice(&buffer).unwrap()
    }

    #[test]
    fn success_document_shape() {
        let outcome = DiagnosisOutcome::success(&passed(), &prediction(), true);
        let json = to_value(&outcome);

        assert_eq!(json["status"], "success");
        assert_eq!(json["predicted_class"], "rust");
        assert_eq!(json["reliable"], true);
        assert_eq!(json["advice"], "The leaf is classified as **rust** with 90.0% confidence.");
        assert_eq!(json["all_probabilities"].as_object().unwrap().len(), 4);
        assert_eq!(json["validation"]["green_content"], 0.9);
        assert!(json.get("error").is_none());
        assert!(json.get("llm_response").is_none());
    }

    #[test]
    fn invalid_image_has_null_class() {
        let rejected = ValidationScore::rejected(RejectReason::NoPlantMaterial);
        let reason = RejectReason::NoPlantMaterial;
        let outcome = DiagnosisOutcome::invalid_image(&rejected, reason.message().to_string(), reason.suggestion());
        let json = to_value(&outcome);

        assert_eq!(json["status"], "invalid_image");
        assert!(json["predicted_class"].is_null());
        assert_eq!(json["confidence"], 0.0);
        assert_eq!(json["advice"], json["suggestion"]);
        assert!(json.get("all_probabilities").is_none());
        assert_eq!(outcome.problem(), Some(reason.message()));
    }

    #[test]
    fn low_quality_keeps_advisory_label() {
        let outcome = DiagnosisOutcome::low_quality(&passed(), &prediction(), true, "Low confidence".to_string());

        assert_eq!(outcome.status, DiagnosisStatus::LowQualityPrediction);
        assert_eq!(outcome.predicted_class.as_deref(), Some("rust"));
        assert_eq!(outcome.suggestion.as_deref(), Some(RETRY_SUGGESTION));
        assert!(!outcome.is_success());
    }

    #[test]
    fn error_report_uses_type_key() {
        let err = DiagnosisError::Model("session failed".to_string());
        let json = to_value(&Report::Error(ErrorReport::from_error("Prediction failed", &err)));

        assert_eq!(json["error"], "Prediction failed");
        assert_eq!(json["type"], "ModelError");
        assert!(json["details"].as_str().unwrap().contains("session failed"));

        let bare = to_value(&ErrorReport::new("Image file not found: x.jpg"));
        assert_eq!(bare, serde_json::json!({"error": "Image file not found: x.jpg"}));
    }

    #[test]
    fn json_file_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.json");

        write_json_file(&serde_json::json!([{"role": "system", "content": "hi"}]), &path).unwrap();
        let written: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written[0]["role"], "system");
    }
}
