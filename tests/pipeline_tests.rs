use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use image::{Rgb, RgbImage};
use serde_json::Value;

use coffee_leaf_doctor_lib::advice::{AdviceProvider, ChatMessage, StaticAdvisor};
use coffee_leaf_doctor_lib::classifier::{Classifier, PredictionResult};
use coffee_leaf_doctor_lib::config::{Config, PolicyConfig};
use coffee_leaf_doctor_lib::errors::{DiagnosisError, Result};
use coffee_leaf_doctor_lib::output::Report;
use coffee_leaf_doctor_lib::policy::{DecisionPolicy, DiagnosisStatus};
use coffee_leaf_doctor_lib::validator::{LeafValidator, RejectReason};
use coffee_leaf_doctor_lib::{seed_history, DiagnosisOutcome, DiagnosisPipeline};

/// Classifier returning fixed scores and counting calls
struct FakeClassifier {
    classes: Vec<String>,
    scores: Vec<f32>,
    calls: Rc<Cell<usize>>,
}

impl Classifier for FakeClassifier {
    fn predict(&self, _image: &RgbImage) -> Result<PredictionResult> {
        self.calls.set(self.calls.get() + 1);
        PredictionResult::from_scores(&self.classes, &self.scores)
    }
}

struct BrokenClassifier;

impl Classifier for BrokenClassifier {
    fn predict(&self, _image: &RgbImage) -> Result<PredictionResult> {
        Err(DiagnosisError::Model("inference session crashed".to_string()))
    }
}

/// Advisor that records the conversation it was given
struct RecordingAdvisor {
    reply: String,
    seen: Rc<RefCell<Vec<ChatMessage>>>,
}

impl AdviceProvider for RecordingAdvisor {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.seen.borrow_mut().extend_from_slice(messages);
        Ok(self.reply.clone())
    }
}

fn class_names() -> Vec<String> {
    Config::default().classifier.class_names
}

fn pipeline_with(
    scores: &[f32],
    advisor: Option<Box<dyn AdviceProvider>>,
) -> (DiagnosisPipeline, Rc<Cell<usize>>) {
    let calls = Rc::new(Cell::new(0));
    let classifier = FakeClassifier {
        classes: class_names(),
        scores: scores.to_vec(),
        calls: Rc::clone(&calls),
    };
    let config = Config::default();

    let pipeline = DiagnosisPipeline::new(
        LeafValidator::new(config.validator.clone()),
        Box::new(classifier),
        DecisionPolicy::new(PolicyConfig::default(), None),
        advisor,
    );
    (pipeline, calls)
}

/// Cheap deterministic per-pixel offset in [-amplitude, amplitude]
fn jitter(x: u32, y: u32, amplitude: i32) -> i32 {
    let h = x.wrapping_mul(73_856_093) ^ y.wrapping_mul(19_349_663);
    (h % (2 * amplitude as u32 + 1)) as i32 - amplitude
}

fn shade(base: i32, offset: i32) -> u8 {
    (base + offset).clamp(0, 255) as u8
}

/// A single green leaf (ellipse) on a light, slightly noisy background
fn healthy_leaf() -> RgbImage {
    let (w, h) = (256u32, 256u32);
    RgbImage::from_fn(w, h, |x, y| {
        let dx = (x as f64 - 128.0) / 105.0;
        let dy = (y as f64 - 128.0) / 80.0;
        if dx * dx + dy * dy <= 1.0 {
            let n = jitter(x, y, 12);
            Rgb([shade(40, n), shade(140, n), shade(40, n)])
        } else {
            let n = jitter(x, y, 4);
            Rgb([shade(225, n), shade(225, n), shade(225, n)])
        }
    })
}

fn save(dir: &Path, name: &str, image: &RgbImage) -> PathBuf {
    let path = dir.join(name);
    image.save(&path).unwrap();
    path
}

fn outcome(report: Report) -> DiagnosisOutcome {
    match report {
        Report::Diagnosis(outcome) => outcome,
        Report::Error(err) => panic!("expected a diagnosis, got error {:?}", err),
    }
}

const CONFIDENT_HEALTHY: [f32; 4] = [0.02, 0.92, 0.03, 0.03];

#[test]
fn healthy_leaf_is_diagnosed() {
    let dir = tempfile::tempdir().unwrap();
    let path = save(dir.path(), "healthy.png", &healthy_leaf());

    let seen = Rc::new(RefCell::new(Vec::new()));
    let advisor = RecordingAdvisor {
        reply: "Your plant looks great! Keep up regular pruning.".to_string(),
        seen: Rc::clone(&seen),
    };
    let (pipeline, calls) = pipeline_with(&CONFIDENT_HEALTHY, Some(Box::new(advisor)));

    let result = outcome(pipeline.diagnose(&path));

    assert_eq!(result.status, DiagnosisStatus::Success);
    assert_eq!(result.predicted_class.as_deref(), Some("nodisease"));
    assert!(result.confidence >= PolicyConfig::default().reliability_threshold);
    assert!(result.reliable);
    assert!(!result.advice.is_empty());
    assert_eq!(result.llm_response.as_deref(), Some("Your plant looks great! Keep up regular pruning."));
    assert!(result.image_quality >= PolicyConfig::default().cross_check_floor);
    assert_eq!(calls.get(), 1);

    let seen = seen.borrow();
    assert_eq!(seen.len(), 2);
    assert!(seen[1].content.starts_with("The system detected nodisease with 92.0% confidence."));
}

#[test]
fn healthy_leaf_json_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = save(dir.path(), "healthy.png", &healthy_leaf());
    let (pipeline, _) = pipeline_with(&CONFIDENT_HEALTHY, None);

    let json: Value = serde_json::to_value(pipeline.diagnose(&path)).unwrap();

    assert_eq!(json["status"], "success");
    assert_eq!(json["predicted_class"], "nodisease");
    assert_eq!(json["advice"], "The leaf is classified as **nodisease** with 92.0% confidence.");
    let probabilities = json["all_probabilities"].as_object().unwrap();
    assert_eq!(probabilities.len(), 4);
    let total: f64 = probabilities.values().map(|v| v.as_f64().unwrap()).sum();
    assert!((total - 1.0).abs() < 1e-6);
    for key in ["green_content", "shape", "texture", "color_distribution", "size_quality", "total"] {
        let score = json["validation"][key].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&score), "{} = {}", key, score);
    }
    // advice disabled: no llm_response key at all
    assert!(json.get("llm_response").is_none());
}

#[test]
fn leaf_mask_scores_green_and_shape() {
    let image = RgbImage::from_fn(200, 200, |x, y| {
        let dx = x as f64 - 100.0;
        let dy = y as f64 - 100.0;
        if dx * dx + dy * dy <= 70.0 * 70.0 { Rgb([40, 140, 40]) } else { Rgb([255, 255, 255]) }
    });

    let score = LeafValidator::default().validate(&image);
    assert!(score.scores.green_content > 0.5);
    assert!(score.scores.shape > 0.5);
    assert!(score.is_valid);
}

#[test]
fn text_file_is_rejected_without_classifying() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.jpg");
    fs::write(&path, "this is not an image, just some text").unwrap();

    let (pipeline, calls) = pipeline_with(&CONFIDENT_HEALTHY, Some(Box::new(StaticAdvisor::replying("ok"))));
    let result = outcome(pipeline.diagnose(&path));

    assert_eq!(result.status, DiagnosisStatus::InvalidImage);
    assert_eq!(result.error.as_deref(), Some(RejectReason::Unreadable.message()));
    assert!(result.predicted_class.is_none());
    assert_eq!(calls.get(), 0);

    let json = serde_json::to_value(&result).unwrap();
    assert!(json["error"].is_string());
}

#[test]
fn red_image_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let path = save(dir.path(), "red.png", &RgbImage::from_pixel(120, 120, Rgb([220, 20, 20])));

    let (pipeline, calls) = pipeline_with(&CONFIDENT_HEALTHY, None);
    let result = outcome(pipeline.diagnose(&path));

    assert_eq!(result.status, DiagnosisStatus::InvalidImage);
    assert_eq!(result.error.as_deref(), Some(RejectReason::NoPlantMaterial.message()));
    assert_eq!(result.advice, RejectReason::NoPlantMaterial.suggestion());
    assert_eq!(result.validation.scores.green_content, 0.0);
    assert_eq!(calls.get(), 0);
}

#[test]
fn tiny_image_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let path = save(dir.path(), "tiny.png", &RgbImage::from_pixel(30, 30, Rgb([40, 140, 40])));

    let (pipeline, calls) = pipeline_with(&CONFIDENT_HEALTHY, None);
    let result = outcome(pipeline.diagnose(&path));

    assert_eq!(result.status, DiagnosisStatus::InvalidImage);
    assert_eq!(result.image_quality, 0.0);
    assert_eq!(calls.get(), 0);
}

#[test]
fn missing_file_is_an_error_report() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.jpg");

    let (pipeline, calls) = pipeline_with(&CONFIDENT_HEALTHY, None);
    let json = serde_json::to_value(pipeline.diagnose(&path)).unwrap();

    assert_eq!(json["error"], format!("Image file not found: {}", path.display()));
    assert_eq!(calls.get(), 0);
}

#[test]
fn uncertain_prediction_is_low_quality() {
    let dir = tempfile::tempdir().unwrap();
    let path = save(dir.path(), "healthy.png", &healthy_leaf());

    let (pipeline, calls) = pipeline_with(&[0.3, 0.4, 0.2, 0.1], Some(Box::new(StaticAdvisor::replying("Retake the photo."))));
    let result = outcome(pipeline.diagnose(&path));

    assert_eq!(result.status, DiagnosisStatus::LowQualityPrediction);
    assert_eq!(result.predicted_class.as_deref(), Some("nodisease"));
    assert!(!result.reliable);
    assert!(result.warning.is_some());
    assert_eq!(result.llm_response.as_deref(), Some("Retake the photo."));
    assert_eq!(calls.get(), 1);
}

#[test]
fn advice_failure_is_captured() {
    let dir = tempfile::tempdir().unwrap();
    let path = save(dir.path(), "healthy.png", &healthy_leaf());

    let (pipeline, _) = pipeline_with(&CONFIDENT_HEALTHY, Some(Box::new(StaticAdvisor::failing("connection refused"))));
    let result = outcome(pipeline.diagnose(&path));

    assert_eq!(result.status, DiagnosisStatus::Success);
    let llm = result.llm_response.unwrap();
    assert!(llm.starts_with("Error getting LLM response:"));
    assert!(llm.contains("connection refused"));
}

#[test]
fn inference_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = save(dir.path(), "healthy.png", &healthy_leaf());

    let pipeline = DiagnosisPipeline::new(
        LeafValidator::default(),
        Box::new(BrokenClassifier),
        DecisionPolicy::new(PolicyConfig::default(), None),
        None,
    );
    let json = serde_json::to_value(pipeline.diagnose(&path)).unwrap();

    assert_eq!(json["error"], "Prediction failed");
    assert_eq!(json["type"], "ModelError");
    assert!(json["details"].as_str().unwrap().contains("inference session crashed"));
}

#[test]
fn diagnosis_seeds_follow_up_chat() {
    let dir = tempfile::tempdir().unwrap();
    let path = save(dir.path(), "healthy.png", &healthy_leaf());

    let (pipeline, _) = pipeline_with(&CONFIDENT_HEALTHY, None);
    let result = outcome(pipeline.diagnose(&path));

    let seed = seed_history(&result).unwrap();
    assert!(seed[0].content.contains("diagnosis: nodisease with 92.00% confidence"));
}

#[test]
fn missing_model_fails_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.classifier.model_path = dir.path().join("missing.onnx");

    let result = DiagnosisPipeline::from_config(&config, None);
    assert!(matches!(result, Err(DiagnosisError::ModelNotFound(_))));
}
