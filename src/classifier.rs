// Classifier adapter: image preprocessing, model output decoding and the ONNX backend

use std::collections::BTreeMap;

use image::imageops::FilterType;
use image::RgbImage;
use serde::Serialize;

use crate::config::ClassifierConfig;
use crate::errors::{DiagnosisError, Result};
use crate::image_utils::resize_image;

/// Tolerance for treating raw model output as an already-normalized distribution
const DISTRIBUTION_TOLERANCE: f64 = 1e-3;

/// One classification, produced once per image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub label: String,
    #[serde(skip)]
    pub class_index: usize,
    /// Probability per class, in the model's class order
    #[serde(skip)]
    pub distribution: Vec<(String, f64)>,
    /// Top-1 probability
    pub confidence: f64,
    /// Shannon entropy of the distribution divided by ln(class count), in [0, 1]
    pub entropy: f64,
}

impl PredictionResult {
    /// Decode raw model scores. Scores that are not already a probability
    /// distribution (negative, or not summing to 1) are treated as logits.
    pub fn from_scores(class_names: &[String], scores: &[f32]) -> Result<Self> {
        if class_names.is_empty() {
            return Err(DiagnosisError::Prediction("no class names configured".to_string()));
        }
        if scores.len() != class_names.len() {
            return Err(DiagnosisError::Prediction(format!(
                "model returned {} scores for {} classes",
                scores.len(),
                class_names.len()
            )));
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(DiagnosisError::Prediction("model returned a non-finite score".to_string()));
        }

        let raw: Vec<f64> = scores.iter().map(|&s| s as f64).collect();
        let sum: f64 = raw.iter().sum();
        let probabilities = if raw.iter().all(|&p| p >= 0.0) && (sum - 1.0).abs() <= DISTRIBUTION_TOLERANCE {
            raw.iter().map(|p| p / sum).collect()
        } else {
            softmax(&raw)
        };

        let (class_index, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::MIN), |best, (i, p)| if p > best.1 { (i, p) } else { best });

        Ok(Self {
            label: class_names[class_index].clone(),
            class_index,
            entropy: normalized_entropy(&probabilities),
            confidence: confidence.clamp(0.0, 1.0),
            distribution: class_names.iter().cloned().zip(probabilities).collect(),
        })
    }

    /// Label to probability, for JSON output
    pub fn probability_map(&self) -> BTreeMap<String, f64> {
        self.distribution.iter().cloned().collect()
    }
}

/// Numerically stable softmax
pub fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|&l| (l - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// Entropy of a distribution normalized by its maximum, ln(K).
/// 0 for a one-hot distribution, 1 for a uniform one.
pub fn normalized_entropy(probabilities: &[f64]) -> f64 {
    if probabilities.len() < 2 {
        return 0.0;
    }

    let entropy: f64 = probabilities
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| -p * p.ln())
        .sum();

    (entropy / (probabilities.len() as f64).ln()).clamp(0.0, 1.0)
}

/// Resize to the model input and scale to [0, 1], laid out as NHWC (batch of one)
pub fn preprocess(image: &RgbImage, input_size: [u32; 2]) -> Vec<f32> {
    // nearest-neighbour matches the resizing the model was trained with
    let resized = resize_image(image, input_size, FilterType::Nearest);
    resized.as_raw().iter().map(|&v| v as f32 / 255.0).collect()
}

/// Black-box image classifier
pub trait Classifier {
    /// Classify one decoded image. Deterministic for a fixed model and input.
    fn predict(&self, image: &RgbImage) -> Result<PredictionResult>;
}

#[cfg(feature = "onnx")]
mod onnx {
    use super::{preprocess, Classifier, PredictionResult};
    use crate::config::ClassifierConfig;
    use crate::errors::{DiagnosisError, Result};
    use image::RgbImage;
    use ort::session::Session;
    use std::sync::Mutex;

    /// Classifier backed by an ONNX export of the trained network.
    ///
    /// Expects one float input of shape [1, height, width, 3] with values in
    /// [0, 1] and one output of shape [1, class_count].
    ///
    /// `Session::run` needs `&mut self`, hence the Mutex behind `&self` predictions.
    pub struct OnnxClassifier {
        session: Mutex<Session>,
        class_names: Vec<String>,
        input_size: [u32; 2],
    }

    impl OnnxClassifier {
        pub fn load(config: &ClassifierConfig) -> Result<Self> {
            let model_path = &config.model_path;
            if !model_path.is_file() {
                return Err(DiagnosisError::ModelNotFound(model_path.clone()));
            }

            let session = Session::builder()
                .map_err(|e: ort::Error| DiagnosisError::Model(e.to_string()))?
                .with_intra_threads(config.intra_threads)
                .map_err(|e: ort::Error| DiagnosisError::Model(e.to_string()))?
                .commit_from_file(model_path)
                .map_err(|e: ort::Error| DiagnosisError::Model(format!("ONNX load failed: {e}")))?;

            log::info!("Model loaded from {}", model_path.display());

            Ok(Self {
                session: Mutex::new(session),
                class_names: config.class_names.clone(),
                input_size: config.input_size,
            })
        }
    }

    impl Classifier for OnnxClassifier {
        fn predict(&self, image: &RgbImage) -> Result<PredictionResult> {
            use ort::value::TensorRef;

            let [width, height] = self.input_size;
            let input = ndarray::Array4::from_shape_vec(
                (1, height as usize, width as usize, 3),
                preprocess(image, self.input_size),
            )
            .map_err(|e| DiagnosisError::Model(e.to_string()))?;

            let tensor = TensorRef::from_array_view(&input)
                .map_err(|e| DiagnosisError::Model(e.to_string()))?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| DiagnosisError::Model("Session lock poisoned".to_string()))?;

            let outputs = session
                .run(ort::inputs![tensor])
                .map_err(|e| DiagnosisError::Model(format!("ONNX inference failed: {e}")))?;

            let (_, scores) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| DiagnosisError::Model(format!("Output extraction: {e}")))?;

            PredictionResult::from_scores(&self.class_names, scores)
        }
    }
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxClassifier;

/// Load the configured classifier backend. A missing model file is always
/// reported as `ModelNotFound`.
pub fn load_classifier(config: &ClassifierConfig) -> Result<Box<dyn Classifier>> {
    if !config.model_path.is_file() {
        return Err(DiagnosisError::ModelNotFound(config.model_path.clone()));
    }

    #[cfg(feature = "onnx")]
    {
        Ok(Box::new(OnnxClassifier::load(config)?))
    }

    #[cfg(not(feature = "onnx"))]
    {
        Err(DiagnosisError::Model(
            "this build has no classifier backend; rebuild with the `onnx` feature".to_string(),
        ))
    }
}
