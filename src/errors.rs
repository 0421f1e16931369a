use thiserror::Error;
use std::io;
use std::path::PathBuf;

/// Error types for the coffee leaf diagnosis pipeline
#[derive(Error, Debug)]
pub enum DiagnosisError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load configuration from {path}: {source}")]
    ConfigLoad {
        source: toml::de::Error,
        path: PathBuf,
    },

    #[error("Invalid input path: {0}")]
    InvalidPath(PathBuf),

    #[error("Image analysis error: {0}")]
    Analysis(String),

    #[error("Model file not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Prediction error: {0}")]
    Prediction(String),

    #[error("Missing API credential: environment variable {0} is not set")]
    MissingCredential(String),

    #[error("Advice service error: {0}")]
    Advice(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DiagnosisError {
    /// Short name reported in the `type` field of error JSON
    pub fn kind(&self) -> &'static str {
        match self {
            DiagnosisError::Io(_) => "IoError",
            DiagnosisError::Image(_) => "ImageError",
            DiagnosisError::Config(_) | DiagnosisError::ConfigLoad { .. } => "ConfigError",
            DiagnosisError::InvalidPath(_) => "InvalidPath",
            DiagnosisError::Analysis(_) => "AnalysisError",
            DiagnosisError::ModelNotFound(_) => "ModelNotFound",
            DiagnosisError::Model(_) => "ModelError",
            DiagnosisError::Prediction(_) => "PredictionError",
            DiagnosisError::MissingCredential(_) => "MissingCredential",
            DiagnosisError::Advice(_) => "AdviceError",
            DiagnosisError::Json(_) => "JsonError",
        }
    }
}

/// Type alias for Result with our custom error type
pub type Result<T> = std::result::Result<T, DiagnosisError>;
