// src/lib.rs - Library interface for the coffee leaf diagnosis pipeline

pub mod advice;
pub mod chat;
pub mod classifier;
pub mod color_analysis;
pub mod config;
pub mod errors;
pub mod image_io;
pub mod image_utils;
pub mod output;
pub mod pipeline;
pub mod policy;
pub mod shape_analysis;
pub mod texture_analysis;
pub mod validator;

// Re-export commonly used types and functions
pub use errors::{DiagnosisError, Result};
pub use config::Config;
pub use image_io::{InputImage, load_image};
pub use pipeline::DiagnosisPipeline;

pub use validator::{LeafValidator, RejectReason, SubScores, ValidationScore};
pub use classifier::{load_classifier, Classifier, PredictionResult};
pub use policy::{DecisionPolicy, DiagnosisStatus, Verdict};
pub use advice::{AdviceProvider, ChatMessage, OpenAiClient, Role, StaticAdvisor};
pub use output::{DiagnosisOutcome, ErrorReport, Report, print_json};
pub use chat::{ChatReply, run_chat, seed_history};
