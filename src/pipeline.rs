// src/pipeline.rs - Validate, classify, decide, advise

use std::path::Path;

use crate::advice::{generate_advice, AdviceProvider, AdviceRequest};
use crate::classifier::{load_classifier, Classifier};
use crate::config::Config;
use crate::errors::Result;
use crate::image_io::load_image;
use crate::output::{DiagnosisOutcome, ErrorReport, Report};
use crate::policy::{DecisionPolicy, Verdict};
use crate::validator::{LeafValidator, RejectReason, ValidationScore};

/// Services for one diagnosis run, built once per process and read-only afterwards
pub struct DiagnosisPipeline {
    validator: LeafValidator,
    classifier: Box<dyn Classifier>,
    policy: DecisionPolicy,
    advisor: Option<Box<dyn AdviceProvider>>,
}

impl DiagnosisPipeline {
    pub fn new(
        validator: LeafValidator,
        classifier: Box<dyn Classifier>,
        policy: DecisionPolicy,
        advisor: Option<Box<dyn AdviceProvider>>,
    ) -> Self {
        Self {
            validator,
            classifier,
            policy,
            advisor,
        }
    }

    /// Build from config, loading the model. A missing model artifact fails here.
    pub fn from_config(config: &Config, advisor: Option<Box<dyn AdviceProvider>>) -> Result<Self> {
        let classifier = load_classifier(&config.classifier)?;

        Ok(Self::new(
            LeafValidator::new(config.validator.clone()),
            classifier,
            DecisionPolicy::new(config.policy.clone(), config.classifier.reject_class.clone()),
            advisor,
        ))
    }

    /// Diagnose one image file. Every per-request failure becomes a report, never an `Err`.
    pub fn diagnose<P: AsRef<Path>>(&self, path: P) -> Report {
        let path = path.as_ref();

        if !path.exists() {
            return Report::Error(ErrorReport::new(format!(
                "Image file not found: {}",
                path.display()
            )));
        }

        let mut outcome = match self.assess(path) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Prediction failed for {}: {}", path.display(), e);
                return Report::Error(ErrorReport::from_error("Prediction failed", &e));
            }
        };

        if let Some(advisor) = &self.advisor {
            outcome.llm_response = Some(self.advise(&**advisor, &outcome));
        }

        Report::Diagnosis(outcome)
    }

    /// Validation, classification and the policy decision, without advice
    pub fn assess(&self, path: &Path) -> Result<DiagnosisOutcome> {
        log::info!("Starting image validation for {}", path.display());

        let input = match load_image(path) {
            Ok(input) => input,
            Err(e) => {
                log::warn!("Could not load {}: {}", path.display(), e);
                return Ok(rejected(&ValidationScore::rejected(RejectReason::Unreadable)));
            }
        };

        let validation = self.validator.validate(&input.image);
        if !validation.is_valid {
            log::info!("{} rejected by validator ({:.2})", input.filename, validation.confidence);
            return Ok(rejected(&validation));
        }

        log::info!("Image validation passed, proceeding with prediction");
        let prediction = self.classifier.predict(&input.image)?;
        log::info!(
            "Predicted {} for {} ({:.1}%, entropy {:.2})",
            prediction.label,
            input.filename,
            prediction.confidence * 100.0,
            prediction.entropy
        );

        let verdict = self.policy.evaluate(&validation, &prediction);
        log::debug!("Policy verdict: {:?}", verdict);
        let reliable = self.policy.is_reliable(&prediction);

        let outcome = match verdict {
            Verdict::Accepted => DiagnosisOutcome::success(&validation, &prediction, reliable),
            Verdict::LowConfidence { .. } | Verdict::Ambiguous { .. } => DiagnosisOutcome::low_quality(
                &validation,
                &prediction,
                reliable,
                verdict.message().unwrap_or_default(),
            ),
            Verdict::ValidatorRejected => rejected(&validation),
            Verdict::RejectClass(_) | Verdict::WeakValidation { .. } => DiagnosisOutcome::invalid_image(
                &validation,
                verdict.message().unwrap_or_default(),
                RejectReason::Unsuitable.suggestion(),
            ),
        };

        log::debug!("Outcome status: {}", outcome.status.as_str());
        Ok(outcome)
    }

    /// Ask the advisor about the outcome; a failure becomes visible text
    fn advise(&self, advisor: &dyn AdviceProvider, outcome: &DiagnosisOutcome) -> String {
        let request = match (&outcome.predicted_class, outcome.is_success()) {
            (Some(label), true) => AdviceRequest::Diagnosed {
                label: label.as_str(),
                confidence: outcome.confidence,
                advice: &outcome.advice,
            },
            _ => AdviceRequest::Unresolved {
                reason: outcome.problem().unwrap_or("Unknown"),
                advice: &outcome.advice,
            },
        };

        log::info!("Requesting advice");
        match generate_advice(advisor, &request) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("Advice request failed: {}", e);
                format!("Error getting LLM response: {}", e)
            }
        }
    }
}

fn rejected(validation: &ValidationScore) -> DiagnosisOutcome {
    let reason = validation.reason.unwrap_or(RejectReason::Unsuitable);
    DiagnosisOutcome::invalid_image(validation, reason.message().to_string(), reason.suggestion())
}

