//! Window classification strategies.
//!
//! Two implementations ship with the crate: [`ThresholdDetector`], a
//! rule that needs nothing but a count threshold, and [`ModelClassifier`],
//! which runs a trained forest loaded from disk. [`load_classifier`] picks
//! one from the configuration and falls back to the rule when the model
//! cannot be loaded.
//!
//! [`ThresholdDetector`]: crate::ddos_detector::ThresholdDetector
//! [`ModelClassifier`]: crate::model_predictor::ModelClassifier

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::DetectorConfig;
use crate::ddos_detector::ThresholdDetector;
use crate::features::FeatureVector;
use crate::model_predictor::{ModelClassifier, ModelStatus};

pub mod labels {
    pub const NORMAL: &str = "Normal";
    pub const SYN_FLOOD: &str = "SynFlood";
    pub const ICMP_FLOOD: &str = "ICMPFlood";
    pub const UDP_FLOOD: &str = "UDPFlood";
    /// Recorded when classification itself failed.
    pub const UNKNOWN: &str = "Unknown";

    /// Labels that always have a counter, even before the first window.
    pub const SEEDED: [&str; 4] = [NORMAL, SYN_FLOOD, ICMP_FLOOD, UDP_FLOOD];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    pub confidence: Option<f64>,
}

impl Classification {
    pub fn new(label: &str, confidence: Option<f64>) -> Self {
        Classification {
            label: label.to_string(),
            confidence,
        }
    }

    pub fn normal() -> Self {
        Self::new(labels::NORMAL, None)
    }

    pub fn unknown() -> Self {
        Self::new(labels::UNKNOWN, None)
    }

    pub fn is_normal(&self) -> bool {
        self.label == labels::NORMAL
    }
}

/// Maps a window's features to a label.
///
/// Implementations must not block on external I/O for unbounded time and
/// should report their own failures as [`labels::UNKNOWN`] rather than
/// panicking. The monitor loop still guards every call.
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    fn classify(&self, features: FeatureVector) -> Classification;

    /// State of the trained model behind this classifier, if any.
    fn model_status(&self) -> ModelStatus {
        ModelStatus::NotConfigured
    }
}

/// Calls `classifier`, turning a panic into an `Unknown` classification.
pub fn classify_guarded(classifier: &dyn Classifier, features: FeatureVector) -> Classification {
    match panic::catch_unwind(AssertUnwindSafe(|| classifier.classify(features))) {
        Ok(classification) => classification,
        Err(_) => {
            log::error!(
                "Classifier '{}' panicked, recording window as {}",
                classifier.name(),
                labels::UNKNOWN
            );
            Classification::unknown()
        }
    }
}

/// Builds the classifier described by `config`.
///
/// A configured model that fails to load downgrades to the threshold rule;
/// the returned status records why.
pub fn load_classifier(config: &DetectorConfig) -> (Arc<dyn Classifier>, ModelStatus) {
    let rule = ThresholdDetector::new(config.threshold);

    let Some(model_config) = &config.model else {
        log::info!("No model configured, using threshold rule (threshold {})", config.threshold);
        return (Arc::new(rule), ModelStatus::NotConfigured);
    };

    match ModelClassifier::from_config(model_config) {
        Ok(model) => {
            let status = model.model_status();
            log::info!(
                "Model '{}' loaded with classes {:?}",
                model_config.model_path.display(),
                model.classes()
            );
            (Arc::new(model), status)
        }
        Err(err) => {
            log::warn!(
                "Failed to load model '{}': {}. Continuing in rule-only mode",
                model_config.model_path.display(),
                err
            );
            (
                Arc::new(rule),
                ModelStatus::Failed {
                    reason: err.to_string(),
                },
            )
        }
    }
}
