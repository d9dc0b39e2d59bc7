//! Model-backed classification.
//!
//! The trained model is a random forest exported to JSON together with the
//! label encoder's class list. Inference runs on a small worker pool so a
//! misbehaving predictor can be abandoned after a timeout instead of stalling
//! the monitor loop.

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use threadpool::ThreadPool;

use crate::classifier::{Classification, Classifier};
use crate::config::ModelConfig;
use crate::error::{DDoSError, Result};
use crate::features::FeatureVector;

const PREDICTOR_THREADS: usize = 2;

/// Output of a predictive function.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub class_index: usize,
    pub confidence: f64,
    pub probabilities: Vec<f64>,
}

impl Prediction {
    /// Picks the most probable class. Ties go to the lowest index.
    pub fn from_probabilities(probabilities: Vec<f64>) -> Result<Self> {
        let (class_index, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (i, p)| match best {
                Some((_, bp)) if bp >= p => best,
                _ => Some((i, p)),
            })
            .ok_or_else(|| DDoSError::ModelError("empty probability vector".to_string()))?;

        Ok(Prediction {
            class_index,
            confidence,
            probabilities,
        })
    }
}

/// A predictive function over an ordered slice of feature values.
pub trait Predictor: Send + Sync {
    fn predict(&self, features: &[f64]) -> Result<Prediction>;
}

/// Inverse of the label encoding used at training time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelDecoder {
    pub classes: Vec<String>,
}

impl LabelDecoder {
    pub fn new(classes: Vec<String>) -> Result<Self> {
        if classes.is_empty() {
            return Err(DDoSError::ModelError("label decoder has no classes".to_string()));
        }
        Ok(LabelDecoder { classes })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let decoder: LabelDecoder = serde_json::from_str(&raw)?;
        Self::new(decoder.classes)
    }

    pub fn decode(&self, index: usize) -> Option<&str> {
        self.classes.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: Vec<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    /// Walks from the root and returns the leaf's class distribution.
    /// Samples go left when `x <= threshold`.
    fn leaf_for(&self, features: &[f64]) -> Result<&[f64]> {
        let mut index = 0;
        // a well-formed tree never visits more nodes than it has
        for _ in 0..self.nodes.len() {
            match self.nodes.get(index) {
                Some(TreeNode::Leaf { value }) => return Ok(value.as_slice()),
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let x = features.get(*feature).copied().ok_or_else(|| {
                        DDoSError::ModelError(format!("feature index {} out of range", feature))
                    })?;
                    index = if x <= *threshold { *left } else { *right };
                }
                None => {
                    return Err(DDoSError::ModelError(format!("node {} out of range", index)));
                }
            }
        }
        Err(DDoSError::ModelError("tree contains a cycle".to_string()))
    }

    fn validate(&self, feature_count: usize, class_count: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(DDoSError::ModelError("tree has no nodes".to_string()));
        }

        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= feature_count {
                        return Err(DDoSError::ModelError(format!(
                            "node {}: feature {} out of range ({} features)",
                            i, feature, feature_count
                        )));
                    }
                    if !threshold.is_finite() {
                        return Err(DDoSError::ModelError(format!("node {}: threshold is not finite", i)));
                    }
                    if *left >= self.nodes.len() || *right >= self.nodes.len() {
                        return Err(DDoSError::ModelError(format!("node {}: child out of range", i)));
                    }
                }
                TreeNode::Leaf { value } => {
                    if value.len() != class_count {
                        return Err(DDoSError::ModelError(format!(
                            "node {}: leaf has {} weights, expected {}",
                            i,
                            value.len(),
                            class_count
                        )));
                    }
                    let total: f64 = value.iter().sum();
                    if !total.is_finite() || total <= 0.0 || value.iter().any(|w| *w < 0.0) {
                        return Err(DDoSError::ModelError(format!(
                            "node {}: leaf weights must be non-negative with a positive sum",
                            i
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Random forest exported from the training pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestModel {
    /// Feature names in the order the trees index them.
    pub feature_order: Vec<String>,
    pub trees: Vec<DecisionTree>,
}

impl ForestModel {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn validate(&self, class_count: usize) -> Result<()> {
        if self.trees.is_empty() {
            return Err(DDoSError::ModelError("forest has no trees".to_string()));
        }
        if let Some(unknown) = self.feature_order.iter().find(|n| !FeatureVector::is_known(n)) {
            return Err(DDoSError::ModelError(format!("unknown feature '{}'", unknown)));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(self.feature_order.len(), class_count)
                .map_err(|e| DDoSError::ModelError(format!("tree {}: {}", i, e)))?;
        }
        Ok(())
    }
}

impl Predictor for ForestModel {
    fn predict(&self, features: &[f64]) -> Result<Prediction> {
        if features.len() != self.feature_order.len() {
            return Err(DDoSError::ModelError(format!(
                "expected {} features, got {}",
                self.feature_order.len(),
                features.len()
            )));
        }

        let mut totals: Vec<f64> = Vec::new();
        for tree in &self.trees {
            let leaf = tree.leaf_for(features)?;
            let weight: f64 = leaf.iter().sum();
            if totals.is_empty() {
                totals = vec![0.0; leaf.len()];
            }
            for (total, w) in totals.iter_mut().zip(leaf) {
                *total += w / weight;
            }
        }

        let n = self.trees.len() as f64;
        Prediction::from_probabilities(totals.into_iter().map(|p| p / n).collect())
    }
}

/// Health of the model behind the running classifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ModelStatus {
    NotConfigured,
    Loaded { model_path: String, classes: Vec<String> },
    Failed { reason: String },
}

impl ModelStatus {
    pub fn is_loaded(&self) -> bool {
        matches!(self, ModelStatus::Loaded { .. })
    }
}

pub struct ModelClassifier {
    predictor: Arc<dyn Predictor>,
    decoder: LabelDecoder,
    feature_order: Vec<String>,
    timeout: Duration,
    pool: Mutex<ThreadPool>,
    // where the model came from, reported in its status
    source: String,
}

impl ModelClassifier {
    pub fn new(
        predictor: Arc<dyn Predictor>,
        decoder: LabelDecoder,
        feature_order: Vec<String>,
        timeout: Duration,
    ) -> Result<Self> {
        if let Some(unknown) = feature_order.iter().find(|n| !FeatureVector::is_known(n)) {
            return Err(DDoSError::ModelError(format!("unknown feature '{}'", unknown)));
        }

        Ok(ModelClassifier {
            predictor,
            decoder,
            feature_order,
            timeout,
            pool: Mutex::new(ThreadPool::with_name("model-predictor".to_string(), PREDICTOR_THREADS)),
            source: "in-memory".to_string(),
        })
    }

    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let forest = ForestModel::from_file(&config.model_path)?;
        let decoder = LabelDecoder::from_file(&config.labels_path)?;
        forest.validate(decoder.len())?;

        let feature_order = forest.feature_order.clone();
        let mut classifier = Self::new(Arc::new(forest), decoder, feature_order, config.timeout())?;
        classifier.source = config.model_path.display().to_string();
        Ok(classifier)
    }

    pub fn classes(&self) -> &[String] {
        &self.decoder.classes
    }

    pub fn predict_window(&self, features: &FeatureVector) -> Result<Classification> {
        let values = features.select(&self.feature_order);
        let predictor = Arc::clone(&self.predictor);
        let (tx, rx) = crossbeam_channel::bounded(1);

        {
            let pool = self.pool.lock();
            // every worker is still stuck on an earlier call; queueing more
            // work behind them would grow without bound
            if pool.active_count() + pool.queued_count() >= PREDICTOR_THREADS {
                return Err(DDoSError::ModelError(format!(
                    "all {} predictor workers are busy with timed-out calls",
                    PREDICTOR_THREADS
                )));
            }
            pool.execute(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| predictor.predict(&values)))
                    .unwrap_or_else(|_| Err(DDoSError::ModelError("predictor panicked".to_string())));
                // the caller may have timed out and gone away
                let _ = tx.send(outcome);
            });
        }

        let prediction = match rx.recv_timeout(self.timeout) {
            Ok(outcome) => outcome?,
            Err(RecvTimeoutError::Timeout) => {
                return Err(DDoSError::ModelError(format!(
                    "prediction timed out after {:?}",
                    self.timeout
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(DDoSError::ModelError("predictor worker died".to_string()))
            }
        };

        let label = self.decoder.decode(prediction.class_index).ok_or_else(|| {
            DDoSError::ModelError(format!(
                "class index {} not in label decoder ({} classes)",
                prediction.class_index,
                self.decoder.len()
            ))
        })?;

        Ok(Classification::new(label, Some(prediction.confidence)))
    }
}

impl Classifier for ModelClassifier {
    fn name(&self) -> &str {
        "model"
    }

    fn model_status(&self) -> ModelStatus {
        ModelStatus::Loaded {
            model_path: self.source.clone(),
            classes: self.decoder.classes.clone(),
        }
    }

    fn classify(&self, features: FeatureVector) -> Classification {
        match self.predict_window(&features) {
            Ok(classification) => classification,
            Err(e) => {
                log::error!("Prediction error: {}", e);
                Classification::unknown()
            }
        }
    }
}
