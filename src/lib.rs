//! Streaming flood detection over packet records.
//!
//! Producers push packet records into a [`Detector`]; a single monitor
//! thread groups them into fixed-duration windows, derives a
//! [`FeatureVector`] per window, classifies it as normal traffic or a flood
//! and keeps running [`StatsSnapshot`]-style statistics.
//!
//! ```no_run
//! use ddos_stream::{Detector, DetectorConfig, PacketRecord};
//!
//! let detector = Detector::from_config(DetectorConfig::default())?;
//! detector.start()?;
//! detector.enqueue_record(PacketRecord::new(0.0, "10.0.0.9", "10.0.0.1", "6", 60, "[SYN]"));
//! println!("{:?}", detector.snapshot());
//! detector.stop();
//! # Ok::<(), ddos_stream::DDoSError>(())
//! ```

pub mod classifier;
pub mod config;
pub mod ddos_detector;
pub mod error;
pub mod features;
pub mod ingress;
pub mod logging;
pub mod model_predictor;
pub mod monitor;
pub mod packet;
pub mod protocol;
pub mod replay;
pub mod stats;

#[cfg(test)]
mod tests;

pub use classifier::{labels, Classification, Classifier};
pub use config::{DetectorConfig, ModelConfig};
pub use ddos_detector::ThresholdDetector;
pub use error::{DDoSError, Result};
pub use features::FeatureVector;
pub use ingress::PacketIngress;
pub use model_predictor::{ForestModel, LabelDecoder, ModelClassifier, ModelStatus, Prediction, Predictor};
pub use monitor::{Detector, HealthReport, WindowAccumulator, WindowReport};
pub use packet::PacketRecord;
pub use protocol::Protocol;
pub use stats::{DetectionResult, StatsSnapshot, StatsStore};
