//! Real-time windowed detection.
//!
//! One monitor thread drains the ingress queue into the open window. A
//! one-shot timer, re-armed after every closure, marks the end of each
//! window independently of packet arrival. On closure the window's features
//! are extracted, the buffer is cleared, the features are classified and the
//! result is applied to the stats store.
//!
//! Windows are anchored to the moment the previous closure finished, not to
//! a fixed grid. When extraction and classification take longer than a
//! window, the next window simply starts later and nothing is lost; such
//! windows are logged as stretched. Stopping the detector abandons the open
//! window without classifying it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{select, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::classifier::{self, classify_guarded, Classification, Classifier};
use crate::config::DetectorConfig;
use crate::error::Result;
use crate::features::{extract, FeatureVector};
use crate::ingress::PacketIngress;
use crate::model_predictor::ModelStatus;
use crate::packet::PacketRecord;
use crate::stats::{DetectionResult, StatsSnapshot, StatsStore};

/// Buffer of the currently open window. Owned by the monitor thread only.
#[derive(Debug)]
pub struct WindowAccumulator {
    records: Vec<PacketRecord>,
    opened_at: Instant,
    duration: Duration,
}

impl WindowAccumulator {
    pub fn new(duration: Duration) -> Self {
        WindowAccumulator {
            records: Vec::new(),
            opened_at: Instant::now(),
            duration,
        }
    }

    pub fn push(&mut self, record: PacketRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[PacketRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn elapsed(&self) -> Duration {
        self.opened_at.elapsed()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Opens the next window at the current instant.
    pub fn restart(&mut self) {
        self.opened_at = Instant::now();
    }
}

/// Outcome of one closed, non-empty window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowReport {
    pub index: u64,
    /// Epoch seconds at which the window opened.
    pub window_start: f64,
    /// Measured length of the window; exceeds the configured duration when
    /// the previous closure ran long.
    pub elapsed_secs: f64,
    pub packet_count: u64,
    pub features: FeatureVector,
    pub classification: Classification,
    pub timestamp: DateTime<Utc>,
}

type Subscribers = Arc<Mutex<Vec<Sender<WindowReport>>>>;

fn publish(subscribers: &Subscribers, report: &WindowReport) {
    subscribers.lock().retain(|tx| tx.send(report.clone()).is_ok());
}

enum Event {
    Packet(PacketRecord),
    WindowDue,
    Idle,
    Disconnected,
}

fn next_event(packets: &Receiver<PacketRecord>, closure: &Receiver<Instant>, poll: Duration) -> Event {
    select! {
        recv(packets) -> msg => match msg {
            Ok(record) => Event::Packet(record),
            Err(_) => Event::Disconnected,
        },
        recv(closure) -> _ => Event::WindowDue,
        default(poll) => Event::Idle,
    }
}

struct MonitorLoop {
    packets: Receiver<PacketRecord>,
    window: WindowAccumulator,
    window_secs: f64,
    poll_interval: Duration,
    classifier: Arc<dyn Classifier>,
    stats: Arc<StatsStore>,
    subscribers: Subscribers,
    running: Arc<AtomicBool>,
    windows_closed: u64,
}

impl MonitorLoop {
    fn run(mut self) {
        log::info!(
            "Monitor loop started ({}s windows, classifier '{}')",
            self.window_secs,
            self.classifier.name()
        );

        self.window.restart();
        let mut closure = crossbeam_channel::after(self.window.duration());

        while self.running.load(Ordering::SeqCst) {
            match next_event(&self.packets, &closure, self.poll_interval) {
                Event::Packet(record) => self.window.push(record),
                Event::WindowDue => {
                    self.close_window();
                    closure = crossbeam_channel::after(self.window.duration());
                }
                Event::Idle => {}
                Event::Disconnected => {
                    log::warn!("Packet queue disconnected, stopping monitor loop");
                    break;
                }
            }
        }

        if !self.window.is_empty() {
            log::info!(
                "Abandoning open window with {} packets on shutdown",
                self.window.len()
            );
        }
        log::info!("Monitor loop stopped after {} windows", self.windows_closed);
    }

    fn close_window(&mut self) {
        let closing_started = Instant::now();
        let elapsed = self.window.elapsed();

        if self.window.is_empty() {
            log::trace!("Empty window, nothing to classify");
            self.window.restart();
            return;
        }

        let packet_count = self.window.len() as u64;
        let features = extract(self.window.records(), self.window_secs);
        self.window.clear();

        let classification = classify_guarded(self.classifier.as_ref(), features);
        self.stats
            .record_window(DetectionResult::new(classification.clone(), packet_count));
        self.windows_closed += 1;

        if classification.is_normal() {
            log::debug!(
                "Window {}: {} packets, {:.1} pkt/s, Normal",
                self.windows_closed,
                packet_count,
                features.packet_rate
            );
        } else {
            log::warn!(
                "POTENTIAL DDOS DETECTED: {} in window {} ({} packets, TCP {} / UDP {} / ICMP {}, confidence {})",
                classification.label,
                self.windows_closed,
                packet_count,
                features.tcp,
                features.udp,
                features.icmp,
                classification
                    .confidence
                    .map(|c| format!("{:.2}%", c * 100.0))
                    .unwrap_or_else(|| "n/a".to_string())
            );
        }

        let now = Utc::now();
        let report = WindowReport {
            index: self.windows_closed,
            window_start: now.timestamp_millis() as f64 / 1000.0 - elapsed.as_secs_f64(),
            elapsed_secs: elapsed.as_secs_f64(),
            packet_count,
            features,
            classification,
            timestamp: now,
        };
        publish(&self.subscribers, &report);

        let processing = closing_started.elapsed();
        if processing > self.window.duration() {
            log::warn!(
                "Window stretched: closing took {:?}, longer than the {:?} window; next window starts now",
                processing,
                self.window.duration()
            );
        }
        self.window.restart();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub model_loaded: bool,
    pub model: ModelStatus,
    pub classifier: String,
    pub monitoring: bool,
    pub timestamp: DateTime<Utc>,
}

struct Worker {
    handle: JoinHandle<()>,
    running: Arc<AtomicBool>,
    done: Receiver<()>,
}

/// Handle to one streaming detector.
///
/// Build it once at startup and share it by reference (or `Arc`) with the
/// producers and stats consumers that need it.
pub struct Detector {
    config: DetectorConfig,
    ingress: PacketIngress,
    stats: Arc<StatsStore>,
    classifier: Arc<dyn Classifier>,
    model_status: ModelStatus,
    subscribers: Subscribers,
    worker: Mutex<Option<Worker>>,
}

impl Detector {
    /// The model status is taken from the classifier itself.
    pub fn new(config: DetectorConfig, classifier: Arc<dyn Classifier>) -> Result<Self> {
        let status = classifier.model_status();
        Self::with_status(config, classifier, status)
    }

    /// Builds the classifier from `config.model`, falling back to the
    /// threshold rule when the model does not load.
    pub fn from_config(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        let (classifier, status) = classifier::load_classifier(&config);
        Self::with_status(config, classifier, status)
    }

    fn with_status(config: DetectorConfig, classifier: Arc<dyn Classifier>, model_status: ModelStatus) -> Result<Self> {
        config.validate()?;

        let ingress = PacketIngress::with_capacity(config.queue_capacity);
        let stats = Arc::new(StatsStore::with_drop_counter(
            config.history_cap,
            ingress.drop_counter(),
        ));

        Ok(Detector {
            config,
            ingress,
            stats,
            classifier,
            model_status,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            worker: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Producer handle; clone it freely.
    pub fn ingress(&self) -> &PacketIngress {
        &self.ingress
    }

    pub fn enqueue(&self, fields: &Map<String, Value>) {
        self.ingress.enqueue(fields);
    }

    pub fn enqueue_record(&self, record: PacketRecord) {
        self.ingress.enqueue_record(record);
    }

    /// Spawns the monitor thread. Does nothing if it is already running.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            log::debug!("Detector already running");
            return Ok(());
        }

        let running = Arc::new(AtomicBool::new(true));
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);

        let monitor = MonitorLoop {
            packets: self.ingress.receiver(),
            window: WindowAccumulator::new(self.config.window()),
            window_secs: self.config.window_secs,
            poll_interval: self.config.poll_interval(),
            classifier: Arc::clone(&self.classifier),
            stats: Arc::clone(&self.stats),
            subscribers: Arc::clone(&self.subscribers),
            running: Arc::clone(&running),
            windows_closed: 0,
        };

        let handle = thread::Builder::new()
            .name("ddos-monitor".to_string())
            .spawn(move || {
                monitor.run();
                let _ = done_tx.send(());
            })?;

        *worker = Some(Worker {
            handle,
            running,
            done: done_rx,
        });
        log::info!("Detector started");
        Ok(())
    }

    /// Signals the monitor thread and waits up to the configured shutdown
    /// timeout for it to finish. Returns `false` if the thread had to be
    /// abandoned.
    pub fn stop(&self) -> bool {
        let Some(worker) = self.worker.lock().take() else {
            return true;
        };

        worker.running.store(false, Ordering::SeqCst);
        let timeout = self.config.shutdown_timeout();

        match worker.done.recv_timeout(timeout) {
            // a disconnect means the thread unwound without reporting
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    log::error!("Monitor thread panicked");
                }
                log::info!("Detector stopped");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Monitor thread did not stop within {:?}, abandoning it",
                    timeout
                );
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.get_snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    pub fn stats(&self) -> Arc<StatsStore> {
        Arc::clone(&self.stats)
    }

    pub fn model_status(&self) -> &ModelStatus {
        &self.model_status
    }

    pub fn classifier_name(&self) -> &str {
        self.classifier.name()
    }

    /// Receives a report for every non-empty window closed from now on.
    pub fn subscribe(&self) -> Receiver<WindowReport> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn health(&self) -> HealthReport {
        let model_loaded = self.model_status.is_loaded();
        let degraded = matches!(self.model_status, ModelStatus::Failed { .. });

        HealthReport {
            status: if degraded { "degraded" } else { "healthy" },
            model_loaded,
            model: self.model_status.clone(),
            classifier: self.classifier.name().to_string(),
            monitoring: self.is_running(),
            timestamp: Utc::now(),
        }
    }
}

impl Drop for Detector {
    fn drop(&mut self) {
        self.stop();
    }
}
