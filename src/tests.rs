#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use crossbeam_channel::{Receiver, Sender};

    use serde_json::json;

    use crate::classifier::{labels, Classification, Classifier};
    use crate::config::{DetectorConfig, ModelConfig};
    use crate::ddos_detector::ThresholdDetector;
    use crate::features::{extract, FeatureVector};
    use crate::model_predictor::ModelClassifier;
    use crate::monitor::Detector;
    use crate::packet::PacketRecord;
    use crate::DDoSError;

    const REPORT_WAIT: Duration = Duration::from_secs(3);

    fn fast_config() -> DetectorConfig {
        DetectorConfig {
            window_secs: 0.15,
            poll_interval_ms: 10,
            ..Default::default()
        }
    }

    fn syn(i: usize) -> PacketRecord {
        PacketRecord::new(
            i as f64 * 0.01,
            "10.0.0.66",
            "10.0.0.1",
            "6",
            60,
            &format!("{} > 80 [SYN] Seq=0", 40000 + i),
        )
    }

    fn udp(i: usize) -> PacketRecord {
        PacketRecord::new(i as f64 * 0.01, "10.0.0.77", "10.0.0.1", "17", 512, "Source port: 5353")
    }

    struct Counting {
        calls: AtomicUsize,
    }

    impl Counting {
        fn new() -> Self {
            Counting {
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Classifier for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn classify(&self, _features: FeatureVector) -> Classification {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Classification::normal()
        }
    }

    struct Exploding;

    impl Classifier for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }

        fn classify(&self, _features: FeatureVector) -> Classification {
            panic!("classifier blew up");
        }
    }

    /// Signals every call, then holds the monitor thread for `delay`.
    struct Sluggish {
        delay: Duration,
        entered: Sender<()>,
    }

    impl Sluggish {
        fn new(delay: Duration) -> (Self, Receiver<()>) {
            let (entered, rx) = crossbeam_channel::unbounded();
            (Sluggish { delay, entered }, rx)
        }
    }

    impl Classifier for Sluggish {
        fn name(&self) -> &str {
            "sluggish"
        }

        fn classify(&self, _features: FeatureVector) -> Classification {
            let _ = self.entered.send(());
            thread::sleep(self.delay);
            Classification::normal()
        }
    }

    #[test]
    fn test_syn_burst_is_flagged_by_rule() {
        let records: Vec<PacketRecord> = (0..15).map(syn).collect();
        let features = extract(&records, 1.0);

        assert_eq!(features.tcp, 15);
        assert_eq!(features.syn_flag_count, 15);
        assert_eq!(features.avg_packet_length, 60.0);

        let result = ThresholdDetector::new(10).classify(features);
        assert_eq!(result.label, labels::SYN_FLOOD);
    }

    #[test]
    fn test_live_syn_burst_reaches_stats() {
        let config = DetectorConfig {
            threshold: 10,
            ..fast_config()
        };
        let detector = Detector::from_config(config).unwrap();
        let reports = detector.subscribe();

        for i in 0..15 {
            detector.enqueue_record(syn(i));
        }
        detector.start().unwrap();

        let report = reports.recv_timeout(REPORT_WAIT).unwrap();
        assert_eq!(report.packet_count, 15);
        assert_eq!(report.classification.label, labels::SYN_FLOOD);
        assert!(detector.stop());

        let snapshot = detector.snapshot();
        assert_eq!(snapshot.total_packets_processed, 15);
        assert_eq!(snapshot.label_count(labels::SYN_FLOOD), 1);
        assert_eq!(snapshot.last_label, labels::SYN_FLOOD);
        assert!(snapshot.last_detection_timestamp.is_some());
        assert_eq!(snapshot.history.len(), 1);
    }

    #[test]
    fn test_each_window_is_classified_once() {
        let counting = Arc::new(Counting::new());
        let detector = Detector::new(fast_config(), counting.clone()).unwrap();
        let reports = detector.subscribe();

        for i in 0..3 {
            detector.enqueue_record(udp(i));
        }
        detector.start().unwrap();

        let first = reports.recv_timeout(REPORT_WAIT).unwrap();
        assert_eq!(first.packet_count, 3);
        assert_eq!(first.index, 1);

        detector.enqueue_record(udp(3));
        let second = reports.recv_timeout(REPORT_WAIT).unwrap();
        assert_eq!(second.packet_count, 1);
        assert_eq!(second.index, 2);

        // further windows are empty and never reach the classifier
        thread::sleep(Duration::from_millis(400));
        assert!(detector.stop());

        assert_eq!(counting.calls(), 2);
        let snapshot = detector.snapshot();
        assert_eq!(snapshot.windows_processed, 2);
        assert_eq!(snapshot.total_packets_processed, 4);
        assert_eq!(snapshot.label_count(labels::NORMAL), 2);
    }

    #[test]
    fn test_empty_windows_leave_stats_untouched() {
        let counting = Arc::new(Counting::new());
        let detector = Detector::new(fast_config(), counting.clone()).unwrap();
        let before = detector.snapshot();

        detector.start().unwrap();
        thread::sleep(Duration::from_millis(500));
        assert!(detector.stop());

        assert_eq!(counting.calls(), 0);
        assert_eq!(detector.snapshot(), before);
    }

    #[test]
    fn test_panicking_classifier_records_unknown() {
        let detector = Detector::new(fast_config(), Arc::new(Exploding)).unwrap();
        let reports = detector.subscribe();

        detector.enqueue_record(udp(0));
        detector.enqueue_record(udp(1));
        detector.start().unwrap();

        let report = reports.recv_timeout(REPORT_WAIT).unwrap();
        assert_eq!(report.classification.label, labels::UNKNOWN);

        // the monitor keeps running after the panic
        detector.enqueue_record(udp(2));
        assert!(reports.recv_timeout(REPORT_WAIT).is_ok());
        assert!(detector.is_running());
        assert!(detector.stop());

        let snapshot = detector.snapshot();
        assert_eq!(snapshot.total_packets_processed, 3);
        assert_eq!(snapshot.label_count(labels::UNKNOWN), 2);
        assert_eq!(snapshot.last_label, labels::UNKNOWN);
    }

    #[test]
    fn test_slow_closure_stretches_without_losing_packets() {
        let config = DetectorConfig {
            window_secs: 0.1,
            poll_interval_ms: 10,
            ..Default::default()
        };
        let (sluggish, entered) = Sluggish::new(Duration::from_millis(300));
        let detector = Detector::new(config, Arc::new(sluggish)).unwrap();
        let reports = detector.subscribe();

        detector.enqueue_record(udp(0));
        detector.enqueue_record(udp(1));
        detector.start().unwrap();

        // arrive while the first window is still being classified
        entered.recv_timeout(REPORT_WAIT).unwrap();
        for i in 2..5 {
            detector.enqueue_record(udp(i));
        }

        let first = reports.recv_timeout(REPORT_WAIT).unwrap();
        let second = reports.recv_timeout(REPORT_WAIT).unwrap();
        assert!(detector.stop());

        assert_eq!(first.packet_count, 2);
        assert_eq!(second.packet_count, 3);
        // the second window opened only once the slow closure finished
        let first_done = first.timestamp.timestamp_millis() as f64 / 1000.0;
        assert!(second.window_start >= first_done - 0.05);

        let snapshot = detector.snapshot();
        assert_eq!(snapshot.total_packets_processed, 5);
        assert_eq!(snapshot.windows_processed, 2);
    }

    #[test]
    fn test_stop_abandons_blocked_monitor() {
        let config = DetectorConfig {
            shutdown_timeout_ms: 100,
            ..fast_config()
        };
        let (sluggish, entered) = Sluggish::new(Duration::from_millis(1500));
        let detector = Detector::new(config, Arc::new(sluggish)).unwrap();

        detector.enqueue_record(udp(0));
        detector.start().unwrap();
        entered.recv_timeout(REPORT_WAIT).unwrap();

        let started = Instant::now();
        assert!(!detector.stop());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!detector.is_running());
    }

    #[test]
    fn test_full_queue_drops_show_in_snapshot() {
        let config = DetectorConfig {
            queue_capacity: Some(2),
            ..fast_config()
        };
        let detector = Detector::from_config(config).unwrap();

        for i in 0..5 {
            detector.enqueue_record(udp(i));
        }
        assert_eq!(detector.ingress().len(), 2);
        assert_eq!(detector.snapshot().packets_dropped, 3);

        // a reset only clears drops counted before it
        detector.reset_stats();
        assert_eq!(detector.snapshot().packets_dropped, 0);
        detector.enqueue_record(udp(5));
        assert_eq!(detector.snapshot().packets_dropped, 1);
    }

    #[test]
    fn test_untyped_fields_are_accepted() {
        let detector = Detector::new(fast_config(), Arc::new(ThresholdDetector::new(1))).unwrap();
        let reports = detector.subscribe();

        for _ in 0..2 {
            let fields = json!({"Time": "3.5", "Protocol": "ICMP", "Length": 98, "Info": "Echo (ping) request"});
            detector.enqueue(fields.as_object().unwrap());
        }
        // no fields at all still counts as a packet
        detector.enqueue(json!({}).as_object().unwrap());
        detector.start().unwrap();

        let report = reports.recv_timeout(REPORT_WAIT).unwrap();
        assert!(detector.stop());

        assert_eq!(report.packet_count, 3);
        assert_eq!(report.features.icmp, 2);
        assert_eq!(report.features.other, 1);
        assert_eq!(report.classification.label, labels::ICMP_FLOOD);
    }

    fn write_json(value: &serde_json::Value) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(value.to_string().as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_forest_model_drives_live_detection() {
        let model = write_json(&json!({
            "feature_order": ["TCP", "UDP", "ICMP"],
            "trees": [{
                "nodes": [
                    {"feature": 1, "threshold": 5.0, "left": 1, "right": 2},
                    {"value": [1.0, 0.0]},
                    {"value": [0.0, 1.0]}
                ]
            }]
        }));
        let labels_file = write_json(&json!({"classes": ["Normal", "UDPFlood"]}));

        let config = DetectorConfig {
            model: Some(ModelConfig::new(model.path(), labels_file.path())),
            ..fast_config()
        };
        let detector = Detector::from_config(config).unwrap();
        assert_eq!(detector.classifier_name(), "model");
        assert!(detector.health().model_loaded);

        let reports = detector.subscribe();
        for i in 0..8 {
            detector.enqueue_record(udp(i));
        }
        detector.start().unwrap();

        let report = reports.recv_timeout(REPORT_WAIT).unwrap();
        assert!(detector.stop());

        assert_eq!(report.classification.label, labels::UDP_FLOOD);
        assert_eq!(report.classification.confidence, Some(1.0));
    }

    #[test]
    fn test_injected_model_is_reported_loaded() {
        let model = write_json(&json!({
            "feature_order": ["UDP"],
            "trees": [{"nodes": [{"value": [1.0, 0.0]}]}]
        }));
        let labels_file = write_json(&json!({"classes": ["Normal", "UDPFlood"]}));
        let classifier =
            ModelClassifier::from_config(&ModelConfig::new(model.path(), labels_file.path())).unwrap();

        let detector = Detector::new(fast_config(), Arc::new(classifier)).unwrap();
        let health = detector.health();

        assert_eq!(health.status, "healthy");
        assert!(health.model_loaded);
        assert_eq!(health.classifier, "model");
    }

    #[test]
    fn test_missing_model_degrades_to_rule() {
        let config = DetectorConfig {
            model: Some(ModelConfig::new("/nonexistent/forest.json", "/nonexistent/labels.json")),
            ..fast_config()
        };
        let detector = Detector::from_config(config).unwrap();
        let health = detector.health();

        assert_eq!(health.status, "degraded");
        assert!(!health.model_loaded);
        assert_eq!(health.classifier, "threshold");
    }

    #[test]
    fn test_restart_after_stop() {
        let counting = Arc::new(Counting::new());
        let detector = Detector::new(fast_config(), counting.clone()).unwrap();
        let reports = detector.subscribe();

        detector.start().unwrap();
        detector.enqueue_record(udp(0));
        reports.recv_timeout(REPORT_WAIT).unwrap();
        assert!(detector.stop());

        detector.start().unwrap();
        detector.enqueue_record(udp(1));
        reports.recv_timeout(REPORT_WAIT).unwrap();
        assert!(detector.stop());

        assert_eq!(counting.calls(), 2);
        assert_eq!(detector.snapshot().windows_processed, 2);
    }

    #[test]
    fn test_error_types() {
        let io_error = DDoSError::IoError(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
        let model_error = DDoSError::ModelError("Test model error".to_string());
        let config_error = DDoSError::ConfigError("Test config error".to_string());

        assert!(format!("{}", io_error).contains("IO error"));
        assert!(format!("{}", model_error).contains("Model error"));
        assert!(format!("{}", config_error).contains("Configuration error"));
    }

    #[test]
    fn test_error_from_str() {
        let error: DDoSError = "Test error message".into();
        match error {
            DDoSError::ConfigError(msg) => assert_eq!(msg, "Test error message"),
            _ => panic!("Expected ConfigError"),
        }
    }

    #[test]
    fn test_parse_float_error_converts() {
        let error: DDoSError = "abc".parse::<f64>().unwrap_err().into();
        assert!(matches!(error, DDoSError::ParseError(_)));
    }
}
