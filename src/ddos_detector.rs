use crate::classifier::{labels, Classification, Classifier};
use crate::features::FeatureVector;
use crate::protocol::Protocol;

/// Rule-based flood detector.
///
/// A window is flagged when one protocol's packet count exceeds the
/// threshold. Protocols are checked in the order TCP, UDP, ICMP and the first
/// one over the threshold decides the label.
#[derive(Debug, Clone)]
pub struct ThresholdDetector {
    threshold: u64,
}

const RULE_ORDER: [(Protocol, &str); 3] = [
    (Protocol::Tcp, labels::SYN_FLOOD),
    (Protocol::Udp, labels::UDP_FLOOD),
    (Protocol::Icmp, labels::ICMP_FLOOD),
];

impl ThresholdDetector {
    pub fn new(threshold: u64) -> Self {
        ThresholdDetector { threshold }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn check_window(&self, features: &FeatureVector) -> &'static str {
        RULE_ORDER
            .iter()
            .find(|(protocol, _)| features.protocol_count(*protocol) > self.threshold)
            .map(|(_, label)| *label)
            .unwrap_or(labels::NORMAL)
    }
}

impl Classifier for ThresholdDetector {
    fn name(&self) -> &str {
        "threshold"
    }

    fn classify(&self, features: FeatureVector) -> Classification {
        Classification::new(self.check_window(&features), None)
    }
}
