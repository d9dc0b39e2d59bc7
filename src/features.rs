//! Per-window aggregate features.

use serde::{Deserialize, Serialize};

use crate::packet::PacketRecord;
use crate::protocol::{classify_protocol, Protocol};

/// Names under which each feature is exposed, in the column order the
/// dataset exports use.
pub const FEATURE_NAMES: [&str; 9] = [
    "TCP",
    "UDP",
    "ICMP",
    "Other",
    "Packet_Count",
    "Packet_Rate",
    "Avg_Packet_Length",
    "SYN_Flag_Count",
    "Fragmented_Packet_Count",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub tcp: u64,
    pub udp: u64,
    pub icmp: u64,
    pub other: u64,
    pub packet_count: u64,
    /// Packets per second over the configured window duration.
    pub packet_rate: f64,
    pub avg_packet_length: f64,
    pub syn_flag_count: u64,
    pub fragmented_packet_count: u64,
}

impl FeatureVector {
    /// Looks a feature up by its exported name.
    pub fn get(&self, name: &str) -> Option<f64> {
        let value = match name {
            "TCP" => self.tcp as f64,
            "UDP" => self.udp as f64,
            "ICMP" => self.icmp as f64,
            "Other" => self.other as f64,
            "Packet_Count" => self.packet_count as f64,
            "Packet_Rate" => self.packet_rate,
            "Avg_Packet_Length" => self.avg_packet_length,
            "SYN_Flag_Count" => self.syn_flag_count as f64,
            "Fragmented_Packet_Count" => self.fragmented_packet_count as f64,
            _ => return None,
        };
        Some(value)
    }

    pub fn is_known(name: &str) -> bool {
        FEATURE_NAMES.contains(&name)
    }

    /// Values for `names` in the given order. Unknown names yield `0.0`;
    /// callers validate their column list up front.
    pub fn select(&self, names: &[String]) -> Vec<f64> {
        names.iter().map(|n| self.get(n).unwrap_or(0.0)).collect()
    }

    pub fn protocol_count(&self, protocol: Protocol) -> u64 {
        match protocol {
            Protocol::Tcp => self.tcp,
            Protocol::Udp => self.udp,
            Protocol::Icmp => self.icmp,
            Protocol::Other => self.other,
        }
    }

    pub fn to_values(&self) -> [f64; 9] {
        let mut values = [0.0; 9];
        for (slot, name) in values.iter_mut().zip(FEATURE_NAMES.iter()) {
            *slot = self.get(name).unwrap_or(0.0);
        }
        values
    }
}

pub fn is_syn(info: &str) -> bool {
    info.to_ascii_lowercase().contains("[syn]")
}

pub fn is_fragmented(info: &str) -> bool {
    info.to_ascii_lowercase().contains("fragmented")
}

/// Aggregates one window of records into a feature vector.
///
/// `window_secs` is the configured window duration, not the measured one, so
/// the same records always produce the same rate.
pub fn extract(records: &[PacketRecord], window_secs: f64) -> FeatureVector {
    let mut features = FeatureVector::default();
    let mut total_length: u64 = 0;

    for record in records {
        match classify_protocol(&record.protocol, &record.info) {
            Protocol::Tcp => features.tcp += 1,
            Protocol::Udp => features.udp += 1,
            Protocol::Icmp => features.icmp += 1,
            Protocol::Other => features.other += 1,
        }

        if is_syn(&record.info) {
            features.syn_flag_count += 1;
        }
        if is_fragmented(&record.info) {
            features.fragmented_packet_count += 1;
        }

        total_length = total_length.saturating_add(record.length);
    }

    features.packet_count = records.len() as u64;

    if !records.is_empty() {
        features.avg_packet_length = total_length as f64 / records.len() as f64;
    }

    if window_secs.is_finite() && window_secs > 0.0 {
        features.packet_rate = features.packet_count as f64 / window_secs;
    }

    features
}
