//! Capture files and offline replay.
//!
//! A capture is a stream of six-field delimited lines, as produced by
//! `tshark -T fields -e frame.time_epoch -e ip.src -e ip.dst -e ip.proto
//! -e frame.len -e _ws.col.Info`. Replay windows a finished capture by the
//! packets' own timestamps, so the same file always gives the same windows.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use chrono::Utc;
use serde::Serialize;

use crate::classifier::{classify_guarded, Classifier};
use crate::error::Result;
use crate::features::extract;
use crate::monitor::WindowReport;
use crate::packet::PacketRecord;
use crate::stats::{DetectionResult, StatsStore};

/// Streams well-formed records out of a capture, skipping and counting
/// malformed lines.
pub struct CaptureReader<R: Read> {
    rows: csv::StringRecordsIntoIter<R>,
    delimiter: char,
    lines: u64,
    malformed: u64,
}

impl<R: Read> CaptureReader<R> {
    pub fn new(reader: R, delimiter: u8) -> Self {
        let rows = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .delimiter(delimiter)
            .from_reader(reader)
            .into_records();

        CaptureReader {
            rows,
            delimiter: delimiter as char,
            lines: 0,
            malformed: 0,
        }
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }

    pub fn malformed(&self) -> u64 {
        self.malformed
    }
}

impl<R: Read> Iterator for CaptureReader<R> {
    type Item = PacketRecord;

    fn next(&mut self) -> Option<PacketRecord> {
        loop {
            match self.rows.next()? {
                Ok(row) => {
                    self.lines += 1;
                    match PacketRecord::from_capture_fields(row.iter(), self.delimiter) {
                        Some(record) => return Some(record),
                        None => {
                            self.malformed += 1;
                            log::debug!("Dropping malformed capture line {}: {:?}", self.lines, row);
                        }
                    }
                }
                Err(e) if e.is_io_error() => {
                    log::error!("Capture read failed: {}", e);
                    return None;
                }
                Err(e) => {
                    self.lines += 1;
                    self.malformed += 1;
                    log::debug!("Dropping unreadable capture line: {}", e);
                }
            }
        }
    }
}

/// Reads a whole capture. Returns the records and the malformed line count.
pub fn read_capture<R: Read>(reader: R, delimiter: u8) -> (Vec<PacketRecord>, u64) {
    let mut capture = CaptureReader::new(reader, delimiter);
    let records: Vec<PacketRecord> = capture.by_ref().collect();
    if capture.malformed() > 0 {
        log::info!(
            "Skipped {} malformed lines out of {}",
            capture.malformed(),
            capture.lines()
        );
    }
    (records, capture.malformed())
}

/// Windows `records` on a grid anchored at the earliest timestamp and
/// classifies every non-empty window, applying each to `stats`.
///
/// Records with a non-finite timestamp are ignored.
pub fn replay_windows(
    records: Vec<PacketRecord>,
    window_secs: f64,
    classifier: &dyn Classifier,
    stats: &StatsStore,
) -> Vec<WindowReport> {
    let records: Vec<PacketRecord> = records.into_iter().filter(|r| r.timestamp.is_finite()).collect();

    let Some(start) = records.iter().map(|r| r.timestamp).reduce(f64::min) else {
        return Vec::new();
    };

    let mut bins: BTreeMap<u64, Vec<PacketRecord>> = BTreeMap::new();
    for record in records {
        let bin = ((record.timestamp - start) / window_secs).floor() as u64;
        bins.entry(bin).or_default().push(record);
    }

    let mut reports = Vec::with_capacity(bins.len());
    for (i, (bin, bucket)) in bins.into_iter().enumerate() {
        let packet_count = bucket.len() as u64;
        let features = extract(&bucket, window_secs);
        let classification = classify_guarded(classifier, features);

        stats.record_window(DetectionResult::new(classification.clone(), packet_count));

        reports.push(WindowReport {
            index: i as u64 + 1,
            window_start: start + bin as f64 * window_secs,
            elapsed_secs: window_secs,
            packet_count,
            features,
            classification,
            timestamp: Utc::now(),
        });
    }

    reports
}

#[derive(Serialize)]
struct WindowRow<'a> {
    #[serde(rename = "Window_Start")]
    window_start: f64,
    #[serde(rename = "TCP")]
    tcp: u64,
    #[serde(rename = "UDP")]
    udp: u64,
    #[serde(rename = "ICMP")]
    icmp: u64,
    #[serde(rename = "Other")]
    other: u64,
    #[serde(rename = "Packet_Count")]
    packet_count: u64,
    #[serde(rename = "Packet_Rate")]
    packet_rate: f64,
    #[serde(rename = "Avg_Packet_Length")]
    avg_packet_length: f64,
    #[serde(rename = "SYN_Flag_Count")]
    syn_flag_count: u64,
    #[serde(rename = "Fragmented_Packet_Count")]
    fragmented_packet_count: u64,
    #[serde(rename = "Label")]
    label: &'a str,
    #[serde(rename = "Confidence")]
    confidence: Option<f64>,
}

/// Writes one CSV row per window: start, every feature, label, confidence.
pub fn write_report_csv<W: Write>(writer: W, reports: &[WindowReport]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);

    for report in reports {
        let f = &report.features;
        writer.serialize(WindowRow {
            window_start: report.window_start,
            tcp: f.tcp,
            udp: f.udp,
            icmp: f.icmp,
            other: f.other,
            packet_count: f.packet_count,
            packet_rate: f.packet_rate,
            avg_packet_length: f.avg_packet_length,
            syn_flag_count: f.syn_flag_count,
            fragmented_packet_count: f.fragmented_packet_count,
            label: &report.classification.label,
            confidence: report.classification.confidence,
        })?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::labels;
    use crate::ddos_detector::ThresholdDetector;

    const CAPTURE: &str = "\
1000.00\t10.0.0.5\t10.0.0.1\t6\t60\t51000 > 80 [SYN] Seq=0
1000.10\t10.0.0.5\t10.0.0.1\t6\t60\t51001 > 80 [SYN] Seq=0
1000.90\t10.0.0.6\t10.0.0.1\t17\t512\tSource port: 4000
broken line without enough fields
1002.50\t10.0.0.7\t10.0.0.1\t1\t98\tEcho (ping) request
not-a-time\t10.0.0.7\t10.0.0.1\t1\t98\tEcho (ping) request
";

    #[test]
    fn test_reader_skips_malformed_lines() {
        let (records, malformed) = read_capture(CAPTURE.as_bytes(), b'\t');
        assert_eq!(records.len(), 4);
        assert_eq!(malformed, 2);
        assert_eq!(records[3].protocol, "1");
    }

    #[test]
    fn test_pipe_delimited_capture() {
        let capture = "5.0|a|b|17|100|Fragmented IP protocol (proto=UDP 17, off=0)\n";
        let (records, malformed) = read_capture(capture.as_bytes(), b'|');
        assert_eq!(records.len(), 1);
        assert_eq!(malformed, 0);
        assert!(records[0].info.starts_with("Fragmented"));
    }

    #[test]
    fn test_replay_windows_by_packet_time() {
        let (records, _) = read_capture(CAPTURE.as_bytes(), b'\t');
        let stats = StatsStore::default();
        let detector = ThresholdDetector::new(1);

        let reports = replay_windows(records, 1.0, &detector, &stats);

        // [1000, 1001) holds three packets, [1002, 1003) one; [1001, 1002) is empty
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].packet_count, 3);
        assert_eq!(reports[0].window_start, 1000.0);
        assert_eq!(reports[0].classification.label, labels::SYN_FLOOD);
        assert_eq!(reports[1].packet_count, 1);
        assert_eq!(reports[1].window_start, 1002.0);
        assert_eq!(reports[1].classification.label, labels::NORMAL);

        let snapshot = stats.get_snapshot();
        assert_eq!(snapshot.total_packets_processed, 4);
        assert_eq!(snapshot.windows_processed, 2);
        assert_eq!(snapshot.history.len(), 1);
    }

    #[test]
    fn test_replay_of_nothing() {
        let stats = StatsStore::default();
        let reports = replay_windows(Vec::new(), 1.0, &ThresholdDetector::new(1), &stats);
        assert!(reports.is_empty());
        assert_eq!(stats.get_snapshot().windows_processed, 0);
    }

    #[test]
    fn test_report_csv_has_feature_columns() {
        let (records, _) = read_capture(CAPTURE.as_bytes(), b'\t');
        let reports = replay_windows(records, 1.0, &ThresholdDetector::new(1), &StatsStore::default());

        let mut out = Vec::new();
        write_report_csv(&mut out, &reports).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();

        let header = lines.next().unwrap();
        assert!(header.starts_with("Window_Start,TCP,UDP,ICMP,Other,Packet_Count"));
        assert!(header.ends_with("Label,Confidence"));
        assert!(lines.next().unwrap().contains("SynFlood"));
        assert_eq!(lines.count(), 1);
    }
}
