use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};

use ddos_stream::classifier::load_classifier;
use ddos_stream::logging;
use ddos_stream::replay::{read_capture, replay_windows, write_report_csv, CaptureReader};
use ddos_stream::{DDoSError, Detector, DetectorConfig, ModelConfig, Result, StatsStore};

#[derive(Parser, Debug)]
#[command(author, version, about = "Windowed DDoS flood detection over packet capture streams")]
struct Args {
    /// JSON configuration file; flags below override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Window duration in seconds
    #[arg(long, global = true)]
    window_secs: Option<f64>,

    /// Per-protocol packet count that flags a flood
    #[arg(long, global = true)]
    threshold: Option<u64>,

    /// Bound the ingress queue, dropping the oldest packets when full
    #[arg(long, global = true)]
    queue_capacity: Option<usize>,

    /// Forest model exported as JSON
    #[arg(long, global = true)]
    model: Option<PathBuf>,

    /// Label decoder matching the model
    #[arg(long, global = true)]
    labels: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify a live capture stream (stdin or a growing file)
    Monitor {
        /// Capture input, `-` for stdin
        #[arg(short, long, default_value = "-")]
        input: String,

        /// Field delimiter: a single character, `tab` or `pipe`
        #[arg(long, default_value = "tab", value_parser = parse_delimiter)]
        delimiter: u8,

        /// Seconds between printed snapshots
        #[arg(long, default_value_t = 5)]
        report_secs: u64,
    },
    /// Classify a finished capture file by packet timestamps
    Replay {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(long, default_value = "tab", value_parser = parse_delimiter)]
        delimiter: u8,

        /// Write one CSV row of features and label per window
        #[arg(long)]
        features_out: Option<PathBuf>,
    },
}

fn parse_delimiter(raw: &str) -> std::result::Result<u8, String> {
    match raw {
        "tab" | "\\t" | "\t" => Ok(b'\t'),
        "pipe" => Ok(b'|'),
        "comma" => Ok(b','),
        other if other.len() == 1 && other.is_ascii() => Ok(other.as_bytes()[0]),
        other => Err(format!("unsupported delimiter '{}'", other)),
    }
}

fn build_config(args: &Args) -> Result<DetectorConfig> {
    let mut config = match &args.config {
        Some(path) => DetectorConfig::from_file(path)?,
        None => DetectorConfig::default(),
    };

    if let Some(window_secs) = args.window_secs {
        config.window_secs = window_secs;
    }
    if let Some(threshold) = args.threshold {
        config.threshold = threshold;
    }
    if let Some(capacity) = args.queue_capacity {
        config.queue_capacity = Some(capacity);
    }

    match (&args.model, &args.labels) {
        (Some(model), Some(labels)) => {
            let timeout_ms = config.model.as_ref().map(|m| m.timeout_ms);
            let mut model_config = ModelConfig::new(model, labels);
            if let Some(timeout_ms) = timeout_ms {
                model_config.timeout_ms = timeout_ms;
            }
            config.model = Some(model_config);
        }
        (None, None) => {}
        _ => return Err("--model and --labels must be given together".into()),
    }

    config.validate()?;
    Ok(config)
}

fn open_input(input: &str) -> Result<Box<dyn Read + Send>> {
    if input == "-" {
        Ok(Box::new(io::stdin()))
    } else {
        Ok(Box::new(File::open(input)?))
    }
}

fn run_monitor(config: DetectorConfig, input: &str, delimiter: u8, report_secs: u64) -> Result<()> {
    let window = config.window();
    let detector = Detector::from_config(config)?;
    log::info!("Health: {}", serde_json::to_string(&detector.health())?);

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            log::info!("Ctrl+C received, stopping capture...");
            running.store(false, Ordering::SeqCst);
        })?;
    }

    let source = open_input(input)?;
    detector.start()?;

    let ingress = detector.ingress().clone();
    let reader_running = running.clone();
    let reader = thread::Builder::new()
        .name("capture-reader".to_string())
        .spawn(move || {
            let mut capture = CaptureReader::new(source, delimiter);
            for record in capture.by_ref() {
                if !reader_running.load(Ordering::SeqCst) {
                    break;
                }
                ingress.enqueue_record(record);
            }
            (capture.lines(), capture.malformed())
        })?;

    log::info!("Capturing from {}... Press Ctrl+C to stop", input);

    let report_every = Duration::from_secs(report_secs.max(1));
    let mut last_report = Instant::now();

    while running.load(Ordering::SeqCst) {
        if reader.is_finished() {
            // give the packets still queued a window to close in
            while !detector.ingress().is_empty() && running.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(50));
            }
            log::info!("End of input, waiting for the last window to close");
            thread::sleep(window.saturating_add(Duration::from_millis(200)));
            break;
        }

        if last_report.elapsed() >= report_every {
            println!("{}", serde_json::to_string(&detector.snapshot())?);
            last_report = Instant::now();
        }
        thread::sleep(Duration::from_millis(100));
    }

    if !detector.stop() {
        log::warn!("Detector did not shut down cleanly");
    }

    if reader.is_finished() {
        match reader.join() {
            Ok((lines, malformed)) => {
                log::info!("Read {} capture lines, {} malformed", lines, malformed)
            }
            Err(_) => log::error!("Capture reader panicked"),
        }
    }

    let snapshot = detector.snapshot();
    if snapshot.packets_dropped > 0 {
        log::warn!("{} packets dropped by the full ingress queue", snapshot.packets_dropped);
    }
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn run_replay(
    config: DetectorConfig,
    input: &Path,
    delimiter: u8,
    features_out: Option<&Path>,
) -> Result<()> {
    let (classifier, status) = load_classifier(&config);
    log::info!("Model status: {}", serde_json::to_string(&status)?);

    let (records, malformed) = read_capture(File::open(input)?, delimiter);
    log::info!(
        "Replaying {} packets from {} ({} malformed lines skipped)",
        records.len(),
        input.display(),
        malformed
    );

    let stats = StatsStore::new(config.history_cap);
    let reports = replay_windows(records, config.window_secs, classifier.as_ref(), &stats);

    for report in reports.iter().filter(|r| !r.classification.is_normal()) {
        log::warn!(
            "POTENTIAL DDOS DETECTED: {} in window starting {:.3} ({} packets)",
            report.classification.label,
            report.window_start,
            report.packet_count
        );
    }

    if let Some(path) = features_out {
        write_report_csv(File::create(path)?, &reports)?;
        log::info!("Wrote {} window rows to {}", reports.len(), path.display());
    }

    println!("{}", serde_json::to_string_pretty(&stats.get_snapshot())?);
    Ok(())
}

fn main() -> std::result::Result<(), DDoSError> {
    let args = Args::parse();
    logging::init_logger(logging::get_log_level(&args.log_level));
    log::info!("Starting ddos-stream v{}", env!("CARGO_PKG_VERSION"));

    let config = build_config(&args)?;

    match &args.command {
        Command::Monitor {
            input,
            delimiter,
            report_secs,
        } => run_monitor(config, input, *delimiter, *report_secs),
        Command::Replay {
            input,
            delimiter,
            features_out,
        } => run_replay(config, input, *delimiter, features_out.as_deref()),
    }
}
