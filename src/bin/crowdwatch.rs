//! crowdwatch - headless crowd counter.
//!
//! This binary:
//! 1. Loads configuration (file named by CROWD_CONFIG, env overrides, flags)
//! 2. Loads the detector and opens the frame source and telemetry sink
//! 3. Runs the monitor loop until Ctrl-C or end of stream
//! 4. Prints the run summary and optionally writes the metrics as JSON

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crowdwatch::ui::{Ui, UiMode};
use crowdwatch::{
    CrowdConfig, CrowdMonitor, EdgeMode, MetricsReport, RunSummary, RunningMetrics,
    SourceKind, SourceSettings,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Count people in a video stream")]
struct Args {
    /// JSON or TOML configuration file.
    #[arg(long, env = "CROWD_CONFIG")]
    config: Option<PathBuf>,

    /// Video path, RTSP URL, camera device/index, or stub://name.
    #[arg(long, env = "CROWD_SOURCE")]
    source: Option<String>,

    /// Source kind (video|rtsp|camera).
    #[arg(long, env = "CROWD_SOURCE_KIND", value_name = "KIND")]
    kind: Option<String>,

    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,

    /// Detector backend (stub|tract).
    #[arg(long)]
    backend: Option<String>,

    /// ONNX detection model.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Edge profile (auto|on|off).
    #[arg(long, value_name = "MODE")]
    edge: Option<String>,

    /// Publish telemetry even outside edge mode.
    #[arg(long, conflicts_with = "no_telemetry")]
    telemetry: bool,

    /// Never publish telemetry.
    #[arg(long)]
    no_telemetry: bool,

    /// Write the collected metrics as JSON when the run ends.
    #[arg(long, value_name = "PATH")]
    metrics_out: Option<PathBuf>,

    /// UI mode for stderr progress (auto|plain|pretty).
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

#[derive(Serialize)]
struct MetricsExport<'a> {
    run: &'a RunSummary,
    #[serde(flatten)]
    metrics: MetricsReport<'a>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::new(args.ui.parse::<UiMode>()?, std::io::stderr().is_terminal());

    let cfg = {
        let _stage = ui.stage("Load configuration");
        load_config(&args)?
    };

    let mut monitor = {
        let _stage = ui.stage("Start pipeline");
        CrowdMonitor::from_config(&cfg)?
    };

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })
        .context("install Ctrl-C handler")?;
    }

    log::info!("crowdwatch running (Ctrl-C to stop)");
    let mut display = ui.run_display(monitor.analyzer().settings().max_people_threshold);
    let result = monitor.run(&running, &mut display);
    display.finish();
    monitor.shutdown();
    let summary = result?;

    print_results(&summary, monitor.metrics());

    if let Some(path) = &args.metrics_out {
        write_metrics(path, &summary, monitor.metrics())?;
        log::info!("metrics written to {}", path.display());
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<CrowdConfig> {
    let mut cfg = CrowdConfig::load_from(args.config.as_deref())?;

    if let Some(locator) = &args.source {
        let kind = match &args.kind {
            Some(kind) => kind.parse()?,
            None => cfg
                .source
                .as_ref()
                .map(|s| s.kind)
                .unwrap_or(SourceKind::Video),
        };
        cfg.source = Some(SourceSettings {
            kind,
            locator: locator.clone(),
            max_frames: cfg.source.as_ref().and_then(|s| s.max_frames),
        });
    } else if let (Some(kind), Some(source)) = (&args.kind, cfg.source.as_mut()) {
        source.kind = kind.parse()?;
    }
    if let (Some(max_frames), Some(source)) = (args.max_frames, cfg.source.as_mut()) {
        source.max_frames = Some(max_frames);
    }
    if let Some(backend) = &args.backend {
        cfg.detector.backend = backend.clone();
    }
    if let Some(model) = &args.model {
        cfg.detector.model_path = model.clone();
    }
    if let Some(edge) = &args.edge {
        cfg.edge.mode = edge.parse::<EdgeMode>()?;
    }
    if args.telemetry {
        cfg.telemetry.enabled = Some(true);
    }
    if args.no_telemetry {
        cfg.telemetry.enabled = Some(false);
    }

    cfg.validate()?;
    Ok(cfg)
}

fn print_results(summary: &RunSummary, metrics: &RunningMetrics) {
    for line in result_lines(summary, metrics) {
        println!("{line}");
    }
}

fn result_lines(summary: &RunSummary, metrics: &RunningMetrics) -> Vec<String> {
    let totals = metrics.summary();
    let mut lines = vec![
        format!("Run ended: {:?}", summary.stop),
        format!(
            "Frames: {} read, {} analyzed, {} skipped, {} failed",
            summary.frames_read,
            summary.frames_processed,
            summary.frames_skipped,
            summary.frames_failed
        ),
    ];
    if totals.frames_analyzed > 0 {
        lines.push(format!("Total people detected: {}", totals.total_people));
        lines.push(format!(
            "People: peak {}, mean {:.1}",
            totals.peak_people,
            totals.total_people as f64 / totals.frames_analyzed as f64
        ));
        lines.push(format!(
            "Anomalies: {} across {} frames",
            totals.total_anomalies, totals.frames_with_anomalies
        ));
        lines.push(format!("Processing: {:.2} ms/frame", totals.mean_processing_ms));
    }
    lines.push(format!(
        "Telemetry: {} sent, {} suppressed, {} failed",
        summary.telemetry_sent, summary.telemetry_suppressed, summary.telemetry_failed
    ));
    lines
}

fn write_metrics(path: &Path, summary: &RunSummary, metrics: &RunningMetrics) -> Result<()> {
    let export = MetricsExport {
        run: summary,
        metrics: metrics.report(),
    };
    let json = serde_json::to_string_pretty(&export)?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write metrics to {}", path.display()))?;
    Ok(())
}
