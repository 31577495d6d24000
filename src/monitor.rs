//! Headless monitoring loop.
//!
//! `CrowdMonitor` wires a `FrameSource`, a `FrameAnalyzer` and an optional
//! `TelemetryReporter` together and drives them one frame at a time until
//! the run flag is cleared or the stream ends. Presentation happens through
//! a `FrameObserver`, which sees every frame and its outcome.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::analyzer::{FrameAnalyzer, FrameOutcome};
use crate::config::CrowdConfig;
use crate::detect::open_backend;
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::metrics::RunningMetrics;
use crate::telemetry::{open_sink, ReportDecision, TelemetryPolicy, TelemetryReporter};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(30);
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Receives every frame read during a run, in order. `index` starts at 1.
pub trait FrameObserver {
    fn on_frame(&mut self, index: u64, frame: &Frame, outcome: &FrameOutcome);
}

impl<F> FrameObserver for F
where
    F: FnMut(u64, &Frame, &FrameOutcome),
{
    fn on_frame(&mut self, index: u64, frame: &Frame, outcome: &FrameOutcome) {
        self(index, frame, outcome)
    }
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl FrameObserver for NoopObserver {
    fn on_frame(&mut self, _index: u64, _frame: &Frame, _outcome: &FrameOutcome) {}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum StopReason {
    /// The run flag was cleared.
    Stopped,
    EndOfStream,
    SourceError(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub frames_read: u64,
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub frames_failed: u64,
    pub telemetry_sent: u64,
    pub telemetry_suppressed: u64,
    pub telemetry_failed: u64,
    pub stop: StopReason,
}

impl Default for RunSummary {
    fn default() -> Self {
        Self {
            frames_read: 0,
            frames_processed: 0,
            frames_skipped: 0,
            frames_failed: 0,
            telemetry_sent: 0,
            telemetry_suppressed: 0,
            telemetry_failed: 0,
            stop: StopReason::Stopped,
        }
    }
}

pub struct CrowdMonitor {
    source: FrameSource,
    analyzer: FrameAnalyzer,
    reporter: Option<TelemetryReporter>,
    edge_resolution: Option<(u32, u32)>,
    poll_interval: Duration,
}

impl CrowdMonitor {
    pub fn new(
        source: FrameSource,
        analyzer: FrameAnalyzer,
        reporter: Option<TelemetryReporter>,
    ) -> Self {
        Self {
            source,
            analyzer,
            reporter,
            edge_resolution: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Downscale every frame to this size before analysis.
    pub fn with_edge_resolution(mut self, width: u32, height: u32) -> Self {
        self.edge_resolution = Some((width, height));
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Build the full pipeline from configuration: resolve edge mode, load
    /// the detector, open the source and, when enabled, the telemetry sink.
    pub fn from_config(cfg: &CrowdConfig) -> Result<Self> {
        let source_settings = cfg
            .source
            .as_ref()
            .ok_or_else(|| anyhow!("no frame source configured"))?;

        let edge_mode = cfg.edge.is_enabled();
        log::info!(
            "running in {} mode",
            if edge_mode { "edge" } else { "desktop" }
        );

        let backend = open_backend(&cfg.detector).context("load detector")?;
        let analyzer = FrameAnalyzer::new(backend, cfg.analyzer.clone(), edge_mode);
        let source = FrameSource::open(source_settings).context("open frame source")?;

        let reporter = if cfg.telemetry.is_enabled(edge_mode) {
            let sink = open_sink(&cfg.telemetry).context("open telemetry sink")?;
            let policy =
                TelemetryPolicy::new(cfg.analyzer.max_people_threshold, cfg.telemetry.heartbeat);
            Some(TelemetryReporter::new(sink, policy, &cfg.telemetry.topic))
        } else {
            log::info!("telemetry disabled");
            None
        };

        let mut monitor =
            Self::new(source, analyzer, reporter).with_poll_interval(cfg.poll_interval);
        if edge_mode {
            monitor = monitor.with_edge_resolution(cfg.edge.width, cfg.edge.height);
        }
        Ok(monitor)
    }

    pub fn analyzer(&self) -> &FrameAnalyzer {
        &self.analyzer
    }

    pub fn metrics(&self) -> &RunningMetrics {
        self.analyzer.metrics()
    }

    pub fn reporter(&self) -> Option<&TelemetryReporter> {
        self.reporter.as_ref()
    }

    pub fn source(&self) -> &FrameSource {
        &self.source
    }

    /// Run until `running` is cleared or the source is exhausted. Starting a
    /// run clears the metrics of the previous one.
    pub fn run<O>(&mut self, running: &AtomicBool, observer: &mut O) -> Result<RunSummary>
    where
        O: FrameObserver + ?Sized,
    {
        self.analyzer.reset();
        self.source.connect().context("connect frame source")?;

        let mut summary = RunSummary::default();
        let mut last_health_log = Instant::now();

        while running.load(Ordering::SeqCst) {
            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    summary.stop = StopReason::EndOfStream;
                    break;
                }
                Err(e) => {
                    log::error!("end of video or stream error: {:#}", e);
                    summary.stop = StopReason::SourceError(format!("{:#}", e));
                    break;
                }
            };
            summary.frames_read += 1;

            let frame = match self.edge_resolution {
                Some((width, height)) => frame
                    .resized(width, height)
                    .context("downscale frame for edge mode")?,
                None => frame,
            };

            let outcome = self.analyzer.process_frame(&frame);
            match &outcome {
                FrameOutcome::Skipped => summary.frames_skipped += 1,
                FrameOutcome::Failed(_) => summary.frames_failed += 1,
                FrameOutcome::Processed(result) => {
                    summary.frames_processed += 1;
                    if let Some(reporter) = self.reporter.as_mut() {
                        match reporter.report(result) {
                            ReportDecision::Sent => summary.telemetry_sent += 1,
                            ReportDecision::Suppressed => summary.telemetry_suppressed += 1,
                            ReportDecision::Failed => summary.telemetry_failed += 1,
                        }
                    }
                }
            }
            observer.on_frame(summary.frames_read, &frame, &outcome);

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let stats = self.source.stats();
                log::info!(
                    "{} source health={} frames={} locator={}",
                    self.source.kind(),
                    self.source.is_healthy(),
                    stats.frames_captured,
                    stats.locator
                );
                last_health_log = Instant::now();
            }

            if !self.poll_interval.is_zero() {
                std::thread::sleep(self.poll_interval);
            }
        }

        log::info!(
            "run finished ({:?}): read={} processed={} skipped={} failed={} telemetry_sent={}",
            summary.stop,
            summary.frames_read,
            summary.frames_processed,
            summary.frames_skipped,
            summary.frames_failed,
            summary.telemetry_sent
        );
        Ok(summary)
    }

    /// Release the telemetry sink.
    pub fn shutdown(&mut self) {
        if let Some(reporter) = self.reporter.as_mut() {
            reporter.shutdown();
        }
    }
}
