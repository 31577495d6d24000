//! Crowdwatch
//!
//! Video crowd counting for fixed cameras and edge boards.
//!
//! # Architecture
//!
//! Each frame flows through one pipeline:
//!
//! 1. **Ingest**: a `FrameSource` decodes the next RGB frame (file, RTSP,
//!    camera, or a synthetic `stub://` stream).
//! 2. **Analyze**: the `FrameAnalyzer` applies the edge frame-skip policy,
//!    runs the detector, keeps confident person boxes and flags every person
//!    beyond the crowd threshold as an anomaly.
//! 3. **Report**: the `TelemetryReporter` publishes a summary when the crowd
//!    is over threshold, anomalies are present, or the heartbeat is due.
//!
//! `CrowdMonitor` drives the pipeline and hands every outcome to a
//! `FrameObserver`; `RunningMetrics` accumulate per processed frame.
//!
//! # Module Structure
//!
//! - `frame`: owned RGB frames and resizing
//! - `detect`: detector backends and raw/pixel detection types
//! - `analyzer`: per-frame analysis and the tagged `FrameOutcome`
//! - `metrics`: per-run series and summary
//! - `telemetry`: throttle policy, payload, MQTT/HTTP sinks
//! - `ingest`: frame sources
//! - `monitor`: the run loop
//! - `edge`: edge-board detection
//! - `config`: file + environment configuration

pub mod analyzer;
pub mod config;
pub mod detect;
pub mod edge;
pub mod frame;
pub mod ingest;
pub mod metrics;
pub mod monitor;
pub mod telemetry;
pub mod ui;

pub use analyzer::{FrameAnalyzer, FrameOutcome, FrameResult};
pub use config::{
    AnalyzerSettings, CrowdConfig, DetectorSettings, EdgeMode, EdgeSettings, HttpSettings,
    MqttSettings, SinkSettings, SourceSettings, TelemetrySettings,
};
pub use detect::{open_backend, Detection, DetectorBackend, RawDetections, StubBackend};
pub use edge::detect_edge_device;
pub use frame::Frame;
pub use ingest::{FrameSource, SourceKind, SourceStats};
pub use metrics::{MetricsReport, MetricsSummary, RunningMetrics};
pub use monitor::{CrowdMonitor, FrameObserver, NoopObserver, RunSummary, StopReason};
pub use telemetry::{
    open_sink, NullSink, ReportDecision, TelemetryPayload, TelemetryPolicy, TelemetryReporter,
    TelemetrySink,
};
