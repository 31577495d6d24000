//! Throttled telemetry.
//!
//! The reporter publishes a `TelemetryPayload` only when the policy admits it:
//! the crowd is over the alert threshold, the frame carries anomalies, or the
//! heartbeat interval has passed since the last successful send. Everything
//! else is suppressed so a healthy scene does not flood the collector.
//!
//! Delivery is best effort. A failed publish is logged and dropped, with no
//! retry, and does not move the heartbeat clock.

pub mod http;
pub mod mqtt;

use anyhow::Result;
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::analyzer::FrameResult;
use crate::config::{SinkSettings, TelemetrySettings};

pub use http::HttpSink;
pub use mqtt::MqttSink;

/// Message published to the collector.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TelemetryPayload {
    pub count: usize,
    /// Number of anomalous detections in the frame.
    pub anomalies: usize,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub detections: Vec<[i32; 4]>,
}

impl TelemetryPayload {
    pub fn new(result: &FrameResult, timestamp: f64) -> Self {
        Self {
            count: result.count,
            anomalies: result.anomalies.len(),
            timestamp,
            detections: result.detections.iter().map(|d| d.corners()).collect(),
        }
    }
}

/// Hybrid alert/heartbeat throttle.
#[derive(Clone, Debug)]
pub struct TelemetryPolicy {
    pub alert_threshold: usize,
    pub heartbeat: Duration,
}

impl TelemetryPolicy {
    pub fn new(alert_threshold: usize, heartbeat: Duration) -> Self {
        Self {
            alert_threshold,
            heartbeat,
        }
    }

    /// `since_last_send` is `None` before the first successful send.
    pub fn should_send(
        &self,
        count: usize,
        anomalies: usize,
        since_last_send: Option<Duration>,
    ) -> bool {
        count > self.alert_threshold
            || anomalies > 0
            || since_last_send.map_or(true, |elapsed| elapsed >= self.heartbeat)
    }
}

/// Destination for serialized payloads.
pub trait TelemetrySink: Send {
    fn name(&self) -> &'static str;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()>;

    /// Release the connection. Called once on shutdown.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sink used when telemetry is disabled. Accepts and drops everything.
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn name(&self) -> &'static str {
        "none"
    }

    fn publish(&mut self, _topic: &str, _payload: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Open the sink configured in `settings`.
pub fn open_sink(settings: &TelemetrySettings) -> Result<Box<dyn TelemetrySink>> {
    Ok(match &settings.sink {
        SinkSettings::Mqtt(mqtt) => Box::new(MqttSink::connect(mqtt)?),
        SinkSettings::Http(http) => Box::new(HttpSink::new(http)?),
        SinkSettings::Disabled => Box::new(NullSink),
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportDecision {
    Suppressed,
    Sent,
    Failed,
}

pub struct TelemetryReporter {
    sink: Box<dyn TelemetrySink>,
    policy: TelemetryPolicy,
    topic: String,
    last_send: Option<SystemTime>,
    sent: u64,
    failed: u64,
}

impl TelemetryReporter {
    pub fn new(sink: Box<dyn TelemetrySink>, policy: TelemetryPolicy, topic: &str) -> Self {
        Self {
            sink,
            policy,
            topic: topic.to_string(),
            last_send: None,
            sent: 0,
            failed: 0,
        }
    }

    pub fn policy(&self) -> &TelemetryPolicy {
        &self.policy
    }

    pub fn last_send(&self) -> Option<SystemTime> {
        self.last_send
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn report(&mut self, result: &FrameResult) -> ReportDecision {
        self.report_at(result, SystemTime::now())
    }

    /// Apply the throttle as of `now` and publish if admitted.
    pub fn report_at(&mut self, result: &FrameResult, now: SystemTime) -> ReportDecision {
        let since_last_send = self
            .last_send
            .map(|last| now.duration_since(last).unwrap_or_default());
        if !self
            .policy
            .should_send(result.count, result.anomalies.len(), since_last_send)
        {
            return ReportDecision::Suppressed;
        }

        let timestamp = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let payload = TelemetryPayload::new(result, timestamp);

        match self.publish(&payload) {
            Ok(()) => {
                self.last_send = Some(now);
                self.sent += 1;
                log::info!(
                    "telemetry sent via {}: people={}, anomalies={}",
                    self.sink.name(),
                    payload.count,
                    payload.anomalies
                );
                ReportDecision::Sent
            }
            Err(e) => {
                self.failed += 1;
                log::error!("telemetry publish via {} failed: {:#}", self.sink.name(), e);
                ReportDecision::Failed
            }
        }
    }

    fn publish(&mut self, payload: &TelemetryPayload) -> Result<()> {
        let json = serde_json::to_vec(payload)?;
        self.sink.publish(&self.topic, &json)
    }

    /// Close the sink. Errors are logged.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.sink.close() {
            log::warn!("telemetry sink {} close failed: {:#}", self.sink.name(), e);
        }
    }
}
