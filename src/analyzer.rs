//! Per-frame crowd analysis.
//!
//! The analyzer owns the frame counter, the detector backend and the run's
//! `RunningMetrics`. Each call to `process_frame`:
//!
//! 1. Advances the frame counter.
//! 2. In edge mode, skips frames whose counter is not a multiple of the skip
//!    interval without touching the detector.
//! 3. Otherwise resizes to the model input, runs the detector, keeps confident
//!    person boxes (in original-frame pixels) and marks every box past the
//!    crowd threshold as an anomaly.
//! 4. Records count, anomaly count and elapsed time for processed frames.
//!
//! Detector failures never escape: they become `FrameOutcome::Failed`, which
//! presents the same zero result as a skipped frame.

use anyhow::Result;
use std::time::Instant;

use crate::config::AnalyzerSettings;
use crate::detect::{Detection, DetectorBackend};
use crate::frame::Frame;
use crate::metrics::RunningMetrics;

/// Result of analyzing one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameResult {
    pub count: usize,
    pub detections: Vec<Detection>,
    /// Detections beyond the crowd threshold, in detection order.
    pub anomalies: Vec<Detection>,
}

impl FrameResult {
    pub fn has_anomalies(&self) -> bool {
        !self.anomalies.is_empty()
    }
}

/// What happened to a frame.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameOutcome {
    /// Dropped by the edge frame-skip policy.
    Skipped,
    Processed(FrameResult),
    /// Detection failed; the reason has already been logged.
    Failed(String),
}

static EMPTY_RESULT: FrameResult = FrameResult {
    count: 0,
    detections: Vec::new(),
    anomalies: Vec::new(),
};

impl FrameOutcome {
    /// Uniform view for presentation: skipped and failed frames read as zero.
    pub fn result(&self) -> &FrameResult {
        match self {
            FrameOutcome::Processed(result) => result,
            FrameOutcome::Skipped | FrameOutcome::Failed(_) => &EMPTY_RESULT,
        }
    }

    pub fn is_processed(&self) -> bool {
        matches!(self, FrameOutcome::Processed(_))
    }
}

pub struct FrameAnalyzer {
    backend: Box<dyn DetectorBackend>,
    settings: AnalyzerSettings,
    edge_mode: bool,
    frame_counter: u64,
    metrics: RunningMetrics,
}

impl FrameAnalyzer {
    pub fn new(
        backend: Box<dyn DetectorBackend>,
        settings: AnalyzerSettings,
        edge_mode: bool,
    ) -> Self {
        Self {
            backend,
            settings,
            edge_mode,
            frame_counter: 0,
            metrics: RunningMetrics::new(),
        }
    }

    pub fn is_edge_mode(&self) -> bool {
        self.edge_mode
    }

    pub fn settings(&self) -> &AnalyzerSettings {
        &self.settings
    }

    /// Frames handed to `process_frame` since construction or `reset`.
    pub fn frames_seen(&self) -> u64 {
        self.frame_counter
    }

    pub fn metrics(&self) -> &RunningMetrics {
        &self.metrics
    }

    /// Start a new run: zero the counter and drop collected metrics.
    pub fn reset(&mut self) {
        self.frame_counter = 0;
        self.metrics.clear();
    }

    /// True when the current counter value falls on a skipped slot.
    fn should_skip(&self) -> bool {
        self.edge_mode
            && self.settings.frame_skip_interval > 1
            && self.frame_counter % self.settings.frame_skip_interval != 0
    }

    pub fn process_frame(&mut self, frame: &Frame) -> FrameOutcome {
        let started = Instant::now();
        self.frame_counter += 1;

        if self.should_skip() {
            log::trace!("frame {} skipped", self.frame_counter);
            return FrameOutcome::Skipped;
        }

        match self.analyze(frame) {
            Ok(result) => {
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                self.metrics
                    .record(result.count, result.anomalies.len(), elapsed_ms);
                log::debug!(
                    "frame {}: detected {} people ({} anomalies)",
                    self.frame_counter,
                    result.count,
                    result.anomalies.len()
                );
                if result.has_anomalies() {
                    log::warn!(
                        "frame {}: crowd over threshold ({} > {})",
                        self.frame_counter,
                        result.count,
                        self.settings.max_people_threshold
                    );
                }
                FrameOutcome::Processed(result)
            }
            Err(e) => {
                log::error!("frame {} processing error: {:#}", self.frame_counter, e);
                FrameOutcome::Failed(format!("{:#}", e))
            }
        }
    }

    fn analyze(&mut self, frame: &Frame) -> Result<FrameResult> {
        let (input_w, input_h) = self.backend.input_shape();
        let input = frame.resized(input_w, input_h)?;
        let raw = self.backend.detect(input.pixels(), input.width, input.height)?;

        let mut result = FrameResult::default();
        for det in raw.iter() {
            if det.score <= self.settings.confidence_threshold
                || !det.is_class(self.settings.person_class_id)
            {
                continue;
            }
            let pixel_box = det.to_pixels(frame.width, frame.height, det.score);
            result.detections.push(pixel_box);
            result.count += 1;
            if result.count > self.settings.max_people_threshold {
                result.anomalies.push(pixel_box);
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{RawDetections, StubBackend, PERSON_CLASS_ID};
    use anyhow::anyhow;

    struct FixedBackend {
        raw: RawDetections,
    }

    impl DetectorBackend for FixedBackend {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn input_shape(&self) -> (u32, u32) {
            (32, 32)
        }

        fn detect(&mut self, _pixels: &[u8], _w: u32, _h: u32) -> Result<RawDetections> {
            Ok(self.raw.clone())
        }
    }

    struct FailingBackend;

    impl DetectorBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn input_shape(&self) -> (u32, u32) {
            (32, 32)
        }

        fn detect(&mut self, _pixels: &[u8], _w: u32, _h: u32) -> Result<RawDetections> {
            Err(anyhow!("interpreter invoke failed"))
        }
    }

    fn frame() -> Frame {
        Frame::filled(200, 100, [0, 0, 0]).unwrap()
    }

    fn analyzer_with(raw: RawDetections, edge_mode: bool) -> FrameAnalyzer {
        FrameAnalyzer::new(
            Box::new(FixedBackend { raw }),
            AnalyzerSettings::default(),
            edge_mode,
        )
    }

    #[test]
    fn converts_boxes_with_original_frame_size() {
        let mut raw = RawDetections::default();
        raw.push([0.5, 0.25, 1.0, 0.5], PERSON_CLASS_ID as f32, 0.9);
        let mut analyzer = analyzer_with(raw, false);

        let outcome = analyzer.process_frame(&frame());
        let result = outcome.result();
        assert_eq!(result.count, 1);
        assert_eq!(result.detections[0].corners(), [50, 50, 100, 100]);
    }

    #[test]
    fn threshold_score_is_exclusive() {
        let mut raw = RawDetections::default();
        raw.push([0.0; 4], PERSON_CLASS_ID as f32, 0.5);
        raw.push([0.0; 4], PERSON_CLASS_ID as f32, 0.51);
        let mut analyzer = analyzer_with(raw, false);

        assert_eq!(analyzer.process_frame(&frame()).result().count, 1);
    }

    #[test]
    fn fractional_class_ids_are_not_people() {
        let mut raw = RawDetections::default();
        raw.push([0.0; 4], 0.7, 0.9);
        raw.push([0.0; 4], 0.99, 0.9);
        let mut analyzer = analyzer_with(raw, false);

        let outcome = analyzer.process_frame(&frame());
        assert!(outcome.is_processed());
        assert_eq!(outcome.result().count, 0);
    }

    #[test]
    fn anomalies_start_after_threshold() {
        let mut raw = RawDetections::default();
        for _ in 0..3 {
            raw.push([0.0; 4], PERSON_CLASS_ID as f32, 0.9);
        }
        let settings = AnalyzerSettings {
            max_people_threshold: 2,
            ..AnalyzerSettings::default()
        };
        let mut analyzer = FrameAnalyzer::new(Box::new(FixedBackend { raw }), settings, false);
        assert_eq!(analyzer.settings().max_people_threshold, 2);

        let outcome = analyzer.process_frame(&frame());
        let result = outcome.result();
        assert!(result.has_anomalies());
        assert_eq!(result.anomalies.len(), 1);
        assert!(!FrameResult::default().has_anomalies());
    }

    #[test]
    fn non_person_classes_are_ignored() {
        let mut raw = RawDetections::default();
        raw.push([0.0; 4], 3.0, 0.99);
        let mut analyzer = analyzer_with(raw, false);

        let outcome = analyzer.process_frame(&frame());
        assert!(outcome.is_processed());
        assert_eq!(outcome.result().count, 0);
        assert_eq!(analyzer.metrics().len(), 1);
    }

    #[test]
    fn failure_degrades_to_zero_result_without_metrics() {
        let mut analyzer =
            FrameAnalyzer::new(Box::new(FailingBackend), AnalyzerSettings::default(), false);

        let outcome = analyzer.process_frame(&frame());
        assert!(matches!(outcome, FrameOutcome::Failed(ref msg) if msg.contains("invoke")));
        assert_eq!(outcome.result(), &FrameResult::default());
        assert!(analyzer.metrics().is_empty());
    }

    #[test]
    fn edge_mode_processes_every_third_frame() {
        let mut analyzer = FrameAnalyzer::new(
            Box::new(StubBackend::new().with_input_shape(32, 32)),
            AnalyzerSettings::default(),
            true,
        );

        let outcomes: Vec<_> = (0..6).map(|_| analyzer.process_frame(&frame())).collect();
        let processed: Vec<bool> = outcomes.iter().map(|o| o.is_processed()).collect();
        assert_eq!(processed, vec![false, false, true, false, false, true]);
        assert_eq!(analyzer.metrics().len(), 2);
        assert_eq!(analyzer.frames_seen(), 6);
    }

    #[test]
    fn desktop_mode_processes_every_frame() {
        let mut analyzer = FrameAnalyzer::new(
            Box::new(StubBackend::new().with_input_shape(32, 32)),
            AnalyzerSettings::default(),
            false,
        );
        for _ in 0..4 {
            assert!(analyzer.process_frame(&frame()).is_processed());
        }
        assert_eq!(analyzer.metrics().len(), 4);
    }

    #[test]
    fn reset_starts_a_new_run() {
        let mut analyzer = FrameAnalyzer::new(
            Box::new(StubBackend::new().with_input_shape(32, 32)),
            AnalyzerSettings::default(),
            true,
        );
        for _ in 0..3 {
            analyzer.process_frame(&frame());
        }
        analyzer.reset();
        assert_eq!(analyzer.frames_seen(), 0);
        assert!(analyzer.metrics().is_empty());
        assert_eq!(analyzer.process_frame(&frame()), FrameOutcome::Skipped);
    }
}
