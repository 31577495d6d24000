use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};

use crowdwatch::{
    AnalyzerSettings, CrowdConfig, CrowdMonitor, DetectorBackend, EdgeMode, Frame,
    FrameAnalyzer, FrameOutcome, HttpSettings, NoopObserver, RawDetections, SinkSettings,
    SourceKind, SourceSettings, StopReason, StubBackend,
};

fn stub_config(frames: u64, edge: EdgeMode) -> CrowdConfig {
    let mut cfg = CrowdConfig::load_from(None).expect("default config");
    cfg.detector.backend = "stub".to_string();
    cfg.detector.input_width = 32;
    cfg.detector.input_height = 32;
    cfg.edge.mode = edge;
    cfg.edge.width = 64;
    cfg.edge.height = 48;
    cfg.telemetry.enabled = Some(false);
    cfg.poll_interval = Duration::ZERO;
    cfg.source = Some(SourceSettings {
        kind: SourceKind::Camera,
        locator: "stub://entrance?size=128x96".to_string(),
        max_frames: Some(frames),
    });
    cfg.validate().expect("valid config");
    cfg
}

/// Collects JSON bodies POSTed to it; answers every request with 200.
fn collector() -> (String, Arc<Mutex<Vec<serde_json::Value>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = format!("http://{}/telemetry", listener.local_addr().unwrap());
    let bodies = Arc::new(Mutex::new(Vec::new()));
    let sink = bodies.clone();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    break;
                }
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                }
            }
            let mut body = vec![0u8; content_length];
            if reader.read_exact(&mut body).is_ok() {
                if let Ok(json) = serde_json::from_slice(&body) {
                    sink.lock().unwrap().push(json);
                }
            }
            let _ = stream.write_all(
                b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            );
        }
    });
    (endpoint, bodies)
}

#[test]
fn edge_pipeline_from_config_processes_every_third_frame() {
    let cfg = stub_config(9, EdgeMode::On);
    let mut monitor = CrowdMonitor::from_config(&cfg).expect("build monitor");
    assert!(monitor.analyzer().is_edge_mode());
    assert!(monitor.reporter().is_none());

    let mut sizes = Vec::new();
    let mut observer = |_index: u64, frame: &Frame, _outcome: &FrameOutcome| {
        sizes.push((frame.width, frame.height));
    };
    let running = AtomicBool::new(true);
    let summary = monitor.run(&running, &mut observer).expect("run");

    assert_eq!(summary.stop, StopReason::EndOfStream);
    assert_eq!(summary.frames_read, 9);
    assert_eq!(summary.frames_processed, 3);
    assert_eq!(summary.frames_skipped, 6);
    assert_eq!(monitor.metrics().people_counts(), &[2, 4, 7]);
    assert!(sizes.iter().all(|&size| size == (64, 48)));
    assert_eq!(monitor.source().stats().frames_captured, 9);
    assert_eq!(monitor.source().kind(), SourceKind::Camera);
}

#[test]
fn desktop_pipeline_keeps_native_resolution() {
    let cfg = stub_config(3, EdgeMode::Off);
    let mut monitor = CrowdMonitor::from_config(&cfg).expect("build monitor");

    let mut sizes = Vec::new();
    let mut observer = |_index: u64, frame: &Frame, _outcome: &FrameOutcome| {
        sizes.push((frame.width, frame.height));
    };
    let running = AtomicBool::new(true);
    let summary = monitor.run(&running, &mut observer).expect("run");

    assert_eq!(summary.frames_processed, 3);
    assert_eq!(sizes, vec![(128, 96); 3]);
}

#[test]
fn missing_source_is_a_startup_error() {
    let mut cfg = stub_config(1, EdgeMode::Off);
    cfg.source = None;
    assert!(CrowdMonitor::from_config(&cfg).is_err());
}

#[test]
fn http_telemetry_is_throttled_end_to_end() {
    let (endpoint, bodies) = collector();
    let mut cfg = stub_config(5, EdgeMode::Off);
    cfg.telemetry.enabled = Some(true);
    cfg.telemetry.sink = SinkSettings::Http(HttpSettings {
        endpoint,
        timeout: Duration::from_secs(5),
    });

    let mut monitor = CrowdMonitor::from_config(&cfg).expect("build monitor");
    let policy = monitor.reporter().expect("telemetry enabled").policy();
    assert_eq!(policy.alert_threshold, cfg.analyzer.max_people_threshold);
    assert_eq!(policy.heartbeat, cfg.telemetry.heartbeat);

    let running = AtomicBool::new(true);
    let summary = monitor.run(&running, &mut NoopObserver).expect("run");
    monitor.shutdown();

    // Script 2, 4, 7, 11, 13: first frame is the heartbeat, then the two
    // frames over the threshold of 10.
    assert_eq!(summary.telemetry_sent, 3);
    assert_eq!(summary.telemetry_suppressed, 2);
    let bodies = bodies.lock().unwrap();
    let counts: Vec<u64> = bodies.iter().map(|b| b["count"].as_u64().unwrap()).collect();
    assert_eq!(counts, vec![2, 11, 13]);
    assert_eq!(bodies[1]["anomalies"], 1);
    assert_eq!(bodies[2]["anomalies"], 3);
    assert_eq!(bodies[2]["detections"].as_array().unwrap().len(), 13);
    assert!(bodies[0]["timestamp"].as_f64().unwrap() > 0.0);
}

#[test]
fn twelve_people_yield_two_anomalies() {
    let mut analyzer = FrameAnalyzer::new(
        Box::new(StubBackend::new().with_script(vec![12]).with_input_shape(16, 16)),
        AnalyzerSettings::default(),
        false,
    );
    let frame = Frame::filled(100, 80, [90, 90, 90]).unwrap();

    let outcome = analyzer.process_frame(&frame);
    let result = outcome.result();
    assert_eq!(result.count, 12);
    assert_eq!(result.detections.len(), 12);
    assert_eq!(result.anomalies, result.detections[10..].to_vec());
}

struct FlakyBackend {
    calls: usize,
}

impl DetectorBackend for FlakyBackend {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn input_shape(&self) -> (u32, u32) {
        (8, 8)
    }

    fn detect(&mut self, _pixels: &[u8], _w: u32, _h: u32) -> Result<RawDetections> {
        self.calls += 1;
        if self.calls % 2 == 0 {
            return Err(anyhow!("inference timeout"));
        }
        let mut raw = RawDetections::default();
        raw.push([0.1, 0.1, 0.4, 0.4], 0.0, 0.4);
        raw.push([0.5, 0.5, 0.9, 0.9], 0.0, 0.95);
        Ok(raw)
    }
}

#[test]
fn metrics_series_stay_aligned_across_mixed_outcomes() {
    let mut analyzer = FrameAnalyzer::new(
        Box::new(FlakyBackend { calls: 0 }),
        AnalyzerSettings::default(),
        true,
    );
    let frame = Frame::filled(40, 30, [0, 0, 0]).unwrap();

    let mut processed = 0;
    let mut failed = 0;
    for _ in 0..12 {
        match analyzer.process_frame(&frame) {
            FrameOutcome::Processed(result) => {
                processed += 1;
                // The 0.4 box never counts.
                assert_eq!(result.count, 1);
            }
            FrameOutcome::Failed(_) => failed += 1,
            FrameOutcome::Skipped => {}
        }
        let metrics = analyzer.metrics();
        assert_eq!(metrics.people_counts().len(), metrics.anomaly_counts().len());
        assert_eq!(metrics.people_counts().len(), metrics.processing_times_ms().len());
    }
    assert_eq!((processed, failed), (2, 2));
    assert_eq!(analyzer.metrics().len(), 2);
}
