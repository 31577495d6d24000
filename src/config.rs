use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::ingest::SourceKind;

const DEFAULT_BACKEND: &str = "tract";
const DEFAULT_MODEL_PATH: &str = "models/ssd_mobilenet.onnx";
const DEFAULT_MODEL_INPUT: u32 = 300;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_MAX_PEOPLE: usize = 10;
const DEFAULT_FRAME_SKIP: u64 = 3;
const DEFAULT_EDGE_WIDTH: u32 = 640;
const DEFAULT_EDGE_HEIGHT: u32 = 480;
const DEFAULT_MQTT_BROKER: &str = "127.0.0.1:1883";
const DEFAULT_MQTT_CLIENT_ID: &str = "crowdwatch";
const DEFAULT_MQTT_KEEP_ALIVE_SECS: u64 = 60;
const DEFAULT_TOPIC: &str = "crowd/edge_updates";
const DEFAULT_HEARTBEAT_SECS: u64 = 30;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 5;
const DEFAULT_POLL_INTERVAL_MS: u64 = 30;

#[derive(Debug, Deserialize, Default)]
struct CrowdConfigFile {
    detector: Option<DetectorConfigFile>,
    analyzer: Option<AnalyzerConfigFile>,
    edge: Option<EdgeConfigFile>,
    telemetry: Option<TelemetryConfigFile>,
    source: Option<SourceConfigFile>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct AnalyzerConfigFile {
    confidence_threshold: Option<f32>,
    person_class_id: Option<u32>,
    max_people: Option<usize>,
    frame_skip: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct EdgeConfigFile {
    mode: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct TelemetryConfigFile {
    enabled: Option<bool>,
    sink: Option<String>,
    topic: Option<String>,
    heartbeat_secs: Option<u64>,
    mqtt: Option<MqttConfigFile>,
    http: Option<HttpConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    use_tls: Option<bool>,
    tls_ca_path: Option<PathBuf>,
    tls_client_cert_path: Option<PathBuf>,
    tls_client_key_path: Option<PathBuf>,
    keep_alive_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct HttpConfigFile {
    endpoint: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    kind: Option<String>,
    locator: Option<String>,
    max_frames: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CrowdConfig {
    pub detector: DetectorSettings,
    pub analyzer: AnalyzerSettings,
    pub edge: EdgeSettings,
    pub telemetry: TelemetrySettings,
    pub source: Option<SourceSettings>,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: PathBuf,
    pub input_width: u32,
    pub input_height: u32,
}

#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    /// Detections must score strictly above this to count.
    pub confidence_threshold: f32,
    pub person_class_id: u32,
    /// People beyond this many in one frame are anomalies; also the
    /// telemetry alert threshold.
    pub max_people_threshold: usize,
    /// In edge mode only every Nth frame reaches the detector.
    pub frame_skip_interval: u64,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            person_class_id: crate::detect::PERSON_CLASS_ID,
            max_people_threshold: DEFAULT_MAX_PEOPLE,
            frame_skip_interval: DEFAULT_FRAME_SKIP,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeMode {
    Auto,
    On,
    Off,
}

impl FromStr for EdgeMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(EdgeMode::Auto),
            "on" | "true" | "1" => Ok(EdgeMode::On),
            "off" | "false" | "0" => Ok(EdgeMode::Off),
            other => Err(anyhow!("edge mode must be auto, on or off (got '{}')", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EdgeSettings {
    pub mode: EdgeMode,
    /// Frames are downscaled to this resolution before analysis in edge mode.
    pub width: u32,
    pub height: u32,
}

impl EdgeSettings {
    /// Resolve `Auto` against the host hardware.
    pub fn is_enabled(&self) -> bool {
        match self.mode {
            EdgeMode::On => true,
            EdgeMode::Off => false,
            EdgeMode::Auto => crate::edge::detect_edge_device(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    /// `None` follows edge mode.
    pub enabled: Option<bool>,
    pub sink: SinkSettings,
    pub topic: String,
    pub heartbeat: Duration,
}

impl TelemetrySettings {
    pub fn is_enabled(&self, edge_mode: bool) -> bool {
        self.enabled.unwrap_or(edge_mode) && !matches!(self.sink, SinkSettings::Disabled)
    }
}

#[derive(Debug, Clone)]
pub enum SinkSettings {
    Mqtt(MqttSettings),
    Http(HttpSettings),
    Disabled,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub broker: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub tls_ca_path: Option<PathBuf>,
    pub tls_client_cert_path: Option<PathBuf>,
    pub tls_client_key_path: Option<PathBuf>,
    pub keep_alive: Duration,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            broker: DEFAULT_MQTT_BROKER.to_string(),
            client_id: DEFAULT_MQTT_CLIENT_ID.to_string(),
            username: None,
            password: None,
            use_tls: false,
            tls_ca_path: None,
            tls_client_cert_path: None,
            tls_client_key_path: None,
            keep_alive: Duration::from_secs(DEFAULT_MQTT_KEEP_ALIVE_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub endpoint: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub kind: SourceKind,
    /// File path, RTSP URL, camera device, or `stub://name`.
    pub locator: String,
    /// Stop after this many frames (synthetic sources run forever otherwise).
    pub max_frames: Option<u64>,
}

impl CrowdConfig {
    /// Load from the file named by `CROWD_CONFIG` (if set), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CROWD_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CrowdConfigFile) -> Result<Self> {
        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector_file
                .backend
                .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
            model_path: detector_file
                .model_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            input_width: detector_file.input_width.unwrap_or(DEFAULT_MODEL_INPUT),
            input_height: detector_file.input_height.unwrap_or(DEFAULT_MODEL_INPUT),
        };

        let analyzer_file = file.analyzer.unwrap_or_default();
        let defaults = AnalyzerSettings::default();
        let analyzer = AnalyzerSettings {
            confidence_threshold: analyzer_file
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            person_class_id: analyzer_file
                .person_class_id
                .unwrap_or(defaults.person_class_id),
            max_people_threshold: analyzer_file
                .max_people
                .unwrap_or(defaults.max_people_threshold),
            frame_skip_interval: analyzer_file
                .frame_skip
                .unwrap_or(defaults.frame_skip_interval),
        };

        let edge_file = file.edge.unwrap_or_default();
        let edge = EdgeSettings {
            mode: match edge_file.mode.as_deref() {
                Some(mode) => mode.parse()?,
                None => EdgeMode::Auto,
            },
            width: edge_file.width.unwrap_or(DEFAULT_EDGE_WIDTH),
            height: edge_file.height.unwrap_or(DEFAULT_EDGE_HEIGHT),
        };

        let telemetry_file = file.telemetry.unwrap_or_default();
        let sink = build_sink(
            telemetry_file.sink.as_deref(),
            telemetry_file.mqtt.unwrap_or_default(),
            telemetry_file.http.unwrap_or_default(),
        )?;
        let telemetry = TelemetrySettings {
            enabled: telemetry_file.enabled,
            sink,
            topic: telemetry_file
                .topic
                .unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            heartbeat: Duration::from_secs(
                telemetry_file
                    .heartbeat_secs
                    .unwrap_or(DEFAULT_HEARTBEAT_SECS),
            ),
        };

        let source = match file.source {
            Some(source) => {
                let locator = source
                    .locator
                    .ok_or_else(|| anyhow!("source.locator is required when source is set"))?;
                let kind = match source.kind.as_deref() {
                    Some(kind) => kind.parse()?,
                    None => SourceKind::Video,
                };
                Some(SourceSettings {
                    kind,
                    locator,
                    max_frames: source.max_frames,
                })
            }
            None => None,
        };

        Ok(Self {
            detector,
            analyzer,
            edge,
            telemetry,
            source,
            poll_interval: Duration::from_millis(
                file.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("CROWD_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = PathBuf::from(path);
            }
        }
        if let Ok(backend) = std::env::var("CROWD_BACKEND") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_string();
            }
        }
        if let Ok(mode) = std::env::var("CROWD_EDGE_MODE") {
            if !mode.trim().is_empty() {
                self.edge.mode = mode.parse()?;
            }
        }
        if let Ok(broker) = std::env::var("CROWD_MQTT_BROKER") {
            if !broker.trim().is_empty() {
                match &mut self.telemetry.sink {
                    SinkSettings::Mqtt(mqtt) => mqtt.broker = broker,
                    _ => {
                        self.telemetry.sink = SinkSettings::Mqtt(MqttSettings {
                            broker,
                            ..MqttSettings::default()
                        })
                    }
                }
            }
        }
        if let Ok(endpoint) = std::env::var("CROWD_HTTP_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.telemetry.sink = SinkSettings::Http(HttpSettings {
                    endpoint,
                    timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
                });
            }
        }
        if let Ok(topic) = std::env::var("CROWD_MQTT_TOPIC") {
            if !topic.trim().is_empty() {
                self.telemetry.topic = topic;
            }
        }
        if let Ok(heartbeat) = std::env::var("CROWD_HEARTBEAT_SECS") {
            let seconds: u64 = heartbeat.parse().map_err(|_| {
                anyhow!("CROWD_HEARTBEAT_SECS must be an integer number of seconds")
            })?;
            self.telemetry.heartbeat = Duration::from_secs(seconds);
        }
        if let Ok(max_people) = std::env::var("CROWD_MAX_PEOPLE") {
            self.analyzer.max_people_threshold = max_people
                .parse()
                .map_err(|_| anyhow!("CROWD_MAX_PEOPLE must be a non-negative integer"))?;
        }
        Ok(())
    }

    /// Check invariants. Called by `load_from`; callers that edit a loaded
    /// config (e.g. CLI overrides) should call it again.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.analyzer.confidence_threshold) {
            return Err(anyhow!("confidence threshold must be within 0..=1"));
        }
        if self.analyzer.frame_skip_interval == 0 {
            return Err(anyhow!("frame skip interval must be >= 1"));
        }
        if self.detector.input_width == 0 || self.detector.input_height == 0 {
            return Err(anyhow!("model input size must be non-zero"));
        }
        if self.edge.width == 0 || self.edge.height == 0 {
            return Err(anyhow!("edge resolution must be non-zero"));
        }
        if self.telemetry.heartbeat.is_zero() {
            return Err(anyhow!("heartbeat interval must be greater than zero"));
        }
        if self.telemetry.topic.trim().is_empty() {
            return Err(anyhow!("telemetry topic must not be empty"));
        }
        match &self.telemetry.sink {
            SinkSettings::Mqtt(mqtt) => {
                crate::telemetry::mqtt::parse_mqtt_endpoint(&mqtt.broker, mqtt.use_tls)?;
            }
            SinkSettings::Http(http) => {
                crate::telemetry::http::parse_endpoint(&http.endpoint)?;
            }
            SinkSettings::Disabled => {}
        }
        Ok(())
    }
}

fn build_sink(
    kind: Option<&str>,
    mqtt: MqttConfigFile,
    http: HttpConfigFile,
) -> Result<SinkSettings> {
    match kind.unwrap_or("mqtt") {
        "mqtt" => {
            let defaults = MqttSettings::default();
            Ok(SinkSettings::Mqtt(MqttSettings {
                broker: mqtt.broker.unwrap_or(defaults.broker),
                client_id: mqtt.client_id.unwrap_or(defaults.client_id),
                username: mqtt.username,
                password: mqtt.password,
                use_tls: mqtt.use_tls.unwrap_or(false),
                tls_ca_path: mqtt.tls_ca_path,
                tls_client_cert_path: mqtt.tls_client_cert_path,
                tls_client_key_path: mqtt.tls_client_key_path,
                keep_alive: mqtt
                    .keep_alive_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.keep_alive),
            }))
        }
        "http" => {
            let endpoint = http
                .endpoint
                .ok_or_else(|| anyhow!("telemetry.http.endpoint is required for the http sink"))?;
            Ok(SinkSettings::Http(HttpSettings {
                endpoint,
                timeout: Duration::from_secs(
                    http.timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
                ),
            }))
        }
        "none" => Ok(SinkSettings::Disabled),
        other => Err(anyhow!(
            "telemetry sink must be mqtt, http or none (got '{}')",
            other
        )),
    }
}

fn read_config_file(path: &Path) -> Result<CrowdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
