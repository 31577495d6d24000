//! MQTT telemetry sink.
//!
//! One `rumqttc` v5 client per run. The event loop is driven on its own
//! thread; it tracks whether the broker has acknowledged the session so the
//! reporter can fail fast instead of queueing into a dead connection. A
//! dropped connection is not re-established.

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, Incoming, MqttOptions};
use rumqttc::Transport;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::TelemetrySink;
use crate::config::MqttSettings;

const DEFAULT_PORT: u16 = 1883;
const DEFAULT_TLS_PORT: u16 = 8883;
const REQUEST_CHANNEL_CAPACITY: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

/// PEM material for TLS connections. With no CA the platform roots are used.
#[derive(Clone, Debug, Default)]
pub struct TlsMaterials {
    pub ca: Option<Vec<u8>>,
    /// Client certificate and key, always together.
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsMaterials {
    pub fn load(
        ca_path: Option<&PathBuf>,
        client_cert_path: Option<&PathBuf>,
        client_key_path: Option<&PathBuf>,
    ) -> Result<Self> {
        let ca = match ca_path {
            Some(path) => Some(
                std::fs::read(path)
                    .with_context(|| format!("failed to read MQTT TLS CA '{}'", path.display()))?,
            ),
            None => None,
        };

        let client_auth = match (client_cert_path, client_key_path) {
            (Some(cert_path), Some(key_path)) => {
                let cert = std::fs::read(cert_path).with_context(|| {
                    format!("failed to read MQTT client cert '{}'", cert_path.display())
                })?;
                let key = std::fs::read(key_path).with_context(|| {
                    format!("failed to read MQTT client key '{}'", key_path.display())
                })?;
                Some((cert, key))
            }
            (None, None) => None,
            (Some(_), None) => return Err(anyhow!("MQTT client certificate provided without key")),
            (None, Some(_)) => return Err(anyhow!("MQTT client key provided without certificate")),
        };

        Ok(Self { ca, client_auth })
    }

    pub fn is_configured(&self) -> bool {
        self.ca.is_some() || self.client_auth.is_some()
    }
}

pub(crate) fn build_transport(endpoint: &MqttEndpoint, tls: &TlsMaterials) -> Result<Transport> {
    if !endpoint.use_tls {
        if tls.is_configured() {
            return Err(anyhow!(
                "MQTT TLS material provided but TLS is disabled; use an mqtts:// broker or set use_tls"
            ));
        }
        return Ok(Transport::tcp());
    }
    if !tls.is_configured() {
        return Ok(Transport::tls_with_default_config());
    }
    let ca = tls
        .ca
        .clone()
        .ok_or_else(|| anyhow!("MQTT TLS CA certificate is required with a client certificate"))?;
    Ok(Transport::tls(ca, tls.client_auth.clone(), None))
}

/// Parse `host[:port]`, optionally prefixed by `mqtt://`, `tcp://`,
/// `mqtts://` or `ssl://`. IPv6 hosts go in brackets.
pub(crate) fn parse_mqtt_endpoint(addr: &str, tls_override: bool) -> Result<MqttEndpoint> {
    let mut use_tls = tls_override;
    let mut remainder = addr.trim();

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }

    let default_port = if use_tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT };
    let (host, port) = split_host_port(remainder, default_port)?;
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str, default_port: u16) -> Result<(String, u16)> {
    let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        match rest {
            "" => (host, None),
            _ => {
                let port = rest
                    .strip_prefix(':')
                    .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
                (host, Some(port))
            }
        }
    } else {
        match addr.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (addr, None),
        }
    };

    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in '{}'", addr));
    }
    let port = match port {
        Some(port) => port
            .parse()
            .with_context(|| format!("invalid MQTT port in '{}'", addr))?,
        None => default_port,
    };
    Ok((host.to_string(), port))
}

pub struct MqttSink {
    client: Client,
    endpoint: MqttEndpoint,
    connected: Arc<AtomicBool>,
    connection_handle: Option<JoinHandle<()>>,
}

impl MqttSink {
    /// Create the client and start its event loop. The broker handshake
    /// completes asynchronously; publishes fail until it does.
    pub fn connect(settings: &MqttSettings) -> Result<Self> {
        let endpoint = parse_mqtt_endpoint(&settings.broker, settings.use_tls)?;
        let tls = TlsMaterials::load(
            settings.tls_ca_path.as_ref(),
            settings.tls_client_cert_path.as_ref(),
            settings.tls_client_key_path.as_ref(),
        )?;

        let mut options = MqttOptions::new(&settings.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(settings.keep_alive);
        options.set_clean_start(true);
        if let Some(user) = &settings.username {
            options.set_credentials(user, settings.password.as_deref().unwrap_or_default());
        }
        options.set_transport(build_transport(&endpoint, &tls)?);

        let (client, connection) = Client::new(options, REQUEST_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let handle = spawn_event_loop(connection, connected.clone(), endpoint.clone());
        log::info!(
            "MQTT client started for {}:{} (TLS: {}, auth: {})",
            endpoint.host,
            endpoint.port,
            endpoint.use_tls,
            settings.username.is_some()
        );

        Ok(Self {
            client,
            endpoint,
            connected,
            connection_handle: Some(handle),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

fn spawn_event_loop(
    mut connection: Connection,
    connected: Arc<AtomicBool>,
    endpoint: MqttEndpoint,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    connected.store(true, Ordering::SeqCst);
                    log::info!(
                        "MQTT connected to {}:{} ({:?})",
                        endpoint.host,
                        endpoint.port,
                        ack.code
                    );
                }
                Ok(Event::Incoming(Incoming::Disconnect(_))) => {
                    connected.store(false, Ordering::SeqCst);
                    log::warn!("MQTT broker closed the session");
                }
                Ok(_) => {}
                Err(e) => {
                    connected.store(false, Ordering::SeqCst);
                    log::warn!("MQTT connection error: {}", e);
                    break;
                }
            }
        }
    })
}

impl TelemetrySink for MqttSink {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(anyhow!(
                "MQTT client is not connected to {}:{}",
                self.endpoint.host,
                self.endpoint.port
            ));
        }
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .with_context(|| format!("MQTT publish to '{}' failed", topic))?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(handle) = self.connection_handle.take() else {
            return Ok(());
        };
        if let Err(e) = self.client.disconnect() {
            log::debug!("MQTT disconnect request not delivered: {}", e);
        }
        self.connected.store(false, Ordering::SeqCst);
        if handle.join().is_err() {
            log::warn!("MQTT event loop thread panicked");
        }
        log::info!("MQTT connection closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parses_plain_host_port() {
        let endpoint = parse_mqtt_endpoint("broker.local:1884", false).unwrap();
        assert_eq!(endpoint.host, "broker.local");
        assert_eq!(endpoint.port, 1884);
        assert!(!endpoint.use_tls);
    }

    #[test]
    fn scheme_selects_tls_and_default_port() {
        let endpoint = parse_mqtt_endpoint("mqtts://broker.local", false).unwrap();
        assert!(endpoint.use_tls);
        assert_eq!(endpoint.port, 8883);

        let endpoint = parse_mqtt_endpoint("tcp://broker.local", false).unwrap();
        assert!(!endpoint.use_tls);
        assert_eq!(endpoint.port, 1883);
    }

    #[test]
    fn parses_bracketed_ipv6() {
        let endpoint = parse_mqtt_endpoint("[::1]:1883", false).unwrap();
        assert_eq!(endpoint.host, "::1");
        assert_eq!(endpoint.port, 1883);

        let endpoint = parse_mqtt_endpoint("[fe80::1]", true).unwrap();
        assert_eq!(endpoint.port, 8883);
    }

    #[test]
    fn rejects_bad_addresses() {
        assert!(parse_mqtt_endpoint("ws://broker:80", false).is_err());
        assert!(parse_mqtt_endpoint("broker:notaport", false).is_err());
        assert!(parse_mqtt_endpoint(":1883", false).is_err());
        assert!(parse_mqtt_endpoint("[::1", false).is_err());
    }

    #[test]
    fn tls_material_requires_tls() {
        let endpoint = parse_mqtt_endpoint("broker:1883", false).unwrap();
        let tls = TlsMaterials {
            ca: Some(b"ca".to_vec()),
            client_auth: None,
        };
        assert!(build_transport(&endpoint, &tls).is_err());
    }

    #[test]
    fn client_cert_requires_ca() {
        let endpoint = parse_mqtt_endpoint("mqtts://broker", false).unwrap();
        let tls = TlsMaterials {
            ca: None,
            client_auth: Some((b"cert".to_vec(), b"key".to_vec())),
        };
        let err = build_transport(&endpoint, &tls).err().expect("must fail");
        assert!(err.to_string().contains("CA"));
    }

    #[test]
    fn cert_without_key_is_rejected() {
        let cert = PathBuf::from("/tmp/client.pem");
        assert!(TlsMaterials::load(None, Some(&cert), None).is_err());
    }

    #[test]
    fn publish_before_connack_fails_fast() {
        let settings = MqttSettings {
            broker: "127.0.0.1:1".to_string(),
            keep_alive: Duration::from_secs(5),
            ..MqttSettings::default()
        };
        let mut sink = MqttSink::connect(&settings).unwrap();
        let err = sink.publish("crowd/edge_updates", b"{}").unwrap_err();
        assert!(err.to_string().contains("not connected"));
        sink.close().unwrap();
        assert!(!sink.is_connected());
    }
}
