//! HTTP telemetry sink: one JSON POST per admitted payload.

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::TelemetrySink;
use crate::config::HttpSettings;

pub const TOPIC_HEADER: &str = "X-Telemetry-Topic";

pub struct HttpSink {
    agent: ureq::Agent,
    endpoint: Url,
}

impl HttpSink {
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        let endpoint = parse_endpoint(&settings.endpoint)?;
        let agent = ureq::AgentBuilder::new().timeout(settings.timeout).build();
        log::info!("HTTP telemetry endpoint {}", endpoint);
        Ok(Self { agent, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Accept only absolute `http`/`https` URLs with a host.
pub(crate) fn parse_endpoint(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .with_context(|| format!("invalid telemetry endpoint '{}'", raw))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(anyhow!(
                "unsupported telemetry endpoint scheme '{}'; expected http(s)",
                other
            ))
        }
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(anyhow!("telemetry endpoint '{}' has no host", raw));
    }
    Ok(url)
}

impl TelemetrySink for HttpSink {
    fn name(&self) -> &'static str {
        "http"
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        self.agent
            .post(self.endpoint.as_str())
            .set("Content-Type", "application/json")
            .set(TOPIC_HEADER, topic)
            .send_bytes(payload)
            .with_context(|| format!("POST {}", self.endpoint))?;
        Ok(())
    }
}
