#![cfg(feature = "visualizer-http")]

use std::time::Duration;

use anyhow::{Context, Result};

use crate::visualizer::{ObjectMessage, VisualizerSink};

/// POSTs object messages to `{base_url}/api/v1/object`.
pub struct HttpVisualizer {
    endpoint: String,
    timeout: Duration,
}

impl HttpVisualizer {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            endpoint: format!("{}/api/v1/object", base_url.trim_end_matches('/')),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl VisualizerSink for HttpVisualizer {
    fn publish(&mut self, msg: &ObjectMessage) -> Result<()> {
        let body = serde_json::to_string(msg)?;
        ureq::post(&self.endpoint)
            .set("Content-Type", "application/json")
            .timeout(self.timeout)
            .send_string(&body)
            .with_context(|| format!("visualizer POST {} failed", self.endpoint))?;
        Ok(())
    }
}
