//! Post-deployment HTTP health probe.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Probe parameters; injected by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthProbe {
    pub method: String,
    pub path: String,
    pub expected_status: u16,
    #[serde(skip, default = "default_timeout")]
    pub timeout: Duration,
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for HealthProbe {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            path: "/health".to_string(),
            expected_status: 200,
            timeout: default_timeout(),
        }
    }
}

impl HealthProbe {
    /// Hit `base_url` + `path` and check the status code.
    pub async fn check(&self, base_url: &str) -> Result<u16> {
        let url = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        );
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let method: reqwest::Method = self
            .method
            .parse()
            .with_context(|| format!("Invalid probe method: {}", self.method))?;

        let response = client
            .request(method, &url)
            .send()
            .await
            .with_context(|| format!("Health probe request to {url} failed"))?;

        let status = response.status().as_u16();
        if status != self.expected_status {
            anyhow::bail!(
                "Health probe {url} returned {status}, expected {}",
                self.expected_status
            );
        }
        Ok(status)
    }
}
