//! Diagnostics collection over the cluster's HTTP monitor endpoint.

use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::Client;

/// Fetches a diagnostics dump from a cluster endpoint such as
/// `http://host:port`.
pub trait DiagnosticsFetcher: Send + Sync {
    fn fetch(&self, endpoint: &str, timeout: Duration) -> anyhow::Result<String>;
}

pub struct HttpDiagnosticsClient {
    client: Client,
}

impl HttpDiagnosticsClient {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .build()
            .context("failed to build http client")?;
        Ok(Self { client })
    }
}

impl DiagnosticsFetcher for HttpDiagnosticsClient {
    fn fetch(&self, endpoint: &str, timeout: Duration) -> anyhow::Result<String> {
        let url = format!(
            "{}/api/monitor/diagnose/",
            endpoint.trim_end_matches('/')
        );
        let body = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .and_then(|resp| resp.error_for_status())
            .with_context(|| format!("diagnose request failed: {url}"))?
            .text()
            .context("failed to read diagnose response")?;
        Ok(body)
    }
}
