//! Client for the remote delay endpoint.

use std::time::Instant;

use rand::Rng;
use reqwest::Client;

use crate::models::CallResult;

pub const USER_AGENT: &str = "drainpipe/0.1 (work-queue pipeline)";

/// HTTP client for `GET {base}/delay/{seconds}`.
///
/// No per-call timeout is configured; the client's default applies. A slow
/// remote stalls the owning consumer only, and the drain protocol tolerates
/// that (the 30 s safety timer is the backstop).
pub struct RemoteClient {
    client: Client,
    base_url: String,
}

impl RemoteClient {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Issue one delay call, measuring wall-clock time around the full
    /// request including the body read. Any HTTP status is a success and is
    /// captured verbatim; only a transport/body error is a failure.
    pub async fn call_delay(&self, seconds: &str) -> Result<CallResult, reqwest::Error> {
        let url = format!("{}/delay/{}", self.base_url, seconds);
        let start = Instant::now();

        let response = self.client.get(&url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        Ok(CallResult {
            status,
            body,
            duration_ms,
        })
    }
}

/// One delay value: uniform in [0.10, 0.25), already formatted to two
/// decimals. Sampling whole hundredths keeps the formatted value inside the
/// half-open interval.
pub fn random_delay_seconds() -> String {
    let hundredths: u32 = rand::rng().random_range(10..25);
    format!("0.{hundredths}")
}
