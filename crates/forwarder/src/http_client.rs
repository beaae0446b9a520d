//! HTTP transport for the downstream OTLP collector (§4.6.3, §6.5).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use th_domain::error::{Error, Result};

const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Seam over the HTTP client so the grouper's flush logic can be tested
/// without a live collector.
#[async_trait]
pub trait OtlpHttpSender: Send + Sync {
    async fn send(&self, endpoint: &str, payload: Vec<u8>) -> Result<()>;
}

pub struct ReqwestOtlpSender {
    client: ReqwestClient,
}

impl ReqwestOtlpSender {
    pub fn new() -> Self {
        Self {
            client: ReqwestClient::builder()
                .timeout(DEFAULT_EXPORT_TIMEOUT)
                .build()
                .expect("failed to build OTLP export HTTP client"),
        }
    }

    /// Builds a sender honoring the `forwarder.timeout_seconds` and
    /// `forwarder.insecure` config knobs (§6.5).
    pub fn with_config(timeout_seconds: u64, insecure: bool) -> Self {
        Self {
            client: ReqwestClient::builder()
                .timeout(Duration::from_secs(timeout_seconds))
                .danger_accept_invalid_certs(insecure)
                .build()
                .expect("failed to build OTLP export HTTP client"),
        }
    }
}

impl Default for ReqwestOtlpSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OtlpHttpSender for ReqwestOtlpSender {
    async fn send(&self, endpoint: &str, payload: Vec<u8>) -> Result<()> {
        let response = self
            .client
            .post(endpoint)
            .header("content-type", "application/x-protobuf")
            .body(payload)
            .send()
            .await
            .map_err(|e| Error::Forwarder(format!("OTLP export request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Forwarder(format!(
                "OTLP export rejected with status {status}: {body}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    pub struct RecordingSender {
        pub calls: Mutex<Vec<(String, usize)>>,
    }

    impl RecordingSender {
        pub fn new() -> Self {
            Self { calls: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl OtlpHttpSender for RecordingSender {
        async fn send(&self, endpoint: &str, payload: Vec<u8>) -> Result<()> {
            self.calls.lock().unwrap().push((endpoint.to_string(), payload.len()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn recording_sender_captures_calls() {
        let sender = RecordingSender::new();
        sender.send("http://collector/v1/traces", vec![1, 2, 3]).await.unwrap();
        assert_eq!(sender.calls.lock().unwrap().len(), 1);
    }
}
