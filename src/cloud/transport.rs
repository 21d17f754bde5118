//! HTTP transport seam between the cloud client and the network

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::CloudError;

/// Status and body of a completed GET
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Blocking-free GET with a per-call timeout
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(
        &self,
        url: &Url,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<HttpResponse, CloudError>;
}

/// Production transport backed by reqwest
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, CloudError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| CloudError::Transport(format!("HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &Url,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<HttpResponse, CloudError> {
        let resp = self
            .http_client
            .get(url.clone())
            .header(reqwest::header::USER_AGENT, user_agent)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| CloudError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        let body = resp
            .bytes()
            .await
            .map_err(|e| CloudError::Transport(format!("reading body: {}", e)))?;

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}
