// src/api.rs
//
// JSON client for the remote sign service.
//
// The service sits behind an ngrok tunnel. Without the bypass header the
// tunnel answers with an HTML interstitial instead of JSON, so every
// request goes out with `ngrok-skip-browser-warning: true`. An HTML body
// on a 2xx response therefore surfaces as `ApiError::Decode`.

use crate::types::{ApiConfig, Label};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

pub const TUNNEL_BYPASS_HEADER: &str = "ngrok-skip-browser-warning";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP {status}: {reason}")]
    Status { status: u16, reason: String },
    #[error("invalid response body from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Headers carried by every outbound call.
pub fn api_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        HeaderName::from_static(TUNNEL_BYPASS_HEADER),
        HeaderValue::from_static("true"),
    );
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers
}

pub struct ApiClient {
    http_client: reqwest::Client,
    base_url: String,
}

/// `reqwest::Client` with the shared headers and configured timeout.
pub fn http_client(config: &ApiConfig) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .default_headers(api_headers())
        .timeout(Duration::from_secs(config.timeout_secs));
    if !config.use_system_proxy {
        builder = builder.no_proxy();
    }
    builder.build().context("Failed to build HTTP client")
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> anyhow::Result<Self> {
        let http_client = http_client(config)?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Absolute URLs pass through; anything else is joined onto the base.
    pub fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http") {
            endpoint.to_string()
        } else if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        let url = self.url_for(endpoint);
        let request = self.http_client.get(&url);
        self.execute(request, url).await
    }

    pub async fn post<B, T>(&self, endpoint: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url_for(endpoint);
        let request = self.http_client.post(&url).json(body);
        self.execute(request, url).await
    }

    pub async fn put<B, T>(&self, endpoint: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url_for(endpoint);
        let request = self.http_client.put(&url).json(body);
        self.execute(request, url).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        let url = self.url_for(endpoint);
        let request = self.http_client.delete(&url);
        self.execute(request, url).await
    }

    /// Fetch the practice labels offered by the service.
    pub async fn labels(&self, endpoint: &str) -> Result<Vec<Label>, ApiError> {
        self.get(endpoint).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        url: String,
    ) -> Result<T, ApiError> {
        info!("🌐 Making API request to: {}", url);

        let response = match request.send().await {
            Ok(response) => response,
            Err(source) => {
                error!("🌐 Request to {} failed: {}", url, source);
                return Err(ApiError::Transport { url, source });
            }
        };

        let status = response.status();
        let reason = status.canonical_reason().unwrap_or("").to_string();
        info!("📡 API Response: {} {}", status.as_u16(), reason);

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                reason,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|source| ApiError::Decode { url, source })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::Router;
    use std::net::SocketAddr;

    /// Serve `app` on an ephemeral localhost port.
    pub async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    pub fn local_config(addr: SocketAddr) -> crate::types::ApiConfig {
        crate::types::ApiConfig {
            base_url: format!("http://{}", addr),
            timeout_secs: 5,
            use_system_proxy: false,
            ..Default::default()
        }
    }
}
