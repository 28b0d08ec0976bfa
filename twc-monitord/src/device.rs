use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use shared::protocol::{LIFETIME_PATH, VITALS_PATH, WIFI_STATUS_PATH};
use shared::types::{LifetimeStats, Vitals, WifiStatus};

/// Why a single device request failed. Callers decide whether to retry.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected response from {url}: status {status}, content type {content_type:?}")]
    Protocol {
        url: String,
        status: StatusCode,
        content_type: Option<String>,
    },
    #[error("malformed payload from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Builds clients for arbitrary addresses on the device port. One shared
/// `reqwest::Client` (and its connection pool) backs every client it creates.
#[derive(Clone)]
pub struct DeviceConnector {
    http: reqwest::Client,
    port: u16,
}

impl DeviceConnector {
    pub fn new(port: u16, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { http, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn connect(&self, ip: IpAddr) -> DeviceClient {
        DeviceClient {
            http: self.http.clone(),
            ip,
            // SocketAddr's Display brackets IPv6 hosts
            base_url: format!("http://{}", SocketAddr::new(ip, self.port)),
        }
    }
}

/// Read-only client for one wall connector
#[derive(Debug, Clone)]
pub struct DeviceClient {
    http: reqwest::Client,
    ip: IpAddr,
    base_url: String,
}

impl DeviceClient {
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub async fn fetch_telemetry(&self) -> Result<Vitals, DeviceError> {
        self.get_json(VITALS_PATH).await
    }

    pub async fn fetch_connectivity(&self) -> Result<WifiStatus, DeviceError> {
        self.get_json(WIFI_STATUS_PATH).await
    }

    pub async fn fetch_usage_counters(&self) -> Result<LifetimeStats, DeviceError> {
        self.get_json(LIFETIME_PATH).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, DeviceError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| DeviceError::Transport { url: url.clone(), source })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if status != StatusCode::OK || !is_json(content_type.as_deref()) {
            return Err(DeviceError::Protocol { url, status, content_type });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| DeviceError::Transport { url: url.clone(), source })?;

        serde_json::from_slice(&body).map_err(|source| DeviceError::Decode { url, source })
    }
}

/// Media type check that tolerates parameters such as `charset`
fn is_json(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(|media| media.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}
