//! HTTP transport to a controller on the local network.
//!
//! Two endpoints are used: `GET {base}/status` and `POST {base}/command`.
//! Each request is bounded by [`TransportConfig::timeout`] and is never
//! retried here.
//!
//! # Example
//!
//! ```no_run
//! use pitmaster_core::{DeviceAddress, GrillTransport, HttpTransport, TransportConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = HttpTransport::new(TransportConfig::default())?;
//! let address = DeviceAddress::parse("192.168.1.40")?;
//!
//! let status = transport.fetch_status(&address).await?;
//! println!("Pit: {:.0}°F, fan {}%", status.grill_temp, status.fan_speed);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use pitmaster_types::{Command, Status, decode_status, encode_command};

use crate::error::{TransportError, TransportResult};
use crate::traits::GrillTransport;

/// Normalized base URL of a controller, e.g. `http://192.168.1.40:8080`.
///
/// Accepts `host`, `host:port` or `http(s)://host[:port]`; a trailing `/` is
/// dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn parse(input: &str) -> TransportResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(TransportError::InvalidAddress("empty address".to_string()));
        }

        let (scheme, rest) = match trimmed.split_once("://") {
            Some((scheme @ ("http" | "https"), rest)) => (scheme, rest),
            Some((scheme, _)) => {
                return Err(TransportError::InvalidAddress(format!(
                    "unsupported scheme '{scheme}' in {trimmed}"
                )));
            }
            None => ("http", trimmed),
        };
        let rest = rest.trim_end_matches('/');
        if rest.is_empty() {
            return Err(TransportError::InvalidAddress(format!(
                "missing host in {trimmed}"
            )));
        }
        let base = format!("{scheme}://{rest}");

        let url = Url::parse(&base)
            .map_err(|e| TransportError::InvalidAddress(format!("{trimmed}: {e}")))?;
        if url.host_str().is_none_or(str::is_empty) {
            return Err(TransportError::InvalidAddress(format!(
                "missing host in {trimmed}"
            )));
        }

        Ok(Self(base))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn status_url(&self) -> String {
        format!("{}/status", self.0)
    }

    pub fn command_url(&self) -> String {
        format!("{}/command", self.0)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceAddress {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DeviceAddress {
    type Error = TransportError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DeviceAddress> for String {
    fn from(value: DeviceAddress) -> Self {
        value.0
    }
}

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Bound on each request, body included.
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            user_agent: concat!("pitmaster/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl TransportConfig {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// [`GrillTransport`] over plain HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> TransportResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self { client })
    }

    /// Create a transport around an existing client. The client's own timeout
    /// applies.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GrillTransport for HttpTransport {
    async fn fetch_status(&self, address: &DeviceAddress) -> TransportResult<Status> {
        let response = self
            .client
            .get(address.status_url())
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            debug!("GET {} returned {}", address.status_url(), status);
            return Err(TransportError::Http(status.as_u16()));
        }

        let body = response.bytes().await.map_err(map_request_error)?;
        Ok(decode_status(&body)?)
    }

    async fn send_command(&self, address: &DeviceAddress, command: &Command) -> TransportResult<()> {
        let response = self
            .client
            .post(address.command_url())
            .header(CONTENT_TYPE, "application/json")
            .body(encode_command(command))
            .send()
            .await
            .map_err(map_request_error)?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            other => {
                debug!("POST {} returned {}", address.command_url(), other);
                Err(TransportError::Http(other.as_u16()))
            }
        }
    }
}

fn map_request_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(err.to_string())
    }
}
