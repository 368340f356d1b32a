use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::net::SocketAddr;
use std::str::FromStr;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::policy::{CreateUrlRequest, Operation};
use crate::utils::parse_headers_with_escapes;

/// Configuration for building the HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub request_timeout: Duration,
    pub skip_tls_verify: bool,
    pub resolve_target_addr: Option<String>,
    pub custom_headers: Option<String>,

    /// Maximum idle connections kept per host
    pub max_idle_per_host: usize,

    /// How long idle connections stay in the pool before cleanup
    pub idle_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            skip_tls_verify: false,
            resolve_target_addr: None,
            custom_headers: None,
            max_idle_per_host: 32,
            idle_timeout: Duration::from_secs(90),
        }
    }
}

/// Result of building the client, includes parsed headers for logging.
pub struct ClientBuildResult {
    pub client: reqwest::Client,
    pub parsed_headers: HeaderMap,
}

/// Builds a reqwest HTTP client with the specified configuration.
pub fn build_client(config: &ClientConfig) -> Result<ClientBuildResult, ConfigError> {
    let mut client_builder = reqwest::Client::builder().timeout(config.request_timeout);

    // DNS Override Configuration
    if let Some(ref resolve_str) = config.resolve_target_addr {
        if !resolve_str.is_empty() {
            client_builder = configure_dns_override(client_builder, resolve_str)?;
        } else {
            warn!("resolveTargetAddr is set but empty, no DNS override will be applied");
        }
    }

    // Custom Headers Configuration
    let parsed_headers = configure_custom_headers(config.custom_headers.as_deref())?;
    if !parsed_headers.is_empty() {
        client_builder = client_builder.default_headers(parsed_headers.clone());
        info!(count = parsed_headers.len(), "Configured custom default headers");
    }

    // Connection Pool Configuration
    client_builder = client_builder
        .pool_max_idle_per_host(config.max_idle_per_host)
        .pool_idle_timeout(config.idle_timeout);
    debug!(
        max_idle_per_host = config.max_idle_per_host,
        idle_timeout = ?config.idle_timeout,
        "Connection pool configured"
    );

    if config.skip_tls_verify {
        warn!("Skipping TLS certificate verification");
        client_builder = client_builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }

    let client = client_builder
        .build()
        .map_err(|e| ConfigError::Client(e.to_string()))?;

    Ok(ClientBuildResult {
        client,
        parsed_headers,
    })
}

fn configure_dns_override(
    client_builder: reqwest::ClientBuilder,
    resolve_str: &str,
) -> Result<reqwest::ClientBuilder, ConfigError> {
    let invalid = |message: String| ConfigError::Client(format!("resolveTargetAddr: {}", message));

    let parts: Vec<&str> = resolve_str.split(':').map(str::trim).collect();
    let [hostname, ip, port] = parts.as_slice() else {
        return Err(invalid(format!(
            "'{}' is not in the expected format 'hostname:ip:port'",
            resolve_str
        )));
    };

    if hostname.is_empty() || ip.is_empty() || port.is_empty() {
        return Err(invalid(format!(
            "'{}' has an empty part. Format: 'hostname:ip:port'",
            resolve_str
        )));
    }

    let port: u16 = port
        .parse()
        .map_err(|e| invalid(format!("failed to parse port '{}': {}", port, e)))?;

    let socket_addr: SocketAddr = format!("{}:{}", ip, port)
        .parse()
        .map_err(|e| invalid(format!("failed to parse IP '{}': {}", ip, e)))?;

    info!(hostname = *hostname, addr = %socket_addr, "Configured DNS override");
    Ok(client_builder.resolve(hostname, socket_addr))
}

fn configure_custom_headers(custom_headers_str: Option<&str>) -> Result<HeaderMap, ConfigError> {
    let mut parsed_headers = HeaderMap::new();

    let headers_str = match custom_headers_str {
        Some(s) if !s.is_empty() => s,
        _ => return Ok(parsed_headers),
    };

    for header_pair in parse_headers_with_escapes(headers_str) {
        let Some((name_str, value_str)) = header_pair.split_once(':') else {
            return Err(ConfigError::Client(format!(
                "Invalid header format: '{}'. Expected 'Name:Value'.",
                header_pair
            )));
        };

        let name_str = name_str.trim();
        if name_str.is_empty() {
            return Err(ConfigError::Client(format!(
                "Header name cannot be empty in '{}'",
                header_pair
            )));
        }

        let header_name = HeaderName::from_str(name_str).map_err(|e| {
            ConfigError::Client(format!("Invalid header name '{}': {}", name_str, e))
        })?;
        let header_value = HeaderValue::from_str(value_str.trim()).map_err(|e| {
            ConfigError::Client(format!("Invalid header value for '{}': {}", name_str, e))
        })?;

        parsed_headers.insert(header_name, header_value);
    }

    Ok(parsed_headers)
}

/// Status and body of a received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Thin typed wrapper over the shortener's HTTP API.
#[derive(Clone)]
pub struct ServiceClient {
    client: reqwest::Client,
    base_url: String,
}

impl ServiceClient {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issues the HTTP call for `operation`.
    ///
    /// An `Err` means no response was received; any status code is `Ok`.
    pub async fn execute(&self, operation: &Operation) -> Result<RawResponse, reqwest::Error> {
        match operation {
            Operation::Write(request) => self.create(request).await,
            Operation::Read(target) => self.resolve(&target.short_code).await,
        }
    }

    /// `POST /create?url=..&userId=..`
    pub async fn create(&self, request: &CreateUrlRequest) -> Result<RawResponse, reqwest::Error> {
        let response = self
            .client
            .post(format!("{}/create", self.base_url))
            .query(&[("url", &request.url), ("userId", &request.user_id)])
            .send()
            .await?;
        Self::read(response).await
    }

    /// `GET /short/{id}`
    pub async fn resolve(&self, short_code: &str) -> Result<RawResponse, reqwest::Error> {
        let response = self
            .client
            .get(format!("{}/short/{}", self.base_url, short_code))
            .send()
            .await?;
        Self::read(response).await
    }

    /// `POST /users` with `{"userId": ..}`
    pub async fn register_user(&self, user_id: &str) -> Result<RawResponse, reqwest::Error> {
        let response = self
            .client
            .post(format!("{}/users", self.base_url))
            .json(&serde_json::json!({ "userId": user_id }))
            .send()
            .await?;
        Self::read(response).await
    }

    async fn read(response: reqwest::Response) -> Result<RawResponse, reqwest::Error> {
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(RawResponse { status, body })
    }
}
