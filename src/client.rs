//! HTTP Client
//!
//! Thin client for the control plane REST API. Each call returns the raw
//! response body on success; non-2xx replies map onto [`Error::Api`],
//! [`Error::Server`] or [`Error::UnexpectedStatus`].

use crate::config::HaasConfig;
use crate::controlplane::api::rest::{ConnectRequest, DetachRequest, NetworkCreateRequest};
use crate::domain::ports::Channel;
use crate::error::{Error, Result};
use reqwest::{Client, Method, RequestBuilder};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Environment variable consulted when no endpoint is passed explicitly
pub const ENDPOINT_ENV: &str = "HAAS_ENDPOINT";

/// Pick the API endpoint: explicit argument, then environment, then config
pub fn resolve_endpoint(
    explicit: Option<&str>,
    env: Option<&str>,
    config: Option<&HaasConfig>,
) -> Result<String> {
    explicit
        .or(env)
        .or_else(|| config.and_then(|c| c.client.endpoint.as_deref()))
        .filter(|endpoint| !endpoint.is_empty())
        .map(|endpoint| endpoint.trim_end_matches('/').to_string())
        .ok_or_else(|| Error::Configuration("no endpoint found".to_string()))
}

/// REST client for the network control plane
#[derive(Debug, Clone)]
pub struct HaasClient {
    endpoint: String,
    token: Option<String>,
    http: Client,
}

impl HaasClient {
    /// Create a client, resolving the endpoint from `endpoint`,
    /// `HAAS_ENDPOINT` or the config's `client.endpoint`
    pub fn new(endpoint: Option<&str>, config: Option<&HaasConfig>) -> Result<Self> {
        let env = std::env::var(ENDPOINT_ENV).ok();
        let endpoint = resolve_endpoint(endpoint, env.as_deref(), config)?;

        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            endpoint,
            token: None,
            http,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Build a URL from path segments, percent-encoding each one
    pub fn object_url(&self, segments: &[&str]) -> String {
        let mut url = self.endpoint.clone();
        for segment in segments {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        url
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Connect a NIC to a network; the channel defaults to `vlan/native`
    pub async fn node_connect_network(
        &self,
        node: &str,
        nic: &str,
        network: &str,
        channel: Option<&Channel>,
    ) -> Result<String> {
        let body = ConnectRequest {
            network: network.to_string(),
            channel: Some(channel.copied().unwrap_or_default().to_string()),
        };
        let url = self.object_url(&["node", node, "nic", nic, "connect_network"]);
        self.send(Method::POST, &url, Some(&body)).await
    }

    pub async fn node_detach_network(
        &self,
        node: &str,
        nic: &str,
        network: &str,
    ) -> Result<String> {
        let body = DetachRequest {
            network: network.to_string(),
        };
        let url = self.object_url(&["node", node, "nic", nic, "detach_network"]);
        self.send(Method::POST, &url, Some(&body)).await
    }

    /// Create a network. `creator` may be `admin`, an empty `access` makes
    /// it public and an empty `net_id` allocates a VLAN.
    pub async fn network_create(
        &self,
        network: &str,
        creator: &str,
        access: &str,
        net_id: &str,
    ) -> Result<String> {
        let body = NetworkCreateRequest {
            creator: creator.to_string(),
            access: access.to_string(),
            net_id: net_id.to_string(),
        };
        let url = self.object_url(&["network", network]);
        self.send(Method::PUT, &url, Some(&body)).await
    }

    pub async fn network_delete(&self, network: &str) -> Result<String> {
        let url = self.object_url(&["network", network]);
        self.send::<()>(Method::DELETE, &url, None).await
    }

    pub async fn show_network(&self, network: &str) -> Result<String> {
        let url = self.object_url(&["network", network]);
        self.send::<()>(Method::GET, &url, None).await
    }

    // =========================================================================
    // Transport
    // =========================================================================

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let request = self.http.request(method, url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<B: Serialize>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<String> {
        debug!("{} {}", method, url);

        let mut request = self.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            Ok(text)
        } else if status.is_client_error() {
            Err(Error::Api {
                status: status.as_u16(),
                message: text,
            })
        } else if status.is_server_error() {
            Err(Error::Server {
                status: status.as_u16(),
                message: text,
            })
        } else {
            Err(Error::UnexpectedStatus {
                status: status.as_u16(),
                message: text,
            })
        }
    }
}
