//! REST API Handlers
//!
//! Implements the REST API endpoints for projects, networks, nodes and
//! NIC wiring. The caller's identity comes from the `Authorization: Bearer`
//! header, resolved by the configured auth backend.

use crate::controlplane::manager::{NetworkManager, NetworkSpec};
use crate::domain::ports::{Actor, AuthBackendRef, Channel, VlanId};
use crate::error::{Error, ErrorKind, Result};
use axum::{
    extract::{Json, Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Network create request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkCreateRequest {
    /// Owning project, or `admin`
    pub creator: String,
    /// Project with access, empty for public
    #[serde(default)]
    pub access: String,
    /// External network identifier, empty to allocate a VLAN
    #[serde(default)]
    pub net_id: String,
}

/// NIC register request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NicRegisterRequest {
    /// Switch port, `<switch>::<port>`
    pub port: String,
}

/// Connect request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub network: String,
    /// Defaults to `vlan/native`
    #[serde(default)]
    pub channel: Option<String>,
}

/// Detach request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetachRequest {
    pub network: String,
}

/// Switch membership query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchVlansRequest {
    pub vlans: Vec<VlanId>,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// HTTP status for an error kind
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Authorization => StatusCode::UNAUTHORIZED,
        ErrorKind::BadArgument => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Duplicate | ErrorKind::Blocked => StatusCode::CONFLICT,
        ErrorKind::ResourceExhausted => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::SwitchApply | ErrorKind::Transport => StatusCode::BAD_GATEWAY,
        ErrorKind::Configuration | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    manager: Arc<NetworkManager>,
    auth: AuthBackendRef,
}

impl RestRouter {
    /// Create a new REST router
    pub fn new(manager: Arc<NetworkManager>, auth: AuthBackendRef) -> Self {
        Self { manager, auth }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            manager: self.manager,
            auth: self.auth,
        };

        Router::new()
            // Projects
            .route("/project/:project", put(project_create).delete(project_delete))
            // Networks
            .route(
                "/network/:network",
                put(network_create).delete(network_delete).get(show_network),
            )
            .route("/networks", get(list_networks))
            // Nodes and wiring
            .route("/node/:node", put(node_register))
            .route("/node/:node/nic/:nic", put(node_register_nic))
            .route("/node/:node/nic/:nic/connect_network", post(node_connect_network))
            .route("/node/:node/nic/:nic/detach_network", post(node_detach_network))
            // Diagnostics
            .route("/vlans", get(leased_vlans))
            .route("/switch_vlans", post(switch_vlans))
            // Health endpoints
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    manager: Arc<NetworkManager>,
    auth: AuthBackendRef,
}

impl AppState {
    /// Resolve the request's actor from its bearer token
    fn actor(&self, headers: &HeaderMap) -> Result<Actor> {
        let token = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim);
        self.auth.authenticate(token)
    }

    fn fail(&self, e: Error) -> Response {
        let kind = e.kind();
        let status = status_for(kind);
        self.manager.metrics().record_api_error(kind);

        if status.is_server_error() {
            error!("Request failed: {}", e);
        } else {
            debug!("Request rejected: {}", e);
        }

        let details = match &e {
            Error::SwitchApply { committed, .. } if !committed.is_empty() => {
                Some(format!("committed ports: {}", committed.join(", ")))
            }
            _ => None,
        };

        (
            status,
            Json(ApiErrorResponse {
                error: kind.as_str().to_string(),
                message: e.to_string(),
                details,
            }),
        )
            .into_response()
    }

    fn reply<T: Serialize>(&self, result: Result<T>) -> Response {
        match result {
            Ok(body) => (StatusCode::OK, Json(body)).into_response(),
            Err(e) => self.fail(e),
        }
    }

    fn done(&self, result: Result<()>) -> Response {
        match result {
            Ok(()) => StatusCode::OK.into_response(),
            Err(e) => self.fail(e),
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn project_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project): Path<String>,
) -> Response {
    let result = async {
        let actor = state.actor(&headers)?;
        state.manager.project_create(&actor, &project).await
    };
    state.done(result.await)
}

async fn project_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project): Path<String>,
) -> Response {
    let result = async {
        let actor = state.actor(&headers)?;
        state.manager.project_delete(&actor, &project).await
    };
    state.done(result.await)
}

/// Create a network
async fn network_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(network): Path<String>,
    Json(request): Json<NetworkCreateRequest>,
) -> Response {
    let result = async {
        let actor = state.actor(&headers)?;
        let spec = NetworkSpec::from_wire(&request.creator, &request.access, &request.net_id);
        state.manager.network_create(&actor, &network, spec).await
    };
    state.reply(result.await)
}

async fn network_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(network): Path<String>,
) -> Response {
    let result = async {
        let actor = state.actor(&headers)?;
        state.manager.network_delete(&actor, &network).await
    };
    state.done(result.await)
}

async fn show_network(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(network): Path<String>,
) -> Response {
    let result = async {
        let actor = state.actor(&headers)?;
        state.manager.show_network(&actor, &network).await
    };
    state.reply(result.await)
}

async fn list_networks(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let result = async {
        let actor = state.actor(&headers)?;
        state.manager.list_networks(&actor).await
    };
    state.reply(result.await)
}

async fn node_register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(node): Path<String>,
) -> Response {
    let result = async {
        let actor = state.actor(&headers)?;
        state.manager.node_register(&actor, &node).await
    };
    state.done(result.await)
}

async fn node_register_nic(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((node, nic)): Path<(String, String)>,
    Json(request): Json<NicRegisterRequest>,
) -> Response {
    let result = async {
        let actor = state.actor(&headers)?;
        state
            .manager
            .node_register_nic(&actor, &node, &nic, &request.port)
            .await
    };
    state.done(result.await)
}

/// Connect a NIC to a network
async fn node_connect_network(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((node, nic)): Path<(String, String)>,
    Json(request): Json<ConnectRequest>,
) -> Response {
    let result = async {
        let actor = state.actor(&headers)?;
        let channel = match request.channel.as_deref() {
            Some(channel) => channel.parse()?,
            None => Channel::default(),
        };
        state
            .manager
            .node_connect_network(&actor, &node, &nic, &request.network, channel)
            .await
    };
    state.done(result.await)
}

/// Detach a NIC from a network
async fn node_detach_network(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((node, nic)): Path<(String, String)>,
    Json(request): Json<DetachRequest>,
) -> Response {
    let result = async {
        let actor = state.actor(&headers)?;
        state
            .manager
            .node_detach_network(&actor, &node, &nic, &request.network)
            .await
    };
    state.done(result.await)
}

async fn leased_vlans(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let result = async {
        let actor = state.actor(&headers)?;
        state.manager.leased_vlans(&actor).await
    };
    state.reply(result.await)
}

/// Current switch membership of the requested VLANs, keyed by tag
async fn switch_vlans(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SwitchVlansRequest>,
) -> Response {
    let result = async {
        let actor = state.actor(&headers)?;
        let vlans = state
            .manager
            .get_switch_vlans(&actor, &request.vlans)
            .await?;
        Ok::<_, Error>(
            vlans
                .into_iter()
                .map(|(vlan, ports)| (vlan.to_string(), ports))
                .collect::<BTreeMap<String, Vec<String>>>(),
        )
    };
    state.reply(result.await)
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness check
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.manager.status().await;
    if status.healthy {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "switches unreachable")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenAuthBackend;
    use crate::config::HaasConfig;
    use crate::switch::DriverRegistry;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> Router {
        let config = HaasConfig {
            vlans: "84-90".to_string(),
            ..Default::default()
        };
        let manager = NetworkManager::from_config(&config, &DriverRegistry::default()).unwrap();
        let tokens = BTreeMap::from([
            ("root-token".to_string(), "admin".to_string()),
            ("runway-token".to_string(), "runway".to_string()),
        ]);
        RestRouter::new(manager, Arc::new(TokenAuthBackend::new(&tokens))).build()
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn error_body(response: Response) -> ApiErrorResponse {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let response = app()
            .oneshot(request("GET", "/health", None, ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // No switches configured, nothing to be unhealthy
        let response = app()
            .oneshot(request("GET", "/ready", None, ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let response = app()
            .oneshot(request("PUT", "/project/runway", None, ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_body(response).await.error, "authorization");
    }

    #[tokio::test]
    async fn test_project_token_cannot_administer() {
        let response = app()
            .oneshot(request("PUT", "/project/runway", Some("runway-token"), ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_network_create_and_show() {
        let app = app();
        let response = app
            .clone()
            .oneshot(request("PUT", "/project/runway", Some("root-token"), ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(request(
                "PUT",
                "/network/runway_pxe",
                Some("runway-token"),
                r#"{"creator": "runway", "access": "runway"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(request("GET", "/network/runway_pxe", Some("runway-token"), ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let info: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(info["network_id"], "84");
        assert_eq!(info["channels"][0], "vlan/native");

        let response = app
            .oneshot(request(
                "PUT",
                "/network/runway_pxe",
                Some("root-token"),
                r#"{"creator": "admin"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(error_body(response).await.error, "duplicate");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::Authorization), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(ErrorKind::BadArgument), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::Duplicate), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::Blocked), StatusCode::CONFLICT);
        assert_eq!(
            status_for(ErrorKind::ResourceExhausted),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status_for(ErrorKind::SwitchApply), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_for(ErrorKind::Configuration),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_connect_request_channel_defaults() {
        let request: ConnectRequest = serde_json::from_str(r#"{"network": "pxe"}"#).unwrap();
        assert!(request.channel.is_none());

        let request: NetworkCreateRequest =
            serde_json::from_str(r#"{"creator": "admin"}"#).unwrap();
        assert!(request.access.is_empty());
        assert!(request.net_id.is_empty());
    }
}
