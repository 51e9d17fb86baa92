//! Security Middleware for the reputation API
//!
//! Provides:
//! - API key and Hawk authentication (read-write and read-only credentials)
//! - Request size limits
//! - Security headers
//! - Request logging

use axum::{
    body::{Body, to_bytes},
    extract::{MatchedPath, Request, State},
    http::{
        HeaderMap, HeaderValue, Method, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE, HOST},
        uri::Authority,
    },
    middleware::Next,
    response::Response,
};
use hawk::{DigestAlgorithm, Key, PayloadHasher, RequestBuilder};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::IprepdConfig;
use crate::metrics;

/// Authorization scheme prefix, `Authorization: APIKey <key>`
const API_KEY_SCHEME: &str = "APIKey ";

/// Authorization scheme prefix for Hawk-signed requests
const HAWK_SCHEME: &str = "Hawk ";

/// Allowed clock difference for Hawk timestamps
const HAWK_TIMESTAMP_SKEW: Duration = Duration::from_secs(60);

/// Port assumed when the Host header carries none
const DEFAULT_HTTP_PORT: u16 = 80;

/// Security configuration for middleware
#[derive(Debug, Clone)]
pub struct SecurityMiddlewareConfig {
    /// Enable API key authentication
    pub enable_auth: bool,
    /// Read-write keys, name -> key
    pub api_keys: HashMap<String, String>,
    /// Read-only keys, name -> key
    pub ro_api_keys: HashMap<String, String>,
    /// Read-write Hawk credentials, id -> key
    pub hawk_keys: HashMap<String, String>,
    /// Read-only Hawk credentials, id -> key
    pub ro_hawk_keys: HashMap<String, String>,
    /// Maximum request body size in bytes
    pub max_request_size: usize,
    /// Enable request logging
    pub log_requests: bool,
    /// Paths that don't require authentication
    pub public_paths: Vec<String>,
}

impl Default for SecurityMiddlewareConfig {
    fn default() -> Self {
        Self {
            enable_auth: true,
            api_keys: HashMap::new(),
            ro_api_keys: HashMap::new(),
            hawk_keys: HashMap::new(),
            ro_hawk_keys: HashMap::new(),
            max_request_size: 1024 * 1024, // 1MB
            log_requests: true,
            public_paths: vec![
                "/__heartbeat__".to_string(),
                "/__lbheartbeat__".to_string(),
                "/__version__".to_string(),
            ],
        }
    }
}

impl SecurityMiddlewareConfig {
    pub fn from_config(config: &IprepdConfig) -> Self {
        Self {
            enable_auth: !config.auth.disable_auth,
            api_keys: config.auth.api_keys.clone(),
            ro_api_keys: config.auth.ro_api_keys.clone(),
            hawk_keys: config.auth.hawk.clone(),
            ro_hawk_keys: config.auth.ro_hawk.clone(),
            max_request_size: config.security.max_request_size,
            log_requests: config.logging.log_requests,
            ..Self::default()
        }
    }
}

/// Access granted to a presented key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadWrite,
    ReadOnly,
}

/// Shared state for security middleware
#[derive(Clone)]
pub struct SecurityState {
    pub config: Arc<SecurityMiddlewareConfig>,
}

impl SecurityState {
    pub fn new(config: SecurityMiddlewareConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Resolve a key to its name and access level
    fn authenticate(&self, key: &str) -> Option<(&str, Access)> {
        fn find<'a>(keys: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
            keys.iter()
                .find(|(_, k)| k.as_str() == key)
                .map(|(name, _)| name.as_str())
        }
        find(&self.config.api_keys, key)
            .map(|name| (name, Access::ReadWrite))
            .or_else(|| find(&self.config.ro_api_keys, key).map(|name| (name, Access::ReadOnly)))
    }

    /// Secret and access level for a Hawk id
    fn hawk_credentials(&self, id: &str) -> Option<(&str, Access)> {
        if let Some(key) = self.config.hawk_keys.get(id) {
            return Some((key.as_str(), Access::ReadWrite));
        }
        self.config
            .ro_hawk_keys
            .get(id)
            .map(|key| (key.as_str(), Access::ReadOnly))
    }
}

/// Check if path is public (doesn't require auth)
fn is_public_path(path: &str, public_paths: &[String]) -> bool {
    public_paths.iter().any(|p| path == p)
}

/// Methods a read-only key may use
fn is_read_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD)
}

/// `type/subtype` of a Content-Type value, lowercased and without parameters
fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Host and port the client signed, taken from the Host header
fn signed_host(request: &Request) -> Option<(String, u16)> {
    let authority = request
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().authority().map(Authority::as_str))?;
    let authority = Authority::from_str(authority).ok()?;
    Some((
        authority.host().to_string(),
        authority.port_u16().unwrap_or(DEFAULT_HTTP_PORT),
    ))
}

/// Verify a Hawk header, including the payload hash when a Content-Type is
/// present. The body is buffered for hashing and put back into the request.
async fn verify_hawk(
    state: &SecurityState,
    header_value: &str,
    request: Request,
) -> Result<(Request, Option<(String, Access)>), StatusCode> {
    let hawk_header = match hawk::Header::from_str(header_value) {
        Ok(header) => header,
        Err(e) => {
            warn!(error = %e, "Malformed hawk header");
            return Ok((request, None));
        }
    };
    let Some(id) = hawk_header.id.clone() else {
        warn!("Hawk header without id");
        return Ok((request, None));
    };
    let Some((secret, access)) = state.hawk_credentials(&id) else {
        warn!(hawk_id = %id, "Unknown hawk id");
        return Ok((request, None));
    };
    let Some((host, port)) = signed_host(&request) else {
        warn!(hawk_id = %id, "Hawk request without host");
        return Ok((request, None));
    };

    let media_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(media_type)
        .filter(|m| !m.is_empty());
    if media_type.is_none() && !matches!(*request.method(), Method::GET | Method::DELETE) {
        warn!(hawk_id = %id, "Hawk request missing content-type");
        return Ok((request, None));
    }

    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, state.config.max_request_size)
        .await
        .map_err(|e| {
            warn!(hawk_id = %id, error = %e, "Unable to buffer hawk request body");
            StatusCode::PAYLOAD_TOO_LARGE
        })?;
    let hash = match &media_type {
        Some(media_type) => Some(
            PayloadHasher::hash(media_type.as_bytes(), DigestAlgorithm::Sha256, &bytes[..])
                .map_err(|e| {
                    error!(error = %e, "Hawk payload hashing failed");
                    StatusCode::INTERNAL_SERVER_ERROR
                })?,
        ),
        None => None,
    };

    let key = Key::new(secret.as_bytes(), DigestAlgorithm::Sha256).map_err(|e| {
        error!(hawk_id = %id, error = %e, "Unusable hawk key");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let method = parts.method.as_str().to_string();
    let resource = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();
    let valid = RequestBuilder::new(&method, &host, port, &resource)
        .hash(hash.as_deref())
        .request()
        .validate_header(&hawk_header, &key, HAWK_TIMESTAMP_SKEW);

    let request = Request::from_parts(parts, Body::from(bytes));
    if !valid {
        warn!(hawk_id = %id, path = %resource, "Invalid hawk signature or payload hash");
        return Ok((request, None));
    }
    Ok((request, Some((id, access))))
}

/// Authentication middleware
///
/// Accepts `Authorization: APIKey <key>` or a Hawk-signed request.
pub async fn auth_middleware(
    State(state): State<SecurityState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let path = request.uri().path().to_string();

    // Skip auth for public paths
    if is_public_path(&path, &state.config.public_paths) {
        return Ok(next.run(request).await);
    }

    // Skip auth if disabled
    if !state.config.enable_auth {
        return Ok(next.run(request).await);
    }

    let authorization = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let (request, identity) = if let Some(hawk) = authorization.strip_prefix(HAWK_SCHEME) {
        verify_hawk(&state, hawk, request).await?
    } else if let Some(key) = authorization.strip_prefix(API_KEY_SCHEME) {
        let identity = state
            .authenticate(key.trim())
            .map(|(name, access)| (name.to_string(), access));
        if identity.is_none() {
            warn!(path = %path, "Invalid API key attempt");
        }
        (request, identity)
    } else {
        warn!(path = %path, "Missing credentials");
        return Err(StatusCode::UNAUTHORIZED);
    };

    match identity {
        Some((name, Access::ReadOnly)) if !is_read_method(request.method()) => {
            warn!(key_name = %name, method = %request.method(), path = %path, "Read-only credential used for write");
            Err(StatusCode::FORBIDDEN)
        }
        Some((name, access)) => {
            debug!(key_name = %name, access = ?access, path = %path, "Request authenticated");
            Ok(next.run(request).await)
        }
        None => Err(StatusCode::UNAUTHORIZED),
    }
}

/// Security headers middleware
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "X-Content-Type-Options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        "Content-Security-Policy",
        HeaderValue::from_static(
            "default-src 'none'; frame-ancestors 'none'; report-uri /__cspreport__",
        ),
    );
    headers.insert(
        "Strict-Transport-Security",
        HeaderValue::from_static("max-age=31536000"),
    );

    response
}

/// Request timing and logging middleware
///
/// Latency is always recorded; log lines only when request logging is on.
pub async fn logging_middleware(
    State(state): State<SecurityState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string());

    let response = next.run(request).await;
    let duration = start.elapsed();
    let status = response.status();

    metrics::record_request(
        method.as_str(),
        route.as_deref().unwrap_or(metrics::UNMATCHED_ROUTE),
        status.as_u16(),
        duration,
    );

    if !state.config.log_requests {
        return response;
    }

    // Log based on status code
    if status.is_server_error() {
        error!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "Request failed"
        );
    } else if status.is_client_error() {
        warn!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "Client error"
        );
    } else {
        info!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "Request completed"
        );
    }

    response
}

/// Request body size validation middleware
pub async fn body_size_middleware(
    State(state): State<SecurityState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(length) = headers
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<usize>().ok())
        && length > state.config.max_request_size
    {
        warn!(
            "Request body too large: {} bytes (max: {})",
            length, state.config.max_request_size
        );
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }

    Ok(next.run(request).await)
}
