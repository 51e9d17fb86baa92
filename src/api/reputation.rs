//! Reputation API Endpoints
//!
//! Type-qualified routes (`/type/{type}/{value}`) plus the older IPv4-only
//! routes (`/{ip}`), which behave like the `ip` type routes but answer 404 for
//! anything that is not an IPv4 address.

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, put},
};
use regex::Regex;
use std::net::Ipv4Addr;
use std::sync::LazyLock;
use tracing::{info, warn};

use super::AppState;
use crate::reputation::{
    ObjectType, Reputation, ReputationError, TYPE_IP, Violation, ViolationOutcome,
    ViolationRequest,
};

static TYPE_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z]{1,12}$").expect("type segment pattern is valid")
});

type ApiError = (StatusCode, String);

/// Translate a core error into a response, logging only server-side failures
fn error_response(e: ReputationError) -> ApiError {
    match e {
        ReputationError::NotFound => (StatusCode::NOT_FOUND, String::new()),
        e if e.is_client_error() => (StatusCode::BAD_REQUEST, e.to_string()),
        e => {
            warn!(error = %e, "Reputation request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}

fn body_error(rejection: JsonRejection) -> ApiError {
    let status = match rejection.status() {
        StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
        _ => StatusCode::BAD_REQUEST,
    };
    (status, rejection.body_text())
}

fn check_type(object_type: &str) -> Result<(), ApiError> {
    if TYPE_SEGMENT.is_match(object_type) {
        Ok(())
    } else {
        Err((StatusCode::NOT_FOUND, String::new()))
    }
}

fn check_legacy_ip(value: &str) -> Result<(), ApiError> {
    value
        .parse::<Ipv4Addr>()
        .map(|_| ())
        .map_err(|_| (StatusCode::NOT_FOUND, String::new()))
}

fn log_outcomes(outcomes: &[ViolationOutcome]) {
    for outcome in outcomes {
        match outcome {
            ViolationOutcome::Applied {
                violation,
                object,
                object_type,
                original,
                reputation,
                decay_after,
                exception,
            } => info!(
                violation = %violation,
                object = %object,
                object_type = %object_type,
                original = original,
                reputation = reputation,
                decay_after = ?decay_after,
                exception = exception,
                "violation applied"
            ),
            ViolationOutcome::Unknown {
                violation,
                object,
                object_type,
            } => warn!(
                violation = %violation,
                object = %object,
                object_type = %object_type,
                "ignoring unknown violation"
            ),
        }
    }
}

async fn lookup(state: &AppState, object_type: &str, value: &str) -> Result<Json<Reputation>, ApiError> {
    state
        .manager
        .lookup(object_type, value)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn store(
    state: &AppState,
    object_type: &str,
    value: &str,
    mut reputation: Reputation,
) -> Result<StatusCode, ApiError> {
    reputation.object = value.to_string();
    reputation.object_type = object_type.to_string();
    state
        .manager
        .set(&mut reputation)
        .await
        .map_err(error_response)?;
    info!(
        object = %reputation.object,
        object_type = %reputation.object_type,
        reputation = reputation.reputation,
        reviewed = reputation.reviewed,
        "reputation set"
    );
    Ok(StatusCode::OK)
}

async fn remove(state: &AppState, object_type: &str, value: &str) -> Result<StatusCode, ApiError> {
    state
        .manager
        .delete(object_type, value)
        .await
        .map_err(error_response)?;
    info!(object = %value, object_type = %object_type, "reputation deleted");
    Ok(StatusCode::OK)
}

async fn violations(
    state: &AppState,
    object_type: &str,
    requests: Vec<ViolationRequest>,
) -> Result<StatusCode, ApiError> {
    let outcomes = state
        .manager
        .apply_violations(object_type, requests)
        .await
        .map_err(error_response)?;
    log_outcomes(&outcomes);
    Ok(StatusCode::OK)
}

// Service endpoints

/// GET /__heartbeat__ - Store connectivity check
pub async fn heartbeat(State(state): State<AppState>) -> StatusCode {
    match state.manager.ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            warn!(error = %e, "Heartbeat failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// GET /__lbheartbeat__
pub async fn lb_heartbeat() -> StatusCode {
    StatusCode::OK
}

/// GET /__metrics__ - Prometheus text exposition
pub async fn metrics() -> Response {
    match crate::metrics::render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /__version__ - Contents of the configured version file
pub async fn version(State(state): State<AppState>) -> Response {
    let body = match tokio::fs::read(&state.version_path).await {
        Ok(body) => body,
        Err(e) => {
            warn!(path = %state.version_path.display(), error = %e, "Unable to read version file");
            Vec::new()
        }
    };
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

// Typed endpoints

/// GET /type/{type}/{value}
pub async fn get_reputation(
    State(state): State<AppState>,
    Path((object_type, value)): Path<(String, String)>,
) -> Result<Json<Reputation>, ApiError> {
    check_type(&object_type)?;
    lookup(&state, &object_type, &value).await
}

/// PUT /type/{type}/{value}
pub async fn put_reputation(
    State(state): State<AppState>,
    Path((object_type, value)): Path<(String, String)>,
    payload: Result<Json<Reputation>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    check_type(&object_type)?;
    let Json(reputation) = payload.map_err(body_error)?;
    store(&state, &object_type, &value, reputation).await
}

/// DELETE /type/{type}/{value}
pub async fn delete_reputation(
    State(state): State<AppState>,
    Path((object_type, value)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    check_type(&object_type)?;
    remove(&state, &object_type, &value).await
}

/// PUT /violations/type/{type}/{value}
pub async fn put_violation(
    State(state): State<AppState>,
    Path((object_type, value)): Path<(String, String)>,
    payload: Result<Json<ViolationRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    check_type(&object_type)?;
    let Json(mut request) = payload.map_err(body_error)?;
    request.object = value;
    violations(&state, &object_type, vec![request]).await
}

/// PUT /violations/type/{type}
pub async fn put_violations(
    State(state): State<AppState>,
    Path(object_type): Path<String>,
    payload: Result<Json<Vec<ViolationRequest>>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    check_type(&object_type)?;
    ObjectType::parse(&object_type).map_err(error_response)?;
    let Json(requests) = payload.map_err(body_error)?;
    violations(&state, &object_type, requests).await
}

/// GET /violations - Configured violations in order
pub async fn get_violations(State(state): State<AppState>) -> Json<Vec<Violation>> {
    Json(state.manager.violations().to_vec())
}

/// GET /dump - Every stored entry, unprocessed
pub async fn dump(State(state): State<AppState>) -> Result<Json<Vec<Reputation>>, ApiError> {
    state.manager.dump().await.map(Json).map_err(error_response)
}

// Legacy IPv4 endpoints

/// GET /{ip}
pub async fn get_legacy(
    State(state): State<AppState>,
    Path(ip): Path<String>,
) -> Result<Json<Reputation>, ApiError> {
    check_legacy_ip(&ip)?;
    lookup(&state, TYPE_IP, &ip).await
}

/// PUT /{ip}
pub async fn put_legacy(
    State(state): State<AppState>,
    Path(ip): Path<String>,
    payload: Result<Json<Reputation>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    check_legacy_ip(&ip)?;
    let Json(reputation) = payload.map_err(body_error)?;
    store(&state, TYPE_IP, &ip, reputation).await
}

/// DELETE /{ip}
pub async fn delete_legacy(
    State(state): State<AppState>,
    Path(ip): Path<String>,
) -> Result<StatusCode, ApiError> {
    check_legacy_ip(&ip)?;
    remove(&state, TYPE_IP, &ip).await
}

/// PUT /violations/{ip}
pub async fn put_legacy_violation(
    State(state): State<AppState>,
    Path(ip): Path<String>,
    payload: Result<Json<ViolationRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    check_legacy_ip(&ip)?;
    let Json(mut request) = payload.map_err(body_error)?;
    request.object = ip;
    violations(&state, TYPE_IP, vec![request]).await
}

/// PUT /violations - Legacy batch, always type `ip`
pub async fn put_legacy_violations(
    State(state): State<AppState>,
    payload: Result<Json<Vec<ViolationRequest>>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(requests) = payload.map_err(body_error)?;
    violations(&state, TYPE_IP, requests).await
}

/// Create the reputation API router
pub fn create_reputation_router(state: AppState) -> Router {
    Router::new()
        .route("/__heartbeat__", get(heartbeat))
        .route("/__lbheartbeat__", get(lb_heartbeat))
        .route("/__version__", get(version))
        .route("/__metrics__", get(metrics))
        .route(
            "/type/{type}/{value}",
            get(get_reputation)
                .put(put_reputation)
                .delete(delete_reputation),
        )
        .route("/violations/type/{type}/{value}", put(put_violation))
        .route("/violations/type/{type}", put(put_violations))
        .route(
            "/violations",
            get(get_violations).put(put_legacy_violations),
        )
        .route("/violations/{ip}", put(put_legacy_violation))
        .route("/dump", get(dump))
        .route(
            "/{ip}",
            get(get_legacy).put(put_legacy).delete(delete_legacy),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_segment() {
        assert!(check_type("ip").is_ok());
        assert!(check_type("email").is_ok());
        assert!(check_type("abcdefghijkl").is_ok());
        assert!(check_type("abcdefghijklm").is_err());
        assert!(check_type("IP").is_err());
        assert!(check_type("").is_err());
    }

    #[test]
    fn test_legacy_ip_filter() {
        assert!(check_legacy_ip("10.0.0.1").is_ok());
        assert!(check_legacy_ip("2001:db8::1").is_err());
        assert!(check_legacy_ip("dump").is_err());
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(error_response(ReputationError::NotFound).0, StatusCode::NOT_FOUND);
        assert_eq!(
            error_response(ReputationError::InvalidScore(101)).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(ReputationError::InvalidRequest("x".into())).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(ReputationError::CorruptRecord("x".into())).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
