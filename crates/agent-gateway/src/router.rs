//! HTTP surface.
//!
//! - `POST /method/{endpoint}`: signed call, auth carried in `x-*` headers
//! - `GET /health`: liveness plus the registered endpoint names

use crate::domain::envelope::{HEADER_KEY, HEADER_SIGNATURE, HEADER_TARGET, HEADER_TIMESTAMP};
use crate::domain::error::{ErrorBody, ErrorKind, GatewayError, GatewayResult};
use crate::domain::envelope::RequestEnvelope;
use crate::service::Gateway;
use agent_crypto::{AgentAddress, AgentSignature};
use axum::{
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Build the router for `gateway`. Needs `ConnectInfo<SocketAddr>`.
pub fn build_router(gateway: Arc<Gateway>) -> Router {
    let max_body = gateway.config().max_body_size;

    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body));

    Router::new()
        .route("/method/:endpoint", post(handle_method))
        .route("/health", get(health_check))
        .layer(middleware)
        .with_state(gateway)
}

/// HTTP status for a rejection kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::BadSignature | ErrorKind::WrongTarget => StatusCode::UNAUTHORIZED,
        ErrorKind::Blacklisted
        | ErrorKind::NotWhitelisted
        | ErrorKind::IpBlacklisted
        | ErrorKind::NotPermitted => StatusCode::FORBIDDEN,
        ErrorKind::StaleRequest => StatusCode::BAD_REQUEST,
        ErrorKind::UnknownEndpoint => StatusCode::NOT_FOUND,
        ErrorKind::InvalidParams => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::HandlerError => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (status_for(self.kind()), Json(ErrorBody::from(&self))).into_response()
    }
}

async fn handle_method(
    State(gateway): State<Arc<Gateway>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(endpoint): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let envelope = match envelope_from_headers(&headers, endpoint, body) {
        Ok(envelope) => envelope,
        Err(e) => return e.into_response(),
    };

    match gateway.handle(envelope, peer.ip()).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn health_check(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "identity": gateway.identity(),
        "endpoints": gateway.endpoint_names(),
    }))
}

/// Rebuild the signed envelope from the auth headers and the raw body.
pub fn envelope_from_headers(
    headers: &HeaderMap,
    endpoint: String,
    body: Bytes,
) -> GatewayResult<RequestEnvelope> {
    let sender: AgentAddress = header(headers, HEADER_KEY)?
        .parse()
        .map_err(|e| malformed(HEADER_KEY, e))?;
    let target: AgentAddress = header(headers, HEADER_TARGET)?
        .parse()
        .map_err(|e| malformed(HEADER_TARGET, e))?;
    let timestamp = DateTime::parse_from_rfc3339(header(headers, HEADER_TIMESTAMP)?)
        .map_err(|e| malformed(HEADER_TIMESTAMP, e))?
        .with_timezone(&Utc);
    let signature = AgentSignature::from_hex(header(headers, HEADER_SIGNATURE)?)
        .map_err(|e| malformed(HEADER_SIGNATURE, e))?;

    Ok(RequestEnvelope {
        sender,
        target,
        timestamp,
        endpoint,
        payload: body.to_vec(),
        signature,
    })
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> GatewayResult<&'a str> {
    headers
        .get(name)
        .ok_or_else(|| GatewayError::BadSignature(format!("missing header {name}")))?
        .to_str()
        .map_err(|_| GatewayError::BadSignature(format!("non-ascii header {name}")))
}

fn malformed(name: &str, err: impl std::fmt::Display) -> GatewayError {
    GatewayError::BadSignature(format!("malformed header {name}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_crypto::AgentKeypair;
    use axum::http::HeaderValue;

    fn signed_headers() -> (HeaderMap, RequestEnvelope) {
        let caller = AgentKeypair::from_seed([1u8; 32]);
        let server = AgentKeypair::from_seed([2u8; 32]).address();
        let envelope = RequestEnvelope::sign(&caller, server, Utc::now(), "ping", b"{}".to_vec());
        let mut headers = HeaderMap::new();
        for (name, value) in envelope.headers() {
            headers.insert(name, HeaderValue::from_str(&value).unwrap());
        }
        (headers, envelope)
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::BadSignature), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(ErrorKind::IpBlacklisted), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorKind::StaleRequest), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::InvalidParams), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_for(ErrorKind::RateLimited), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for(ErrorKind::Timeout), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_envelope_from_headers() {
        let (headers, expected) = signed_headers();
        let envelope =
            envelope_from_headers(&headers, "ping".into(), Bytes::from_static(b"{}")).unwrap();
        assert_eq!(envelope.sender, expected.sender);
        assert_eq!(envelope.signature, expected.signature);
        assert_eq!(envelope.timestamp.timestamp(), expected.timestamp.timestamp());
        assert_eq!(envelope.canonical_message(), expected.canonical_message());
    }

    #[test]
    fn test_missing_or_malformed_headers_are_bad_signature() {
        let (full, _) = signed_headers();

        for name in [HEADER_KEY, HEADER_TARGET, HEADER_TIMESTAMP, HEADER_SIGNATURE] {
            let mut missing = full.clone();
            missing.remove(name);
            let err = envelope_from_headers(&missing, "ping".into(), Bytes::new()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BadSignature, "missing {name}");

            let mut garbled = full.clone();
            garbled.insert(name, HeaderValue::from_static("zz-not-valid"));
            let err = envelope_from_headers(&garbled, "ping".into(), Bytes::new()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BadSignature, "garbled {name}");
        }
    }
}
