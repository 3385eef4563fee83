//! Request logging middleware
//!
//! Every request runs inside an `http_request` span keyed by a request id.
//! The id is taken from an incoming `x-request-id` header when the caller
//! supplies one and echoed back on the response.

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use std::time::{Duration, Instant};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

static REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Pre-stream work slower than this is flagged
const SLOW_REQUEST: Duration = Duration::from_secs(5);

pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let request_id = request_id(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client = client_ip(request.headers()).unwrap_or_else(|| "unknown".to_string());

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    async move {
        info!("{} {} from {}", method, path, client);

        let mut response = next.run(request).await;
        let status = response.status();
        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;

        match status {
            StatusCode::UNAUTHORIZED => warn!("Rejected credential on {} ({:.2}ms)", path, elapsed_ms),
            StatusCode::FORBIDDEN => warn!("Not entitled: {} ({:.2}ms)", path, elapsed_ms),
            s if s.is_client_error() || s.is_server_error() => {
                warn!("Request failed: {} ({:.2}ms)", s, elapsed_ms)
            }
            s => info!("Request completed: {} ({:.2}ms)", s, elapsed_ms),
        }

        // event streams return here once headers are ready
        if elapsed > SLOW_REQUEST {
            warn!("Slow request: {} {} took {:.2}s", method, path, elapsed.as_secs_f64());
        }

        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID.clone(), value);
        }
        response
    }
    .instrument(span)
    .await
}

/// Caller-supplied id when usable, otherwise a fresh v4 uuid
fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(&REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// First usable address from the usual forwarding headers
fn client_ip(headers: &HeaderMap) -> Option<String> {
    ["x-forwarded-for", "x-real-ip", "cf-connecting-ip"]
        .iter()
        .filter_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
        .filter_map(|value| value.split(',').next().map(str::trim))
        .find(|ip| !ip.is_empty() && *ip != "unknown")
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip() {
        let mut headers = HeaderMap::new();

        headers.insert("x-forwarded-for", "192.168.1.1, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers), Some("192.168.1.1".to_string()));

        headers.clear();
        headers.insert("x-forwarded-for", "unknown".parse().unwrap());
        headers.insert("x-real-ip", "192.168.1.2".parse().unwrap());
        assert_eq!(client_ip(&headers), Some("192.168.1.2".to_string()));

        headers.clear();
        assert_eq!(client_ip(&headers), None);
    }

    #[test]
    fn test_request_id_prefers_caller_value() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", "abc-123".parse().unwrap());
        assert_eq!(request_id(&headers), "abc-123");

        headers.insert("x-request-id", "   ".parse().unwrap());
        let generated = request_id(&headers);
        assert!(Uuid::parse_str(&generated).is_ok());
    }
}
