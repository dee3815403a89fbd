//! Error handling and JSON error responses for the gateway

use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

/// Error codes for gateway errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorCode {
    /// Upstream could not be reached (connection refused, timeout, DNS failure)
    UpstreamUnreachable,
    /// Upstream sent an unusable reply during an upgrade handshake
    UpstreamProtocol,
    /// Method not supported for static asset paths
    MethodNotAllowed,
    /// The SPA index document could not be read
    IndexUnavailable,
}

impl GatewayErrorCode {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayErrorCode::UpstreamUnreachable => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayErrorCode::UpstreamProtocol => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            GatewayErrorCode::IndexUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The `error` field of the JSON body
    pub fn label(&self) -> &'static str {
        match self {
            GatewayErrorCode::UpstreamUnreachable => "Proxy Error",
            GatewayErrorCode::UpstreamProtocol => "Proxy Error",
            GatewayErrorCode::MethodNotAllowed => "Method Not Allowed",
            GatewayErrorCode::IndexUnavailable => "Internal Error",
        }
    }

    /// Get the error code as a string for the X-Proxy-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            GatewayErrorCode::UpstreamUnreachable => "UPSTREAM_UNREACHABLE",
            GatewayErrorCode::UpstreamProtocol => "UPSTREAM_PROTOCOL",
            GatewayErrorCode::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            GatewayErrorCode::IndexUnavailable => "INDEX_UNAVAILABLE",
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Short error label, e.g. "Proxy Error"
    pub error: &'static str,
    /// Human-readable failure description
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: GatewayErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: code.label(),
            message: message.into(),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"error":"{}","message":"{}"}}"#,
                self.error,
                self.message.replace('\"', "\\\"")
            )
        })
    }
}

/// Create a JSON error response with X-Proxy-Error header
pub fn json_error_response(
    code: GatewayErrorCode,
    message: impl Into<String>,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let body = ErrorBody::new(code, message).to_json();

    Response::builder()
        .status(code.status_code())
        .header("Content-Type", "application/json")
        .header("X-Proxy-Error", code.as_header_value())
        .body(Full::new(Bytes::from(body)).map_err(|e| match e {}).boxed())
        .expect("valid response with StatusCode enum and static headers")
}

/// Strategy invoked when forwarding to the upstream fails.
///
/// The forwarding routines never render a failure response themselves; they
/// hand the cause to this strategy and relay whatever it produces.
pub type UpstreamErrorStrategy =
    Arc<dyn Fn(&dyn std::error::Error) -> Response<BoxBody<Bytes, hyper::Error>> + Send + Sync>;

/// The default strategy: HTTP 500 with a `{"error": "Proxy Error", ...}` body.
pub fn json_upstream_errors() -> UpstreamErrorStrategy {
    Arc::new(|cause: &dyn std::error::Error| {
        json_error_response(GatewayErrorCode::UpstreamUnreachable, cause.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_status_codes() {
        assert_eq!(
            GatewayErrorCode::UpstreamUnreachable.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GatewayErrorCode::UpstreamProtocol.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GatewayErrorCode::MethodNotAllowed.status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            GatewayErrorCode::IndexUnavailable.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_body_json() {
        let body = ErrorBody::new(
            GatewayErrorCode::UpstreamUnreachable,
            "connection refused (os error 111)",
        );
        let json = body.to_json();

        assert!(json.contains("\"error\":\"Proxy Error\""));
        assert!(json.contains("\"message\":\"connection refused (os error 111)\""));
    }

    #[test]
    fn test_json_error_response() {
        let response = json_error_response(
            GatewayErrorCode::UpstreamUnreachable,
            "connection refused",
        );

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "application/json"
        );
        assert_eq!(
            response.headers().get("X-Proxy-Error").unwrap(),
            "UPSTREAM_UNREACHABLE"
        );
    }

    #[test]
    fn test_default_strategy_wraps_cause() {
        let strategy = json_upstream_errors();
        let cause = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "no route");
        let response = strategy(&cause);

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get("X-Proxy-Error").unwrap(),
            "UPSTREAM_UNREACHABLE"
        );
    }
}
