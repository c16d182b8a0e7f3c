//! HTTP error responses.
//!
//! Every pipeline error maps to a status and a stable `error_code`; the
//! body never carries upstream endpoints or credentials. The code is
//! duplicated into a response header so operators can see it without
//! parsing bodies.

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::GatewayError;

pub const HEADER_ERROR_CODE: &str = "x-gateway-error-code";

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    #[serde(rename = "type")]
    error_type: &'static str,
    code: &'static str,
    message: String,
    request_id: &'a str,
}

pub fn status_for(error: &GatewayError) -> StatusCode {
    match error {
        GatewayError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        GatewayError::NoRoute { .. } | GatewayError::NoHealthyWorker { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        GatewayError::Auth { .. } => StatusCode::UNAUTHORIZED,
        GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        GatewayError::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
        GatewayError::Upstream { .. }
        | GatewayError::UpstreamFatal { .. }
        | GatewayError::PartialResponse { .. } => StatusCode::BAD_GATEWAY,
        GatewayError::Transform { .. } | GatewayError::Internal { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Render a pipeline error as the client-visible response.
pub fn error_response(error: &GatewayError, request_id: &str) -> Response {
    let status = status_for(error);
    let code = error.kind_code();

    let mut headers = HeaderMap::with_capacity(1);
    if let Ok(value) = HeaderValue::from_str(code) {
        headers.insert(HEADER_ERROR_CODE, value);
    }

    (
        status,
        headers,
        Json(ErrorBody {
            error: ErrorDetail {
                error_type: status.canonical_reason().unwrap_or("Unknown Status Code"),
                code,
                message: error.to_string(),
                request_id,
            },
        }),
    )
        .into_response()
}

pub fn bad_request(message: impl Into<String>, request_id: &str) -> Response {
    error_response(&GatewayError::bad_request(message), request_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            status_for(&GatewayError::bad_request("x")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&GatewayError::NoHealthyWorker {
                message: "m".into()
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&GatewayError::NoRoute {
                category: "reasoning".into()
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&GatewayError::RateLimited {
                worker_id: "p:0".into(),
                retry_after_secs: None,
                message: "m".into()
            }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_for(&GatewayError::Timeout {
                stage: "call".into()
            }),
            StatusCode::REQUEST_TIMEOUT
        );
    }

    #[test]
    fn error_code_header_present() {
        let response = error_response(
            &GatewayError::NoHealthyWorker {
                message: "all cooling down".into(),
            },
            "req_1",
        );
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response
                .headers()
                .get(HEADER_ERROR_CODE)
                .and_then(|v| v.to_str().ok()),
            Some("NoHealthyWorker")
        );
    }
}
