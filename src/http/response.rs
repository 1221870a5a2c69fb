//! Error responses produced by the proxy itself.
//!
//! Backend responses, including their error statuses, are relayed untouched;
//! only failures detected by the proxy are rendered here as
//! `{"code": <status>, "message": <text>}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JSON body of every proxy-generated error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

/// Build a JSON error response.
pub fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        code: status.as_u16(),
        message: message.into(),
    };
    (status, Json(body)).into_response()
}

/// Ways the dispatch pipeline can end without a backend response.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The client has no tokens left.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Every backend is marked down.
    #[error("No backends available")]
    NoBackend,

    /// Forwarding failed at the transport level.
    #[error("Bad gateway: {0}")]
    BadGateway(String),
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            DispatchError::NoBackend => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::BadGateway(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        json_error(self.status(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;

    async fn body_of(response: Response) -> ErrorBody {
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_rate_limited_body() {
        let response = DispatchError::RateLimited.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        assert_eq!(
            body_of(response).await,
            ErrorBody {
                code: 429,
                message: "Rate limit exceeded".into()
            }
        );
    }

    #[tokio::test]
    async fn test_bad_gateway_carries_reason() {
        let response = DispatchError::BadGateway("connection refused".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_of(response).await;
        assert_eq!(body.code, 502);
        assert_eq!(body.message, "Bad gateway: connection refused");
    }

    #[test]
    fn test_no_backend_status() {
        assert_eq!(DispatchError::NoBackend.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(DispatchError::NoBackend.to_string(), "No backends available");
    }
}
