//! Request identification.
//!
//! Every inbound request gets an `X-Request-Id` (kept if the client sent
//! one). It is copied to the backend with the other headers and echoed on the
//! response.

use axum::http::{HeaderName, Request};
use tower_http::request_id::{
    MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Layer that assigns a UUID v4 request id when missing.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid)
}

/// Layer that copies the request id onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(X_REQUEST_ID)
}

/// The id assigned to `request`, or `"unknown"`.
pub fn request_id<B>(request: &Request<B>) -> String {
    request
        .extensions()
        .get::<RequestId>()
        .and_then(|id| id.header_value().to_str().ok())
        .or_else(|| {
            request
                .headers()
                .get(&X_REQUEST_ID)
                .and_then(|v| v.to_str().ok())
        })
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_request_id_from_header() {
        let request = Request::builder()
            .header("x-request-id", "abc-123")
            .body(Body::empty())
            .unwrap();
        assert_eq!(request_id(&request), "abc-123");
    }

    #[test]
    fn test_request_id_missing() {
        let request = Request::new(Body::empty());
        assert_eq!(request_id(&request), "unknown");
    }

    #[tokio::test]
    async fn test_generated_request_id_is_uuid_v4() {
        use axum::response::Response;
        use std::convert::Infallible;
        use tower::{service_fn, ServiceBuilder, ServiceExt};

        let svc = ServiceBuilder::new()
            .layer(set_request_id_layer())
            .service(service_fn(|req: Request<Body>| async move {
                Ok::<_, Infallible>(Response::new(request_id(&req)))
            }));

        let id = svc.oneshot(Request::new(Body::empty())).await.unwrap().into_body();
        let parsed = uuid::Uuid::parse_str(&id).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
    }
}
