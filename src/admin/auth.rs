use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::http::response::json_error;

/// Require `Authorization: Bearer <key>` when an admin key is configured.
pub async fn admin_auth_middleware(
    State(api_key): State<Option<Arc<str>>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = api_key else {
        return next.run(request).await;
    };

    let authorized = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == &*expected);

    if authorized {
        next.run(request).await
    } else {
        tracing::warn!(path = %request.uri().path(), "Rejected unauthenticated admin request");
        json_error(StatusCode::UNAUTHORIZED, "Unauthorized")
    }
}
