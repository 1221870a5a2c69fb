//! Administrative API.
//!
//! Thin handlers over the limiter's client map and the registry's liveness
//! view. Mounted under `/admin` on the proxy listener.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(api_key: Option<String>) -> Router<AppState> {
    let api_key: Option<Arc<str>> = api_key.map(Arc::from);

    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/backends", get(get_backends))
        .route("/admin/clients", get(list_clients).post(add_client))
        .route("/admin/clients/{id}", delete(delete_client))
        .route_layer(middleware::from_fn_with_state(api_key, admin_auth_middleware))
}
