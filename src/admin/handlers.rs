use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::config::validation::validate_limit;
use crate::http::response::json_error;
use crate::http::server::AppState;
use crate::security::LimitConfig;

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub backends_total: usize,
    pub backends_alive: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackendStatus {
    pub address: String,
    pub alive: bool,
}

/// Payload of `POST /admin/clients`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub client_id: String,
    pub capacity: u32,
    pub rate_per_sec: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClientStatus {
    pub client_id: String,
    pub capacity: u32,
    pub rate_per_sec: u32,
    /// Tokens left in the live bucket, if the client has sent traffic.
    pub tokens: Option<u64>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let backends = state.balancer.all();
    let alive = backends.iter().filter(|b| b.is_alive()).count();
    let status = if alive == backends.len() {
        "operational"
    } else if alive == 0 {
        "unavailable"
    } else {
        "degraded"
    };

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: status.to_string(),
        backends_total: backends.len(),
        backends_alive: alive,
    })
}

pub async fn get_backends(State(state): State<AppState>) -> Json<Vec<BackendStatus>> {
    let statuses = state
        .balancer
        .all()
        .iter()
        .map(|b| BackendStatus {
            address: b.address().to_string(),
            alive: b.is_alive(),
        })
        .collect();

    Json(statuses)
}

pub async fn list_clients(State(state): State<AppState>) -> Json<Vec<ClientStatus>> {
    let clients = state
        .limiter
        .clients()
        .into_iter()
        .map(|(client_id, limit)| ClientStatus {
            tokens: state.limiter.bucket_snapshot(&client_id).map(|b| b.tokens),
            client_id,
            capacity: limit.capacity,
            rate_per_sec: limit.rate_per_sec,
        })
        .collect();

    Json(clients)
}

pub async fn add_client(
    State(state): State<AppState>,
    payload: Result<Json<ClientConfig>, JsonRejection>,
) -> Response {
    let Json(client) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return json_error(StatusCode::BAD_REQUEST, format!("bad request: {}", rejection.body_text()));
        }
    };

    let client_id = client.client_id.trim();
    if client_id.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "bad request: client_id must not be empty");
    }

    let limit = LimitConfig::new(client.capacity, client.rate_per_sec);
    let problems = validate_limit("client", &limit);
    if !problems.is_empty() {
        let message = problems
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        return json_error(StatusCode::BAD_REQUEST, format!("bad request: {}", message));
    }

    state.limiter.set_client(client_id, limit);
    tracing::info!(
        client = %client_id,
        capacity = limit.capacity,
        rate_per_sec = limit.rate_per_sec,
        "Added client config"
    );
    StatusCode::OK.into_response()
}

pub async fn delete_client(State(state): State<AppState>, Path(client_id): Path<String>) -> StatusCode {
    let removed = state.limiter.remove_client(&client_id);
    tracing::info!(client = %client_id, removed, "Deleted client");
    StatusCode::OK
}
