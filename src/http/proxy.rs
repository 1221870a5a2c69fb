//! Per-request dispatch pipeline.
//!
//! ```text
//! peer IP ─→ RateLimiter::allow ──deny──→ 429
//!                 │
//!                 ▼
//!          Balancer::next ──none──→ 503
//!                 │
//!                 ▼
//!      forward (rewrite authority) ──transport error──→ mark_down + 502
//!                 │
//!                 ▼
//!       backend response relayed as-is
//! ```

use std::error::Error as StdError;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderValue, Request, Version};
use axum::response::{IntoResponse, Response};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::http::request::request_id;
use crate::http::response::DispatchError;
use crate::http::server::AppState;
use crate::load_balancer::{Backend, Balancer};
use crate::observability::metrics;
use crate::security::headers::{append_forwarded_for, strip_hop_by_hop};
use crate::security::RateLimiter;

/// Composes admission, selection and forwarding.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    balancer: Arc<dyn Balancer>,
    limiter: Arc<RateLimiter>,
    client: Client<HttpConnector, Body>,
}

impl Dispatcher {
    pub fn new(balancer: Arc<dyn Balancer>, limiter: Arc<RateLimiter>, connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            balancer,
            limiter,
            client,
        }
    }

    /// Run the full pipeline for one request from `peer`.
    pub async fn handle(&self, peer: SocketAddr, request: Request<Body>) -> Response {
        let start = Instant::now();
        let method = request.method().to_string();

        match self.dispatch(peer.ip(), request).await {
            Ok((backend, response)) => {
                metrics::record_request(&method, response.status().as_u16(), backend.address(), start);
                response
            }
            Err(e) => {
                metrics::record_request(&method, e.status().as_u16(), "none", start);
                e.into_response()
            }
        }
    }

    async fn dispatch(
        &self,
        client: IpAddr,
        request: Request<Body>,
    ) -> Result<(Arc<Backend>, Response), DispatchError> {
        let client_id = client.to_string();
        let request_id = request_id(&request);

        if !self.limiter.allow(&client_id) {
            tracing::warn!(request_id = %request_id, client = %client_id, "Rate limit exceeded");
            metrics::record_rate_limited();
            return Err(DispatchError::RateLimited);
        }

        let backend = match self.balancer.next() {
            Some(backend) => backend,
            None => {
                tracing::warn!(request_id = %request_id, client = %client_id, "All backends are down");
                metrics::record_no_backend();
                return Err(DispatchError::NoBackend);
            }
        };

        tracing::debug!(
            request_id = %request_id,
            client = %client_id,
            method = %request.method(),
            path = %request.uri().path(),
            backend = %backend.address(),
            "Proxying request"
        );

        let outbound = outbound_request(&backend, client, request)
            .map_err(|e| DispatchError::BadGateway(e.to_string()))?;

        match self.client.request(outbound).await {
            Ok(response) => {
                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                Ok((backend, Response::from_parts(parts, Body::new(body))))
            }
            Err(e) => {
                let reason = error_chain(&e);
                self.balancer.mark_down(backend.address());
                metrics::record_backend_failure(backend.address());
                tracing::error!(
                    request_id = %request_id,
                    backend = %backend.address(),
                    error = %reason,
                    "Backend request failed, marking down"
                );
                Err(DispatchError::BadGateway(reason))
            }
        }
    }
}

/// Rewrite `request` to target `backend`, keeping method, path, query, headers and body.
fn outbound_request(
    backend: &Backend,
    client: IpAddr,
    request: Request<Body>,
) -> Result<Request<Body>, axum::http::Error> {
    let (mut parts, body) = request.into_parts();

    parts.uri = backend.uri_for(parts.uri.path_and_query())?;
    parts.version = Version::HTTP_11;

    strip_hop_by_hop(&mut parts.headers);
    append_forwarded_for(&mut parts.headers, client);
    parts
        .headers
        .insert(header::HOST, HeaderValue::from_str(backend.authority().as_str())?);

    Ok(Request::from_parts(parts, body))
}

/// Render an error with its sources, e.g. `client error (Connect): tcp connect error: ...`.
fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !text.ends_with(&cause_text) {
            text.push_str(": ");
            text.push_str(&cause_text);
        }
        source = cause.source();
    }
    text
}

/// Catch-all handler: every non-admin request goes through the dispatcher.
pub async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    state.dispatcher.handle(peer, request).await
}
