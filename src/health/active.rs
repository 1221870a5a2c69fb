//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every backend on a fixed interval
//! - Run each probe as its own task so a hanging backend delays only itself
//! - Flip the backend's liveness flag from the probe result

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, Uri};
use axum::http::uri::PathAndQuery;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::validation::parse_health_path;
use crate::config::HealthCheckConfig;
use crate::load_balancer::{Backend, Balancer};
use crate::observability::metrics;

const DEFAULT_HEALTH_PATH: &str = "/healthz";

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    Unhealthy(String),
}

/// Background prober owning the health-check loop.
pub struct HealthMonitor {
    balancer: Arc<dyn Balancer>,
    client: Client<HttpConnector, Body>,
    interval: Duration,
    timeout: Duration,
    path: PathAndQuery,
}

impl HealthMonitor {
    pub fn new(balancer: Arc<dyn Balancer>, config: &HealthCheckConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let path = parse_health_path(&config.path).unwrap_or_else(|| {
            tracing::warn!(
                path = %config.path,
                fallback = DEFAULT_HEALTH_PATH,
                "Invalid health check path, probing the default instead"
            );
            PathAndQuery::from_static(DEFAULT_HEALTH_PATH)
        });

        Self {
            balancer,
            client,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            path,
        }
    }

    /// Override the round interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Override the probe timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Spawn the loop onto the runtime; it stops when `shutdown` fires.
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Probe every backend each interval until `shutdown` fires.
    ///
    /// Probes of a round are not awaited before the next tick, so a slow
    /// backend never holds up the schedule of the others.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval = ?self.interval,
            timeout = ?self.timeout,
            path = %self.path,
            backends = self.balancer.all().len(),
            "Health monitor starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    drop(self.spawn_round());
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Run one round and wait for every probe in it to finish.
    pub async fn check_all(&self) {
        for handle in self.spawn_round() {
            let _ = handle.await;
        }
    }

    fn spawn_round(&self) -> Vec<JoinHandle<()>> {
        self.balancer
            .all()
            .iter()
            .map(|backend| {
                let backend = backend.clone();
                let client = self.client.clone();
                let path = self.path.clone();
                let timeout = self.timeout;
                tokio::spawn(async move {
                    let outcome = probe(&client, &backend, &path, timeout).await;
                    apply(&backend, outcome);
                })
            })
            .collect()
    }
}

/// Issue one GET against `backend`'s health path.
pub async fn probe(
    client: &Client<HttpConnector, Body>,
    backend: &Backend,
    path: &PathAndQuery,
    timeout: Duration,
) -> ProbeOutcome {
    let uri: Uri = match backend.uri_for(Some(path)) {
        Ok(uri) => uri,
        Err(e) => return ProbeOutcome::Unhealthy(format!("invalid probe uri: {}", e)),
    };

    let request = match Request::get(uri)
        .header(header::USER_AGENT, "balancer-proxy-health-check")
        .body(Body::empty())
    {
        Ok(req) => req,
        Err(e) => return ProbeOutcome::Unhealthy(format!("invalid probe request: {}", e)),
    };

    match time::timeout(timeout, client.request(request)).await {
        Ok(Ok(response)) if response.status().is_success() => ProbeOutcome::Healthy,
        Ok(Ok(response)) => ProbeOutcome::Unhealthy(format!("status {}", response.status())),
        Ok(Err(e)) => ProbeOutcome::Unhealthy(format!("connection error: {}", e)),
        Err(_) => ProbeOutcome::Unhealthy(format!("timeout after {:?}", timeout)),
    }
}

fn apply(backend: &Backend, outcome: ProbeOutcome) {
    let alive = outcome == ProbeOutcome::Healthy;
    let was_alive = backend.set_alive(alive);

    match outcome {
        ProbeOutcome::Healthy if !was_alive => {
            tracing::info!(backend = %backend.address(), "Backend recovered");
        }
        ProbeOutcome::Unhealthy(reason) if was_alive => {
            tracing::warn!(backend = %backend.address(), reason = %reason, "Backend down");
        }
        ProbeOutcome::Unhealthy(reason) => {
            tracing::debug!(backend = %backend.address(), reason = %reason, "Backend still down");
        }
        ProbeOutcome::Healthy => {}
    }

    metrics::record_backend_health(backend.address(), alive);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::{self, Policy};

    fn monitor_with_path(path: &str) -> HealthMonitor {
        let balancer = load_balancer::build(Policy::RoundRobin, ["http://127.0.0.1:9001"]).unwrap();
        let config = HealthCheckConfig {
            path: path.to_string(),
            ..HealthCheckConfig::default()
        };
        HealthMonitor::new(balancer, &config)
    }

    #[test]
    fn test_configured_path_is_used() {
        assert_eq!(monitor_with_path("/status?deep=1").path.as_str(), "/status?deep=1");
    }

    #[test]
    fn test_invalid_path_falls_back_to_default() {
        for path in ["healthz", "", "/he alth"] {
            assert_eq!(monitor_with_path(path).path.as_str(), DEFAULT_HEALTH_PATH);
        }
    }
}
