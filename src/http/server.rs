//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the registry, limiter and dispatcher from configuration
//! - Create the Axum router (catch-all proxy + admin routes)
//! - Wire up middleware (request id, tracing)
//! - Own the health monitor and the config reload loop
//! - Serve until the shutdown broadcast fires

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::any, Router};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::admin;
use crate::config::ProxyConfig;
use crate::health::HealthMonitor;
use crate::http::proxy::{proxy_handler, Dispatcher};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::lifecycle::shutdown::wait as wait_for_shutdown;
use crate::load_balancer::{self, Balancer, BalancerError};
use crate::security::RateLimiter;

const BUCKET_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub balancer: Arc<dyn Balancer>,
    pub limiter: Arc<RateLimiter>,
}

/// HTTP server for the proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Result<Self, BalancerError> {
        let balancer = load_balancer::build(config.policy, config.backend_urls())?;
        let limiter = Arc::new(RateLimiter::new(
            config.clients.iter().map(|(id, limit)| (id.clone(), *limit)),
            config.rate_limit.default,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            balancer.clone(),
            limiter.clone(),
            Duration::from_secs(config.timeouts.connect_secs),
        ));

        let state = AppState {
            dispatcher,
            balancer,
            limiter,
        };

        let router = Self::build_router(&config, state.clone());
        Ok(Self {
            router,
            config,
            state,
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let mut router = Router::new()
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler));

        if config.admin.enabled {
            router = router.merge(admin::setup_admin_router(config.admin.api_key.clone()));
        }

        router.with_state(state).layer(
            ServiceBuilder::new()
                .layer(set_request_id_layer())
                .layer(TraceLayer::new_for_http())
                .layer(propagate_request_id_layer()),
        )
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            backends = self.state.balancer.all().len(),
            "HTTP server starting"
        );

        let health = if self.config.health_check.enabled {
            let monitor = HealthMonitor::new(self.state.balancer.clone(), &self.config.health_check);
            Some(monitor.spawn(shutdown.resubscribe()))
        } else {
            tracing::info!("Active health checks disabled");
            None
        };

        let reloader = tokio::spawn(reload_loop(
            self.state.limiter.clone(),
            self.config.clone(),
            config_updates,
            shutdown.resubscribe(),
        ));

        let sweeper = tokio::spawn(sweep_loop(
            self.state.limiter.clone(),
            BUCKET_SWEEP_INTERVAL,
            shutdown.resubscribe(),
        ));

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(wait_for_shutdown(shutdown))
            .await?;

        if let Some(health) = health {
            let _ = health.await;
        }
        let _ = reloader.await;
        let _ = sweeper.await;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// The router, for serving without `run`.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn balancer(&self) -> Arc<dyn Balancer> {
        self.state.balancer.clone()
    }

    pub fn limiter(&self) -> Arc<RateLimiter> {
        self.state.limiter.clone()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

async fn reload_loop(
    limiter: Arc<RateLimiter>,
    mut current: ProxyConfig,
    mut updates: mpsc::UnboundedReceiver<ProxyConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(next) => {
                    apply_config_update(&limiter, &current, &next);
                    current = next;
                }
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
}

async fn sweep_loop(limiter: Arc<RateLimiter>, every: Duration, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let evicted = limiter.evict_idle();
                if evicted > 0 {
                    tracing::debug!(evicted, remaining = limiter.bucket_count(), "Evicted idle rate limit buckets");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

/// Apply the reloadable parts of `next` (rate limits) on top of `current`.
///
/// Clients that disappeared from the file are removed; clients added through
/// the admin API and never present in the file are left alone.
pub fn apply_config_update(limiter: &RateLimiter, current: &ProxyConfig, next: &ProxyConfig) {
    if current.rate_limit.default != next.rate_limit.default {
        tracing::info!(
            capacity = next.rate_limit.default.capacity,
            rate_per_sec = next.rate_limit.default.rate_per_sec,
            "Default rate limit updated"
        );
        limiter.set_default(next.rate_limit.default);
    }

    for (client, limit) in &next.clients {
        if current.clients.get(client) != Some(limit) {
            tracing::info!(client = %client, capacity = limit.capacity, rate_per_sec = limit.rate_per_sec, "Client rate limit updated");
            limiter.set_client(client.clone(), *limit);
        }
    }

    for client in current.clients.keys().filter(|c| !next.clients.contains_key(*c)) {
        tracing::info!(client = %client, "Client removed from config");
        limiter.remove_client(client);
    }

    if current.backends != next.backends
        || current.policy != next.policy
        || current.listener != next.listener
        || current.health_check != next.health_check
    {
        tracing::warn!("Backend, listener or health check changes require a restart; ignoring them");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use crate::security::LimitConfig;

    fn config() -> ProxyConfig {
        let mut config = ProxyConfig {
            backends: vec![BackendConfig::from("http://127.0.0.1:9001")],
            ..ProxyConfig::default()
        };
        config.clients.insert("a".into(), LimitConfig::new(1, 1));
        config.clients.insert("b".into(), LimitConfig::new(2, 2));
        config
    }

    #[test]
    fn test_new_rejects_bad_backends() {
        let config = ProxyConfig::default();
        assert!(matches!(HttpServer::new(config), Err(BalancerError::NoBackends)));
    }

    #[test]
    fn test_apply_config_update_diffs_clients() {
        let current = config();
        let server = HttpServer::new(current.clone()).unwrap();
        let limiter = server.limiter();
        limiter.set_client("admin-added", LimitConfig::new(9, 9));

        let mut next = current.clone();
        next.clients.remove("a");
        next.clients.insert("b".into(), LimitConfig::new(20, 20));
        next.clients.insert("c".into(), LimitConfig::new(3, 3));
        next.rate_limit.default = LimitConfig::new(7, 7);

        apply_config_update(&limiter, &current, &next);

        let clients: Vec<_> = limiter.clients();
        assert_eq!(
            clients,
            vec![
                ("admin-added".to_string(), LimitConfig::new(9, 9)),
                ("b".to_string(), LimitConfig::new(20, 20)),
                ("c".to_string(), LimitConfig::new(3, 3)),
            ]
        );
        assert_eq!(limiter.default_config(), LimitConfig::new(7, 7));
    }

    #[tokio::test]
    async fn test_reload_loop_exits_on_shutdown() {
        let shutdown = crate::lifecycle::Shutdown::new();
        let (_tx, rx) = mpsc::unbounded_channel();
        let server = HttpServer::new(config()).unwrap();
        let task = tokio::spawn(reload_loop(server.limiter(), config(), rx, shutdown.subscribe()));

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_sweep_loop_evicts_refilled_buckets() {
        let shutdown = crate::lifecycle::Shutdown::new();
        let server = HttpServer::new(config()).unwrap();
        let limiter = server.limiter();
        assert!(limiter.allow("10.0.0.1"));
        assert_eq!(limiter.bucket_count(), 1);

        let task = tokio::spawn(sweep_loop(
            limiter.clone(),
            Duration::from_millis(50),
            shutdown.subscribe(),
        ));

        // Default rate refills the single spent token within a second.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        while limiter.bucket_count() > 0 {
            assert!(tokio::time::Instant::now() < deadline, "bucket never evicted");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }
}
