//! Round-robin load balancing strategy.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::backend::{Backend, BalancerError};
use crate::load_balancer::Balancer;

/// Round-robin registry over a fixed, ordered set of backends.
///
/// The backend list is never mutated after construction; only each backend's
/// liveness flag and the shared cursor change.
#[derive(Debug)]
pub struct RoundRobin {
    backends: Vec<Arc<Backend>>,
    cursor: AtomicUsize,
}

impl RoundRobin {
    /// Build a registry from endpoint addresses. Every backend starts live.
    pub fn new<I, S>(endpoints: I) -> Result<Self, BalancerError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut backends = Vec::new();

        for endpoint in endpoints {
            let backend = Backend::parse(endpoint.as_ref())?;
            if !seen.insert(backend.address().to_string()) {
                return Err(BalancerError::Duplicate(backend.address().to_string()));
            }
            backends.push(Arc::new(backend));
        }

        if backends.is_empty() {
            return Err(BalancerError::NoBackends);
        }

        Ok(Self {
            backends,
            cursor: AtomicUsize::new(0),
        })
    }

    fn set_alive(&self, address: &str, alive: bool) {
        let address = address.trim_end_matches('/');
        for backend in self.backends.iter().filter(|b| b.address() == address) {
            backend.set_alive(alive);
        }
    }
}

impl Balancer for RoundRobin {
    fn next(&self) -> Option<Arc<Backend>> {
        let len = self.backends.len();
        // The cursor is advanced before indexing, so the first call starts at 1.
        let start = self.cursor.fetch_add(1, Ordering::Relaxed).wrapping_add(1);

        (0..len)
            .map(|i| &self.backends[start.wrapping_add(i) % len])
            .find(|backend| backend.is_alive())
            .cloned()
    }

    fn all(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    fn mark_down(&self, address: &str) {
        self.set_alive(address, false);
    }

    fn mark_up(&self, address: &str) {
        self.set_alive(address, true);
    }
}
