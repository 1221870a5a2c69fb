//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Config backends (ordered URLs)
//!     → backend.rs (parse, liveness flag starts true)
//!     → round_robin.rs (fixed registry + atomic cursor)
//!     → Balancer::next() on every dispatched request
//!
//! Liveness writers:
//!     health monitor (probe result) ──┐
//!     dispatcher (transport failure) ─┴→ mark_up / mark_down
//! ```
//!
//! # Design Decisions
//! - Liveness is an atomic per backend; there is no registry-wide lock
//! - The backend list is immutable after construction
//! - Selection policy is a trait so other algorithms can be plugged in

pub mod backend;
pub mod round_robin;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use backend::{Backend, BalancerError};
pub use round_robin::RoundRobin;

/// Backend selection capability.
pub trait Balancer: Send + Sync + std::fmt::Debug {
    /// Select a live backend, or `None` when every backend is down.
    fn next(&self) -> Option<Arc<Backend>>;

    /// Every backend, live or not.
    fn all(&self) -> &[Arc<Backend>];

    /// Take the backend with this address out of rotation. Unknown addresses are ignored.
    fn mark_down(&self, address: &str);

    /// Put the backend with this address back into rotation. Unknown addresses are ignored.
    fn mark_up(&self, address: &str);
}

/// Available selection policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    #[default]
    RoundRobin,
}

/// Build the balancer for `policy` over `endpoints`.
pub fn build<I, S>(policy: Policy, endpoints: I) -> Result<Arc<dyn Balancer>, BalancerError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    match policy {
        Policy::RoundRobin => Ok(Arc::new(RoundRobin::new(endpoints)?)),
    }
}
