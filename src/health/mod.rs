//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Fixed-interval timer
//!     → one probe task per backend (GET /healthz, bounded timeout)
//!     → success: mark up / anything else: mark down
//!
//! Passive failure feedback lives in the dispatcher:
//!     transport error while forwarding → mark down immediately
//! ```
//!
//! # Design Decisions
//! - No thresholds, jitter or backoff: one probe decides the flag
//! - Probe failures are never surfaced to clients
//! - The loop is an owned task stopped by the shutdown broadcast

pub mod active;

pub use active::{HealthMonitor, ProbeOutcome};
