//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (per-client token bucket, keyed by peer IP)
//!     → [selection + forwarding]
//!     → headers.rs (strip hop-by-hop, add X-Forwarded-For)
//! ```
//!
//! # Design Decisions
//! - Reject immediately when a client is out of tokens; no queuing
//! - Buckets are process-local and never persisted

pub mod headers;
pub mod rate_limit;

pub use rate_limit::{BucketSnapshot, LimitConfig, RateLimiter};
