//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher, health monitor, admin API produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout log stream
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;
