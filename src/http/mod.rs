//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (request id)
//!     → proxy.rs (rate limit → select backend → forward → feedback)
//!     → response.rs (proxy-generated JSON errors)
//!     → Send to client
//! ```

pub mod proxy;
pub mod request;
pub mod response;
pub mod server;

pub use proxy::Dispatcher;
pub use request::X_REQUEST_ID;
pub use response::{DispatchError, ErrorBody};
pub use server::{apply_config_update, AppState, HttpServer};
