//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (request ID assigned and propagated)
//!     → security::rate_limit (per-client token bucket, optional)
//!     → handlers.rs (extract proof/params, call RelayOrchestrator)
//!     → response.rs (RelayError → JSON error body)
//!     → Send to client
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestId, X_REQUEST_ID};
pub use response::ApiError;
pub use server::{AppState, HttpServer};
