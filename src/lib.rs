//! x402 payment relay library.

pub mod attestation;
pub mod blockchain;
pub mod catalog;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod payments;
pub mod relay;
pub mod resilience;
pub mod security;

pub use config::schema::RelayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use relay::{RelayDeps, RelayOrchestrator};
