//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Forward attempt fails (retryable):
//!     → ledger records Failed { retryable: true }
//!     → reconciler asks backoff.rs for the next delay
//!     → retry until max_attempts, then leave for an operator
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retries happen out-of-band, never inside a payer's request

pub mod backoff;

pub use backoff::{calculate_backoff, RetryPolicy};
