//! Relay orchestration: one request's path from challenge to attestation.

pub mod error;
pub mod orchestrator;
pub mod state;
pub mod store;

pub use error::{RelayError, RelayResult};
pub use orchestrator::{AccessOutcome, ContentView, DeliveredContent, GrantedAccess, RelayDeps, RelayOrchestrator};
pub use state::{PhaseTracker, RelayPhase};
pub use store::{AttestationStore, IssuedAttestation};
