//! Per-request relay phases.
//!
//! ```text
//! ChallengeIssued → AwaitingPayment → Verifying ─┬─▶ Verified → Forwarding → Attested
//!                                                └─▶ Rejected
//! ```
//!
//! `Verified → Attested` is also legal: forwarding is skipped when it is
//! disabled. Nothing leads back out of `Rejected` or `Attested`.

use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayPhase {
    ChallengeIssued,
    AwaitingPayment,
    Verifying,
    Verified,
    Rejected,
    Forwarding,
    Attested,
}

impl RelayPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayPhase::ChallengeIssued => "challenge_issued",
            RelayPhase::AwaitingPayment => "awaiting_payment",
            RelayPhase::Verifying => "verifying",
            RelayPhase::Verified => "verified",
            RelayPhase::Rejected => "rejected",
            RelayPhase::Forwarding => "forwarding",
            RelayPhase::Attested => "attested",
        }
    }

    pub fn can_transition_to(&self, next: RelayPhase) -> bool {
        use RelayPhase::*;
        matches!(
            (self, next),
            (ChallengeIssued, AwaitingPayment)
                | (AwaitingPayment, Verifying)
                | (Verifying, Verified)
                | (Verifying, Rejected)
                | (Verified, Forwarding)
                | (Verified, Attested)
                | (Forwarding, Attested)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayPhase::Rejected | RelayPhase::Attested)
    }
}

impl fmt::Display for RelayPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: RelayPhase,
    pub to: RelayPhase,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid relay transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

/// Tracks one request through the relay phases and logs each move.
#[derive(Debug)]
pub struct PhaseTracker {
    subject: String,
    phase: RelayPhase,
    started: Instant,
}

impl PhaseTracker {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            phase: RelayPhase::ChallengeIssued,
            started: Instant::now(),
        }
    }

    pub fn phase(&self) -> RelayPhase {
        self.phase
    }

    pub fn advance(&mut self, next: RelayPhase) -> Result<(), InvalidTransition> {
        if !self.phase.can_transition_to(next) {
            tracing::error!(
                subject = %self.subject,
                from = %self.phase,
                to = %next,
                "Rejected relay phase transition"
            );
            return Err(InvalidTransition { from: self.phase, to: next });
        }
        tracing::debug!(
            subject = %self.subject,
            from = %self.phase,
            to = %next,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Relay phase transition"
        );
        self.phase = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut tracker = PhaseTracker::new("tx");
        for phase in [
            RelayPhase::AwaitingPayment,
            RelayPhase::Verifying,
            RelayPhase::Verified,
            RelayPhase::Forwarding,
            RelayPhase::Attested,
        ] {
            tracker.advance(phase).unwrap();
        }
        assert!(tracker.phase().is_terminal());
    }

    #[test]
    fn test_rejected_is_final() {
        let mut tracker = PhaseTracker::new("tx");
        tracker.advance(RelayPhase::AwaitingPayment).unwrap();
        tracker.advance(RelayPhase::Verifying).unwrap();
        tracker.advance(RelayPhase::Rejected).unwrap();

        let err = tracker.advance(RelayPhase::Verified).unwrap_err();
        assert_eq!(err.from, RelayPhase::Rejected);
        assert_eq!(tracker.phase(), RelayPhase::Rejected);
    }

    #[test]
    fn test_forwarding_cannot_reject() {
        assert!(!RelayPhase::Forwarding.can_transition_to(RelayPhase::Rejected));
        assert!(RelayPhase::Verified.can_transition_to(RelayPhase::Attested));
        assert!(!RelayPhase::ChallengeIssued.can_transition_to(RelayPhase::Verified));
    }
}
