//! The cascade state machine, expressed as a pure transition function so the
//! progression is testable independent of any transport.

use crate::retry::ErrorClass;
use crate::strategy::StrategyKind;

/// States of the cascade for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Idle,
    Probing,
    Running(StrategyKind),
    Verifying,
    Committed,
    Failed,
}

/// Events observed by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Terminal sidecar matched plan expectations; nothing to do.
    SkipTerminal,
    /// Probe begins (fresh start or cascade restart after a reset).
    Probe,
    /// Probe finished; first applicable strategy chosen.
    Start(StrategyKind),
    /// The running strategy completed its transfer.
    TransferDone,
    /// The running strategy failed with `class`; `next` is the follow-up
    /// strategy when the cascade continues.
    TransferFailed {
        class: ErrorClass,
        next: Option<StrategyKind>,
    },
    /// Verification passed and the atomic commit landed.
    VerifiedCommitted,
    /// Verification failed; conservative restart at `next` when allowed.
    VerifyFailed { next: Option<StrategyKind> },
}

/// Pure transition: `(state, event) -> state`. Unknown combinations leave
/// the state unchanged (the driver never produces them).
pub fn advance(state: ManagerState, event: Event) -> ManagerState {
    use ManagerState::*;
    match (state, event) {
        (Idle, Event::SkipTerminal) => Committed,
        (Idle, Event::Probe) => Probing,
        (Probing, Event::Start(s)) => Running(s),
        (Running(_), Event::TransferDone) => Verifying,
        (Running(_), Event::TransferFailed { class, next }) => match class {
            ErrorClass::Fatal | ErrorClass::Interrupted => Failed,
            // A validator change resets the partial and re-probes.
            ErrorClass::ValidatorChanged => Probing,
            _ => match next {
                Some(n) => Running(n),
                None => Failed,
            },
        },
        (Verifying, Event::VerifiedCommitted) => Committed,
        (Verifying, Event::VerifyFailed { next }) => match next {
            Some(n) => Running(n),
            None => Failed,
        },
        (s, _) => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ManagerState::*;
    use StrategyKind::*;

    #[test]
    fn happy_path() {
        let mut s = Idle;
        s = advance(s, Event::Probe);
        assert_eq!(s, Probing);
        s = advance(s, Event::Start(S1Dynamic));
        assert_eq!(s, Running(S1Dynamic));
        s = advance(s, Event::TransferDone);
        assert_eq!(s, Verifying);
        s = advance(s, Event::VerifiedCommitted);
        assert_eq!(s, Committed);
    }

    #[test]
    fn terminal_skip() {
        assert_eq!(advance(Idle, Event::SkipTerminal), Committed);
    }

    #[test]
    fn stall_advances_to_next_strategy() {
        let s = advance(
            Running(S1Dynamic),
            Event::TransferFailed {
                class: ErrorClass::Stalled,
                next: Some(S2Sparse),
            },
        );
        assert_eq!(s, Running(S2Sparse));
    }

    #[test]
    fn exhaustion_fails() {
        let s = advance(
            Running(S5TailFirst),
            Event::TransferFailed {
                class: ErrorClass::Retryable,
                next: None,
            },
        );
        assert_eq!(s, Failed);
    }

    #[test]
    fn fatal_short_circuits() {
        let s = advance(
            Running(S1Dynamic),
            Event::TransferFailed {
                class: ErrorClass::Fatal,
                next: Some(S2Sparse),
            },
        );
        assert_eq!(s, Failed);
    }

    #[test]
    fn validator_change_reprobes() {
        let s = advance(
            Running(S2Sparse),
            Event::TransferFailed {
                class: ErrorClass::ValidatorChanged,
                next: Some(S3Curl),
            },
        );
        assert_eq!(s, Probing);
    }

    #[test]
    fn integrity_failure_restarts_conservatively() {
        let s = advance(Verifying, Event::VerifyFailed { next: Some(S4ShortConn) });
        assert_eq!(s, Running(S4ShortConn));
        let s = advance(Verifying, Event::VerifyFailed { next: None });
        assert_eq!(s, Failed);
    }
}
