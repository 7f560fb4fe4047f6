//! Typed error classification for the header-store client boundary.
//!
//! The source relayer matches on substrings of the contract revert reason
//! to decide whether a failed submission signals a fork (and therefore a
//! rollback) or is merely transient. That's fragile (REDESIGN FLAG, spec
//! §9): here the substring match happens exactly once, in
//! [`classify_revert`], and everything above the header-store client
//! boundary switches on the closed [`RelayError`] enum instead.

use thiserror::Error;

/// Revert-reason substrings that indicate the destination contract
/// detected a fork or other header inconsistency (spec §4.2).
const FORK_CLASS_SUBSTRINGS: &[&str] = &[
    "parent header not exist",
    "missing required field",
    "parent block failed",
    "span not correct",
    "VerifySpan err",
];

#[derive(Error, Debug)]
pub enum RelayError {
    /// Network/node error; retried by the caller.
    #[error("transient RPC error: {0}")]
    Transient(#[source] anyhow::Error),

    /// Destination contract rejected the submission as fork/inconsistent
    /// (`ERR_HEADER_INCONSISTENT` in spec §7).
    #[error("header inconsistent (fork-class rejection)")]
    ForkInconsistent,

    /// Post-commit verification showed the committed height did not
    /// advance (`ERR_HEADER_MISSING` in spec §7).
    #[error("header missing after commit")]
    Missing,

    /// 30 consecutive transient failures (`ERR_HEADER_SUBMIT_FAILURE`).
    #[error("submit failed after {0} attempts")]
    SubmitFailure(u32),

    /// Config or boot-time error. Never raised during steady-state.
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Classify a contract revert reason string into the closed error set.
/// Anything not in [`FORK_CLASS_SUBSTRINGS`] is transient.
pub fn classify_revert(reason: &str) -> RelayError {
    if FORK_CLASS_SUBSTRINGS.iter().any(|s| reason.contains(s)) {
        RelayError::ForkInconsistent
    } else {
        RelayError::Transient(anyhow::anyhow!(reason.to_string()))
    }
}

impl RelayError {
    /// Submitter errors of these three kinds produce a reset hint; the
    /// pipeline owns the rollback (spec §7 propagation policy). `Fatal`
    /// never reaches here in steady-state and is not a rollback trigger.
    pub fn triggers_rollback(&self) -> bool {
        matches!(self, RelayError::ForkInconsistent | RelayError::Missing | RelayError::SubmitFailure(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_substrings_classify_as_inconsistent() {
        for s in FORK_CLASS_SUBSTRINGS {
            assert!(matches!(classify_revert(s), RelayError::ForkInconsistent));
        }
    }

    #[test]
    fn other_reasons_classify_as_transient() {
        assert!(matches!(classify_revert("execution reverted: nonce too low"), RelayError::Transient(_)));
    }

    #[test]
    fn rollback_trigger_set() {
        assert!(RelayError::ForkInconsistent.triggers_rollback());
        assert!(RelayError::Missing.triggers_rollback());
        assert!(RelayError::SubmitFailure(30).triggers_rollback());
        assert!(!RelayError::Fatal("x".into()).triggers_rollback());
        assert!(!RelayError::Transient(anyhow::anyhow!("x")).triggers_rollback());
    }
}
