//! Chain identity: the closed set of chains this relayer knows about, and
//! the per-chain constants (confirmation depth, submit-wait depth) that
//! drive the listener and submitter.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque 64-bit chain identifier, as carried in config files and on the
/// wire to the header-store contract.
pub type ChainId = u64;

/// The primary chain that anchors headers from every configured peer.
pub const TOP: ChainId = 0;
/// First EVM-compatible peer.
pub const ETH: ChainId = 1;
/// Second EVM-compatible peer.
pub const BSC: ChainId = 2;

/// Direction of one header-sync pipeline. Replaces the Go source's
/// reflection-driven `HeaderSync[0]`/`HeaderSync[1]` array indexing with a
/// closed, named set (REDESIGN FLAG, spec §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// peer -> T
    PeerToPrimary,
    /// T -> peer
    PrimaryToPeer,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::PeerToPrimary => write!(f, "peer->primary"),
            Direction::PrimaryToPeer => write!(f, "primary->peer"),
        }
    }
}

/// Human-readable chain name. Unlisted ids are not an error: they format as
/// `Unknown(<id>)`, matching `base.GetChainName` in the source relayer.
pub fn chain_name(id: ChainId) -> String {
    match id {
        TOP => "Top".to_string(),
        ETH => "Ethereum".to_string(),
        BSC => "Bsc".to_string(),
        other => format!("Unknown({other})"),
    }
}

/// Confirmation depth: how many blocks a header must trail the source
/// chain's head before it is eligible for submission.
pub fn blocks_to_skip(chain: ChainId) -> u64 {
    match chain {
        ETH => 8,
        BSC => 17,
        _ => 1,
    }
}

/// Submit-wait depth: how many confirmations the destination header-store
/// client waits for after sending a transaction.
pub fn blocks_to_wait(chain: ChainId) -> u64 {
    match chain {
        ETH => 12,
        BSC => 21,
        _ => 100_000_000,
    }
}

/// Whether `chain`'s header-sync pipeline supports fork rollback. The
/// primary chain T is assumed final from the peer's point of view in the
/// T->peer direction, so rollback there is a no-op (spec §4.5).
pub fn supports_rollback(chain: ChainId) -> bool {
    matches!(chain, ETH | BSC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_chain_names() {
        assert_eq!(chain_name(TOP), "Top");
        assert_eq!(chain_name(ETH), "Ethereum");
        assert_eq!(chain_name(BSC), "Bsc");
    }

    #[test]
    fn unknown_chain_name_is_formatted_not_an_error() {
        assert_eq!(chain_name(99), "Unknown(99)");
    }

    #[test]
    fn confirmation_and_wait_depths() {
        assert_eq!(blocks_to_skip(ETH), 8);
        assert_eq!(blocks_to_wait(ETH), 12);
        assert_eq!(blocks_to_skip(BSC), 17);
        assert_eq!(blocks_to_wait(BSC), 21);
        assert_eq!(blocks_to_skip(TOP), 1);
        assert_eq!(blocks_to_wait(TOP), 100_000_000);
    }

    #[test]
    fn rollback_support() {
        assert!(supports_rollback(ETH));
        assert!(supports_rollback(BSC));
        assert!(!supports_rollback(TOP));
    }
}
