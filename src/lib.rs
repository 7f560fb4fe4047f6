//! Cross-chain header-synchronization relay between a primary chain and
//! EVM-compatible peer chains. See `SPEC_FULL.md` for the full design.

pub mod chain;
pub mod error;
pub mod header_store;
pub mod listener;
pub mod pipeline;
pub mod rpc;
pub mod settings;
pub mod submitter;
pub mod supervisor;
pub mod wallet;
