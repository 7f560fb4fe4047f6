//! C2 — Header-Store Client: read the destination contract's committed
//! height and stored hashes, and submit new headers.
//!
//! Grounded in `engine/src/eth/ethers_vault.rs` (the `abigen!` + thin
//! wrapper struct pattern) and in `examples/original_source/relayer/top/top.go`
//! (`GetSideChainHeight`, `GetSideChainHeader`, `SubmitHeaders`).

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::{
    contract::abigen,
    middleware::SignerMiddleware,
    providers::{Http, Middleware, Provider},
    signers::{LocalWallet, Signer},
    types::{Address, Bytes, H256},
};
#[cfg(test)]
use mockall::automock;

use crate::{chain::ChainId, error::RelayError};

abigen!(HeaderStoreContract, "abi/header_store.json");
abigen!(BridgeContract, "abi/bridge.json");

/// C2: the destination header-store contract, as seen from one side of a
/// pipeline (spec §4.2, §6).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HeaderStoreApi: Send + Sync {
    /// `getCurrentBlockHeight(srcChain)`.
    async fn committed_height(&self, src_chain: ChainId) -> Result<u64>;

    /// `getBlockBashByHeight(srcChain, height)`. Empty vec means "not
    /// stored" (spec §4.2).
    async fn stored_hash(&self, src_chain: ChainId, height: u64) -> Result<Vec<u8>>;

    /// `syncBlockHeader(header)`, where `header` is the concatenation of
    /// every header in `headers` (the ABI surface exposes a single-header
    /// entry point; batches are submitted as one concatenated blob — see
    /// DESIGN.md). Errors are classified at this boundary via
    /// [`crate::error::classify_revert`] so every caller above switches on
    /// the closed [`RelayError`] set instead of matching revert text.
    async fn submit(&self, src_chain: ChainId, headers: &[Vec<u8>]) -> Result<H256, RelayError>;
}

/// On the T side, the committed height for the T->peer direction is read
/// from a separate "bridge" contract's `GetMaxHeight()` (spec §6).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BridgeApi: Send + Sync {
    async fn max_height(&self) -> Result<u64>;
}

type SignerProvider = SignerMiddleware<Provider<Http>, LocalWallet>;

#[derive(Clone)]
pub struct EvmHeaderStoreClient {
    contract: HeaderStoreContract<SignerProvider>,
    confirmations: usize,
}

impl EvmHeaderStoreClient {
    pub async fn new(
        node_url: &str,
        contract_address: Address,
        wallet: LocalWallet,
        confirmations: usize,
    ) -> Result<Self> {
        let provider =
            Provider::<Http>::try_from(node_url).context("invalid header-store node endpoint")?;
        let chain_id = provider.get_chainid().await.context("fetch chain id")?;
        let signer = SignerMiddleware::new(provider, wallet.with_chain_id(chain_id.as_u64()));
        let contract = HeaderStoreContract::new(contract_address, Arc::new(signer));
        Ok(Self { contract, confirmations })
    }
}

#[async_trait]
impl HeaderStoreApi for EvmHeaderStoreClient {
    async fn committed_height(&self, src_chain: ChainId) -> Result<u64> {
        Ok(self.contract.get_current_block_height(src_chain).call().await.context(
            "getCurrentBlockHeight",
        )?)
    }

    async fn stored_hash(&self, src_chain: ChainId, height: u64) -> Result<Vec<u8>> {
        Ok(self
            .contract
            .get_block_bash_by_height(src_chain, height)
            .call()
            .await
            .context("getBlockBashByHeight")?
            .to_vec())
    }

    async fn submit(&self, _src_chain: ChainId, headers: &[Vec<u8>]) -> Result<H256, RelayError> {
        let combined: Vec<u8> = headers.concat();
        let call = self.contract.sync_block_header(Bytes::from(combined));
        let pending = call
            .send()
            .await
            .map_err(|e| crate::error::classify_revert(&e.to_string()))?;
        let receipt = pending
            .confirmations(self.confirmations)
            .await
            .map_err(|e| RelayError::Transient(anyhow::anyhow!(e.to_string())))?
            .ok_or_else(|| RelayError::Transient(anyhow::anyhow!("transaction dropped")))?;
        Ok(receipt.transaction_hash)
    }
}

#[derive(Clone)]
pub struct EvmBridgeClient {
    contract: BridgeContract<Provider<Http>>,
}

impl EvmBridgeClient {
    pub fn new(node_url: &str, contract_address: Address) -> Result<Self> {
        let provider =
            Provider::<Http>::try_from(node_url).context("invalid bridge node endpoint")?;
        let contract = BridgeContract::new(contract_address, Arc::new(provider));
        Ok(Self { contract })
    }
}

#[async_trait]
impl BridgeApi for EvmBridgeClient {
    async fn max_height(&self) -> Result<u64> {
        Ok(self.contract.get_max_height().call().await.context("GetMaxHeight")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn idempotent_success_when_hash_matches() {
        // The submitter's commit routine (see submitter.rs) treats a
        // matching stored_hash as already-committed success without
        // calling submit — exercised end to end in submitter.rs tests.
        let mut mock = MockHeaderStoreApi::new();
        mock.expect_stored_hash().returning(|_, _| Ok(vec![1, 2, 3]));
        assert_eq!(mock.stored_hash(1, 10).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn submit_error_classification_reaches_caller_typed() {
        let mut mock = MockHeaderStoreApi::new();
        mock.expect_submit().returning(|_, _| Err(RelayError::ForkInconsistent));
        let err = mock.submit(1, &[vec![1]]).await.unwrap_err();
        assert!(matches!(err, RelayError::ForkInconsistent));
    }
}
