//! C5 — Header-Sync Pipeline: wires a [`Listener`] to a [`Submitter`] for one
//! direction of one chain pair, runs the produce task and the watch task,
//! and owns fork recovery via `RollbackToCommonAncestor`.
//!
//! Grounded in `examples/original_source/relayer/header_sync.go`
//! (`HeaderSyncHandler.start`, `.watch`, `.RollbackToCommonAncestor`).

use std::{sync::Arc, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    chain::{self, ChainId, Direction},
    error::RelayError,
    listener::Listener,
    submitter::{HeaderRecord, Submitter},
};

pub struct Pipeline {
    chain_id: ChainId,
    direction: Direction,
    listener: Arc<dyn Listener>,
    submitter: Arc<Submitter>,
}

/// The produce task and watch task join handles. The submit loop's handle
/// isn't exposed here: a pipeline moves through one submit-loop
/// "generation" per rollback, and `produce_task` owns and awaits each
/// generation itself (see `Generation` below), so by the time `produce`
/// completes every submit-loop generation it spawned has already exited.
pub struct PipelineHandles {
    pub produce: JoinHandle<()>,
    pub watch: JoinHandle<()>,
}

/// One generation of the submit loop: its inbound channel, the token that
/// discards it without flushing, and its join handle. `produce_task` holds
/// exactly one `Generation` at a time; detecting a reset replaces it with a
/// fresh one rather than trying to drain the old one's buffered headers in
/// place (spec §4.5, `HeaderSyncHandler.start`'s `DRAIN:` loop in
/// `examples/original_source/relayer/header_sync.go`). Rust's `mpsc`
/// channel has a single receiver, owned by the submit-loop task, so the
/// produce task can't reach into it to drop stale entries the way the Go
/// source's single goroutine races itself to drain `ch`; discarding the
/// whole generation gets the same result — nothing describing the
/// abandoned branch ever reaches a commit — without that race.
struct Generation {
    header_tx: mpsc::Sender<HeaderRecord>,
    abandon: CancellationToken,
    handle: JoinHandle<()>,
}

impl Pipeline {
    pub fn new(chain_id: ChainId, direction: Direction, listener: Arc<dyn Listener>, submitter: Arc<Submitter>) -> Self {
        Self { chain_id, direction, listener, submitter }
    }

    /// `HeaderSyncHandler.Start`: resolve the resume height, start the
    /// submitter, then spawn the produce and watch tasks.
    pub async fn start(self: Arc<Self>, cancel: CancellationToken) -> Result<PipelineHandles, RelayError> {
        let start_height = self
            .listener
            .last_header_sync(0)
            .await
            .map_err(RelayError::Transient)?;
        info!(
            chain = %chain::chain_name(self.chain_id),
            direction = %self.direction,
            next_height = start_height + 1,
            "header sync will start",
        );

        let (reset_tx, reset_rx) = mpsc::channel(1);
        let generation = self.spawn_generation(cancel.clone(), reset_tx.clone());

        let produce = tokio::spawn(self.clone().produce_task(start_height, generation, reset_rx, cancel.clone(), reset_tx));
        let watch = tokio::spawn(self.clone().watch_task(cancel));

        Ok(PipelineHandles { produce, watch })
    }

    /// Spawns a fresh submit-loop generation, reusing the same `Submitter`
    /// (and its `last_commit`/verify-cadence state) but a new channel and
    /// `abandon` token.
    fn spawn_generation(&self, cancel: CancellationToken, reset_tx: mpsc::Sender<u64>) -> Generation {
        let abandon = CancellationToken::new();
        let (header_tx, handle) = self.submitter.clone().start_sync(cancel, abandon.clone(), reset_tx);
        Generation { header_tx, abandon, handle }
    }

    async fn produce_task(
        self: Arc<Self>,
        mut height: u64,
        mut generation: Generation,
        mut reset_rx: mpsc::Receiver<u64>,
        cancel: CancellationToken,
        reset_tx: mpsc::Sender<u64>,
    ) {
        let confirms = self.listener.defer();
        let mut latest = 0u64;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            // Single reset hint honored per iteration (spec §4.5); any
            // extra hints queued up behind it are picked up next time
            // around, which is harmless since they only move the rollback
            // target further back.
            if let Ok(reset) = reset_rx.try_recv() {
                if reset != 0 && reset < height {
                    info!(
                        chain = %chain::chain_name(self.chain_id),
                        direction = %self.direction,
                        reset,
                        "detected submit failure reset, discarding current submit generation",
                    );
                    generation.abandon.cancel();
                    let _ = generation.handle.await;
                    height = self.rollback_to_common_ancestor(reset.saturating_sub(1), &cancel).await;
                    generation = self.spawn_generation(cancel.clone(), reset_tx.clone());
                }
            }

            height += 1;
            debug!(chain = %chain::chain_name(self.chain_id), direction = %self.direction, height, "processing block");

            if latest < height + confirms {
                let (observed, ok) = self.listener.wait_till_height(height + confirms, &cancel).await;
                latest = observed;
                if !ok {
                    break;
                }
            }

            match self.listener.header(height).await {
                Ok(encoded) => {
                    let record = HeaderRecord { height, hash: encoded.hash, data: Some(encoded.data) };
                    tokio::select! {
                        res = generation.header_tx.send(record) => {
                            if res.is_err() {
                                break;
                            }
                        }
                        _ = cancel.cancelled() => break,
                    }
                }
                Err(e) => {
                    error!(chain = %chain::chain_name(self.chain_id), height, error = %e, "fetch block header error");
                    height -= 1;
                }
            }
        }

        info!(chain = %chain::chain_name(self.chain_id), direction = %self.direction, height, "header sync pipeline exiting");
        drop(generation.header_tx);
        let _ = generation.handle.await;
    }

    async fn watch_task(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_secs(3));
        let mut last = 0u64;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    match self.listener.latest_height().await {
                        Ok(height) if height > last => {
                            info!(chain = %chain::chain_name(self.chain_id), height, "latest chain height");
                            last = height;
                        }
                        Ok(_) => {}
                        Err(e) => warn!(chain = %chain::chain_name(self.chain_id), error = %e, "watch chain latest height error"),
                    }

                    if chain::supports_rollback(self.chain_id) {
                        match self.submitter.side_chain_height().await {
                            Ok(height) => info!(chain = %chain::chain_name(self.chain_id), height, "latest chain sync height"),
                            Err(e) => warn!(chain = %chain::chain_name(self.chain_id), error = %e, "watch chain sync height error"),
                        }
                    }
                }
            }
        }
    }

    /// `RollbackToCommonAncestor`: walk `target` back until the source
    /// chain's header hash at `target` matches the destination's stored
    /// hash at `target` (spec §4.5). Chains that don't support rollback
    /// (anything but ETH/BSC in the source relayer) just jump straight to
    /// `target`.
    async fn rollback_to_common_ancestor(&self, mut target: u64, cancel: &CancellationToken) -> u64 {
        warn!(chain = %chain::chain_name(self.chain_id), goal = target, "rolling header sync back to common ancestor");
        if !chain::supports_rollback(self.chain_id) {
            return target;
        }

        loop {
            if cancel.is_cancelled() {
                return target;
            }
            let stored = self.submitter.side_chain_header(target).await.unwrap_or_default();
            if stored.is_empty() {
                target = target.saturating_sub(1);
                continue;
            }
            match self.listener.header(target).await {
                Ok(encoded) if encoded.hash == stored => {
                    info!(chain = %chain::chain_name(self.chain_id), height = target, "found common ancestor");
                    return target;
                }
                Ok(_) => target = target.saturating_sub(1),
                Err(e) => {
                    error!(chain = %chain::chain_name(self.chain_id), height = target, error = %e, "rollback to common ancestor error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        header_store::MockHeaderStoreApi,
        listener::DestinationHeight,
        rpc::{EncodedHeader, MockChainRpcApi},
    };
    use anyhow::Result;
    use async_trait::async_trait;
    use ethers::types::H256;

    struct FixedDestination(u64);

    #[async_trait]
    impl DestinationHeight for FixedDestination {
        async fn committed_height(&self) -> Result<u64> {
            Ok(self.0)
        }
    }

    fn header(height: u64) -> EncodedHeader {
        EncodedHeader { data: vec![height as u8], hash: vec![height as u8] }
    }

    #[tokio::test]
    async fn happy_path_single_mode_advances_and_commits() {
        let mut rpc = MockChainRpcApi::new();
        rpc.expect_wait_till_height().returning(|target, _, _| (target, true));
        rpc.expect_header_by_number().returning(|h| Ok(header(h)));
        let listener: Arc<dyn Listener> = Arc::new(crate::listener::ChainListener::new(
            chain::ETH,
            Arc::new(rpc),
            Arc::new(FixedDestination(100)),
            8,
            1,
        ));

        let mut store = MockHeaderStoreApi::new();
        store.expect_stored_hash().returning(|_, _| Ok(vec![]));
        store.expect_submit().returning(|_, _| Ok(H256::zero()));
        let submitter = Arc::new(Submitter::new(Arc::new(store), chain::ETH, 1, 1, 0));

        let pipeline = Arc::new(Pipeline::new(chain::ETH, Direction::PeerToPrimary, listener, submitter.clone()));
        let cancel = CancellationToken::new();
        let handles = pipeline.start(cancel.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(1), handles.produce).await;
        let _ = tokio::time::timeout(Duration::from_secs(1), handles.watch).await;

        assert!(submitter.last_commit() >= 100);
    }
}
