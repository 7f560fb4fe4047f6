//! C4 — Submitter: consume headers from the bounded channel, batch-commit
//! them to the destination header-store contract with retries, and signal
//! rollback hints on failure.
//!
//! Grounded in `examples/original_source/relayer/top/top.go`:
//! `syncHeaderLoop`/`syncHeaderBatchLoop` (the two commit loops),
//! `SubmitHeadersWithLoop`/`submitHeadersWithLoop` (the commit routine).

use std::{
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{chain::ChainId, error::RelayError, header_store::HeaderStoreApi};

/// One record on `headerChan`: a header ready to be committed, or (when
/// `data` is `None`) a bare height-verification marker (spec §3).
#[derive(Debug, Clone)]
pub struct HeaderRecord {
    pub height: u64,
    pub hash: Vec<u8>,
    pub data: Option<Vec<u8>>,
}

pub struct Submitter {
    store: Arc<dyn HeaderStoreApi>,
    src_chain: ChainId,
    batch: usize,
    timeout: Duration,
    buffer: usize,
    last_commit: AtomicU64,
    checks_since_verify: AtomicU32,
}

impl Submitter {
    /// Applies the defaulting rules from spec §8: `Batch=0 -> 1`,
    /// `Buffer=0 -> 2*Batch`, `Timeout=0 -> 1s`. Settings::resolve_header_sync
    /// already applies these, but the submitter re-applies them so it's
    /// safe to construct directly in tests too.
    pub fn new(store: Arc<dyn HeaderStoreApi>, src_chain: ChainId, batch: usize, timeout_secs: u64, buffer: usize) -> Self {
        let batch = if batch == 0 { 1 } else { batch };
        let timeout = Duration::from_secs(if timeout_secs == 0 { 1 } else { timeout_secs });
        let buffer = if buffer == 0 { 2 * batch } else { buffer };
        Self {
            store,
            src_chain,
            batch,
            timeout,
            buffer,
            last_commit: AtomicU64::new(0),
            checks_since_verify: AtomicU32::new(0),
        }
    }

    pub fn last_commit(&self) -> u64 {
        self.last_commit.load(Ordering::SeqCst)
    }

    pub async fn side_chain_height(&self) -> anyhow::Result<u64> {
        self.store.committed_height(self.src_chain).await
    }

    pub async fn side_chain_header(&self, height: u64) -> anyhow::Result<Vec<u8>> {
        self.store.stored_hash(self.src_chain, height).await
    }

    /// Spawns one "generation" of the submit loop: a fresh `headerChan` and
    /// a task consuming it. Returns the sender the produce task fills, and
    /// the join handle for the spawned task (spec §4.4 `StartSync`).
    ///
    /// `abandon` is distinct from `cancel`: firing `cancel` means real
    /// shutdown, and the loop flushes whatever's pending before exiting
    /// (spec S6). Firing `abandon` means the pipeline is discarding this
    /// generation after a rollback — the loop drops any pending batch and
    /// returns immediately, without flushing, so headers describing the
    /// abandoned fork branch are never committed. The produce task fires
    /// `abandon` instead of `cancel` on a reset and spawns a fresh
    /// generation for the post-rollback heights (see `Pipeline::produce_task`).
    pub fn start_sync(
        self: Arc<Self>,
        cancel: CancellationToken,
        abandon: CancellationToken,
        reset_tx: mpsc::Sender<u64>,
    ) -> (mpsc::Sender<HeaderRecord>, tokio::task::JoinHandle<()>) {
        let (header_tx, header_rx) = mpsc::channel(self.buffer);
        let batch = self.batch;
        let handle = tokio::spawn(async move {
            if batch == 1 {
                self.single_loop(header_rx, reset_tx, cancel, abandon).await;
            } else {
                self.batch_loop(header_rx, reset_tx, cancel, abandon).await;
            }
            info!("header sync submit loop exiting");
        });
        (header_tx, handle)
    }

    async fn single_loop(
        self: Arc<Self>,
        mut header_rx: mpsc::Receiver<HeaderRecord>,
        reset_tx: mpsc::Sender<u64>,
        cancel: CancellationToken,
        abandon: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = abandon.cancelled() => return,
                maybe = header_rx.recv() => {
                    let Some(record) = maybe else { return };
                    let headers: Vec<Vec<u8>> = record.data.clone().into_iter().collect();
                    let err = self.submit_headers_with_loop(&headers, Some(&record), &cancel).await.err();
                    if err.is_some() {
                        let hint = record.height.saturating_sub(2);
                        let _ = reset_tx.try_send(hint);
                    }
                }
            }
        }
    }

    async fn batch_loop(
        self: Arc<Self>,
        mut header_rx: mpsc::Receiver<HeaderRecord>,
        reset_tx: mpsc::Sender<u64>,
        cancel: CancellationToken,
        abandon: CancellationToken,
    ) {
        let mut headers: Vec<Vec<u8>> = Vec::new();
        let mut reference: Option<HeaderRecord> = None;
        let mut last_seen_height = 0u64;

        'commit: loop {
            let mut commit_now = false;
            tokio::select! {
                _ = cancel.cancelled() => break 'commit,
                _ = abandon.cancelled() => {
                    // Discard whatever's pending: it describes the branch
                    // being rolled back, not committed data (spec §4.5).
                    return;
                }
                maybe = header_rx.recv() => {
                    match maybe {
                        None => {
                            commit_now = !headers.is_empty();
                            if commit_now {
                                self.flush(&mut headers, reference.as_ref(), &reset_tx, last_seen_height, &cancel).await;
                            }
                            break 'commit;
                        }
                        Some(record) => {
                            last_seen_height = record.height;
                            if record.data.is_none() {
                                reference = Some(record);
                                commit_now = true;
                            } else {
                                headers.push(record.data.clone().unwrap());
                                reference = Some(record);
                                commit_now = headers.len() >= self.batch;
                            }
                        }
                    }
                }
                _ = tokio::time::sleep(self.timeout), if !headers.is_empty() => {
                    commit_now = true;
                }
            }
            if commit_now {
                self.flush(&mut headers, reference.as_ref(), &reset_tx, last_seen_height, &cancel).await;
            }
        }

        // Cancellation mid-batch: flush whatever remains (spec S6). Use a
        // fresh, uncancelled token so the final flush's own retry-cap logic
        // (not the outer cancellation) governs whether it gives up. Not
        // reached via `abandon`, which returns before this point.
        if !headers.is_empty() {
            let flush_token = CancellationToken::new();
            self.flush(&mut headers, reference.as_ref(), &reset_tx, last_seen_height, &flush_token).await;
        }
    }

    async fn flush(
        &self,
        headers: &mut Vec<Vec<u8>>,
        reference: Option<&HeaderRecord>,
        reset_tx: &mpsc::Sender<u64>,
        last_seen_height: u64,
        cancel: &CancellationToken,
    ) {
        let batch_len = headers.len() as u64;
        let err = self.submit_headers_with_loop(headers, reference, cancel).await.err();
        headers.clear();
        if err.is_some() {
            let hint = last_seen_height.saturating_sub(batch_len).saturating_sub(2);
            let _ = reset_tx.try_send(hint);
        }
    }

    /// `SubmitHeadersWithLoop`: commits `headers` (when non-empty) then,
    /// every 4th successful commit, re-verifies the destination's
    /// committed height hasn't slipped behind `last_commit` (spec §4.4).
    async fn submit_headers_with_loop(
        &self,
        headers: &[Vec<u8>],
        reference: Option<&HeaderRecord>,
        cancel: &CancellationToken,
    ) -> Result<(), RelayError> {
        let mut result = Ok(());
        if !headers.is_empty() {
            result = self.submit_with_retry(headers, reference, cancel).await;
            if result.is_ok() && reference.is_some() {
                let last_commit = self.last_commit.load(Ordering::SeqCst);
                if last_commit > 0 && self.checks_since_verify.load(Ordering::SeqCst) > 3 {
                    self.checks_since_verify.store(0, Ordering::SeqCst);
                    match self.store.committed_height(self.src_chain).await {
                        Ok(height) if height < last_commit => {
                            error!(chain = %crate::chain::chain_name(self.src_chain), height, last_commit, "commit confirm check failed");
                            result = Err(RelayError::Missing);
                        }
                        Ok(height) => {
                            info!(chain = %crate::chain::chain_name(self.src_chain), height, last_commit, "commit confirm check ok");
                        }
                        Err(e) => warn!(error = %e, "failed to read committed height for confirm check"),
                    }
                } else {
                    self.checks_since_verify.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
        if let (Ok(()), Some(r)) = (&result, reference) {
            self.last_commit.store(r.height, Ordering::SeqCst);
        }
        result
    }

    /// `submitHeadersWithLoop`: idempotent check, then submit with
    /// indefinite retry on transient errors (capped at 30 attempts) and
    /// immediate return on fork-class errors (spec §4.4 steps 1-3).
    async fn submit_with_retry(
        &self,
        headers: &[Vec<u8>],
        reference: Option<&HeaderRecord>,
        cancel: &CancellationToken,
    ) -> Result<(), RelayError> {
        let mut attempt: u32 = 0;
        loop {
            if let Some(r) = reference {
                match self.store.stored_hash(self.src_chain, r.height).await {
                    Ok(hash) if !hash.is_empty() && hash == r.hash => return Ok(()),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "failed to check header existence"),
                }
            }

            attempt += 1;
            match self.store.submit(self.src_chain, headers).await {
                Ok(_) => return Ok(()),
                Err(RelayError::ForkInconsistent) => {
                    warn!(chain = %crate::chain::chain_name(self.src_chain), "possible hard fork, will roll back");
                    return Err(RelayError::ForkInconsistent);
                }
                Err(e) => {
                    error!(chain = %crate::chain::chain_name(self.src_chain), error = %e, attempt, "failed to submit header");
                }
            }

            if cancel.is_cancelled() {
                warn!("header submitter exiting with headers not submitted");
                return Ok(());
            }
            if attempt > 30 {
                error!(attempts = attempt, "header submit too many failed attempts");
                return Err(RelayError::SubmitFailure(attempt));
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(1)) => {},
                _ = cancel.cancelled() => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header_store::MockHeaderStoreApi;
    use ethers::types::H256;

    fn record(height: u64, hash: Vec<u8>, data: Option<Vec<u8>>) -> HeaderRecord {
        HeaderRecord { height, hash, data }
    }

    #[tokio::test]
    async fn single_mode_happy_path_commits_each_header() {
        let mut store = MockHeaderStoreApi::new();
        store.expect_stored_hash().returning(|_, _| Ok(vec![]));
        store.expect_submit().returning(|_, _| Ok(H256::zero()));
        let submitter = Arc::new(Submitter::new(Arc::new(store), chain_test_id(), 1, 1, 0));
        let (reset_tx, mut reset_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let (header_tx, handle) =
            submitter.clone().start_sync(cancel.clone(), CancellationToken::new(), reset_tx);

        for h in 101..=103u64 {
            header_tx.send(record(h, vec![h as u8], Some(vec![h as u8]))).await.unwrap();
        }
        drop(header_tx);
        handle.await.unwrap();

        assert_eq!(submitter.last_commit(), 103);
        assert!(reset_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn batch_mode_flushes_on_full_batch() {
        let mut store = MockHeaderStoreApi::new();
        store.expect_stored_hash().returning(|_, _| Ok(vec![]));
        let submit_calls = Arc::new(AtomicU32::new(0));
        let calls = submit_calls.clone();
        store.expect_submit().returning(move |_, headers| {
            calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(headers.len(), 4);
            Ok(H256::zero())
        });
        let submitter = Arc::new(Submitter::new(Arc::new(store), chain_test_id(), 4, 5, 0));
        let (reset_tx, _reset_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let (header_tx, handle) =
            submitter.clone().start_sync(cancel.clone(), CancellationToken::new(), reset_tx);

        for h in 101..=104u64 {
            header_tx.send(record(h, vec![h as u8], Some(vec![h as u8]))).await.unwrap();
        }
        drop(header_tx);
        handle.await.unwrap();

        assert_eq!(submit_calls.load(Ordering::SeqCst), 1);
        assert_eq!(submitter.last_commit(), 104);
    }

    #[tokio::test]
    async fn fork_class_error_emits_reset_hint() {
        let mut store = MockHeaderStoreApi::new();
        store.expect_stored_hash().returning(|_, _| Ok(vec![]));
        store.expect_submit().returning(|_, _| Err(RelayError::ForkInconsistent));
        let submitter = Arc::new(Submitter::new(Arc::new(store), chain_test_id(), 1, 1, 0));
        let (reset_tx, mut reset_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let (header_tx, handle) =
            submitter.clone().start_sync(cancel.clone(), CancellationToken::new(), reset_tx);

        header_tx.send(record(110, vec![1], Some(vec![1]))).await.unwrap();
        drop(header_tx);
        handle.await.unwrap();

        assert_eq!(reset_rx.try_recv().unwrap(), 108);
    }

    #[tokio::test]
    async fn idempotent_resume_skips_write_path_when_hash_matches() {
        let mut store = MockHeaderStoreApi::new();
        store.expect_stored_hash().returning(|_, _| Ok(vec![7]));
        store.expect_submit().never();
        let submitter = Arc::new(Submitter::new(Arc::new(store), chain_test_id(), 1, 1, 0));
        let (reset_tx, mut reset_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let (header_tx, handle) =
            submitter.clone().start_sync(cancel.clone(), CancellationToken::new(), reset_tx);

        header_tx.send(record(50, vec![7], Some(vec![1]))).await.unwrap();
        drop(header_tx);
        handle.await.unwrap();

        assert_eq!(submitter.last_commit(), 50);
        assert!(reset_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn post_commit_drift_triggers_missing_error_on_fifth_verify() {
        let mut store = MockHeaderStoreApi::new();
        store.expect_stored_hash().returning(|_, _| Ok(vec![]));
        store.expect_submit().returning(|_, _| Ok(H256::zero()));
        // Height reports behind last_commit on every call, which only
        // matters once checks_since_verify > 3 (the 5th successful submit).
        store.expect_committed_height().returning(|_| Ok(10));
        let submitter = Arc::new(Submitter::new(Arc::new(store), chain_test_id(), 1, 1, 0));
        let (reset_tx, mut reset_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let (header_tx, handle) =
            submitter.clone().start_sync(cancel.clone(), CancellationToken::new(), reset_tx);

        for h in 101..=105u64 {
            header_tx.send(record(h, vec![h as u8], Some(vec![h as u8]))).await.unwrap();
        }
        drop(header_tx);
        handle.await.unwrap();

        assert_eq!(reset_rx.try_recv().unwrap(), 103); // 105 - 2
    }

    #[tokio::test]
    async fn abandon_discards_pending_batch_without_flushing() {
        let mut store = MockHeaderStoreApi::new();
        store.expect_stored_hash().returning(|_, _| Ok(vec![]));
        store.expect_submit().never();
        // batch=4 so the two queued headers below never reach the
        // full-batch threshold and stay buffered in `headers` until abandon.
        let submitter = Arc::new(Submitter::new(Arc::new(store), chain_test_id(), 4, 60, 0));
        let (reset_tx, _reset_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let abandon = CancellationToken::new();
        let (header_tx, handle) = submitter.clone().start_sync(cancel, abandon.clone(), reset_tx);

        header_tx.send(record(106, vec![106], Some(vec![106]))).await.unwrap();
        header_tx.send(record(107, vec![107], Some(vec![107]))).await.unwrap();
        // Give the loop a moment to pull both records off the channel and
        // buffer them, then abandon the generation instead of cancelling.
        tokio::time::sleep(Duration::from_millis(20)).await;
        abandon.cancel();
        handle.await.unwrap();

        // `store.expect_submit().never()` already asserts nothing was
        // committed; last_commit stays untouched too.
        assert_eq!(submitter.last_commit(), 0);
    }

    fn chain_test_id() -> ChainId {
        crate::chain::ETH
    }
}
