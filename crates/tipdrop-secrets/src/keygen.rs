//! Deferred keypair generation.
//!
//! Login paths enqueue a `GenerateKeypair` and return immediately; a single
//! tokio worker drains the queue in order, so at most one generation per
//! source runs at a time and a source never ends up with two keys from
//! racing logins.
//!
//!   login ─► enqueue ─► mpsc (bounded) ─► worker ─► spawn_blocking(generate)

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use tipdrop_core::{SourceId, TipdropError, TipdropResult};
use tipdrop_crypto::KeypairSecret;

use crate::source::SourceCrypto;

/// One pending generation: the identifier tags the key, the secret seals it.
#[derive(Debug, Clone)]
pub struct GenerateKeypair {
    pub id: SourceId,
    pub secret: KeypairSecret,
}

/// Outcome counters, returned by [`KeygenQueue::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeygenStats {
    pub generated: u64,
    /// Source already had a key when its task came up
    pub skipped: u64,
    pub failed: u64,
}

pub struct KeygenQueue {
    tx: mpsc::Sender<GenerateKeypair>,
    worker: JoinHandle<KeygenStats>,
}

impl KeygenQueue {
    /// Start the worker. Must be called inside a tokio runtime.
    pub fn spawn(crypto: Arc<SourceCrypto>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run_worker(crypto, rx));
        Self { tx, worker }
    }

    /// Queue a generation, waiting for channel capacity if the queue is full.
    pub async fn enqueue(&self, task: GenerateKeypair) -> TipdropResult<()> {
        self.tx
            .send(task)
            .await
            .map_err(|_| TipdropError::crypto("keygen worker has stopped"))
    }

    /// Queue a generation without waiting. Fails if the queue is full.
    pub fn try_enqueue(&self, task: GenerateKeypair) -> TipdropResult<()> {
        self.tx.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TipdropError::crypto("keygen queue is full"),
            mpsc::error::TrySendError::Closed(_) => {
                TipdropError::crypto("keygen worker has stopped")
            }
        })
    }

    /// Close the queue, let the worker finish everything already queued, and
    /// return what it did.
    pub async fn shutdown(self) -> TipdropResult<KeygenStats> {
        drop(self.tx);
        self.worker
            .await
            .map_err(|e| anyhow::anyhow!("keygen worker panicked: {e}").into())
    }
}

async fn run_worker(
    crypto: Arc<SourceCrypto>,
    mut rx: mpsc::Receiver<GenerateKeypair>,
) -> KeygenStats {
    info!("keygen worker started");
    let mut stats = KeygenStats::default();

    while let Some(task) = rx.recv().await {
        let source = task.id.short().to_owned();
        let crypto = crypto.clone();
        let result = tokio::task::spawn_blocking(move || generate_if_missing(&crypto, &task)).await;

        match result {
            Ok(Ok(true)) => stats.generated += 1,
            Ok(Ok(false)) => stats.skipped += 1,
            Ok(Err(e)) => {
                stats.failed += 1;
                error!(source = %source, "keypair generation failed: {e}");
            }
            Err(e) => {
                stats.failed += 1;
                error!(source = %source, "keypair generation task aborted: {e}");
            }
        }
    }

    info!(
        generated = stats.generated,
        skipped = stats.skipped,
        failed = stats.failed,
        "keygen worker stopped"
    );
    stats
}

/// Returns `Ok(false)` if the source already has a key.
fn generate_if_missing(crypto: &SourceCrypto, task: &GenerateKeypair) -> TipdropResult<bool> {
    if crypto.lookup_public_key(&task.id)?.is_some() {
        warn!(source = task.id.short(), "keypair already exists, skipping");
        return Ok(false);
    }
    crypto.generate_keypair(&task.id, &task.secret)?;
    Ok(true)
}
