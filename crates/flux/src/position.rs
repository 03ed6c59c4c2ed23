use crate::changeset::{DeltaSet, Remembered};
use crate::error::FluxError;
use crate::pipeline::{Detection, Fetch, Flux, Persist};
use async_trait::async_trait;
use core_types::Position;
use database::PositionStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::error;

/// The handle strategies use to hand updated positions to the pipeline.
#[derive(Debug, Clone)]
pub struct PositionInbox {
    tx: mpsc::UnboundedSender<Position>,
}

impl PositionInbox {
    pub fn submit(&self, position: Position) -> Result<(), FluxError> {
        self.tx.send(position).map_err(|_| FluxError::InboxClosed)
    }
}

/// Drains everything submitted since the previous cycle.
pub struct PositionFetch {
    rx: Mutex<mpsc::UnboundedReceiver<Position>>,
}

/// Creates a connected inbox and fetch capability.
pub fn position_inbox() -> (PositionInbox, PositionFetch) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        PositionInbox { tx },
        PositionFetch { rx: Mutex::new(rx) },
    )
}

#[async_trait]
impl Fetch for PositionFetch {
    type Item = Position;

    // Submitted positions are already the delta.
    const DETECTION: Detection = Detection::Unrecorded;

    async fn fetch_current(&self) -> Result<Vec<Position>, FluxError> {
        let mut rx = self.rx.lock().await;
        let mut drained = Vec::new();
        while let Ok(position) = rx.try_recv() {
            drained.push(position);
        }
        Ok(drained)
    }
}

/// Applies submitted updates to positions that already exist locally.
pub struct PositionPersist {
    store: Arc<dyn PositionStore>,
    dropped: AtomicU64,
}

impl PositionPersist {
    pub fn new(store: Arc<dyn PositionStore>) -> Self {
        Self {
            store,
            dropped: AtomicU64::new(0),
        }
    }

    /// Updates dropped because no stored position had their id.
    pub fn dropped_updates(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Persist for PositionPersist {
    type Item = Position;

    async fn persist(&self, delta: DeltaSet<Position>) -> Result<DeltaSet<Position>, FluxError> {
        let mut stored = DeltaSet::new();
        for update in delta {
            let id = update.position_id;
            let existing = match self.store.find_position(id).await {
                Ok(existing) => existing,
                Err(e) => {
                    error!(position_id = %id, error = %e, "Failed to look up position");
                    continue;
                }
            };
            let Some(existing) = existing else {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                error!(position_id = %id, "Update for unknown position dropped");
                continue;
            };
            match self.store.save_position(&existing.merge_update(&update)).await {
                Ok(saved) => stored.insert(saved),
                Err(e) => error!(position_id = %id, error = %e, "Failed to persist position"),
            }
        }
        Ok(stored)
    }
}

pub type PositionFlux = Flux<PositionFetch, PositionPersist>;

/// Builds the position pipeline and the inbox that feeds it.
pub fn position_flux(store: Arc<dyn PositionStore>) -> (PositionInbox, PositionFlux) {
    let (inbox, fetch) = position_inbox();
    let flux = Flux::new(
        "position",
        fetch,
        PositionPersist::new(store),
        Arc::new(Remembered::new()),
    );
    (inbox, flux)
}
