//! Cyclic playback and single-shot preview of remotely stored patterns.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::error::{Result, ValidationError};
use super::grid::{Grid, GridModel};
use super::store::{MemoryBackend, PatternStore};
use super::task::TaskSlot;

pub struct PlaybackController {
    grid: GridModel,
    slot: TaskSlot,
    shown: Arc<watch::Sender<Option<usize>>>,
}

impl PlaybackController {
    pub fn new(grid: GridModel) -> Self {
        let (shown, _rx) = watch::channel(None);
        Self {
            grid,
            slot: TaskSlot::new("playback"),
            shown: Arc::new(shown),
        }
    }

    /// Loop over `grids` forever, showing `grids[0]` immediately and the
    /// next one every `interval`. Replaces any running playback. Stops on
    /// its own only when the grid is cleared.
    pub async fn start(
        &self,
        grids: Vec<Grid>,
        interval: Duration,
    ) -> std::result::Result<(), ValidationError> {
        if grids.is_empty() {
            return Err(ValidationError::EmptySequence);
        }
        if interval.is_zero() {
            return Err(ValidationError::ZeroInterval);
        }

        let len = grids.len();
        let lease = self.grid.display_lease();
        let grid = self.grid.clone();
        let shown = Arc::clone(&self.shown);
        self.slot
            .install(lease, move |lease| {
                playback_loop(grids, interval, grid, shown, lease)
            })
            .await;
        info!(
            patterns = len,
            interval_ms = interval.as_millis() as u64,
            "playback started"
        );
        Ok(())
    }

    /// Idempotent.
    pub async fn stop(&self) {
        if self.slot.stop().await {
            info!("playback stopped");
        }
    }

    pub async fn is_playing(&self) -> bool {
        self.slot.is_running().await
    }

    /// Index of the grid currently on display, `None` when idle.
    pub fn current_index(&self) -> Option<usize> {
        *self.shown.borrow()
    }

    pub fn subscribe_index(&self) -> watch::Receiver<Option<usize>> {
        self.shown.subscribe()
    }

    /// Fetch the full stored sequence and show `grids[index]` once, without
    /// starting the cyclic task.
    pub async fn seek<B: MemoryBackend>(&self, store: &PatternStore<B>, index: usize) -> Result<()> {
        let mut grids = store.recall_all().await?;
        let len = grids.len();
        if index >= len {
            return Err(ValidationError::IndexOutOfRange { index, len }.into());
        }
        self.grid.replace(grids.swap_remove(index));
        info!(index, "previewing stored pattern");
        Ok(())
    }
}

async fn playback_loop(
    grids: Vec<Grid>,
    interval: Duration,
    grid: GridModel,
    shown: Arc<watch::Sender<Option<usize>>>,
    lease: CancellationToken,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut index = 0;

    loop {
        tokio::select! {
            biased;
            _ = lease.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if !grid.display_if_live(&lease, grids[index].clone()) {
            break;
        }
        shown.send_replace(Some(index));
        index = (index + 1) % grids.len();
    }
    shown.send_replace(None);
}
