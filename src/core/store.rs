//! Client-side proxy for the remote associative memory.
//!
//! `PatternStore` mirrors the remote pattern count as a `PatternIndex` and
//! guards `memorize` with a capacity-1 semaphore: while one submission is
//! pending, further submissions are dropped rather than queued.

use std::future::Future;
use std::ops::Range;
use std::sync::Arc;

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info};

use super::error::Result;
use super::grid::{Grid, GridModel};

/// The remote memory service. Implementations perform exactly one remote
/// call per method and never touch local state.
pub trait MemoryBackend: Send + Sync + 'static {
    /// Store `grid` as a new pattern; returns the service's message.
    fn memorize(&self, grid: &Grid) -> impl Future<Output = Result<String>> + Send;

    /// Relax `probe`; returns the resolved grid and its energy.
    fn recall(&self, probe: &Grid) -> impl Future<Output = Result<(Grid, f64)>> + Send;

    /// Every stored pattern, in storage order.
    fn recall_all(&self) -> impl Future<Output = Result<Vec<Grid>>> + Send;

    /// Erase all stored patterns; returns the service's message.
    fn clear(&self) -> impl Future<Output = Result<String>> + Send;

    fn pattern_count(&self) -> impl Future<Output = Result<usize>> + Send;
}

/// Zero-based, contiguous indices of the remotely stored patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PatternIndex {
    count: usize,
}

impl PatternIndex {
    pub fn new(count: usize) -> Self {
        Self { count }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn last(&self) -> Option<usize> {
        self.count.checked_sub(1)
    }

    pub fn iter(&self) -> Range<usize> {
        0..self.count
    }
}

/// Outcome of a memorize attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Stored,
    /// Another memorize was still pending; nothing was sent.
    Dropped,
}

/// Exclusive right to issue one memorize call.
pub struct MemorizeTicket {
    _permit: OwnedSemaphorePermit,
}

pub struct PatternStore<B> {
    backend: B,
    grid: GridModel,
    index: watch::Sender<PatternIndex>,
    in_flight: Arc<Semaphore>,
}

impl<B: MemoryBackend> PatternStore<B> {
    pub fn new(backend: B, grid: GridModel) -> Self {
        let (index, _rx) = watch::channel(PatternIndex::default());
        Self {
            backend,
            grid,
            index,
            in_flight: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn index(&self) -> PatternIndex {
        *self.index.borrow()
    }

    pub fn subscribe_index(&self) -> watch::Receiver<PatternIndex> {
        self.index.subscribe()
    }

    pub fn is_memorizing(&self) -> bool {
        self.in_flight.available_permits() == 0
    }

    /// Claim the single memorize slot, or `None` if a call is pending.
    pub fn try_ticket(&self) -> Option<MemorizeTicket> {
        Arc::clone(&self.in_flight)
            .try_acquire_owned()
            .ok()
            .map(|permit| MemorizeTicket { _permit: permit })
    }

    /// Submit `grid`; dropped when another submission is pending.
    pub async fn memorize(&self, grid: &Grid) -> Result<Submission> {
        match self.try_ticket() {
            Some(ticket) => self.memorize_with(ticket, grid).await,
            None => {
                debug!("memorize dropped: previous submission still pending");
                Ok(Submission::Dropped)
            }
        }
    }

    /// Submit under an already claimed ticket. The slot stays held until the
    /// pattern count has been refreshed.
    pub async fn memorize_with(&self, ticket: MemorizeTicket, grid: &Grid) -> Result<Submission> {
        let message = self.backend.memorize(grid).await.map_err(|e| {
            error!("Error memorizing pattern: {}", e);
            e
        })?;
        info!("{}", message);

        // The pattern is stored even if the count cannot be refreshed.
        let _ = self.refresh_count().await;
        drop(ticket);
        Ok(Submission::Stored)
    }

    /// Probe with `grid`; on success grid and energy are replaced together.
    pub async fn recall(&self, grid: &Grid) -> Result<f64> {
        let (resolved, energy) = self.backend.recall(grid).await.map_err(|e| {
            error!("Error recalling pattern: {}", e);
            e
        })?;
        self.grid.replace_with_energy(resolved, energy);
        info!(energy, "pattern recalled");
        Ok(energy)
    }

    pub async fn recall_all(&self) -> Result<Vec<Grid>> {
        let grids = self.backend.recall_all().await.map_err(|e| {
            error!("Error during recallAll: {}", e);
            e
        })?;
        debug!(count = grids.len(), "retrieved stored grids");
        Ok(grids)
    }

    /// Erase the remote memory, then empty the index and blank the grid.
    pub async fn clear(&self) -> Result<()> {
        let message = self.backend.clear().await.map_err(|e| {
            error!("Error clearing memory: {}", e);
            e
        })?;
        info!("{}", message);
        self.index.send_replace(PatternIndex::default());
        self.grid.clear();
        Ok(())
    }

    /// Fetch the remote count and rebuild the index as `[0, count)`.
    pub async fn refresh_count(&self) -> Result<PatternIndex> {
        let count = self.backend.pattern_count().await.map_err(|e| {
            error!("Error fetching patterns: {}", e);
            e
        })?;
        let index = PatternIndex::new(count);
        self.index.send_replace(index);
        Ok(index)
    }
}
