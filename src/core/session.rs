//! One user session: the grid plus the store, capture and playback that act
//! on it. All user-facing actions live here.

use std::sync::Arc;

use tracing::{info, warn};

use super::capture::{CapturePipeline, FrameSource};
use super::config::SessionConfig;
use super::error::{Result, ValidationError};
use super::grid::GridModel;
use super::playback::PlaybackController;
use super::render::{cell_at, energy_label};
use super::store::{MemoryBackend, PatternIndex, PatternStore, Submission};

pub struct Session<B: MemoryBackend> {
    config: SessionConfig,
    grid: GridModel,
    store: Arc<PatternStore<B>>,
    capture: CapturePipeline<B>,
    playback: PlaybackController,
}

impl<B: MemoryBackend> Session<B> {
    pub fn new(backend: B, config: SessionConfig) -> Self {
        let config = config.normalized();
        let grid = GridModel::new(config.seed);
        let store = Arc::new(PatternStore::new(backend, grid.clone()));
        let capture = CapturePipeline::new(grid.clone(), Arc::clone(&store));
        let playback = PlaybackController::new(grid.clone());
        Self {
            config,
            grid,
            store,
            capture,
            playback,
        }
    }

    /// Like `new`, then mirror the remote pattern count once. A failed
    /// refresh is logged and leaves the index empty.
    pub async fn open(backend: B, config: SessionConfig) -> Self {
        let session = Self::new(backend, config);
        let _ = session.store.refresh_count().await;
        session
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn grid(&self) -> &GridModel {
        &self.grid
    }

    pub fn store(&self) -> &PatternStore<B> {
        &self.store
    }

    pub fn capture(&self) -> &CapturePipeline<B> {
        &self.capture
    }

    pub fn playback(&self) -> &PlaybackController {
        &self.playback
    }

    pub fn patterns(&self) -> PatternIndex {
        self.store.index()
    }

    pub fn energy_label(&self) -> String {
        energy_label(self.grid.energy())
    }

    // ── Local edits ────────────────────────────────────────────────────────

    pub fn draw(&self, row: usize, col: usize) -> bool {
        self.grid.draw(row, col)
    }

    /// Draw at a pointer position on the cell surface.
    pub fn draw_at(&self, x: f64, y: f64) -> bool {
        match cell_at(x, y) {
            Some((row, col)) => self.grid.draw(row, col),
            None => false,
        }
    }

    pub fn add_noise(&self) {
        self.grid.apply_noise(self.config.noise_probability);
    }

    /// Blank the grid; an active playback is cancelled with it.
    pub fn clear_grid(&self) {
        self.grid.clear();
    }

    pub fn load_grid(&self, rows: &[Vec<i64>]) -> std::result::Result<(), ValidationError> {
        self.grid.load_from(rows)
    }

    // ── Remote memory ──────────────────────────────────────────────────────

    /// Train on the grid as it is now.
    pub async fn memorize(&self) -> Result<Submission> {
        let grid = self.grid.grid();
        self.store.memorize(&grid).await
    }

    /// Probe with the current grid; grid and energy become the response.
    pub async fn recall(&self) -> Result<f64> {
        let probe = self.grid.grid();
        self.store.recall(&probe).await
    }

    /// Probe with the most recently stored pattern. `None` when nothing is
    /// stored.
    pub async fn recall_last(&self) -> Result<Option<f64>> {
        if self.store.index().is_empty() {
            warn!("No patterns available to recall");
            return Ok(None);
        }
        let grids = self.store.recall_all().await?;
        match grids.last() {
            Some(probe) => self.store.recall(probe).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn refresh_patterns(&self) -> Result<PatternIndex> {
        self.store.refresh_count().await
    }

    /// Erase the remote memory; the local grid is blanked and playback
    /// stops with it.
    pub async fn clear_memory(&self) -> Result<()> {
        self.store.clear().await
    }

    // ── Playback ───────────────────────────────────────────────────────────

    /// Fetch every stored pattern and loop over them. Returns `false`
    /// without a remote call when the index is empty.
    pub async fn start_playback(&self) -> Result<bool> {
        if self.store.index().is_empty() {
            warn!("No patterns available for slideshow");
            return Ok(false);
        }
        let grids = self.store.recall_all().await?;
        self.playback
            .start(grids, self.config.playback_interval())
            .await?;
        Ok(true)
    }

    pub async fn stop_playback(&self) {
        self.playback.stop().await;
    }

    /// Show stored pattern `index` once. Returns `false` without a remote
    /// call when the index is empty.
    pub async fn preview(&self, index: usize) -> Result<bool> {
        if self.store.index().is_empty() {
            warn!("No patterns available for preview");
            return Ok(false);
        }
        self.playback.seek(&self.store, index).await?;
        Ok(true)
    }

    // ── Capture ────────────────────────────────────────────────────────────

    pub async fn start_capture<S: FrameSource>(&self, source: S) -> Result<()> {
        self.capture
            .start(
                source,
                self.config.capture_interval(),
                self.config.auto_train,
            )
            .await
    }

    /// Capture with every frame submitted for training.
    pub async fn start_auto_train<S: FrameSource>(&self, source: S) -> Result<()> {
        self.capture
            .start(source, self.config.capture_interval(), true)
            .await
    }

    pub async fn stop_capture(&self) {
        self.capture.stop().await;
    }

    /// Stop capture (releasing the camera) and playback.
    pub async fn shutdown(&self) {
        self.capture.stop().await;
        self.playback.stop().await;
        info!("session closed");
    }
}
