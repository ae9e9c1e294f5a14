//! Camera sampling and frame binarization.
//!
//! A capture session owns one `FrameSource` and one repeating task. Each
//! tick samples a frame, binarizes it into the grid and, with auto-train
//! on, hands the grid to the store without waiting for the remote call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::error::{Result, SessionError, ValidationError};
use super::grid::{Cell, Grid, GridModel, GRID_SIZE};
use super::store::{MemoryBackend, PatternStore};
use super::task::TaskSlot;

/// Mean channel value below which a cell counts as ink.
pub const INK_THRESHOLD: u32 = 128;

/// Tightly packed 8-bit RGBA pixels, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaFrame {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl RgbaFrame {
    /// `None` unless `data` holds exactly `width * height` pixels.
    pub fn new(width: usize, height: usize, data: Vec<u8>) -> Option<Self> {
        let len = width.checked_mul(height)?.checked_mul(4)?;
        (data.len() == len).then_some(Self {
            width,
            height,
            data,
        })
    }

    pub fn solid(width: usize, height: usize, rgba: [u8; 4]) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(width * height * 4)
            .collect();
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    fn rgb_sum(&self, x: usize, y: usize) -> u32 {
        let i = (y * self.width + x) * 4;
        self.data[i] as u32 + self.data[i + 1] as u32 + self.data[i + 2] as u32
    }

    pub fn put_pixel(&mut self, x: usize, y: usize, rgba: [u8; 4]) {
        if x < self.width && y < self.height {
            let i = (y * self.width + x) * 4;
            self.data[i..i + 4].copy_from_slice(&rgba);
        }
    }
}

/// Source pixel span `[start, end)` covered by grid cell `i` along an axis
/// of `len` pixels. Never empty when `len > 0`.
#[inline]
fn span(i: usize, len: usize) -> (usize, usize) {
    let start = (i * len / GRID_SIZE).min(len - 1);
    let end = ((i + 1) * len / GRID_SIZE).clamp(start + 1, len);
    (start, end)
}

/// Downsample to N×N by area averaging and threshold mean(R,G,B):
/// below 128 is ink (+1), otherwise background (−1). Alpha is ignored.
pub fn binarize(frame: &RgbaFrame) -> Grid {
    if frame.width == 0 || frame.height == 0 {
        return Grid::blank();
    }

    let mut cells = Vec::with_capacity(GRID_SIZE * GRID_SIZE);
    for row in 0..GRID_SIZE {
        let (y0, y1) = span(row, frame.height);
        for col in 0..GRID_SIZE {
            let (x0, x1) = span(col, frame.width);
            let mut sum = 0u64;
            for y in y0..y1 {
                for x in x0..x1 {
                    sum += frame.rgb_sum(x, y) as u64;
                }
            }
            let pixels = ((y1 - y0) * (x1 - x0)) as u64;
            // mean(R,G,B) < 128  <=>  sum < 128 * 3 * pixels
            let ink = sum < INK_THRESHOLD as u64 * 3 * pixels;
            cells.push(if ink { Cell::Ink } else { Cell::Background });
        }
    }

    Grid::from_cells(cells).unwrap_or_default()
}

/// A camera-like device.
pub trait FrameSource: Send + 'static {
    /// Acquire the device. Fails with a resource error when unavailable.
    fn start(&mut self) -> Result<()>;

    /// Release the device. Must be safe to call more than once.
    fn stop(&mut self);

    /// Grab the current frame; an error means this tick has nothing to read.
    fn sample_frame(&mut self) -> Result<RgbaFrame>;
}

/// Releases the source on every exit path of the capture task, including
/// abort.
struct MediaGuard<S: FrameSource>(S);

impl<S: FrameSource> Drop for MediaGuard<S> {
    fn drop(&mut self) {
        self.0.stop();
        info!("media source released");
    }
}

pub struct CapturePipeline<B> {
    grid: GridModel,
    store: Arc<PatternStore<B>>,
    slot: TaskSlot,
    auto_train: Arc<AtomicBool>,
}

impl<B: MemoryBackend> CapturePipeline<B> {
    pub fn new(grid: GridModel, store: Arc<PatternStore<B>>) -> Self {
        Self {
            grid,
            store,
            slot: TaskSlot::new("capture"),
            auto_train: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start sampling `source` every `interval`. Any running capture is
    /// stopped (and its source released) before `source` is acquired, with
    /// the slot held throughout so overlapping starts never have two sources
    /// live. If acquisition fails, capture stays inactive.
    pub async fn start<S: FrameSource>(
        &self,
        mut source: S,
        interval: Duration,
        auto_train: bool,
    ) -> Result<()> {
        if interval.is_zero() {
            return Err(ValidationError::ZeroInterval.into());
        }

        let grid = self.grid.clone();
        let store = Arc::clone(&self.store);
        let auto = Arc::clone(&self.auto_train);

        self.slot
            .try_install(CancellationToken::new(), move |cancel| {
                source.start()?;
                auto.store(auto_train, Ordering::SeqCst);
                let guard = MediaGuard(source);
                Ok::<_, SessionError>(capture_loop(guard, interval, grid, store, auto, cancel))
            })
            .await?;
        info!(
            interval_ms = interval.as_millis() as u64,
            auto_train, "capture started"
        );
        Ok(())
    }

    /// Cancel sampling and release the source. Idempotent.
    pub async fn stop(&self) {
        if self.slot.stop().await {
            info!("capture stopped");
        }
    }

    pub async fn is_active(&self) -> bool {
        self.slot.is_running().await
    }

    pub fn set_auto_train(&self, on: bool) {
        self.auto_train.store(on, Ordering::SeqCst);
    }

    pub fn auto_train(&self) -> bool {
        self.auto_train.load(Ordering::SeqCst)
    }
}

async fn capture_loop<S, B>(
    mut media: MediaGuard<S>,
    interval: Duration,
    grid: GridModel,
    store: Arc<PatternStore<B>>,
    auto_train: Arc<AtomicBool>,
    cancel: CancellationToken,
) where
    S: FrameSource,
    B: MemoryBackend,
{
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let frame = match media.0.sample_frame() {
            Ok(frame) => frame,
            Err(e) => {
                debug!("capture tick skipped: {}", e);
                continue;
            }
        };

        let sampled = binarize(&frame);
        grid.replace(sampled.clone());

        if !auto_train.load(Ordering::SeqCst) {
            continue;
        }
        match store.try_ticket() {
            Some(ticket) => {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    // Failures are logged by the store.
                    let _ = store.memorize_with(ticket, &sampled).await;
                });
            }
            None => debug!("auto-train submission dropped: memorize still pending"),
        }
    }
}

/// Synthetic camera: a dark square sweeping left to right over a light
/// background, one step per sampled frame.
pub struct SweepCamera {
    width: usize,
    height: usize,
    side: usize,
    step: usize,
    active: bool,
}

impl SweepCamera {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            side: (width.min(height) / 3).max(1),
            step: 0,
            active: false,
        }
    }
}

impl FrameSource for SweepCamera {
    fn start(&mut self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(SessionError::resource("synthetic camera has no pixels"));
        }
        self.active = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.active = false;
    }

    fn sample_frame(&mut self) -> Result<RgbaFrame> {
        if !self.active {
            return Err(SessionError::resource("camera not started"));
        }
        let mut frame = RgbaFrame::solid(self.width, self.height, [235, 235, 235, 255]);
        let travel = self.width.saturating_sub(self.side).max(1);
        let x0 = (self.step * self.side / 2) % travel;
        let y0 = (self.height - self.side) / 2;
        for y in y0..y0 + self.side {
            for x in x0..x0 + self.side {
                frame.put_pixel(x, y, [20, 20, 20, 255]);
            }
        }
        self.step += 1;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, FakeCamera};

    const BLACK: [u8; 4] = [0, 0, 0, 255];
    const WHITE: [u8; 4] = [255, 255, 255, 255];

    fn pipeline() -> (
        CapturePipeline<FakeBackend>,
        GridModel,
        Arc<PatternStore<FakeBackend>>,
    ) {
        let grid = GridModel::new(Some(11));
        let store = Arc::new(PatternStore::new(FakeBackend::new(), grid.clone()));
        (
            CapturePipeline::new(grid.clone(), Arc::clone(&store)),
            grid,
            store,
        )
    }

    #[test]
    fn black_frame_is_all_ink_white_frame_all_background() {
        let black = RgbaFrame::solid(GRID_SIZE, GRID_SIZE, BLACK);
        let white = RgbaFrame::solid(GRID_SIZE, GRID_SIZE, WHITE);
        assert_eq!(binarize(&black), Grid::filled(Cell::Ink));
        assert_eq!(binarize(&white), Grid::blank());
    }

    #[test]
    fn threshold_sits_at_128() {
        let dark = RgbaFrame::solid(70, 70, [127, 127, 127, 0]);
        let light = RgbaFrame::solid(70, 70, [128, 128, 128, 0]);
        assert_eq!(binarize(&dark), Grid::filled(Cell::Ink));
        assert_eq!(binarize(&light), Grid::blank());

        // Mean of the three channels, not any single one.
        let mixed = RgbaFrame::solid(35, 35, [255, 64, 60, 255]);
        assert_eq!(binarize(&mixed), Grid::filled(Cell::Ink));
    }

    #[test]
    fn any_resolution_yields_full_bipolar_grid() {
        for (w, h) in [(1, 1), (7, 3), (35, 35), (64, 48), (640, 480), (1000, 17)] {
            let mut frame = RgbaFrame::solid(w, h, WHITE);
            frame.put_pixel(0, 0, BLACK);
            let grid = binarize(&frame);
            assert_eq!(grid.cells().len(), GRID_SIZE * GRID_SIZE);
            assert_eq!(grid.rows().count(), GRID_SIZE);
        }
        assert_eq!(binarize(&RgbaFrame::solid(0, 0, BLACK)), Grid::blank());
    }

    #[test]
    fn left_half_dark_maps_to_left_half_ink() {
        let mut frame = RgbaFrame::solid(70, 70, WHITE);
        for y in 0..70 {
            for x in 0..34 {
                frame.put_pixel(x, y, BLACK);
            }
        }
        let grid = binarize(&frame);
        assert_eq!(grid.get(0, 0), Some(Cell::Ink));
        assert_eq!(grid.get(34, 16), Some(Cell::Ink));
        assert_eq!(grid.get(0, 17), Some(Cell::Background));
        assert_eq!(grid.get(34, 34), Some(Cell::Background));
    }

    #[test]
    fn frame_constructor_checks_length() {
        assert!(RgbaFrame::new(2, 2, vec![0; 16]).is_some());
        assert!(RgbaFrame::new(2, 2, vec![0; 15]).is_none());
        assert!(RgbaFrame::new(usize::MAX, 2, Vec::new()).is_none());
        assert!(RgbaFrame::new(usize::MAX / 4 + 1, 1, Vec::new()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_binarize_into_grid() {
        let (capture, grid, _store) = pipeline();
        let (cam, probe) = FakeCamera::new(vec![Some(RgbaFrame::solid(80, 60, BLACK))]);

        capture
            .start(cam, Duration::from_millis(100), false)
            .await
            .unwrap();
        assert!(capture.is_active().await);
        assert!(probe.active.load(Ordering::SeqCst));
        assert_eq!(grid.grid(), Grid::blank());

        time::sleep(Duration::from_millis(150)).await;
        assert_eq!(grid.grid(), Grid::filled(Cell::Ink));
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_frames_are_skipped() {
        let (capture, grid, _store) = pipeline();
        let (cam, probe) = FakeCamera::new(vec![
            None,
            None,
            Some(RgbaFrame::solid(35, 35, BLACK)),
        ]);
        capture
            .start(cam, Duration::from_millis(100), false)
            .await
            .unwrap();

        time::sleep(Duration::from_millis(250)).await;
        assert_eq!(grid.grid(), Grid::blank());
        assert!(capture.is_active().await);

        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(grid.grid(), Grid::filled(Cell::Ink));
        assert!(probe.samples.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn denied_camera_leaves_capture_inactive() {
        let (capture, grid, _store) = pipeline();
        let (cam, probe) = FakeCamera::denied();

        let err = capture
            .start(cam, Duration::from_millis(100), true)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Resource(_)));
        assert!(!capture.is_active().await);
        assert_eq!(probe.starts.load(Ordering::SeqCst), 0);
        assert_eq!(grid.grid(), Grid::blank());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_releases_camera_and_is_idempotent() {
        let (capture, _grid, _store) = pipeline();
        let (cam, probe) = FakeCamera::new(vec![Some(RgbaFrame::solid(35, 35, WHITE))]);
        capture
            .start(cam, Duration::from_millis(100), false)
            .await
            .unwrap();

        capture.stop().await;
        assert!(!probe.active.load(Ordering::SeqCst));
        assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
        assert!(!capture.is_active().await);

        capture.stop().await;
        assert_eq!(probe.stops.load(Ordering::SeqCst), 1);

        let sampled = probe.samples.load(Ordering::SeqCst);
        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(probe.samples.load(Ordering::SeqCst), sampled);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_releases_previous_camera_first() {
        let (capture, _grid, _store) = pipeline();
        let (first, first_probe) = FakeCamera::new(vec![Some(RgbaFrame::solid(35, 35, WHITE))]);
        let (second, second_probe) =
            FakeCamera::new(vec![Some(RgbaFrame::solid(35, 35, BLACK))]);

        capture
            .start(first, Duration::from_millis(100), false)
            .await
            .unwrap();
        capture
            .start(second, Duration::from_millis(100), false)
            .await
            .unwrap();

        assert!(!first_probe.active.load(Ordering::SeqCst));
        assert!(second_probe.active.load(Ordering::SeqCst));

        let frozen = first_probe.samples.load(Ordering::SeqCst);
        time::sleep(Duration::from_millis(300)).await;
        assert_eq!(first_probe.samples.load(Ordering::SeqCst), frozen);
        assert!(second_probe.samples.load(Ordering::SeqCst) > 0);
    }

    /// Counts how many instances sharing `live` are acquired at once.
    struct SharedCamera {
        live: Arc<std::sync::atomic::AtomicUsize>,
        peak: Arc<std::sync::atomic::AtomicUsize>,
        acquired: bool,
    }

    impl FrameSource for SharedCamera {
        fn start(&mut self) -> Result<()> {
            let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.acquired = true;
            Ok(())
        }

        fn stop(&mut self) {
            if std::mem::take(&mut self.acquired) {
                self.live.fetch_sub(1, Ordering::SeqCst);
            }
        }

        fn sample_frame(&mut self) -> Result<RgbaFrame> {
            Ok(RgbaFrame::solid(35, 35, WHITE))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_starts_never_hold_two_cameras() {
        let (capture, _grid, _store) = pipeline();
        let live = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let peak = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let camera = || SharedCamera {
            live: Arc::clone(&live),
            peak: Arc::clone(&peak),
            acquired: false,
        };
        let every = Duration::from_millis(100);

        capture.start(camera(), every, false).await.unwrap();
        let (a, b) = tokio::join!(
            capture.start(camera(), every, false),
            capture.start(camera(), every, false)
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(live.load(Ordering::SeqCst), 1);
        capture.stop().await;
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_rejected_without_touching_camera() {
        let (capture, grid, _store) = pipeline();
        let (cam, probe) = FakeCamera::new(vec![Some(RgbaFrame::solid(35, 35, BLACK))]);

        let err = capture.start(cam, Duration::ZERO, false).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Validation(ValidationError::ZeroInterval)
        ));
        assert!(!capture.is_active().await);
        assert_eq!(probe.starts.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_millis(300)).await;
        assert_eq!(grid.grid(), Grid::blank());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_pipeline_releases_camera() {
        let (capture, _grid, _store) = pipeline();
        let (cam, probe) = FakeCamera::new(vec![Some(RgbaFrame::solid(35, 35, WHITE))]);
        capture
            .start(cam, Duration::from_millis(100), false)
            .await
            .unwrap();

        drop(capture);
        time::sleep(Duration::from_millis(10)).await;
        assert!(!probe.active.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn auto_train_drops_ticks_while_memorize_pending() {
        let (capture, _grid, store) = pipeline();
        let gate = store.backend().hold_memorize();
        let (cam, probe) = FakeCamera::new(vec![Some(RgbaFrame::solid(35, 35, BLACK))]);

        capture
            .start(cam, Duration::from_millis(100), true)
            .await
            .unwrap();
        time::sleep(Duration::from_millis(350)).await;

        // Capture kept sampling while the first submission was parked.
        assert!(probe.samples.load(Ordering::SeqCst) >= 3);
        assert_eq!(store.backend().memorize_calls(), 1);
        assert!(store.is_memorizing());

        gate.notify_one();
        time::sleep(Duration::from_millis(100)).await;
        assert!(store.backend().memorize_calls() >= 2);
        assert_eq!(store.backend().stored()[0], Grid::filled(Cell::Ink));
    }

    #[tokio::test(start_paused = true)]
    async fn auto_train_can_be_toggled_while_running() {
        let (capture, _grid, store) = pipeline();
        let (cam, _probe) = FakeCamera::new(vec![Some(RgbaFrame::solid(35, 35, BLACK))]);
        capture
            .start(cam, Duration::from_millis(100), false)
            .await
            .unwrap();

        time::sleep(Duration::from_millis(250)).await;
        assert_eq!(store.backend().memorize_calls(), 0);

        capture.set_auto_train(true);
        assert!(capture.auto_train());
        time::sleep(Duration::from_millis(100)).await;
        assert!(store.backend().memorize_calls() >= 1);
    }

    #[test]
    fn sweep_camera_moves_its_square() {
        let mut cam = SweepCamera::new(64, 48);
        assert!(cam.sample_frame().is_err());
        cam.start().unwrap();
        let a = binarize(&cam.sample_frame().unwrap());
        let b = binarize(&cam.sample_frame().unwrap());
        assert!(a.count(Cell::Ink) > 0);
        assert_ne!(a, b);
        cam.stop();
        assert!(cam.sample_frame().is_err());
    }
}
