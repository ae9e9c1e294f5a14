//! In-memory stand-ins for the remote memory service and the camera.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::capture::{FrameSource, RgbaFrame};
use crate::error::{Result, SessionError};
use crate::grid::Grid;
use crate::store::MemoryBackend;

/// Stores patterns verbatim. Recall answers with the first stored pattern
/// and an energy of minus the pattern count.
#[derive(Default)]
pub struct FakeBackend {
    patterns: Mutex<Vec<Grid>>,
    memorize_calls: AtomicUsize,
    gate: Mutex<Option<Arc<Notify>>>,
    entered: Notify,
    failures: Mutex<HashSet<&'static str>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_patterns(patterns: Vec<Grid>) -> Self {
        let backend = Self::default();
        *backend.patterns.lock().unwrap() = patterns;
        backend
    }

    /// The next memorize call parks until the returned handle is notified.
    pub fn hold_memorize(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub async fn wait_memorize_entered(&self) {
        self.entered.notified().await;
    }

    pub fn memorize_calls(&self) -> usize {
        self.memorize_calls.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> Vec<Grid> {
        self.patterns.lock().unwrap().clone()
    }

    /// Make the next call named `call` fail with a network error.
    pub fn fail_next(&self, call: &'static str) {
        self.failures.lock().unwrap().insert(call);
    }

    fn check(&self, call: &'static str) -> Result<()> {
        if self.failures.lock().unwrap().remove(call) {
            Err(SessionError::network(call, "injected failure"))
        } else {
            Ok(())
        }
    }
}

impl MemoryBackend for FakeBackend {
    async fn memorize(&self, grid: &Grid) -> Result<String> {
        self.memorize_calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.check("memorize")?;
        self.patterns.lock().unwrap().push(grid.clone());
        Ok("Pattern memorized successfully".to_string())
    }

    async fn recall(&self, probe: &Grid) -> Result<(Grid, f64)> {
        self.check("recall")?;
        let patterns = self.patterns.lock().unwrap();
        let resolved = patterns.first().cloned().unwrap_or_else(|| probe.clone());
        Ok((resolved, -(patterns.len() as f64)))
    }

    async fn recall_all(&self) -> Result<Vec<Grid>> {
        self.check("recall_all")?;
        let patterns = self.patterns.lock().unwrap();
        if patterns.is_empty() {
            return Err(SessionError::network("recall_all", "No patterns memorized"));
        }
        Ok(patterns.clone())
    }

    async fn clear(&self) -> Result<String> {
        self.check("clear")?;
        self.patterns.lock().unwrap().clear();
        Ok("Memory cleared successfully".to_string())
    }

    async fn pattern_count(&self) -> Result<usize> {
        self.check("pattern_count")?;
        Ok(self.patterns.lock().unwrap().len())
    }
}

/// Observable camera state shared between a `FakeCamera` and the test.
#[derive(Default)]
pub struct CameraProbe {
    pub active: AtomicBool,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub samples: AtomicUsize,
}

/// Replays `frames` cyclically; `None` entries simulate unreadable ticks.
pub struct FakeCamera {
    frames: Vec<Option<RgbaFrame>>,
    next: usize,
    deny: bool,
    probe: Arc<CameraProbe>,
}

impl FakeCamera {
    pub fn new(frames: Vec<Option<RgbaFrame>>) -> (Self, Arc<CameraProbe>) {
        let probe = Arc::new(CameraProbe::default());
        let cam = Self {
            frames,
            next: 0,
            deny: false,
            probe: Arc::clone(&probe),
        };
        (cam, probe)
    }

    pub fn denied() -> (Self, Arc<CameraProbe>) {
        let (mut cam, probe) = Self::new(Vec::new());
        cam.deny = true;
        (cam, probe)
    }
}

impl FrameSource for FakeCamera {
    fn start(&mut self) -> Result<()> {
        if self.deny {
            return Err(SessionError::resource("permission denied"));
        }
        self.probe.starts.fetch_add(1, Ordering::SeqCst);
        self.probe.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.probe.stops.fetch_add(1, Ordering::SeqCst);
        self.probe.active.store(false, Ordering::SeqCst);
    }

    fn sample_frame(&mut self) -> Result<RgbaFrame> {
        self.probe.samples.fetch_add(1, Ordering::SeqCst);
        if self.frames.is_empty() {
            return Err(SessionError::resource("no frames"));
        }
        let frame = self.frames[self.next % self.frames.len()].clone();
        self.next += 1;
        frame.ok_or_else(|| SessionError::resource("frame unreadable"))
    }
}
