//! Single-slot holder for a cancellable repeating task.
//!
//! Capture and playback each own one `TaskSlot`. Installing a new task
//! always stops the previous one first, so a slot never runs two.

use std::convert::Infallible;
use std::future::Future;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Running {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }

    async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                warn!("background task panicked: {}", e);
            }
        }
    }
}

pub struct TaskSlot {
    name: &'static str,
    running: Mutex<Option<Running>>,
}

impl TaskSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            running: Mutex::new(None),
        }
    }

    /// Stop whatever occupies the slot, then spawn `body` under `cancel`.
    ///
    /// `body` receives a clone of the token and must return once it fires.
    pub async fn install<F, Fut>(&self, cancel: CancellationToken, body: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let _ = self
            .try_install::<_, _, Infallible>(cancel, |cancel| Ok(body(cancel)))
            .await;
    }

    /// Like `install`, but `body` may refuse to produce a task. It runs with
    /// the slot locked and the previous task already gone, so whatever it
    /// acquires is never held alongside the previous task's resources. On
    /// error the slot is left empty.
    pub async fn try_install<F, Fut, E>(&self, cancel: CancellationToken, body: F) -> Result<(), E>
    where
        F: FnOnce(CancellationToken) -> Result<Fut, E>,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.running.lock().await;
        if let Some(prev) = slot.take() {
            debug!(task = self.name, "replacing running task");
            prev.shutdown().await;
        }
        let task = body(cancel.clone())?;
        let handle = tokio::spawn(task);
        *slot = Some(Running { cancel, handle });
        Ok(())
    }

    /// Cancel and await the running task. Returns whether one was live.
    /// Safe to call when nothing is running.
    pub async fn stop(&self) -> bool {
        let prev = self.running.lock().await.take();
        match prev {
            Some(prev) => {
                debug!(task = self.name, "stopping task");
                let was_live = prev.is_live();
                prev.shutdown().await;
                was_live
            }
            None => false,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .map(Running::is_live)
            .unwrap_or(false)
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        // Teardown without an executor to await on: cancel and abort so the
        // task's future (and anything it owns) is dropped by the runtime.
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
            running.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    async fn counting_loop(cancel: CancellationToken, counter: Arc<AtomicUsize>) {
        let mut interval = tokio::time::interval(Duration::from_millis(10));
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn install_replaces_previous_task() {
        let slot = TaskSlot::new("test");
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&first);
        slot.install(CancellationToken::new(), move |t| counting_loop(t, c))
            .await;
        tokio::time::sleep(Duration::from_millis(35)).await;

        let c = Arc::clone(&second);
        slot.install(CancellationToken::new(), move |t| counting_loop(t, c))
            .await;
        let frozen = first.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(first.load(Ordering::SeqCst), frozen);
        assert!(second.load(Ordering::SeqCst) > 0);
        assert!(slot.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let slot = TaskSlot::new("test");
        assert!(!slot.stop().await);

        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        slot.install(CancellationToken::new(), move |t| counting_loop(t, c))
            .await;
        assert!(slot.stop().await);
        assert!(!slot.stop().await);
        assert!(!slot.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn external_cancel_marks_slot_idle() {
        let slot = TaskSlot::new("test");
        let token = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        slot.install(token.clone(), move |t| counting_loop(t, c)).await;

        token.cancel();
        assert!(!slot.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_install_stops_previous_and_leaves_slot_empty() {
        let slot = TaskSlot::new("test");
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        slot.install(CancellationToken::new(), move |t| counting_loop(t, c))
            .await;
        tokio::time::sleep(Duration::from_millis(25)).await;

        let c = Arc::clone(&counter);
        let refused = slot
            .try_install(CancellationToken::new(), move |t| {
                if c.load(Ordering::SeqCst) > 0 {
                    Err("busy")
                } else {
                    Ok(counting_loop(t, c))
                }
            })
            .await;
        assert_eq!(refused, Err("busy"));
        assert!(!slot.is_running().await);

        let frozen = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), frozen);
    }
}
