//! In-memory doubles for the step contract and its collaborators.
//!
//! Enabled with the `test-utils` feature.

mod buffer_streamer;
mod fake_cache;
mod fake_container;
mod fake_step;
mod fake_uploader;

pub use buffer_streamer::BufferStreamer;
pub use fake_cache::{FakeCache, FetchCall};
pub use fake_container::{FakeContainer, StreamedIn};
pub use fake_step::{FakeOutcome, FakeStep};
pub use fake_uploader::{FakeUploader, UploadCall};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// A barrier that holds callers until released.
///
/// `release_one` lets a single waiter through; `open` lets everyone through
/// from then on.
#[derive(Debug, Clone)]
pub struct Gate {
    permits: Arc<Semaphore>,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    /// Creates a closed gate.
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
        }
    }

    /// Lets exactly one waiter through.
    pub fn release_one(&self) {
        self.permits.add_permits(1);
    }

    /// Lets every current and future waiter through.
    pub fn open(&self) {
        self.permits.close();
    }

    /// Waits until let through.
    pub async fn pass(&self) {
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }
}

/// Tracks how many callers are inside a section at once.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyGauge {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ConcurrencyGauge {
    /// Creates a gauge at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks one caller as inside until the guard drops.
    pub fn enter(&self) -> GaugeGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard {
            current: Arc::clone(&self.current),
        }
    }

    /// Callers inside right now.
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest number of callers ever inside at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Returned by [`ConcurrencyGauge::enter`].
#[derive(Debug)]
pub struct GaugeGuard {
    current: Arc<AtomicUsize>,
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Polls `condition` every millisecond for up to a second.
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..1000 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    condition()
}
