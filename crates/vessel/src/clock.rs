//! Default clock backed by tokio's timer.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use vessel_core::Clock;

/// A [`Clock`] using `tokio::time`.
///
/// Under `tokio::time::pause` (or `#[tokio::test(start_paused = true)]`)
/// it runs on virtual time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
