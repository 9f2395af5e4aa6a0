//! Wall-clock deadline for a child step.

use super::joined;
use crate::clock::TokioClock;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{info_span, warn, Instrument};
use vessel_core::{Clock, EmittableError, Step, StepError};

/// Fails its child once `timeout` elapses.
///
/// On expiry the child is cancelled and awaited before returning, so the
/// child never overlaps whatever runs next.
#[derive(Debug)]
pub struct TimeoutStep {
    substep: Arc<dyn Step>,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl TimeoutStep {
    /// Wraps `substep` with a deadline of `timeout`.
    pub fn new(substep: Arc<dyn Step>, timeout: Duration) -> Self {
        Self {
            substep,
            timeout,
            clock: Arc::new(TokioClock),
        }
    }

    /// Uses `clock` to measure the deadline.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn run(&self) -> Result<(), StepError> {
        // Dropping the set aborts the child if this future is dropped.
        let mut running = JoinSet::new();
        let substep = Arc::clone(&self.substep);
        running.spawn(async move { substep.perform().await });

        tokio::select! {
            biased;
            result = running.join_next() => result.map_or(Ok(()), joined),
            _ = self.clock.sleep(self.timeout) => {
                warn!(timeout = ?self.timeout, "timed-out");
                self.substep.cancel();
                let result = running.join_next().await.map_or(Ok(()), joined);
                Err(self.timeout_error(result).into())
            }
        }
    }

    fn timeout_error(&self, result: Result<(), StepError>) -> EmittableError {
        let mut message = format!("exceeded {:?} timeout", self.timeout);
        match result {
            Ok(()) => EmittableError::new(message),
            Err(err) => {
                if let Some(emittable) = err.as_emittable() {
                    message.push_str("; ");
                    message.push_str(emittable.message());
                }
                EmittableError::wrap(err, message)
            }
        }
    }
}

#[async_trait]
impl Step for TimeoutStep {
    async fn perform(&self) -> Result<(), StepError> {
        self.run()
            .instrument(info_span!("timeout-step", timeout = ?self.timeout))
            .await
    }

    fn cancel(&self) {
        self.substep.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vessel_core::test_utils::{wait_for, ConcurrencyGauge, FakeOutcome, FakeStep, Gate};

    #[tokio::test(start_paused = true)]
    async fn test_child_finishing_first_passes_result_through() {
        let child = Arc::new(FakeStep::succeeding().with_delay(Duration::from_millis(10)));
        let step = TimeoutStep::new(child.clone(), Duration::from_millis(100));

        assert!(step.perform().await.is_ok());
        assert_eq!(child.cancel_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_error_passes_through_untouched() {
        let child = Arc::new(FakeStep::failing("exit status 2"));
        let step = TimeoutStep::new(child, Duration::from_secs(1));

        let err = step.perform().await.expect_err("child failed");
        assert!(matches!(err, StepError::Other(_)));
        assert_eq!(err.to_string(), "exit status 2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_cancels_and_waits_for_child() {
        let child = Arc::new(
            FakeStep::succeeding()
                .with_delay(Duration::from_millis(100))
                .with_cancel_latency(Duration::from_millis(5)),
        );
        let step = TimeoutStep::new(child.clone(), Duration::from_millis(10));

        let err = step.perform().await.expect_err("timed out");
        assert_eq!(child.cancel_count(), 1);
        assert_eq!(child.finished_count(), 1);

        let emittable = err.as_emittable().expect("emittable error");
        assert!(emittable.message().contains("exceeded 10ms timeout"));
        assert!(emittable
            .wrapped_error()
            .map(|e| e.to_string() == "cancelled")
            .unwrap_or(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_appends_child_message() {
        let child = Arc::new(
            FakeStep::succeeding()
                .with_delay(Duration::from_secs(5))
                .on_cancel(FakeOutcome::Emit("process killed".to_string())),
        );
        let step = TimeoutStep::new(child, Duration::from_secs(1));

        let err = step.perform().await.expect_err("timed out");
        assert_eq!(err.to_string(), "exceeded 1s timeout; process killed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_forwards() {
        let child = Arc::new(FakeStep::succeeding().with_delay(Duration::from_secs(60)));
        let step = Arc::new(TimeoutStep::new(child.clone(), Duration::from_secs(120)));

        let running = tokio::spawn({
            let step = Arc::clone(&step);
            async move { step.perform().await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        step.cancel();

        assert!(matches!(joined(running.await), Err(StepError::Cancelled)));
        assert_eq!(child.cancel_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_perform_aborts_child() {
        let gauge = ConcurrencyGauge::new();
        let child = Arc::new(
            FakeStep::succeeding()
                .with_gate(Gate::new())
                .with_gauge(gauge.clone()),
        );
        let step = TimeoutStep::new(child.clone(), Duration::from_secs(60));

        let outer = tokio::time::timeout(Duration::from_millis(10), step.perform()).await;
        assert!(outer.is_err());
        assert_eq!(child.perform_count(), 1);
        assert!(wait_for(|| gauge.current() == 0).await);
        assert_eq!(child.finished_count(), 0);
    }
}
