//! Health monitoring of a running container.

use super::write_line;
use crate::clock::TokioClock;
use crate::config::ConfigError;
use crate::throttle::WorkPool;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
use vessel_core::{Clock, EmittableError, LogStreamer, Step, StepError};

/// Builds a fresh health check for every probe.
pub type CheckFactory = Box<dyn Fn() -> Arc<dyn Step> + Send + Sync>;

/// Whether the last health check passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// No check has passed yet, or the last one failed.
    Unhealthy,
    /// The last check passed.
    Healthy,
}

/// Runs health checks until the container fails them or the step is cancelled.
///
/// Checks run every `unhealthy_interval` until one passes, then every
/// `healthy_interval`. A failure after having been healthy ends the
/// step with that failure. With a non-zero `start_timeout`, never
/// becoming healthy within it ends the step too.
pub struct MonitorStep {
    check_factory: CheckFactory,
    streamer: Arc<dyn LogStreamer>,
    work_pool: WorkPool,
    clock: Arc<dyn Clock>,
    healthy_interval: Duration,
    unhealthy_interval: Duration,
    start_timeout: Duration,
    on_healthy: Option<mpsc::Sender<()>>,
    cancel: CancellationToken,
}

impl fmt::Debug for MonitorStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorStep")
            .field("healthy_interval", &self.healthy_interval)
            .field("unhealthy_interval", &self.unhealthy_interval)
            .field("start_timeout", &self.start_timeout)
            .field("work_pool_size", &self.work_pool.size())
            .finish_non_exhaustive()
    }
}

impl MonitorStep {
    /// Starts building a monitor running checks from `check_factory` on `work_pool`.
    pub fn builder(
        check_factory: impl Fn() -> Arc<dyn Step> + Send + Sync + 'static,
        streamer: Arc<dyn LogStreamer>,
        work_pool: WorkPool,
    ) -> MonitorStepBuilder {
        MonitorStepBuilder {
            check_factory: Box::new(check_factory),
            streamer,
            work_pool,
            clock: Arc::new(TokioClock),
            healthy_interval: Duration::from_secs(30),
            unhealthy_interval: Duration::from_millis(500),
            start_timeout: Duration::ZERO,
            on_healthy: None,
        }
    }

    async fn run(&self) -> Result<(), StepError> {
        write_line(
            self.streamer.stdout(),
            "Starting health monitoring of container",
        );

        let mut state = HealthState::Unhealthy;
        let mut interval = self.unhealthy_interval;
        let mut start_by = (!self.start_timeout.is_zero())
            .then(|| self.clock.now() + self.start_timeout);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(StepError::Cancelled),
                _ = self.clock.sleep(interval) => {}
            }

            let now = self.clock.now();
            let result = self.check().await;
            if matches!(result, Err(StepError::Cancelled)) {
                return Err(StepError::Cancelled);
            }

            let passed = result.is_ok();
            match (state, passed) {
                (HealthState::Healthy, false) => {
                    info!("transitioned-to-unhealthy");
                    write_line(self.streamer.stderr(), "Container became unhealthy");
                    return result;
                }
                (HealthState::Unhealthy, true) => {
                    info!("transitioned-to-healthy");
                    write_line(self.streamer.stdout(), "Container became healthy");
                    if let Some(on_healthy) = &self.on_healthy {
                        let _ = on_healthy.try_send(());
                    }
                    state = HealthState::Healthy;
                    interval = self.healthy_interval;
                    start_by = None;
                }
                _ => {}
            }

            if let (Some(deadline), Err(err)) = (start_by, result) {
                if now > deadline {
                    let message = format!(
                        "Timed out after {:?}: health check never passed.",
                        self.start_timeout
                    );
                    info!(error = %err, "timed-out-before-healthy");
                    write_line(self.streamer.stderr(), &message);
                    return Err(EmittableError::wrap(err, message).into());
                }
            }
        }
    }

    /// Runs one check on the work pool.
    ///
    /// On cancel, a check a worker has already started is cancelled and
    /// awaited. A check still queued is claimed here and never performed.
    async fn check(&self) -> Result<(), StepError> {
        let check = (self.check_factory)();
        let claimed = Arc::new(AtomicBool::new(false));
        let (done, mut result) = oneshot::channel();
        let submitted = Arc::clone(&check);
        let worker_claim = Arc::clone(&claimed);
        self.work_pool.submit(async move {
            if worker_claim.swap(true, Ordering::SeqCst) {
                return;
            }
            let _ = done.send(submitted.perform().await);
        })?;

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {}
            received = &mut result => return flatten_check(received),
        }

        if !claimed.swap(true, Ordering::SeqCst) {
            debug!("dropped-queued-check");
            return Err(StepError::Cancelled);
        }
        debug!("cancelling-in-flight-check");
        check.cancel();
        let _ = result.await;
        Err(StepError::Cancelled)
    }
}

fn flatten_check(
    received: Result<Result<(), StepError>, oneshot::error::RecvError>,
) -> Result<(), StepError> {
    received.unwrap_or_else(|_| {
        Err(StepError::Join("health check was dropped by the work pool".to_string()))
    })
}

#[async_trait]
impl Step for MonitorStep {
    async fn perform(&self) -> Result<(), StepError> {
        self.run().instrument(info_span!("monitor-step")).await
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Configures a [`MonitorStep`].
pub struct MonitorStepBuilder {
    check_factory: CheckFactory,
    streamer: Arc<dyn LogStreamer>,
    work_pool: WorkPool,
    clock: Arc<dyn Clock>,
    healthy_interval: Duration,
    unhealthy_interval: Duration,
    start_timeout: Duration,
    on_healthy: Option<mpsc::Sender<()>>,
}

impl fmt::Debug for MonitorStepBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorStepBuilder")
            .field("healthy_interval", &self.healthy_interval)
            .field("unhealthy_interval", &self.unhealthy_interval)
            .field("start_timeout", &self.start_timeout)
            .finish_non_exhaustive()
    }
}

impl MonitorStepBuilder {
    /// Time between checks once healthy. Defaults to 30s.
    pub fn healthy_interval(mut self, interval: Duration) -> Self {
        self.healthy_interval = interval;
        self
    }

    /// Time between checks until healthy. Defaults to 500ms.
    pub fn unhealthy_interval(mut self, interval: Duration) -> Self {
        self.unhealthy_interval = interval;
        self
    }

    /// How long the container may take to become healthy. Zero, the default, waits forever.
    pub fn start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Time source for intervals and the start timeout.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Receives one message each time the container becomes healthy.
    ///
    /// Sends never block; a full channel drops the notification.
    pub fn on_healthy(mut self, sender: mpsc::Sender<()>) -> Self {
        self.on_healthy = Some(sender);
        self
    }

    /// Builds the monitor.
    pub fn build(self) -> Result<MonitorStep, ConfigError> {
        if self.healthy_interval.is_zero() {
            return Err(ConfigError::ZeroInterval {
                field: "healthy_interval",
            });
        }
        if self.unhealthy_interval.is_zero() {
            return Err(ConfigError::ZeroInterval {
                field: "unhealthy_interval",
            });
        }

        Ok(MonitorStep {
            check_factory: self.check_factory,
            streamer: self.streamer,
            work_pool: self.work_pool,
            clock: self.clock,
            healthy_interval: self.healthy_interval,
            unhealthy_interval: self.unhealthy_interval,
            start_timeout: self.start_timeout,
            on_healthy: self.on_healthy,
            cancel: CancellationToken::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::joined;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use vessel_core::test_utils::{wait_for, BufferStreamer, FakeOutcome, FakeStep, Gate};

    /// A factory returning checks with scripted outcomes, then repeating the last.
    fn scripted(outcomes: Vec<FakeOutcome>) -> (impl Fn() -> Arc<dyn Step> + Send + Sync, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let outcomes = Mutex::new(outcomes);
        let factory = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let outcome = outcomes
                .lock()
                .map(|mut o| if o.len() > 1 { o.remove(0) } else { o[0].clone() })
                .unwrap_or(FakeOutcome::Succeed);
            Arc::new(FakeStep::new(outcome)) as Arc<dyn Step>
        };
        (factory, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_notification_sent_once() {
        let streamer = BufferStreamer::new();
        let (factory, calls) = scripted(vec![FakeOutcome::Succeed]);
        let (healthy_tx, mut healthy_rx) = mpsc::channel(4);
        let monitor = Arc::new(
            MonitorStep::builder(factory, Arc::new(streamer.clone()), WorkPool::new(2))
                .healthy_interval(Duration::from_secs(1))
                .unhealthy_interval(Duration::from_millis(500))
                .on_healthy(healthy_tx)
                .build()
                .expect("valid monitor"),
        );

        let running = tokio::spawn({
            let monitor = Arc::clone(&monitor);
            async move { monitor.perform().await }
        });

        let notified = tokio::time::timeout(Duration::from_millis(600), healthy_rx.recv()).await;
        assert_eq!(notified.ok().flatten(), Some(()));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert!(healthy_rx.try_recv().is_err());

        monitor.cancel();
        assert!(matches!(joined(running.await), Err(StepError::Cancelled)));
        assert_eq!(
            streamer.stdout_text(),
            "Starting health monitoring of container\nContainer became healthy\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_after_healthy_ends_monitor() {
        let streamer = BufferStreamer::new();
        let (factory, calls) = scripted(vec![
            FakeOutcome::Fail("connection refused".to_string()),
            FakeOutcome::Succeed,
            FakeOutcome::Succeed,
            FakeOutcome::Fail("port 8080 closed".to_string()),
        ]);
        let monitor = MonitorStep::builder(factory, Arc::new(streamer.clone()), WorkPool::new(1))
            .build()
            .expect("valid monitor");

        let err = monitor.perform().await.expect_err("became unhealthy");
        assert_eq!(err.to_string(), "port 8080 closed");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(streamer.stdout_text().contains("Container became healthy"));
        assert_eq!(streamer.stderr_text(), "Container became unhealthy\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_timeout_fails_when_never_healthy() {
        let streamer = BufferStreamer::new();
        let (factory, calls) = scripted(vec![FakeOutcome::Fail("connection refused".to_string())]);
        let monitor = MonitorStep::builder(factory, Arc::new(streamer.clone()), WorkPool::new(1))
            .unhealthy_interval(Duration::from_millis(500))
            .start_timeout(Duration::from_secs(2))
            .build()
            .expect("valid monitor");

        let err = monitor.perform().await.expect_err("never healthy");
        let emittable = err.as_emittable().expect("emittable error");
        assert!(emittable.message().contains("health check never passed"));
        assert_eq!(
            emittable.wrapped_error().map(|e| e.to_string()),
            Some("connection refused".to_string())
        );
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(
            streamer.stderr_text(),
            "Timed out after 2s: health check never passed.\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_start_timeout_keeps_probing() {
        let streamer = BufferStreamer::new();
        let (factory, calls) = scripted(vec![FakeOutcome::Fail("connection refused".to_string())]);
        let monitor = Arc::new(
            MonitorStep::builder(factory, Arc::new(streamer), WorkPool::new(1))
                .build()
                .expect("valid monitor"),
        );

        let running = tokio::spawn({
            let monitor = Arc::clone(&monitor);
            async move { monitor.perform().await }
        });
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(calls.load(Ordering::SeqCst) > 100);

        monitor.cancel();
        assert!(matches!(joined(running.await), Err(StepError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_check_ends_monitor_without_transition() {
        let streamer = BufferStreamer::new();
        let (factory, _calls) = scripted(vec![FakeOutcome::Succeed, FakeOutcome::Cancelled]);
        let monitor = MonitorStep::builder(factory, Arc::new(streamer.clone()), WorkPool::new(1))
            .build()
            .expect("valid monitor");

        assert!(matches!(monitor.perform().await, Err(StepError::Cancelled)));
        assert!(!streamer.stderr_text().contains("became unhealthy"));
    }

    #[tokio::test]
    async fn test_pre_cancelled_monitor_runs_no_checks() {
        let (factory, calls) = scripted(vec![FakeOutcome::Succeed]);
        let monitor = MonitorStep::builder(factory, Arc::new(BufferStreamer::new()), WorkPool::new(1))
            .build()
            .expect("valid monitor");

        monitor.cancel();
        assert!(matches!(monitor.perform().await, Err(StepError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let (factory, _calls) = scripted(vec![FakeOutcome::Succeed]);
        let built = MonitorStep::builder(factory, Arc::new(BufferStreamer::new()), WorkPool::new(1))
            .healthy_interval(Duration::ZERO)
            .build();
        assert!(matches!(
            built,
            Err(ConfigError::ZeroInterval { field: "healthy_interval" })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_waits_for_running_check() {
        let check = Arc::new(
            FakeStep::succeeding()
                .with_gate(Gate::new())
                .with_cancel_latency(Duration::from_secs(5)),
        );
        let factory = {
            let check = Arc::clone(&check);
            move || Arc::clone(&check) as Arc<dyn Step>
        };
        let monitor = Arc::new(
            MonitorStep::builder(factory, Arc::new(BufferStreamer::new()), WorkPool::new(1))
                .build()
                .expect("valid monitor"),
        );

        let running = tokio::spawn({
            let monitor = Arc::clone(&monitor);
            async move { monitor.perform().await }
        });
        assert!(wait_for(|| check.perform_count() == 1).await);

        monitor.cancel();
        assert!(matches!(joined(running.await), Err(StepError::Cancelled)));
        assert_eq!(check.cancel_count(), 1);
        assert_eq!(check.finished_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_queued_check() {
        let pool = WorkPool::new(1);
        let busy = Gate::new();
        pool.submit({
            let busy = busy.clone();
            async move { busy.pass().await }
        })
        .expect("pool running");

        let check = Arc::new(FakeStep::succeeding());
        let factory = {
            let check = Arc::clone(&check);
            move || Arc::clone(&check) as Arc<dyn Step>
        };
        let monitor = Arc::new(
            MonitorStep::builder(factory, Arc::new(BufferStreamer::new()), pool.clone())
                .unhealthy_interval(Duration::from_millis(10))
                .build()
                .expect("valid monitor"),
        );

        let running = tokio::spawn({
            let monitor = Arc::clone(&monitor);
            async move { monitor.perform().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        monitor.cancel();
        assert!(matches!(joined(running.await), Err(StepError::Cancelled)));

        busy.open();
        let (flushed, flushed_rx) = oneshot::channel();
        pool.submit(async move {
            let _ = flushed.send(());
        })
        .expect("pool running");
        assert!(flushed_rx.await.is_ok());
        assert_eq!(check.perform_count(), 0);
    }
}
