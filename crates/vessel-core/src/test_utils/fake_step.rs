//! FakeStep: a scriptable step that counts its calls.

use super::{ConcurrencyGauge, Gate};
use crate::emittable::EmittableError;
use crate::error::StepError;
use crate::step::Step;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What a [`FakeStep`] returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeOutcome {
    /// `Ok(())`.
    Succeed,
    /// [`StepError::Other`] with the given text.
    Fail(String),
    /// [`StepError::Emittable`] with the given message.
    Emit(String),
    /// [`StepError::Cancelled`].
    Cancelled,
}

impl FakeOutcome {
    fn to_result(&self) -> Result<(), StepError> {
        match self {
            FakeOutcome::Succeed => Ok(()),
            FakeOutcome::Fail(msg) => Err(StepError::other(msg.clone())),
            FakeOutcome::Emit(msg) => Err(EmittableError::new(msg.clone()).into()),
            FakeOutcome::Cancelled => Err(StepError::Cancelled),
        }
    }
}

/// A step whose outcome, duration and cancellation behavior are scripted.
///
/// Work consists of passing an optional [`Gate`] and then sleeping an
/// optional delay. Cancellation interrupts the work and yields the
/// `on_cancel` outcome, after an optional cleanup latency.
#[derive(Debug)]
pub struct FakeStep {
    outcome: FakeOutcome,
    on_cancel: FakeOutcome,
    delay: Option<Duration>,
    cancel_latency: Option<Duration>,
    gate: Option<Gate>,
    gauge: Option<ConcurrencyGauge>,
    token: CancellationToken,
    performs: AtomicUsize,
    cancels: AtomicUsize,
    finished: AtomicUsize,
}

impl FakeStep {
    /// A step that returns `outcome` once its work is done.
    pub fn new(outcome: FakeOutcome) -> Self {
        Self {
            outcome,
            on_cancel: FakeOutcome::Cancelled,
            delay: None,
            cancel_latency: None,
            gate: None,
            gauge: None,
            token: CancellationToken::new(),
            performs: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        }
    }

    /// A step that succeeds.
    pub fn succeeding() -> Self {
        Self::new(FakeOutcome::Succeed)
    }

    /// A step that fails with a plain error.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::new(FakeOutcome::Fail(message.into()))
    }

    /// A step that fails with an emittable error.
    pub fn emitting(message: impl Into<String>) -> Self {
        Self::new(FakeOutcome::Emit(message.into()))
    }

    /// Sleeps for `delay` before finishing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Blocks until `gate` lets it through.
    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Reports its running time to `gauge`.
    pub fn with_gauge(mut self, gauge: ConcurrencyGauge) -> Self {
        self.gauge = Some(gauge);
        self
    }

    /// Returns `outcome` instead of `Cancelled` when cancelled.
    pub fn on_cancel(mut self, outcome: FakeOutcome) -> Self {
        self.on_cancel = outcome;
        self
    }

    /// Takes `latency` to wind down after being cancelled.
    pub fn with_cancel_latency(mut self, latency: Duration) -> Self {
        self.cancel_latency = Some(latency);
        self
    }

    /// Number of `perform` calls.
    pub fn perform_count(&self) -> usize {
        self.performs.load(Ordering::SeqCst)
    }

    /// Number of `cancel` calls.
    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    /// Number of `perform` calls that have returned.
    pub fn finished_count(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    async fn work(&self) {
        if let Some(gate) = &self.gate {
            gate.pass().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Step for FakeStep {
    async fn perform(&self) -> Result<(), StepError> {
        self.performs.fetch_add(1, Ordering::SeqCst);
        let running = self.gauge.as_ref().map(|g| g.enter());

        let completed = tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            _ = self.work() => true,
        };

        let result = if completed {
            self.outcome.to_result()
        } else {
            if let Some(latency) = self.cancel_latency {
                tokio::time::sleep(latency).await;
            }
            self.on_cancel.to_result()
        };

        drop(running);
        self.finished.fetch_add(1, Ordering::SeqCst);
        result
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.token.cancel();
    }
}
