//! Runs children concurrently; one exiting takes the others down.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::info;
use vessel_core::{ErrorGroup, Step, StepError};

/// Performs every child on its own task; the first failure cancels the rest.
///
/// With `error_on_exit`, a child returning `Ok(())` counts as the failure
/// [`StepError::CodependentStepExited`]. Used for processes that are meant
/// to run until stopped.
#[derive(Debug)]
pub struct CodependentStep {
    substeps: Vec<Arc<dyn Step>>,
    error_on_exit: bool,
    siblings_cancelled: AtomicBool,
}

impl CodependentStep {
    /// Creates a step running `substeps` codependently.
    pub fn new(substeps: Vec<Arc<dyn Step>>, error_on_exit: bool) -> Self {
        Self {
            substeps,
            error_on_exit,
            siblings_cancelled: AtomicBool::new(false),
        }
    }

    fn cancel_running(&self, finished: &[bool]) {
        if self.siblings_cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        for (step, done) in self.substeps.iter().zip(finished) {
            if !done {
                step.cancel();
            }
        }
    }
}

#[async_trait]
impl Step for CodependentStep {
    async fn perform(&self) -> Result<(), StepError> {
        let mut running = JoinSet::new();
        for (index, step) in self.substeps.iter().enumerate() {
            let step = Arc::clone(step);
            running.spawn(async move { (index, step.perform().await) });
        }

        let mut finished = vec![false; self.substeps.len()];
        let mut errors = ErrorGroup::new();
        while let Some(joined) = running.join_next().await {
            let result = match joined {
                Ok((index, result)) => {
                    finished[index] = true;
                    result
                }
                Err(err) => Err(StepError::Join(err.to_string())),
            };

            let result = match result {
                Ok(()) if self.error_on_exit => Err(StepError::CodependentStepExited),
                other => other,
            };

            if let Err(err) = result {
                if !err.is_cancelled() {
                    info!(error = %err, "codependent-step-failed");
                }
                self.cancel_running(&finished);
                errors.push(err);
            }
        }
        errors.into_result()
    }

    fn cancel(&self) {
        self.siblings_cancelled.store(true, Ordering::SeqCst);
        for step in &self.substeps {
            step.cancel();
        }
    }
}
