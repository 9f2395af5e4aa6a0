//! Runs children concurrently and collects every failure.

use super::joined;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinSet;
use vessel_core::{ErrorGroup, Step, StepError};

/// Performs every child on its own task and waits for all of them.
///
/// A child succeeding does not affect its siblings. The result is
/// [`StepError::Multiple`] holding every failure, or `Ok(())`.
#[derive(Debug)]
pub struct ParallelStep {
    substeps: Vec<Arc<dyn Step>>,
}

impl ParallelStep {
    /// Creates a step running `substeps` concurrently.
    pub fn new(substeps: Vec<Arc<dyn Step>>) -> Self {
        Self { substeps }
    }
}

#[async_trait]
impl Step for ParallelStep {
    async fn perform(&self) -> Result<(), StepError> {
        let mut running = JoinSet::new();
        for step in &self.substeps {
            let step = Arc::clone(step);
            running.spawn(async move { step.perform().await });
        }

        let mut errors = ErrorGroup::new();
        while let Some(result) = running.join_next().await {
            errors.record(joined(result));
        }
        errors.into_result()
    }

    fn cancel(&self) {
        for step in &self.substeps {
            step.cancel();
        }
    }
}
