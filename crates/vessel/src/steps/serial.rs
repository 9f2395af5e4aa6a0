//! Runs children one after another.

use async_trait::async_trait;
use std::sync::Arc;
use vessel_core::{Step, StepError};

/// Performs each child in order, stopping at the first failure.
///
/// Children after a failing one never start.
#[derive(Debug)]
pub struct SerialStep {
    substeps: Vec<Arc<dyn Step>>,
}

impl SerialStep {
    /// Creates a step running `substeps` in order.
    pub fn new(substeps: Vec<Arc<dyn Step>>) -> Self {
        Self { substeps }
    }
}

#[async_trait]
impl Step for SerialStep {
    async fn perform(&self) -> Result<(), StepError> {
        for step in &self.substeps {
            step.perform().await?;
        }
        Ok(())
    }

    fn cancel(&self) {
        for step in &self.substeps {
            step.cancel();
        }
    }
}
