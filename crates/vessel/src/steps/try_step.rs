//! Best-effort wrapper.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, info_span, Instrument};
use vessel_core::{Step, StepError};

/// Performs its child and reports success no matter what.
///
/// Failures are logged, never returned.
#[derive(Debug)]
pub struct TryStep {
    substep: Arc<dyn Step>,
}

impl TryStep {
    /// Wraps `substep`.
    pub fn new(substep: Arc<dyn Step>) -> Self {
        Self { substep }
    }
}

#[async_trait]
impl Step for TryStep {
    async fn perform(&self) -> Result<(), StepError> {
        let span = info_span!("try-step");
        if let Err(err) = self.substep.perform().instrument(span.clone()).await {
            span.in_scope(|| info!(action = "failed", error = %err, "try-step"));
        }
        Ok(())
    }

    fn cancel(&self) {
        self.substep.cancel();
    }
}
