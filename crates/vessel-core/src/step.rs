//! Step trait.

use crate::error::StepError;
use async_trait::async_trait;
use std::fmt::Debug;

/// A unit of work in an action tree.
///
/// `perform` is called at most once. `cancel` may be called any number of
/// times, from any task, before, during or after `perform`. A step
/// cancelled before it starts must return [`StepError::Cancelled`]
/// without doing any work (composites pass the cancel down instead).
///
/// # Examples
///
/// ```
/// use vessel_core::{Step, StepError};
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
///
/// #[derive(Debug, Default)]
/// struct Sleep {
///     cancel: CancellationToken,
/// }
///
/// #[async_trait]
/// impl Step for Sleep {
///     async fn perform(&self) -> Result<(), StepError> {
///         tokio::select! {
///             _ = self.cancel.cancelled() => Err(StepError::Cancelled),
///             _ = tokio::time::sleep(std::time::Duration::from_millis(10)) => Ok(()),
///         }
///     }
///
///     fn cancel(&self) {
///         self.cancel.cancel();
///     }
/// }
/// ```
#[async_trait]
pub trait Step: Send + Sync + Debug {
    /// Runs the step to completion.
    async fn perform(&self) -> Result<(), StepError>;

    /// Requests that the step stop. Never blocks.
    fn cancel(&self);
}
