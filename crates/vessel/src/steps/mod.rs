//! Step implementations.
//!
//! Combinators: [`SerialStep`], [`ParallelStep`], [`CodependentStep`].
//! Decorators: [`TryStep`], [`TimeoutStep`], [`EmitProgressStep`].
//! Leaves: [`MonitorStep`], [`DownloadStep`], [`UploadStep`].

mod codependent;
mod download;
mod emit_progress;
mod monitor;
mod parallel;
mod serial;
mod timeout;
mod try_step;
mod upload;

pub use codependent::CodependentStep;
pub use download::{DownloadAction, DownloadStep};
pub use emit_progress::EmitProgressStep;
pub use monitor::{CheckFactory, HealthState, MonitorStep, MonitorStepBuilder};
pub use parallel::ParallelStep;
pub use serial::SerialStep;
pub use timeout::TimeoutStep;
pub use try_step::TryStep;
pub use upload::{UploadAction, UploadStep};

use std::io::Write;
use tokio::task::JoinError;
use vessel_core::StepError;

/// Flattens the result of a spawned `perform`.
pub(crate) fn joined(result: Result<Result<(), StepError>, JoinError>) -> Result<(), StepError> {
    result.unwrap_or_else(|err| Err(StepError::Join(err.to_string())))
}

/// Writes `line` and a newline to a log stream. Stream failures are ignored.
pub(crate) fn write_line(mut sink: Box<dyn Write + Send + '_>, line: &str) {
    let _ = writeln!(sink, "{}", line);
}
