//! A step interpreter for container actions.
//!
//! An action tree is assembled from [`Step`]s once, performed once from
//! its root, and may be cancelled at any time from another task.
//! Cancellation reaches every step that is still running.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use vessel::prelude::*;
//!
//! let throttles = Throttles::from_config(&InterpreterConfig::default())?;
//! let setup = DownloadStep::new(
//!     DownloadAction::new("https://blobstore/droplet.tgz", "/home/vcap", "vcap")
//!         .with_artifact("droplet"),
//!     container.clone(),
//!     cache,
//!     streamer.clone(),
//!     throttles.downloads.clone(),
//! );
//! let root = SerialStep::new(vec![
//!     Arc::new(TimeoutStep::new(Arc::new(setup), Duration::from_secs(60))),
//!     Arc::new(CodependentStep::new(vec![process, monitor], true)),
//! ]);
//!
//! match root.perform().await {
//!     Err(err) if err.is_cancelled() => {}
//!     other => other?,
//! }
//! ```

mod byte_size;
mod clock;
mod config;
mod steps;
mod throttle;

// Re-export core types
pub use vessel_core::*;

pub use byte_size::format_byte_size;
pub use clock::TokioClock;
pub use config::{ConfigError, InterpreterConfig};
pub use steps::{
    CheckFactory, CodependentStep, DownloadAction, DownloadStep, EmitProgressStep, HealthState,
    MonitorStep, MonitorStepBuilder, ParallelStep, SerialStep, TimeoutStep, TryStep, UploadAction,
    UploadStep,
};
pub use throttle::{RateLimitSlot, RateLimiter, Throttles, WorkPool};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        CacheClient, CancellationToken, ChecksumInfo, Clock, CodependentStep, ContainerStreamer,
        DownloadAction, DownloadStep, EmitProgressStep, EmittableError, ErrorGroup,
        InterpreterConfig, LogStreamer, MonitorStep, ParallelStep, RateLimiter, SerialStep, Step,
        StepError, Throttles, TimeoutStep, TryStep, UploadAction, UploadStep, Uploader, WorkPool,
    };
}
