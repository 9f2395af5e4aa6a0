//! Core contract and types for the vessel step interpreter.
//!
//! This crate has no runtime behavior of its own. Step implementations
//! and anything assembling action trees depend on it.
//!
//! # Core Types
//!
//! - [`Step`] - The `perform`/`cancel` contract every step implements
//! - [`StepError`] - Error returned by a step, including cancellation
//! - [`EmittableError`] - Failure carrying a user-facing message
//! - [`ErrorGroup`] - Failures collected from concurrent children
//! - [`ChecksumInfo`] - Expected digest of a downloaded artifact
//!
//! # Collaborators
//!
//! - [`ContainerStreamer`], [`CacheClient`], [`Uploader`] - transfer backends
//! - [`LogStreamer`] - the container's stdout/stderr
//! - [`Clock`] - time source for waiting steps

mod checksum;
mod emittable;
mod error;
mod step;
mod traits;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use checksum::{ChecksumAlgorithm, ChecksumInfo};
pub use emittable::{
    truncate_message, EmittableError, MAX_EMITTABLE_MESSAGE_LEN, TRUNCATION_MARKER,
};
pub use error::{BoxError, ErrorGroup, StepError};
pub use step::Step;
pub use traits::{
    ArchiveReader, CacheClient, Clock, ContainerStreamer, FetchedArtifact, LogStreamer, Uploader,
};

/// Re-exported so implementors share one token type.
pub use tokio_util::sync::CancellationToken;
