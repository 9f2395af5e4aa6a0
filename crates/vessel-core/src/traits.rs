//! Collaborator traits consumed by the steps.
//!
//! Implementations live outside this workspace: the container backend,
//! the artifact cache, the upload transport and the log sink.

use crate::checksum::ChecksumInfo;
use crate::error::BoxError;
use async_trait::async_trait;
use std::fmt::{self, Debug};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// A tar stream moving into or out of a container.
pub type ArchiveReader = Box<dyn AsyncRead + Send + Unpin>;

/// Moves tar archives into and out of a container.
#[async_trait]
pub trait ContainerStreamer: Send + Sync + Debug {
    /// Extracts `archive` at `path` inside the container, owned by `user`.
    async fn stream_in(&self, path: &str, user: &str, archive: ArchiveReader)
        -> Result<(), BoxError>;

    /// Returns `path` from inside the container as a tar stream.
    async fn stream_out(&self, path: &str, user: &str) -> Result<ArchiveReader, BoxError>;
}

/// An artifact returned by a [`CacheClient`].
pub struct FetchedArtifact {
    /// Tar stream of the artifact.
    pub archive: ArchiveReader,
    /// Size in bytes, when the cache knows it.
    pub size: Option<u64>,
}

impl Debug for FetchedArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchedArtifact")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Downloads artifacts, serving repeated requests from a local cache.
#[async_trait]
pub trait CacheClient: Send + Sync + Debug {
    /// Fetches `url`, verifying `checksum` when given.
    ///
    /// Implementations must abort promptly once `cancel` fires.
    async fn fetch(
        &self,
        url: &Url,
        cache_key: &str,
        checksum: Option<&ChecksumInfo>,
        cancel: CancellationToken,
    ) -> Result<FetchedArtifact, BoxError>;
}

/// Sends a local file to a remote destination.
#[async_trait]
pub trait Uploader: Send + Sync + Debug {
    /// Uploads `local_path` to `to`, returning the number of bytes sent.
    ///
    /// Implementations must abort promptly once `cancel` fires.
    async fn upload(
        &self,
        local_path: &Path,
        to: &Url,
        cancel: CancellationToken,
    ) -> Result<u64, BoxError>;
}

/// The container's user-visible output streams.
pub trait LogStreamer: Send + Sync + Debug {
    /// Sink for informational messages.
    fn stdout(&self) -> Box<dyn Write + Send + '_>;

    /// Sink for failure messages.
    fn stderr(&self) -> Box<dyn Write + Send + '_>;
}

/// Source of time for steps that wait.
#[async_trait]
pub trait Clock: Send + Sync + Debug {
    /// The current instant.
    fn now(&self) -> Instant;

    /// Completes once `duration` has elapsed.
    async fn sleep(&self, duration: Duration);
}
