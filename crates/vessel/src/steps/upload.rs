//! Copies a file out of a container to a remote destination.

use super::write_line;
use crate::byte_size::format_byte_size;
use crate::throttle::RateLimiter;
use async_compression::tokio::write::GzipEncoder;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use url::Url;
use vessel_core::{
    ArchiveReader, ContainerStreamer, EmittableError, LogStreamer, Step, StepError, Uploader,
};

/// What to upload and where to send it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadAction {
    /// Path inside the container.
    pub from: String,
    /// Destination URL.
    pub to: String,
    /// User reading the file.
    pub user: String,
    /// Name shown in progress messages. Without one, nothing is written.
    pub artifact: Option<String>,
}

impl UploadAction {
    /// Uploads `from` to `to` as `user`.
    pub fn new(from: impl Into<String>, to: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            user: user.into(),
            artifact: None,
        }
    }

    /// Names the artifact in progress messages.
    pub fn with_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifact = Some(artifact.into());
        self
    }
}

/// Streams a path out of the container, gzips it and uploads it.
///
/// Holds one slot of the shared upload [`RateLimiter`] while transferring.
/// The compressed archive is staged in a temporary directory removed
/// when the step finishes.
#[derive(Debug)]
pub struct UploadStep {
    action: UploadAction,
    container: Arc<dyn ContainerStreamer>,
    uploader: Arc<dyn Uploader>,
    streamer: Arc<dyn LogStreamer>,
    rate_limiter: RateLimiter,
    temp_dir: PathBuf,
    cancel: CancellationToken,
}

impl UploadStep {
    /// Creates an upload step staging archives under `temp_dir`.
    pub fn new(
        action: UploadAction,
        container: Arc<dyn ContainerStreamer>,
        uploader: Arc<dyn Uploader>,
        streamer: Arc<dyn LogStreamer>,
        rate_limiter: RateLimiter,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            action,
            container,
            uploader,
            streamer,
            rate_limiter,
            temp_dir: temp_dir.into(),
            cancel: CancellationToken::new(),
        }
    }

    async fn run(&self) -> Result<(), StepError> {
        let url = Url::parse(&self.action.to).map_err(|source| StepError::InvalidUrl {
            url: self.action.to.clone(),
            source,
        })?;

        let _slot = self.rate_limiter.acquire(&self.cancel).await?;
        info!("acquired-upload-slot");

        if let Some(artifact) = &self.action.artifact {
            write_line(self.streamer.stdout(), &format!("Uploading {}...", artifact));
        }

        match self.transfer(&url).await {
            Ok(size) => {
                info!(size, "upload-complete");
                if let Some(artifact) = &self.action.artifact {
                    write_line(
                        self.streamer.stdout(),
                        &format!("Uploaded {} ({})", artifact, format_byte_size(size)),
                    );
                }
                Ok(())
            }
            Err(err) => {
                if let (Some(artifact), false) = (&self.action.artifact, err.is_cancelled()) {
                    write_line(
                        self.streamer.stderr(),
                        &format!("Failed to upload {}", artifact),
                    );
                }
                Err(err)
            }
        }
    }

    async fn transfer(&self, url: &Url) -> Result<u64, StepError> {
        let streamed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(StepError::Cancelled),
            streamed = self.container.stream_out(&self.action.from, &self.action.user) => streamed,
        };
        let archive = streamed.map_err(|err| {
            error!(error = %err, "failed-to-stream-out");
            EmittableError::wrap(err, "Copying out of the container failed")
        })?;

        let temp_dir = self.temp_dir.clone();
        let workdir = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new().prefix("upload").tempdir_in(temp_dir)
        })
        .await
        .map_err(|err| StepError::Join(err.to_string()))?
        .map_err(|err| {
            error!(error = %err, "failed-to-create-tempdir");
            EmittableError::wrap(err, "Compressing the artifact failed")
        })?;

        let result = self.compress_and_upload(archive, workdir.path(), url).await;
        match tokio::task::spawn_blocking(move || workdir.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "failed-to-remove-tempdir"),
            Err(err) => warn!(error = %err, "failed-to-remove-tempdir"),
        }
        result
    }

    async fn compress_and_upload(
        &self,
        archive: ArchiveReader,
        workdir: &Path,
        url: &Url,
    ) -> Result<u64, StepError> {
        let compressed = workdir.join("compressed.tgz");

        let written = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(StepError::Cancelled),
            written = compress(archive, &compressed) => written,
        };
        let written = written.map_err(|err| {
            error!(error = %err, "failed-to-compress");
            EmittableError::wrap(err, "Compressing the artifact failed")
        })?;
        info!(uncompressed = written, "compressed-artifact");

        let uploaded = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(StepError::Cancelled),
            uploaded = self.uploader.upload(&compressed, url, self.cancel.clone()) => uploaded,
        };
        match uploaded {
            Ok(size) => Ok(size),
            Err(_) if self.cancel.is_cancelled() => Err(StepError::Cancelled),
            Err(err) => {
                error!(error = %err, "failed-to-upload");
                Err(EmittableError::wrap(err, "Uploading failed").into())
            }
        }
    }
}

async fn compress(mut archive: ArchiveReader, destination: &Path) -> io::Result<u64> {
    let file = tokio::fs::File::create(destination).await?;
    let mut encoder = GzipEncoder::new(file);
    let written = tokio::io::copy(&mut archive, &mut encoder).await?;
    encoder.shutdown().await?;
    Ok(written)
}

#[async_trait]
impl Step for UploadStep {
    async fn perform(&self) -> Result<(), StepError> {
        let span = info_span!("upload-step", from = %self.action.from, to = %self.action.to);
        self.run().instrument(span).await
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}
