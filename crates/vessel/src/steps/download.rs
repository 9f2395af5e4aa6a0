//! Copies an artifact from the cache into a container.

use super::write_line;
use crate::byte_size::format_byte_size;
use crate::throttle::RateLimiter;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use url::Url;
use vessel_core::{
    CacheClient, ChecksumInfo, ContainerStreamer, EmittableError, LogStreamer, Step, StepError,
};

/// What to download and where to put it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadAction {
    /// Source URL.
    pub from: String,
    /// Destination directory inside the container.
    pub to: String,
    /// Key the cache stores the artifact under. Empty disables caching.
    pub cache_key: String,
    /// Expected digest of the artifact.
    pub checksum: Option<ChecksumInfo>,
    /// Owner of the extracted files.
    pub user: String,
    /// Name shown in progress messages. Without one, nothing is written.
    pub artifact: Option<String>,
}

impl DownloadAction {
    /// Downloads `from` into `to` as `user`.
    pub fn new(from: impl Into<String>, to: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            cache_key: String::new(),
            checksum: None,
            user: user.into(),
            artifact: None,
        }
    }

    /// Sets the cache key.
    pub fn with_cache_key(mut self, cache_key: impl Into<String>) -> Self {
        self.cache_key = cache_key.into();
        self
    }

    /// Sets the expected checksum.
    pub fn with_checksum(mut self, checksum: ChecksumInfo) -> Self {
        self.checksum = Some(checksum);
        self
    }

    /// Names the artifact in progress messages.
    pub fn with_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifact = Some(artifact.into());
        self
    }
}

/// Fetches an artifact through the cache and streams it into the container.
///
/// Holds one slot of the shared download [`RateLimiter`] while transferring.
#[derive(Debug)]
pub struct DownloadStep {
    action: DownloadAction,
    container: Arc<dyn ContainerStreamer>,
    cache: Arc<dyn CacheClient>,
    streamer: Arc<dyn LogStreamer>,
    rate_limiter: RateLimiter,
    cancel: CancellationToken,
}

impl DownloadStep {
    /// Creates a download step.
    pub fn new(
        action: DownloadAction,
        container: Arc<dyn ContainerStreamer>,
        cache: Arc<dyn CacheClient>,
        streamer: Arc<dyn LogStreamer>,
        rate_limiter: RateLimiter,
    ) -> Self {
        Self {
            action,
            container,
            cache,
            streamer,
            rate_limiter,
            cancel: CancellationToken::new(),
        }
    }

    async fn run(&self) -> Result<(), StepError> {
        let url = Url::parse(&self.action.from).map_err(|source| StepError::InvalidUrl {
            url: self.action.from.clone(),
            source,
        })?;

        let _slot = self.rate_limiter.acquire(&self.cancel).await?;
        info!("acquired-download-slot");

        if let Some(artifact) = &self.action.artifact {
            write_line(self.streamer.stdout(), &format!("Downloading {}...", artifact));
        }

        match self.transfer(&url).await {
            Ok(size) => {
                info!(size, "download-complete");
                if let Some(artifact) = &self.action.artifact {
                    let message = match size {
                        Some(size) => format!("Downloaded {} ({})", artifact, format_byte_size(size)),
                        None => format!("Downloaded {}", artifact),
                    };
                    write_line(self.streamer.stdout(), &message);
                }
                Ok(())
            }
            Err(err) => {
                if let (Some(artifact), false) = (&self.action.artifact, err.is_cancelled()) {
                    write_line(
                        self.streamer.stderr(),
                        &format!("Failed to download {}", artifact),
                    );
                }
                Err(err)
            }
        }
    }

    async fn transfer(&self, url: &Url) -> Result<Option<u64>, StepError> {
        let fetched = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(StepError::Cancelled),
            fetched = self.cache.fetch(
                url,
                &self.action.cache_key,
                self.action.checksum.as_ref(),
                self.cancel.clone(),
            ) => fetched,
        };
        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(_) if self.cancel.is_cancelled() => return Err(StepError::Cancelled),
            Err(err) => {
                error!(error = %err, "failed-to-fetch");
                return Err(EmittableError::wrap(err, "Downloading failed").into());
            }
        };

        let size = fetched.size;
        let streamed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(StepError::Cancelled),
            streamed = self.container.stream_in(&self.action.to, &self.action.user, fetched.archive) => streamed,
        };
        if let Err(err) = streamed {
            error!(error = %err, "failed-to-stream-in");
            let message = format!("Copying into the container failed: {}", err);
            return Err(EmittableError::wrap(err, message).into());
        }
        Ok(size)
    }
}

#[async_trait]
impl Step for DownloadStep {
    async fn perform(&self) -> Result<(), StepError> {
        let span = info_span!("download-step", from = %self.action.from, to = %self.action.to);
        self.run().instrument(span).await
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::joined;
    use vessel_core::test_utils::{wait_for, BufferStreamer, FakeCache, FakeContainer, Gate};
    use vessel_core::{MAX_EMITTABLE_MESSAGE_LEN, TRUNCATION_MARKER};

    struct Fixture {
        container: Arc<FakeContainer>,
        cache: Arc<FakeCache>,
        streamer: BufferStreamer,
        limiter: RateLimiter,
    }

    impl Fixture {
        fn new(container: FakeContainer, cache: FakeCache) -> Self {
            Self {
                container: Arc::new(container),
                cache: Arc::new(cache),
                streamer: BufferStreamer::new(),
                limiter: RateLimiter::new(2),
            }
        }

        fn step(&self, action: DownloadAction) -> DownloadStep {
            DownloadStep::new(
                action,
                self.container.clone(),
                self.cache.clone(),
                Arc::new(self.streamer.clone()),
                self.limiter.clone(),
            )
        }
    }

    fn droplet() -> DownloadAction {
        DownloadAction::new("https://blobstore.internal/droplet.tgz", "/home/vcap", "vcap")
            .with_cache_key("droplet-abc")
            .with_artifact("droplet")
    }

    #[tokio::test]
    async fn test_downloads_into_container() {
        let fixture = Fixture::new(FakeContainer::new(), FakeCache::new("tarball"));
        let checksum = ChecksumInfo::new("sha256", "deadbeef").expect("valid checksum");
        let step = fixture.step(droplet().with_checksum(checksum.clone()));

        assert!(step.perform().await.is_ok());

        let calls = fixture.cache.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].url, "https://blobstore.internal/droplet.tgz");
        assert_eq!(calls[0].cache_key, "droplet-abc");
        assert_eq!(calls[0].checksum, Some(checksum));

        let streamed = fixture.container.streamed_in();
        assert_eq!(streamed.len(), 1);
        assert_eq!(streamed[0].path, "/home/vcap");
        assert_eq!(streamed[0].user, "vcap");
        assert_eq!(streamed[0].contents, b"tarball");

        assert_eq!(
            fixture.streamer.stdout_text(),
            "Downloading droplet...\nDownloaded droplet (7B)\n"
        );
        assert_eq!(fixture.limiter.available(), 2);
    }

    #[tokio::test]
    async fn test_unknown_size_message() {
        let fixture = Fixture::new(FakeContainer::new(), FakeCache::new("tarball").without_size());
        assert!(fixture.step(droplet()).perform().await.is_ok());
        assert!(fixture.streamer.stdout_text().ends_with("Downloaded droplet\n"));
    }

    #[tokio::test]
    async fn test_no_artifact_writes_nothing() {
        let fixture = Fixture::new(FakeContainer::new(), FakeCache::new("tarball"));
        let action = DownloadAction::new("https://blobstore.internal/lifecycle.tgz", "/tmp/lifecycle", "root");
        assert!(fixture.step(action).perform().await.is_ok());
        assert_eq!(fixture.streamer.stdout_text(), "");
    }

    #[tokio::test]
    async fn test_malformed_url_skips_fetch() {
        let fixture = Fixture::new(FakeContainer::new(), FakeCache::new("tarball"));
        let action = DownloadAction::new("not a url", "/tmp", "vcap");

        let err = fixture.step(action).perform().await.expect_err("bad url");
        assert!(matches!(err, StepError::InvalidUrl { .. }));
        assert_eq!(fixture.cache.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_emittable() {
        let fixture = Fixture::new(FakeContainer::new(), FakeCache::new("").with_error("404 Not Found"));

        let err = fixture.step(droplet()).perform().await.expect_err("fetch failed");
        let emittable = err.as_emittable().expect("emittable error");
        assert_eq!(emittable.message(), "Downloading failed");
        assert_eq!(
            emittable.wrapped_error().map(|e| e.to_string()),
            Some("404 Not Found".to_string())
        );
        assert!(fixture.container.streamed_in().is_empty());
        assert_eq!(fixture.streamer.stderr_text(), "Failed to download droplet\n");
    }

    #[tokio::test]
    async fn test_stream_in_failure_truncated() {
        let fixture = Fixture::new(
            FakeContainer::new().with_stream_in_error("e".repeat(4096)),
            FakeCache::new("tarball"),
        );

        let err = fixture.step(droplet()).perform().await.expect_err("stream-in failed");
        let emittable = err.as_emittable().expect("emittable error");
        assert!(emittable.message().starts_with("Copying into the container failed: eee"));
        assert_eq!(emittable.message().len(), MAX_EMITTABLE_MESSAGE_LEN);
        assert!(emittable.message().ends_with(TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_slot_never_fetches() {
        let fixture = Fixture::new(FakeContainer::new(), FakeCache::new("tarball"));
        let token = CancellationToken::new();
        let _held = (
            fixture.limiter.acquire(&token).await.expect("slot"),
            fixture.limiter.acquire(&token).await.expect("slot"),
        );
        let step = Arc::new(fixture.step(droplet()));

        let running = tokio::spawn({
            let step = Arc::clone(&step);
            async move { step.perform().await }
        });
        tokio::task::yield_now().await;
        step.cancel();

        assert!(matches!(joined(running.await), Err(StepError::Cancelled)));
        assert_eq!(fixture.cache.fetch_count(), 0);
        assert_eq!(fixture.streamer.stderr_text(), "");
    }

    #[tokio::test]
    async fn test_cancel_during_fetch() {
        let fixture = Fixture::new(FakeContainer::new(), FakeCache::new("tarball").with_gate(Gate::new()));
        let step = Arc::new(fixture.step(droplet()));

        let running = tokio::spawn({
            let step = Arc::clone(&step);
            async move { step.perform().await }
        });
        assert!(wait_for(|| fixture.cache.fetch_count() == 1).await);
        step.cancel();

        assert!(matches!(joined(running.await), Err(StepError::Cancelled)));
        assert!(fixture.container.streamed_in().is_empty());
        assert_eq!(fixture.limiter.available(), 2);
    }
}
