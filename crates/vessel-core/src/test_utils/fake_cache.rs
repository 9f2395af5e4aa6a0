//! FakeCache: serves a fixed artifact and records each fetch.

use super::{ConcurrencyGauge, Gate};
use crate::checksum::ChecksumInfo;
use crate::error::BoxError;
use crate::traits::{CacheClient, FetchedArtifact};
use async_trait::async_trait;
use std::io::Cursor;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Arguments of one `fetch` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    /// Requested URL.
    pub url: String,
    /// Cache key the artifact is stored under.
    pub cache_key: String,
    /// Checksum passed along, if any.
    pub checksum: Option<ChecksumInfo>,
}

/// An in-memory [`CacheClient`].
#[derive(Debug, Default)]
pub struct FakeCache {
    contents: Vec<u8>,
    report_size: bool,
    error: Option<String>,
    gate: Option<Gate>,
    gauge: Option<ConcurrencyGauge>,
    calls: Mutex<Vec<FetchCall>>,
}

impl FakeCache {
    /// A cache serving `contents` and reporting their size.
    pub fn new(contents: impl Into<Vec<u8>>) -> Self {
        Self {
            contents: contents.into(),
            report_size: true,
            ..Self::default()
        }
    }

    /// Reports the artifact size as unknown.
    pub fn without_size(mut self) -> Self {
        self.report_size = false;
        self
    }

    /// Fails every fetch with `message`.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    /// Holds each fetch until `gate` lets it through or the fetch is cancelled.
    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Reports concurrent fetches to `gauge`.
    pub fn with_gauge(mut self, gauge: ConcurrencyGauge) -> Self {
        self.gauge = Some(gauge);
        self
    }

    /// Fetches started so far.
    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of fetches started so far.
    pub fn fetch_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }
}

#[async_trait]
impl CacheClient for FakeCache {
    async fn fetch(
        &self,
        url: &Url,
        cache_key: &str,
        checksum: Option<&ChecksumInfo>,
        cancel: CancellationToken,
    ) -> Result<FetchedArtifact, BoxError> {
        self.calls
            .lock()
            .map_err(|_| "fetch log poisoned")?
            .push(FetchCall {
                url: url.to_string(),
                cache_key: cache_key.to_string(),
                checksum: checksum.cloned(),
            });
        let _running = self.gauge.as_ref().map(|g| g.enter());

        if let Some(gate) = &self.gate {
            tokio::select! {
                _ = cancel.cancelled() => return Err("fetch cancelled".into()),
                _ = gate.pass() => {}
            }
        }
        if let Some(message) = &self.error {
            return Err(message.clone().into());
        }

        Ok(FetchedArtifact {
            archive: Box::new(Cursor::new(self.contents.clone())),
            size: self.report_size.then_some(self.contents.len() as u64),
        })
    }
}
