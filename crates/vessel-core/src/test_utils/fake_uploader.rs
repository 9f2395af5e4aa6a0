//! FakeUploader: reads the uploaded file into memory.

use super::{ConcurrencyGauge, Gate};
use crate::error::BoxError;
use crate::traits::Uploader;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

/// One completed `upload` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCall {
    /// Destination URL.
    pub to: String,
    /// Bytes of the uploaded file.
    pub contents: Vec<u8>,
}

/// An in-memory [`Uploader`].
#[derive(Debug, Default)]
pub struct FakeUploader {
    error: Option<String>,
    gate: Option<Gate>,
    gauge: Option<ConcurrencyGauge>,
    started: Mutex<usize>,
    uploads: Mutex<Vec<UploadCall>>,
}

impl FakeUploader {
    /// An uploader accepting every file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every upload with `message`.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    /// Holds each upload until `gate` lets it through or it is cancelled.
    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Reports concurrent uploads to `gauge`.
    pub fn with_gauge(mut self, gauge: ConcurrencyGauge) -> Self {
        self.gauge = Some(gauge);
        self
    }

    /// Number of uploads started so far.
    pub fn started_count(&self) -> usize {
        self.started.lock().map(|n| *n).unwrap_or_default()
    }

    /// Uploads completed so far.
    pub fn uploads(&self) -> Vec<UploadCall> {
        self.uploads.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Uploader for FakeUploader {
    async fn upload(
        &self,
        local_path: &Path,
        to: &Url,
        cancel: CancellationToken,
    ) -> Result<u64, BoxError> {
        *self.started.lock().map_err(|_| "upload log poisoned")? += 1;
        let _running = self.gauge.as_ref().map(|g| g.enter());

        if let Some(gate) = &self.gate {
            tokio::select! {
                _ = cancel.cancelled() => return Err("upload cancelled".into()),
                _ = gate.pass() => {}
            }
        }
        if let Some(message) = &self.error {
            return Err(message.clone().into());
        }

        let contents = tokio::fs::read(local_path).await?;
        let size = contents.len() as u64;
        self.uploads
            .lock()
            .map_err(|_| "upload log poisoned")?
            .push(UploadCall {
                to: to.to_string(),
                contents,
            });
        Ok(size)
    }
}
