//! FakeContainer: records archives streamed in and serves a fixed archive out.

use super::{ConcurrencyGauge, Gate};
use crate::error::BoxError;
use crate::traits::{ArchiveReader, ContainerStreamer};
use async_trait::async_trait;
use std::io::Cursor;
use std::sync::Mutex;
use tokio::io::AsyncReadExt;

/// One completed `stream_in` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamedIn {
    /// Destination inside the container.
    pub path: String,
    /// Owner of the extracted files.
    pub user: String,
    /// Bytes of the archive.
    pub contents: Vec<u8>,
}

/// An in-memory [`ContainerStreamer`].
#[derive(Debug, Default)]
pub struct FakeContainer {
    streamed_in: Mutex<Vec<StreamedIn>>,
    stream_in_error: Option<String>,
    stream_out_contents: Vec<u8>,
    stream_out_error: Option<String>,
    gate: Option<Gate>,
    gauge: Option<ConcurrencyGauge>,
}

impl FakeContainer {
    /// A container accepting every archive and streaming out nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every `stream_in` with `message`.
    pub fn with_stream_in_error(mut self, message: impl Into<String>) -> Self {
        self.stream_in_error = Some(message.into());
        self
    }

    /// Serves `contents` from `stream_out`.
    pub fn with_stream_out(mut self, contents: impl Into<Vec<u8>>) -> Self {
        self.stream_out_contents = contents.into();
        self
    }

    /// Fails every `stream_out` with `message`.
    pub fn with_stream_out_error(mut self, message: impl Into<String>) -> Self {
        self.stream_out_error = Some(message.into());
        self
    }

    /// Holds each `stream_in` until `gate` lets it through.
    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Reports concurrent `stream_in` calls to `gauge`.
    pub fn with_gauge(mut self, gauge: ConcurrencyGauge) -> Self {
        self.gauge = Some(gauge);
        self
    }

    /// Archives received so far.
    pub fn streamed_in(&self) -> Vec<StreamedIn> {
        self.streamed_in
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ContainerStreamer for FakeContainer {
    async fn stream_in(
        &self,
        path: &str,
        user: &str,
        mut archive: ArchiveReader,
    ) -> Result<(), BoxError> {
        let _running = self.gauge.as_ref().map(|g| g.enter());
        if let Some(gate) = &self.gate {
            gate.pass().await;
        }
        if let Some(message) = &self.stream_in_error {
            return Err(message.clone().into());
        }

        let mut contents = Vec::new();
        archive.read_to_end(&mut contents).await?;
        self.streamed_in
            .lock()
            .map_err(|_| "stream-in log poisoned")?
            .push(StreamedIn {
                path: path.to_string(),
                user: user.to_string(),
                contents,
            });
        Ok(())
    }

    async fn stream_out(&self, _path: &str, _user: &str) -> Result<ArchiveReader, BoxError> {
        if let Some(message) = &self.stream_out_error {
            return Err(message.clone().into());
        }
        Ok(Box::new(Cursor::new(self.stream_out_contents.clone())))
    }
}
