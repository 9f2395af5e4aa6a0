//! BufferStreamer: captures the container's output in memory.

use crate::traits::LogStreamer;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// A [`LogStreamer`] writing into shared byte buffers.
#[derive(Debug, Clone, Default)]
pub struct BufferStreamer {
    stdout: Arc<Mutex<Vec<u8>>>,
    stderr: Arc<Mutex<Vec<u8>>>,
}

impl BufferStreamer {
    /// Creates empty buffers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written to stdout so far.
    pub fn stdout_text(&self) -> String {
        read_lossy(&self.stdout)
    }

    /// Everything written to stderr so far.
    pub fn stderr_text(&self) -> String {
        read_lossy(&self.stderr)
    }
}

fn read_lossy(buffer: &Mutex<Vec<u8>>) -> String {
    buffer
        .lock()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

struct BufferWriter<'a>(&'a Mutex<Vec<u8>>);

impl Write for BufferWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut bytes = self
            .0
            .lock()
            .map_err(|_| io::Error::other("log buffer poisoned"))?;
        bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LogStreamer for BufferStreamer {
    fn stdout(&self) -> Box<dyn Write + Send + '_> {
        Box::new(BufferWriter(&self.stdout))
    }

    fn stderr(&self) -> Box<dyn Write + Send + '_> {
        Box::new(BufferWriter(&self.stderr))
    }
}
