//! Narrates a child step to the container's log stream.

use super::write_line;
use async_trait::async_trait;
use std::io::Write;
use std::sync::Arc;
use tracing::{info, info_span, Instrument};
use vessel_core::{LogStreamer, Step, StepError};

/// Writes start, success and failure messages around its child.
///
/// The child's result is returned unchanged.
#[derive(Debug)]
pub struct EmitProgressStep {
    substep: Arc<dyn Step>,
    streamer: Arc<dyn LogStreamer>,
    start_message: Option<String>,
    success_message: Option<String>,
    failure_message: Option<String>,
}

fn non_empty(message: impl Into<String>) -> Option<String> {
    Some(message.into()).filter(|m| !m.is_empty())
}

impl EmitProgressStep {
    /// Wraps `substep`, writing to `streamer`. No messages are set.
    pub fn new(substep: Arc<dyn Step>, streamer: Arc<dyn LogStreamer>) -> Self {
        Self {
            substep,
            streamer,
            start_message: None,
            success_message: None,
            failure_message: None,
        }
    }

    /// Written to stdout before the child starts.
    pub fn with_start_message(mut self, message: impl Into<String>) -> Self {
        self.start_message = non_empty(message);
        self
    }

    /// Written to stdout when the child succeeds.
    pub fn with_success_message(mut self, message: impl Into<String>) -> Self {
        self.success_message = non_empty(message);
        self
    }

    /// Written to stderr when the child fails.
    pub fn with_failure_message(mut self, message: impl Into<String>) -> Self {
        self.failure_message = non_empty(message);
        self
    }

    fn report_failure(&self, err: &StepError) {
        let Some(failure_message) = &self.failure_message else {
            return;
        };

        let mut stderr = self.streamer.stderr();
        let _ = write!(stderr, "{}", failure_message);
        if let Some(emittable) = err.as_emittable() {
            let _ = write!(stderr, ": {}", emittable.message());
            info!(
                wrapped_error = ?emittable.wrapped_error().map(|e| e.to_string()),
                message_emitted = %emittable.message(),
                "errored"
            );
        }
        let _ = writeln!(stderr);
    }
}

#[async_trait]
impl Step for EmitProgressStep {
    async fn perform(&self) -> Result<(), StepError> {
        let span = info_span!("emit-progress-step");
        if let Some(message) = &self.start_message {
            write_line(self.streamer.stdout(), message);
        }

        let result = self.substep.perform().instrument(span.clone()).await;
        match &result {
            Ok(()) => {
                if let Some(message) = &self.success_message {
                    write_line(self.streamer.stdout(), message);
                }
            }
            Err(err) => span.in_scope(|| self.report_failure(err)),
        }
        result
    }

    fn cancel(&self) {
        self.substep.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vessel_core::test_utils::{BufferStreamer, FakeStep};

    fn narrated(child: FakeStep, streamer: &BufferStreamer) -> EmitProgressStep {
        EmitProgressStep::new(Arc::new(child), Arc::new(streamer.clone()))
            .with_start_message("Staging app")
            .with_success_message("Staging complete")
            .with_failure_message("Staging failed")
    }

    #[tokio::test]
    async fn test_success_messages() {
        let streamer = BufferStreamer::new();
        let step = narrated(FakeStep::succeeding(), &streamer);

        assert!(step.perform().await.is_ok());
        assert_eq!(streamer.stdout_text(), "Staging app\nStaging complete\n");
        assert_eq!(streamer.stderr_text(), "");
    }

    #[tokio::test]
    async fn test_plain_failure_message() {
        let streamer = BufferStreamer::new();
        let step = narrated(FakeStep::failing("exit status 1"), &streamer);

        let err = step.perform().await.expect_err("child failed");
        assert_eq!(err.to_string(), "exit status 1");
        assert_eq!(streamer.stdout_text(), "Staging app\n");
        assert_eq!(streamer.stderr_text(), "Staging failed\n");
    }

    #[tokio::test]
    async fn test_emittable_failure_appends_message() {
        let streamer = BufferStreamer::new();
        let step = narrated(FakeStep::emitting("buildpack compile failed"), &streamer);

        let err = step.perform().await.expect_err("child failed");
        assert!(err.as_emittable().is_some());
        assert_eq!(streamer.stderr_text(), "Staging failed: buildpack compile failed\n");
    }

    #[tokio::test]
    async fn test_no_messages_configured() {
        let streamer = BufferStreamer::new();
        let step = EmitProgressStep::new(
            Arc::new(FakeStep::emitting("ignored")),
            Arc::new(streamer.clone()),
        )
        .with_start_message("");

        assert!(step.perform().await.is_err());
        assert_eq!(streamer.stdout_text(), "");
        assert_eq!(streamer.stderr_text(), "");
    }

    #[tokio::test]
    async fn test_cancel_forwards() {
        let streamer = BufferStreamer::new();
        let child = Arc::new(FakeStep::succeeding());
        let step = EmitProgressStep::new(child.clone(), Arc::new(streamer));

        step.cancel();
        assert_eq!(child.cancel_count(), 1);
        assert!(step.perform().await.unwrap_err().is_cancelled());
    }
}
