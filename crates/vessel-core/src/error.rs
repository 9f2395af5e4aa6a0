//! Step error types.

use crate::emittable::EmittableError;
use std::fmt;
use thiserror::Error;

/// Opaque error produced by a collaborator (container backend, cache, uploader).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by [`Step::perform`](crate::Step::perform).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StepError {
    /// The step was aborted through [`Step::cancel`](crate::Step::cancel).
    ///
    /// This is not a failure and should not be reported to end users.
    #[error("cancelled")]
    Cancelled,

    /// A failure with a message meant for the container's log stream.
    #[error(transparent)]
    Emittable(#[from] EmittableError),

    /// Failures collected from concurrently running children.
    #[error(transparent)]
    Multiple(#[from] ErrorGroup),

    /// A codependent child finished without error while it was expected to run forever.
    #[error("codependent step exited")]
    CodependentStepExited,

    /// An action referenced a URL that could not be parsed.
    #[error("invalid url '{url}': {source}")]
    InvalidUrl {
        /// The rejected input.
        url: String,
        /// Why it was rejected.
        #[source]
        source: url::ParseError,
    },

    /// An action carried an unusable checksum.
    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),

    /// A spawned child task panicked or was aborted.
    #[error("step task failed: {0}")]
    Join(String),

    /// Collaborator error passed through unchanged.
    #[error(transparent)]
    Other(BoxError),
}

impl StepError {
    /// Wraps an arbitrary collaborator error.
    pub fn other(err: impl Into<BoxError>) -> Self {
        StepError::Other(err.into())
    }

    /// Returns `true` if the step was cancelled rather than failing.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StepError::Cancelled)
    }

    /// Returns the emittable error, if this is one.
    pub fn as_emittable(&self) -> Option<&EmittableError> {
        match self {
            StepError::Emittable(e) => Some(e),
            _ => None,
        }
    }
}

/// Collects errors from several children.
///
/// Recording an `Ok` result is a no-op, so an empty group means
/// every child succeeded.
#[derive(Debug, Default)]
pub struct ErrorGroup {
    errors: Vec<StepError>,
}

impl ErrorGroup {
    /// Creates an empty group.
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Adds an error to the group.
    pub fn push(&mut self, err: StepError) {
        self.errors.push(err);
    }

    /// Adds the error of `result`, if any.
    pub fn record(&mut self, result: Result<(), StepError>) {
        if let Err(err) = result {
            self.push(err);
        }
    }

    /// Returns the number of collected errors.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Returns `true` if nothing failed.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns an iterator over the collected errors.
    pub fn iter(&self) -> impl Iterator<Item = &StepError> {
        self.errors.iter()
    }

    /// Consumes the group, returning the collected errors.
    pub fn into_errors(self) -> Vec<StepError> {
        self.errors
    }

    /// `Ok(())` if the group is empty, otherwise [`StepError::Multiple`].
    pub fn into_result(self) -> Result<(), StepError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(StepError::Multiple(self))
        }
    }
}

impl fmt::Display for ErrorGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.len() {
            1 => write!(f, "1 error occurred:")?,
            n => write!(f, "{} errors occurred:", n)?,
        }
        for err in &self.errors {
            write!(f, "\n* {}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorGroup {}

impl FromIterator<StepError> for ErrorGroup {
    fn from_iter<I: IntoIterator<Item = StepError>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}
