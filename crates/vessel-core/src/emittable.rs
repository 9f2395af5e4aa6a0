//! Errors with a user-facing message.

use crate::error::BoxError;
use std::fmt;

/// Longest message, in bytes, an [`EmittableError`] will render.
pub const MAX_EMITTABLE_MESSAGE_LEN: usize = 1024;

/// Suffix appended to messages cut down to [`MAX_EMITTABLE_MESSAGE_LEN`].
pub const TRUNCATION_MARKER: &str = "... (truncated)";

/// A failure whose message is streamed to the container's output.
///
/// The rendered message is kept apart from the wrapped cause: the
/// message goes to the end user, the cause only to structured logs.
///
/// # Examples
///
/// ```
/// use vessel_core::EmittableError;
///
/// let err = EmittableError::wrap(std::io::Error::other("EPIPE"), "Copying failed");
/// assert_eq!(err.to_string(), "Copying failed");
/// assert_eq!(err.wrapped_error().map(|e| e.to_string()), Some("EPIPE".to_string()));
/// ```
#[derive(Debug)]
pub struct EmittableError {
    message: String,
    wrapped: Option<BoxError>,
}

impl EmittableError {
    /// Creates an error with no underlying cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: truncate_message(message.into()),
            wrapped: None,
        }
    }

    /// Creates an error wrapping `cause`.
    pub fn wrap(cause: impl Into<BoxError>, message: impl Into<String>) -> Self {
        Self {
            message: truncate_message(message.into()),
            wrapped: Some(cause.into()),
        }
    }

    /// The message shown to the end user.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The internal cause, if any.
    pub fn wrapped_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.wrapped.as_deref()
    }
}

impl fmt::Display for EmittableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for EmittableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.wrapped
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Cuts `message` to [`MAX_EMITTABLE_MESSAGE_LEN`] bytes, ending in [`TRUNCATION_MARKER`].
///
/// The cut never splits a UTF-8 character.
pub fn truncate_message(message: String) -> String {
    if message.len() <= MAX_EMITTABLE_MESSAGE_LEN {
        return message;
    }
    let mut cut = MAX_EMITTABLE_MESSAGE_LEN - TRUNCATION_MARKER.len();
    while !message.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut truncated = String::with_capacity(MAX_EMITTABLE_MESSAGE_LEN);
    truncated.push_str(&message[..cut]);
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}
