//! Error types for command dispatch and response streaming.
//!
//! Two layers of errors exist. [`CommandError`] is the structured, wire-visible
//! error a command reports to its caller: a message plus a coarse
//! classification code. [`Error`] is the framework-level error surfaced by
//! request construction, tree resolution, emitters, and the executor. The
//! cancellation sentinel is a dedicated [`Error::Cancelled`] variant so that
//! callers can match on it instead of comparing strings.

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a command error as seen by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCode {
    /// Expected failure of the command itself.
    Normal,
    /// The client sent a request the command cannot serve.
    Client,
    /// The daemon is in a state where it cannot continue serving.
    Fatal,
}

/// Structured error emitted by a running command.
///
/// Command errors travel through response emitters like values do: an emitter
/// in the open state accepts one terminal command error, after which the
/// stream is closed in the error state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandError {
    /// Human-readable description of the failure.
    pub message: String,
    /// Classification used by transports to pick a status code.
    pub code: ErrorCode,
}

impl CommandError {
    /// Creates a command error with an explicit code.
    pub fn new(message: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }

    /// Creates an expected command failure.
    pub fn normal(message: impl Into<String>) -> Self {
        Self::new(message, ErrorCode::Normal)
    }

    /// Creates a client-caused command failure.
    pub fn client(message: impl Into<String>) -> Self {
        Self::new(message, ErrorCode::Client)
    }

    /// Creates a fatal daemon-side failure.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(message, ErrorCode::Fatal)
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CommandError {}

/// Errors surfaced by the command dispatch framework.
#[derive(Debug, Error)]
pub enum Error {
    /// The request context was cancelled or its deadline passed.
    ///
    /// This is the cancellation sentinel: it is never wrapped in another
    /// variant, and cancellation is never reported as a runtime command
    /// error.
    #[error("request context cancelled")]
    Cancelled,

    /// The producer closed the stream without an error.
    #[error("end of response stream")]
    EndOfStream,

    /// An emitter method was called after the emitter reached a terminal
    /// state.
    #[error("response emitter is closed")]
    Closed,

    /// The length hint was set after the first value was emitted.
    #[error("length must be set before the first emitted value")]
    LateLength,

    /// A path segment did not name a subcommand at its depth.
    #[error("command not found: {name}")]
    UnknownCommand { name: String },

    /// The resolved command has no run function.
    #[error("this command cannot be called directly; try one of its subcommands")]
    NotCallable,

    /// Two commands along a path share an option name or alias.
    #[error("option name collision: {name}")]
    OptionCollision { name: String },

    /// An option value does not match the declared option type.
    #[error("incorrect type for option '{option}': expected {expected}, got {actual}")]
    IncorrectType {
        option: String,
        expected: &'static str,
        actual: String,
    },

    /// Positional or file arguments do not satisfy the command's schema.
    #[error("invalid arguments: {message}")]
    InvalidArguments { message: String },

    /// The timeout option could not be parsed as a duration.
    #[error("invalid timeout '{value}': {message}")]
    InvalidTimeout { value: String, message: String },

    /// A command reported a structured error.
    #[error("{0}")]
    Command(#[from] CommandError),

    /// A value could not be serialized by the selected encoder.
    #[error("failed to encode response value: {0}")]
    Encode(#[from] serde_json::Error),

    /// IO failure while writing an encoded value.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Creates an unknown command error for the given path segment.
    pub fn unknown_command(name: impl Into<String>) -> Self {
        Self::UnknownCommand { name: name.into() }
    }

    /// Creates an option collision error.
    pub fn option_collision(name: impl Into<String>) -> Self {
        Self::OptionCollision { name: name.into() }
    }

    /// Creates an incorrect type error for an option value.
    pub fn incorrect_type(
        option: impl Into<String>,
        expected: &'static str,
        actual: impl Into<String>,
    ) -> Self {
        Self::IncorrectType {
            option: option.into(),
            expected,
            actual: actual.into(),
        }
    }

    /// Creates an invalid arguments error.
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            message: message.into(),
        }
    }

    /// Creates an invalid timeout error.
    pub fn invalid_timeout(value: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidTimeout {
            value: value.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error is the cancellation sentinel.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns true if this error marks the normal end of a stream.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_error_round_trips_through_json() {
        let error = CommandError::client("bad origin");
        let json = serde_json::to_string(&error).expect("serialize");
        assert!(json.contains(r#""code":"client""#));

        let back: CommandError = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, error);
    }

    #[test]
    fn cancellation_sentinel_is_distinguishable() {
        let error = Error::Cancelled;
        assert!(error.is_cancelled());
        assert!(!Error::EndOfStream.is_cancelled());
        assert!(!Error::Command(CommandError::normal("boom")).is_cancelled());
    }

    #[test]
    fn incorrect_type_names_the_option() {
        let error = Error::incorrect_type("beep", "int", "bool");
        assert_eq!(
            error.to_string(),
            "incorrect type for option 'beep': expected int, got bool"
        );
    }
}
