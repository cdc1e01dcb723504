//! Response emitter contract.
//!
//! An emitter is a single-producer sink of typed values with a length hint,
//! an error channel, and a close signal. Every variant honours the same
//! state machine: values may only be emitted while the emitter is open, the
//! length hint must precede the first value, and exactly one terminal
//! transition (`close` or `set_error`) happens on every exit path.
//!
//! Emitters carry an [`EmitterKind`] tag stamped at construction; the
//! executor keys PostRun stages off this tag. Emitters that serialize
//! values expose the [`EncodingEmitter`] capability through
//! [`ResponseEmitter::as_encoding`] so the executor can install the encoder
//! selected for the request.

use serde_json::Value;

use crate::encoding::{Encoder, EncodingType};
use crate::error::{CommandError, Error};

/// Identifies the concrete emitter implementation.
///
/// PostRun maps key off this tag, so a command can register different
/// post-processing stages for the channel, writer, command line, and HTTP
/// transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmitterKind {
    /// In-process channel pair emitter.
    Channel,
    /// Emitter serializing through an encoder into a byte sink.
    Writer,
    /// Writer emitter driving a terminal.
    Cli,
    /// Emitter streaming a chunked HTTP response.
    Http,
}

/// Single-producer sink for typed response values.
pub trait ResponseEmitter: Send {
    /// Emits one value to the consumer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] after a terminal transition and
    /// [`Error::Cancelled`] when the request context fires while the value
    /// is pending.
    fn emit(&mut self, value: Value) -> Result<(), Error>;

    /// Advertises how many values the stream will carry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LateLength`] once a value has been emitted and
    /// [`Error::Closed`] after a terminal transition.
    fn set_length(&mut self, length: u64) -> Result<(), Error>;

    /// Terminates the stream with a structured error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the emitter already reached a terminal
    /// state.
    fn set_error(&mut self, error: CommandError) -> Result<(), Error>;

    /// Closes the stream normally.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the emitter already reached a terminal
    /// state.
    fn close(&mut self) -> Result<(), Error>;

    /// Returns the kind tag stamped at construction.
    fn kind(&self) -> EmitterKind;

    /// Returns the encoding capability when the emitter serializes values.
    fn as_encoding(&mut self) -> Option<&mut dyn EncodingEmitter> {
        None
    }
}

/// Capability of emitters that serialize values through an encoder.
pub trait EncodingEmitter {
    /// Replaces the encoder before the first value is emitted.
    fn set_encoder(&mut self, encoding: EncodingType, encoder: Box<dyn Encoder>);
}

/// Lifecycle state shared by emitter implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EmitterState {
    Open,
    ClosedOk,
    ClosedError,
}

impl EmitterState {
    /// Returns `Err(Error::Closed)` unless the emitter is still open.
    pub(crate) fn ensure_open(self) -> Result<(), Error> {
        match self {
            Self::Open => Ok(()),
            Self::ClosedOk | Self::ClosedError => Err(Error::Closed),
        }
    }
}
