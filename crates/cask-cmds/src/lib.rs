//! Command dispatch framework for the cask daemon.
//!
//! The daemon exposes its RPC surface as a tree of named commands. This
//! crate owns that tree and the machinery for invoking it: requests bundle
//! a resolved path, validated options, and a cancellable context; response
//! emitters stream typed values back to the transport; the executor wires
//! the two together, applying encoder selection, timeouts, hooks, and
//! panic containment.
//!
//! Transports sit on either side of the core. A command line client drives
//! the [`WriterResponseEmitter`]; the HTTP bridge (in `cask-http`) builds
//! its own emitter on the same contract; in-process pipelines use
//! [`channel_response_pair`] to connect a producer stage to a consumer.
//!
//! ## Streaming model
//!
//! A run function emits any number of values and ends the stream exactly
//! once, either with [`ResponseEmitter::close`] or with a terminal
//! [`ResponseEmitter::set_error`]. PostRun stages splice into this pipe: a
//! stage registered for the active emitter kind receives the transport's
//! emitter and hands the run function a fresh one, transforming values in
//! between on its own thread. Cancellation flows from the request
//! [`Context`] and unblocks both sides of every channel pair with the
//! [`Error::Cancelled`] sentinel.

mod argument;
mod chan;
mod command;
mod context;
mod emitter;
mod encoding;
mod error;
mod executor;
mod helptext;
mod option;
mod request;
mod writer;

#[cfg(test)]
mod test_support;

pub use argument::{Argument, ArgumentKind};
pub use chan::{channel_response_pair, ChanResponse, ChanResponseEmitter};
pub use command::{Command, PostRunFn, PostRunMap, PreRunFn, RunFn};
pub use context::{Canceller, Context};
pub use emitter::{EmitterKind, EncodingEmitter, ResponseEmitter};
pub use encoding::{
    default_encoder, json_encoder, text_encoder, Encoder, EncoderFactory, EncodingType,
};
pub use encoding::{CLI, JSON, PROTOBUF, TEXT, XML};
pub use error::{CommandError, Error, ErrorCode};
pub use executor::execute;
pub use helptext::HelpText;
pub use option::{Opt, OptionKind, ENC_SHORT, TIMEOUT_OPT};
pub use request::{FileArgument, Request};
