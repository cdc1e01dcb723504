//! HTTP bridge for the cask command dispatch framework.
//!
//! The bridge maps the command pipeline from `cask-cmds` onto long-lived
//! chunked HTTP responses: URL paths select commands, query parameters
//! carry options and arguments, and each emitted value becomes one chunk
//! of the response body. Response headers are written lazily on the first
//! value so the command still controls the Content-Type and the advisory
//! length hint; errors raised mid-stream travel as an `X-Stream-Error`
//! trailer.
//!
//! Client disconnects cancel the request context, so a long-running
//! command observes the [`cask_cmds::Error::Cancelled`] sentinel instead
//! of writing into a dead socket.

mod config;
mod errors;
mod handler;
mod parse;
mod response;

pub use config::ServerConfig;
pub use errors::{sanitized_message, status_for};
pub use handler::{api_version_matches, router, Environment};
pub use response::{X_CHUNKED_OUTPUT, X_CONTENT_LENGTH, X_STREAM_ERROR, X_STREAM_OUTPUT};
