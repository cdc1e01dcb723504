//! Command execution.
//!
//! [`execute`] runs a resolved command against a response emitter: it
//! checks that the command is callable, validates arguments, installs the
//! encoder the caller asked for, applies the timeout option, invokes the
//! pre-run hook, wraps the emitter through the PostRun stage registered for
//! the emitter's kind, and finally invokes the run function under a panic
//! guard. The emitter is closed on every exit path past the argument
//! check.

use std::any::Any;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::time::Duration;

use tracing::warn;

use crate::command::Command;
use crate::emitter::ResponseEmitter;
use crate::encoding;
use crate::error::{CommandError, Error};
use crate::option::TIMEOUT_OPT;
use crate::request::Request;

/// Tracing target for executor diagnostics.
const EXECUTOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::executor");

/// Executes the request's command against the given emitter.
///
/// Dispatch failures (a command without a run function, an argument
/// mismatch) are returned before the emitter is touched; the transport maps
/// them to its error surface. Failures in the later stages close the
/// emitter before returning. A panic carrying a [`CommandError`] payload is
/// recovered, emitted as the stream's terminal error, and returned; any
/// other panic is re-raised after the emitter is closed.
///
/// # Errors
///
/// Returns [`Error::NotCallable`], [`Error::InvalidArguments`],
/// [`Error::InvalidTimeout`], or the pre-run hook's [`Error::Command`].
pub fn execute(
    req: &mut Request,
    re: Box<dyn ResponseEmitter>,
    env: &dyn Any,
) -> Result<(), Error> {
    let cmd = req.command.clone();
    let Some(run) = cmd.run.clone() else {
        return Err(Error::NotCallable);
    };
    cmd.check_arguments(req)?;

    let mut re = re;
    if let Err(error) = prepare(&cmd, req, re.as_mut(), env) {
        close_quietly(re.as_mut());
        return Err(error);
    }

    let mut re = match cmd.post_run.get(&re.kind()) {
        Some(post_run) => post_run(req, re),
        None => re,
    };

    let outcome = catch_unwind(AssertUnwindSafe(|| run(req, re.as_mut(), env)));
    let result = match outcome {
        Ok(()) => Ok(()),
        Err(payload) => match payload.downcast::<CommandError>() {
            Ok(error) => {
                let error = *error;
                if let Err(emit_error) = re.set_error(error.clone()) {
                    warn!(
                        target: EXECUTOR_TARGET,
                        %error,
                        %emit_error,
                        "recovered command error could not be emitted"
                    );
                }
                Err(Error::Command(error))
            }
            Err(other) => {
                close_quietly(re.as_mut());
                resume_unwind(other);
            }
        },
    };

    close_quietly(re.as_mut());
    result
}

/// Encoder selection, timeout application, and the pre-run hook.
fn prepare(
    cmd: &Command,
    req: &mut Request,
    re: &mut dyn ResponseEmitter,
    env: &dyn Any,
) -> Result<(), Error> {
    if re.as_encoding().is_some() {
        let mut enc_type = req.encoding_type();

        // Use JSON when text was requested but the command has no text
        // encoder of its own.
        if enc_type == encoding::TEXT && !cmd.encoders.contains_key(&encoding::TEXT) {
            enc_type = encoding::JSON;
        }

        let factory = match cmd
            .encoders
            .get(&enc_type)
            .cloned()
            .or_else(|| encoding::default_encoder(&enc_type))
        {
            Some(factory) => factory,
            None => {
                warn!(
                    target: EXECUTOR_TARGET,
                    encoding = %enc_type,
                    "unknown encoding, using json"
                );
                enc_type = encoding::JSON;
                encoding::json_encoder()
            }
        };
        let encoder = factory(req);
        if let Some(ee) = re.as_encoding() {
            ee.set_encoder(enc_type, encoder);
        }
    }

    if let Some(value) = req.options.get(TIMEOUT_OPT) {
        let text = value.as_str().ok_or_else(|| {
            Error::invalid_timeout(value.to_string(), "timeout must be a duration string")
        })?;
        let timeout =
            parse_duration(text).map_err(|message| Error::invalid_timeout(text, message))?;
        req.context = req.context.with_timeout(timeout);
    }

    if let Some(pre_run) = &cmd.pre_run {
        pre_run(req, env).map_err(Error::Command)?;
    }
    Ok(())
}

fn close_quietly(re: &mut dyn ResponseEmitter) {
    match re.close() {
        Ok(()) | Err(Error::Closed) | Err(Error::Cancelled) => {}
        Err(error) => warn!(
            target: EXECUTOR_TARGET,
            %error,
            "failed to close response emitter"
        ),
    }
}

/// Parses a duration string such as `300ms`, `30s`, `5m`, or `2h`.
fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("empty duration string".to_owned());
    }

    let parse = |digits: &str| -> Result<u64, String> {
        digits
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("invalid number {digits:?}"))
    };

    if let Some(digits) = text.strip_suffix("ms") {
        return parse(digits).map(Duration::from_millis);
    }
    if let Some(digits) = text.strip_suffix('s') {
        return parse(digits).map(Duration::from_secs);
    }
    if let Some(digits) = text.strip_suffix('m') {
        return parse(digits).map(|minutes| Duration::from_secs(minutes * 60));
    }
    if let Some(digits) = text.strip_suffix('h') {
        return parse(digits).map(|hours| Duration::from_secs(hours * 3600));
    }
    Err(format!(
        "unrecognised duration {text:?}, expected a form like 300ms, 30s, 5m or 2h"
    ))
}
