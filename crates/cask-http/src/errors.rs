//! Status mapping for framework errors.
//!
//! Dispatch failures surface before the response stream starts, so the
//! bridge turns them into plain HTTP error responses: 404 for paths that
//! do not resolve to a callable command, 400 for requests the command
//! schema rejects, and 500 for everything else. Runtime command errors
//! carry their own classification code.

use cask_cmds::{Error, ErrorCode};
use http::StatusCode;

/// Maps a framework error to the status of a pre-stream error response.
pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::UnknownCommand { .. } | Error::NotCallable => StatusCode::NOT_FOUND,
        Error::InvalidArguments { .. }
        | Error::IncorrectType { .. }
        | Error::InvalidTimeout { .. }
        | Error::OptionCollision { .. } => StatusCode::BAD_REQUEST,
        Error::Command(command_error) => match command_error.code {
            ErrorCode::Client => StatusCode::BAD_REQUEST,
            ErrorCode::Normal | ErrorCode::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
        },
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Returns the first line of the error message.
///
/// Error text is echoed into response bodies and the stream error trailer;
/// trimming at the first line break keeps header values valid and avoids
/// multi-line bodies for wrapped errors.
pub fn sanitized_message(error: &Error) -> String {
    let text = error.to_string();
    text.split(['\n', '\r']).next().unwrap_or_default().to_owned()
}

#[cfg(test)]
mod tests {
    use cask_cmds::CommandError;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::unknown_command(Error::unknown_command("bogus"), StatusCode::NOT_FOUND)]
    #[case::not_callable(Error::NotCallable, StatusCode::NOT_FOUND)]
    #[case::bad_arguments(Error::invalid_arguments("missing key"), StatusCode::BAD_REQUEST)]
    #[case::bad_timeout(Error::invalid_timeout("soon", "no unit"), StatusCode::BAD_REQUEST)]
    #[case::client_error(
        Error::Command(CommandError::client("bad block key")),
        StatusCode::BAD_REQUEST
    )]
    #[case::normal_error(
        Error::Command(CommandError::normal("gc already running")),
        StatusCode::INTERNAL_SERVER_ERROR
    )]
    #[case::cancelled(Error::Cancelled, StatusCode::INTERNAL_SERVER_ERROR)]
    fn errors_map_to_their_status(#[case] error: Error, #[case] expected: StatusCode) {
        assert_eq!(status_for(&error), expected);
    }

    #[test]
    fn messages_are_cut_at_the_first_line_break() {
        let error = Error::invalid_arguments("first line\nsecond line");
        assert_eq!(
            sanitized_message(&error),
            "invalid arguments: first line"
        );
    }
}
