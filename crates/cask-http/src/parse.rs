//! HTTP request parsing.
//!
//! The URL path selects the command: each segment is a subcommand name
//! resolved from the root. Query parameters become options, except for the
//! repeated `arg` key which carries positional arguments in order. When
//! the resolved command declares a file argument, a non-empty request body
//! is attached as that file.

use std::collections::HashMap;

use bytes::Bytes;
use http::Uri;
use serde_json::Value;

use cask_cmds::{ArgumentKind, Command, Context, Error, FileArgument, Request};

/// Query key carrying positional arguments.
const ARG_KEY: &str = "arg";

/// Parses an HTTP request into a command request rooted at `root`.
///
/// # Errors
///
/// Returns [`Error::UnknownCommand`] when a path segment does not resolve
/// and [`Error::IncorrectType`] when a query option fails coercion.
pub(crate) fn parse_request(
    context: Context,
    root: &Command,
    uri: &Uri,
    body: Bytes,
) -> Result<Request, Error> {
    let path: Vec<String> = uri
        .path()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_owned)
        .collect();

    let mut chain = root.resolve(&path)?;
    let command = match chain.pop() {
        Some(command) => command,
        None => root.clone(),
    };

    let mut options = HashMap::new();
    let mut arguments = Vec::new();
    if let Some(query) = uri.query() {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if key == ARG_KEY {
                arguments.push(value.into_owned());
            } else {
                options.insert(key.into_owned(), Value::String(value.into_owned()));
            }
        }
    }

    let files = match command
        .arguments
        .iter()
        .find(|argument| argument.kind() == ArgumentKind::File)
    {
        Some(argument) if !body.is_empty() => {
            vec![FileArgument::from_bytes(argument.name(), body.to_vec())]
        }
        _ => Vec::new(),
    };

    Request::new(context, path, options, arguments, files, command)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::io::Read;
    use std::sync::Arc;

    use serde_json::json;

    use cask_cmds::{Argument, Opt};

    use super::*;

    fn fixture_root() -> Command {
        let get = Command {
            arguments: vec![Argument::string("key", "block key").required()],
            options: vec![Opt::int(&["depth", "d"], "link depth")],
            ..Command::default()
        };
        let put = Command {
            arguments: vec![Argument::file("data", "block contents").required()],
            ..Command::default()
        };
        let block = Command {
            subcommands: BTreeMap::from([
                ("get".to_owned(), Arc::new(get)),
                ("put".to_owned(), Arc::new(put)),
            ]),
            ..Command::default()
        };
        Command {
            subcommands: BTreeMap::from([("block".to_owned(), Arc::new(block))]),
            ..Command::default()
        }
    }

    fn uri(text: &str) -> Uri {
        text.parse().expect("test uri")
    }

    #[test]
    fn path_segments_select_the_command() {
        let root = fixture_root();
        let req = parse_request(
            Context::background(),
            &root,
            &uri("/block/get?arg=bafy123"),
            Bytes::new(),
        )
        .expect("parse");

        assert_eq!(req.path, ["block", "get"]);
        assert_eq!(req.arguments, ["bafy123"]);
        assert!(req.files.is_empty());
    }

    #[test]
    fn query_options_are_coerced_to_declared_kinds() {
        let root = fixture_root();
        let req = parse_request(
            Context::background(),
            &root,
            &uri("/block/get?arg=bafy123&depth=3&enc=json"),
            Bytes::new(),
        )
        .expect("parse");

        assert_eq!(req.option("depth"), Some(&json!(3)));
        assert_eq!(req.encoding_type(), cask_cmds::JSON);
    }

    #[test]
    fn bad_option_values_fail_coercion() {
        let root = fixture_root();
        let result = parse_request(
            Context::background(),
            &root,
            &uri("/block/get?arg=bafy123&depth=deep"),
            Bytes::new(),
        );
        assert!(matches!(result, Err(Error::IncorrectType { .. })));
    }

    #[test]
    fn unknown_paths_name_the_failing_segment() {
        let root = fixture_root();
        let result = parse_request(
            Context::background(),
            &root,
            &uri("/block/stat"),
            Bytes::new(),
        );
        match result {
            Err(Error::UnknownCommand { name }) => assert_eq!(name, "stat"),
            other => panic!("expected unknown command, got {other:?}"),
        }
    }

    #[test]
    fn the_body_becomes_the_declared_file_argument() {
        let root = fixture_root();
        let mut req = parse_request(
            Context::background(),
            &root,
            &uri("/block/put"),
            Bytes::from_static(b"raw block"),
        )
        .expect("parse");

        assert_eq!(req.files.len(), 1);
        assert_eq!(req.files[0].name(), "data");
        let mut contents = Vec::new();
        req.files[0]
            .reader()
            .read_to_end(&mut contents)
            .expect("read");
        assert_eq!(contents, b"raw block");
    }

    #[test]
    fn bodies_without_a_file_argument_are_ignored() {
        let root = fixture_root();
        let req = parse_request(
            Context::background(),
            &root,
            &uri("/block/get?arg=bafy123"),
            Bytes::from_static(b"stray"),
        )
        .expect("parse");
        assert!(req.files.is_empty());
    }
}
