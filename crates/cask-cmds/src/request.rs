//! Per-invocation request records.
//!
//! A [`Request`] bundles the resolved command path, the validated option
//! map, positional and file arguments, and the cancellable context. It
//! carries no response state: transports pair every request with a response
//! emitter of their own.

use std::collections::HashMap;
use std::fmt;
use std::io::{Cursor, Read};

use serde_json::Value;

use crate::command::Command;
use crate::context::Context;
use crate::encoding::{self, EncodingType};
use crate::error::Error;
use crate::option::ENC_SHORT;

/// Opaque streamed file argument supplied by a transport.
pub struct FileArgument {
    name: String,
    content: Box<dyn Read + Send>,
}

impl FileArgument {
    /// Wraps a reader as a named file argument.
    pub fn new(name: impl Into<String>, content: Box<dyn Read + Send>) -> Self {
        Self {
            name: name.into(),
            content,
        }
    }

    /// Wraps an in-memory buffer as a named file argument.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::new(name, Box::new(Cursor::new(bytes)))
    }

    /// Returns the argument name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the underlying reader.
    pub fn reader(&mut self) -> &mut (dyn Read + Send) {
        &mut *self.content
    }
}

impl fmt::Debug for FileArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileArgument")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Immutable bundle describing one command invocation.
#[derive(Debug)]
pub struct Request {
    /// Resolved command path, one segment per tree level.
    pub path: Vec<String>,
    /// The terminal command, as resolved (ancestor options included).
    pub command: Command,
    /// Validated options keyed by primary name.
    ///
    /// Unrecognised keys are preserved verbatim: the request constructor
    /// accepts them for forward compatibility, and they take no part in
    /// dispatch.
    pub options: HashMap<String, Value>,
    /// Positional arguments in request order.
    pub arguments: Vec<String>,
    /// Streamed file arguments in request order.
    pub files: Vec<FileArgument>,
    /// Cancellation and deadline state for the invocation.
    pub context: Context,
}

impl Request {
    /// Builds a request, validating and normalising the option map.
    ///
    /// Keys matching a declared option name or alias are normalised to the
    /// option's primary name and their values coerced to the declared kind.
    /// The reserved keys (`enc`, `timeout`) and any unrecognised keys are
    /// accepted unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IncorrectType`] when a recognised option's value is
    /// neither the declared kind nor a parseable string form of it.
    pub fn new(
        context: Context,
        path: Vec<String>,
        options: HashMap<String, Value>,
        arguments: Vec<String>,
        files: Vec<FileArgument>,
        command: Command,
    ) -> Result<Self, Error> {
        let options = convert_options(&command, options)?;
        Ok(Self {
            path,
            command,
            options,
            arguments,
            files,
            context,
        })
    }

    /// Returns the value of an option by its primary name.
    pub fn option(&self, name: &str) -> Option<&Value> {
        self.options.get(name)
    }

    /// Returns the encoding requested by the caller, defaulting to text.
    pub fn encoding_type(&self) -> EncodingType {
        self.options
            .get(ENC_SHORT)
            .and_then(Value::as_str)
            .map(EncodingType::from)
            .unwrap_or(encoding::TEXT)
    }
}

fn convert_options(
    command: &Command,
    options: HashMap<String, Value>,
) -> Result<HashMap<String, Value>, Error> {
    let mut converted = HashMap::with_capacity(options.len());
    for (name, value) in options {
        match command.option_schema(&name) {
            Some(opt) => {
                let primary = opt.primary_name().to_owned();
                let value = opt.convert(value)?;
                converted.insert(primary, value);
            }
            // Reserved and unrecognised keys pass through untouched.
            None => {
                converted.insert(name, value);
            }
        }
    }
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::option::Opt;

    fn beep_boop_command() -> Command {
        Command {
            options: vec![
                Opt::int(&["b", "beep"], "enables beeper"),
                Opt::string(&["B", "boop"], "password for booper"),
            ],
            ..Command::default()
        }
    }

    fn request_with(options: HashMap<String, Value>) -> Result<Request, Error> {
        Request::new(
            Context::background(),
            Vec::new(),
            options,
            Vec::new(),
            Vec::new(),
            beep_boop_command(),
        )
    }

    #[test]
    fn bool_for_int_option_fails() {
        let result = request_with(HashMap::from([("beep".to_owned(), json!(true))]));
        assert!(matches!(result, Err(Error::IncorrectType { .. })));
    }

    #[test]
    fn integer_value_passes() {
        let req = request_with(HashMap::from([("beep".to_owned(), json!(5))]))
            .expect("int option should accept an integer");
        assert_eq!(req.option("b"), Some(&json!(5)));
    }

    #[test]
    fn both_options_by_alias_pass() {
        let req = request_with(HashMap::from([
            ("beep".to_owned(), json!(5)),
            ("boop".to_owned(), json!("test")),
        ]))
        .expect("aliases should normalise");
        assert_eq!(req.option("b"), Some(&json!(5)));
        assert_eq!(req.option("B"), Some(&json!("test")));
    }

    #[test]
    fn short_names_pass() {
        let req = request_with(HashMap::from([
            ("b".to_owned(), json!(5)),
            ("B".to_owned(), json!("test")),
        ]))
        .expect("primary names should validate");
        assert_eq!(req.option("b"), Some(&json!(5)));
    }

    #[test]
    fn unrecognised_keys_are_accepted() {
        let req = request_with(HashMap::from([("foo".to_owned(), json!(5))]))
            .expect("unknown options are accepted for forward compatibility");
        assert_eq!(req.option("foo"), Some(&json!(5)));
    }

    #[test]
    fn reserved_encoding_key_is_accepted() {
        let req = request_with(HashMap::from([(ENC_SHORT.to_owned(), json!("json"))]))
            .expect("the encoding key is reserved by the framework");
        assert_eq!(req.encoding_type(), crate::encoding::JSON);
    }

    #[test]
    fn numeric_string_for_int_option_passes() {
        let req = request_with(HashMap::from([("b".to_owned(), json!("100"))]))
            .expect("numeric strings coerce to int");
        assert_eq!(req.option("b"), Some(&json!(100)));
    }

    #[test]
    fn non_numeric_string_for_int_option_fails() {
        let result = request_with(HashMap::from([("b".to_owned(), json!(":)"))]));
        assert!(matches!(result, Err(Error::IncorrectType { .. })));
    }

    #[test]
    fn encoding_defaults_to_text() {
        let req = request_with(HashMap::new()).expect("empty options");
        assert_eq!(req.encoding_type(), crate::encoding::TEXT);
    }

    #[test]
    fn file_argument_reads_back_its_bytes() {
        let mut file = FileArgument::from_bytes("data", b"block".to_vec());
        let mut contents = Vec::new();
        file.reader()
            .read_to_end(&mut contents)
            .expect("read file argument");
        assert_eq!(contents, b"block");
        assert_eq!(file.name(), "data");
    }
}
