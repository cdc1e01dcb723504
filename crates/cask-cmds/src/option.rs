//! Option schemas and user-value coercion.
//!
//! Each option declares its names (the first is the primary name, the rest
//! are aliases), a value kind, and an optional default. Request construction
//! normalises alias keys to the primary name and coerces values to the
//! declared kind: a declared `int` accepts integers and base-10 numeric
//! strings, but nothing else.
//!
//! Two option keys are reserved by the framework and accepted on every
//! command without being declared: [`ENC_SHORT`] selects the response
//! encoding and [`TIMEOUT_OPT`] carries a duration string applied by the
//! executor.

use std::sync::Arc;

use serde_json::Value;

use crate::error::Error;

/// Reserved option key selecting the response encoding.
pub const ENC_SHORT: &str = "enc";

/// Reserved option key carrying the request timeout as a duration string.
pub const TIMEOUT_OPT: &str = "timeout";

/// Value kind accepted by an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Bool,
    Int,
    Uint,
    Float,
    String,
}

impl OptionKind {
    /// Returns the kind name used in error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Uint => "uint",
            Self::Float => "float",
            Self::String => "string",
        }
    }
}

/// Immutable option schema shared between the source tree and resolved
/// command copies.
///
/// Cloning an `Opt` is cheap: the schema lives behind an `Arc`, so resolved
/// copies of a command duplicate only the surrounding vector.
#[derive(Debug, Clone)]
pub struct Opt {
    schema: Arc<OptSchema>,
}

#[derive(Debug)]
struct OptSchema {
    names: Vec<String>,
    kind: OptionKind,
    description: String,
    default: Option<Value>,
}

impl Opt {
    /// Declares an option with an explicit kind.
    ///
    /// The first name is the primary name; the rest are aliases. Callers are
    /// expected to pass at least one name.
    pub fn new(kind: OptionKind, names: &[&str], description: impl Into<String>) -> Self {
        Self {
            schema: Arc::new(OptSchema {
                names: names.iter().map(|name| (*name).to_owned()).collect(),
                kind,
                description: description.into(),
                default: None,
            }),
        }
    }

    /// Declares a boolean option.
    pub fn bool(names: &[&str], description: impl Into<String>) -> Self {
        Self::new(OptionKind::Bool, names, description)
    }

    /// Declares a signed integer option.
    pub fn int(names: &[&str], description: impl Into<String>) -> Self {
        Self::new(OptionKind::Int, names, description)
    }

    /// Declares an unsigned integer option.
    pub fn uint(names: &[&str], description: impl Into<String>) -> Self {
        Self::new(OptionKind::Uint, names, description)
    }

    /// Declares a floating point option.
    pub fn float(names: &[&str], description: impl Into<String>) -> Self {
        Self::new(OptionKind::Float, names, description)
    }

    /// Declares a string option.
    pub fn string(names: &[&str], description: impl Into<String>) -> Self {
        Self::new(OptionKind::String, names, description)
    }

    /// Attaches a default value to the schema.
    pub fn with_default(self, default: Value) -> Self {
        let schema = &self.schema;
        Self {
            schema: Arc::new(OptSchema {
                names: schema.names.clone(),
                kind: schema.kind,
                description: schema.description.clone(),
                default: Some(default),
            }),
        }
    }

    /// Returns all names, primary first.
    pub fn names(&self) -> &[String] {
        &self.schema.names
    }

    /// Returns the primary name.
    pub fn primary_name(&self) -> &str {
        self.schema
            .names
            .first()
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Returns true if any of the option's names matches `name`.
    pub fn matches(&self, name: &str) -> bool {
        self.schema.names.iter().any(|candidate| candidate == name)
    }

    /// Returns the declared value kind.
    pub fn kind(&self) -> OptionKind {
        self.schema.kind
    }

    /// Returns the option description.
    pub fn description(&self) -> &str {
        &self.schema.description
    }

    /// Returns the default value, if one was declared.
    pub fn default_value(&self) -> Option<&Value> {
        self.schema.default.as_ref()
    }

    /// Coerces a user-supplied value to the declared kind.
    ///
    /// Values already of the declared kind pass through unchanged. String
    /// values are parsed into the declared kind where the textual form is
    /// unambiguous.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IncorrectType`] when the value is neither the
    /// declared kind nor a parseable string form of it.
    pub fn convert(&self, value: Value) -> Result<Value, Error> {
        let option = self.primary_name();
        let expected = self.kind().as_str();

        match self.kind() {
            OptionKind::Bool => match value {
                Value::Bool(flag) => Ok(Value::Bool(flag)),
                Value::String(text) => match text.to_ascii_lowercase().as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    _ => Err(Error::incorrect_type(option, expected, quoted(&text))),
                },
                other => Err(Error::incorrect_type(option, expected, kind_name(&other))),
            },
            OptionKind::Int => match value {
                Value::Number(number) if number.is_i64() || number.is_u64() => {
                    Ok(Value::Number(number))
                }
                Value::String(text) => text
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| Error::incorrect_type(option, expected, quoted(&text))),
                other => Err(Error::incorrect_type(option, expected, kind_name(&other))),
            },
            OptionKind::Uint => match value {
                Value::Number(number) if number.is_u64() => Ok(Value::Number(number)),
                Value::String(text) => text
                    .parse::<u64>()
                    .map(Value::from)
                    .map_err(|_| Error::incorrect_type(option, expected, quoted(&text))),
                other => Err(Error::incorrect_type(option, expected, kind_name(&other))),
            },
            OptionKind::Float => match value {
                Value::Number(number) => Ok(Value::Number(number)),
                Value::String(text) => text
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| Error::incorrect_type(option, expected, quoted(&text))),
                other => Err(Error::incorrect_type(option, expected, kind_name(&other))),
            },
            OptionKind::String => match value {
                Value::String(text) => Ok(Value::String(text)),
                other => Err(Error::incorrect_type(option, expected, kind_name(&other))),
            },
        }
    }
}

fn kind_name(value: &Value) -> String {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
    .to_owned()
}

fn quoted(text: &str) -> String {
    format!("string {text:?}")
}
