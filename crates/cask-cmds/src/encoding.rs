//! Encoding tags and value encoders.
//!
//! An [`EncodingType`] is an opaque tag identifying a wire format; the
//! reserved tags cover the formats the daemon speaks. Encoders turn emitted
//! values into bytes and are registered per command or in the process-wide
//! default table. The default table carries JSON and Text; the remaining
//! reserved tags are claimed by external encoder crates.

use std::borrow::Cow;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Error;
use crate::request::Request;

/// Opaque tag identifying a wire format. Tags compare by equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncodingType(Cow<'static, str>);

/// Plain-text encoding.
pub const TEXT: EncodingType = EncodingType(Cow::Borrowed("text"));
/// JSON encoding, one value per line.
pub const JSON: EncodingType = EncodingType(Cow::Borrowed("json"));
/// XML encoding.
pub const XML: EncodingType = EncodingType(Cow::Borrowed("xml"));
/// Protocol buffer encoding.
pub const PROTOBUF: EncodingType = EncodingType(Cow::Borrowed("protobuf"));
/// Terminal-formatted encoding used by the command line client.
pub const CLI: EncodingType = EncodingType(Cow::Borrowed("cli"));

impl EncodingType {
    /// Returns the tag as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EncodingType {
    fn from(tag: &str) -> Self {
        Self(Cow::Owned(tag.to_owned()))
    }
}

impl From<String> for EncodingType {
    fn from(tag: String) -> Self {
        Self(Cow::Owned(tag))
    }
}

impl fmt::Display for EncodingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serializes emitted values into a byte sink.
pub trait Encoder: Send {
    /// Encodes one value into the writer.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the underlying write fails.
    fn encode(&mut self, value: &Value, writer: &mut dyn Write) -> Result<(), Error>;
}

/// Builds an encoder for a request.
///
/// Factories receive the request so encoders can honour request options
/// (indentation, field selection) when constructing themselves.
pub type EncoderFactory = Arc<dyn Fn(&Request) -> Box<dyn Encoder> + Send + Sync>;

/// Returns the process-wide default encoder for a tag, if one exists.
pub fn default_encoder(encoding: &EncodingType) -> Option<EncoderFactory> {
    if *encoding == JSON {
        Some(json_encoder())
    } else if *encoding == TEXT {
        Some(text_encoder())
    } else {
        None
    }
}

/// Returns the default JSON encoder factory.
pub fn json_encoder() -> EncoderFactory {
    Arc::new(|_req| Box::new(JsonEncoder))
}

/// Returns the default plain-text encoder factory.
pub fn text_encoder() -> EncoderFactory {
    Arc::new(|_req| Box::new(TextEncoder))
}

/// Encoder writing one JSON document per line.
struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn encode(&mut self, value: &Value, writer: &mut dyn Write) -> Result<(), Error> {
        serde_json::to_writer(&mut *writer, value)?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

/// Encoder writing the plain-text rendering of each value.
///
/// Strings are written verbatim; other values fall back to their JSON
/// rendering so numeric and structured output stays readable.
struct TextEncoder;

impl Encoder for TextEncoder {
    fn encode(&mut self, value: &Value, writer: &mut dyn Write) -> Result<(), Error> {
        match value {
            Value::String(text) => writer.write_all(text.as_bytes())?,
            other => serde_json::to_writer(&mut *writer, other)?,
        }
        writer.write_all(b"\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::command::Command;
    use crate::context::Context;
    use crate::request::Request;

    fn fixture_request() -> Request {
        Request::new(
            Context::background(),
            Vec::new(),
            Default::default(),
            Vec::new(),
            Vec::new(),
            Command::default(),
        )
        .expect("fixture request")
    }

    #[test]
    fn tags_compare_by_equality() {
        assert_eq!(EncodingType::from("json"), JSON);
        assert_ne!(EncodingType::from("Json"), JSON);
        assert_eq!(EncodingType::from("custom".to_owned()).as_str(), "custom");
    }

    #[test]
    fn default_table_covers_json_and_text() {
        assert!(default_encoder(&JSON).is_some());
        assert!(default_encoder(&TEXT).is_some());
        assert!(default_encoder(&PROTOBUF).is_none());
        assert!(default_encoder(&EncodingType::from("bogus")).is_none());
    }

    #[test]
    fn json_encoder_writes_one_document_per_line() {
        let req = fixture_request();
        let mut encoder = json_encoder()(&req);
        let mut output = Vec::new();

        encoder
            .encode(&json!({"beep": 5}), &mut output)
            .expect("encode");
        encoder.encode(&json!(7), &mut output).expect("encode");

        assert_eq!(output, b"{\"beep\":5}\n7\n");
    }

    #[test]
    fn text_encoder_writes_strings_verbatim() {
        let req = fixture_request();
        let mut encoder = text_encoder()(&req);
        let mut output = Vec::new();

        encoder.encode(&json!("hello"), &mut output).expect("encode");
        encoder.encode(&json!(42), &mut output).expect("encode");

        assert_eq!(output, b"hello\n42\n");
    }
}
