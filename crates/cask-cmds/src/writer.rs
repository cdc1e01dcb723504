//! Response emitter serializing values into a byte sink.
//!
//! The writer emitter runs each emitted value through a pluggable encoder
//! and writes the bytes to an `io::Write` sink. It exposes the
//! [`EncodingEmitter`] capability so the executor can install the encoder
//! selected for the request before the run function starts.

use std::io::Write;

use serde_json::Value;

use crate::encoding::{Encoder, EncodingType};
use crate::emitter::{EmitterKind, EmitterState, EncodingEmitter, ResponseEmitter};
use crate::error::{CommandError, Error};

/// Emitter that encodes values into an `io::Write` sink.
pub struct WriterResponseEmitter {
    writer: Box<dyn Write + Send>,
    encoder: Box<dyn Encoder>,
    encoding: EncodingType,
    kind: EmitterKind,
    state: EmitterState,
    emitted: bool,
    length: Option<u64>,
}

impl WriterResponseEmitter {
    /// Creates a writer emitter with an initial encoder.
    pub fn new(
        writer: impl Write + Send + 'static,
        encoding: EncodingType,
        encoder: Box<dyn Encoder>,
    ) -> Self {
        Self {
            writer: Box::new(writer),
            encoder,
            encoding,
            kind: EmitterKind::Writer,
            state: EmitterState::Open,
            emitted: false,
            length: None,
        }
    }

    /// Overrides the kind tag, for transports built on this emitter.
    pub fn with_kind(mut self, kind: EmitterKind) -> Self {
        self.kind = kind;
        self
    }

    /// Returns the length hint, if one was set.
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// Returns the encoding the emitter currently serializes to.
    pub fn encoding(&self) -> &EncodingType {
        &self.encoding
    }
}

impl ResponseEmitter for WriterResponseEmitter {
    fn emit(&mut self, value: Value) -> Result<(), Error> {
        self.state.ensure_open()?;
        self.emitted = true;
        self.encoder.encode(&value, &mut *self.writer)
    }

    fn set_length(&mut self, length: u64) -> Result<(), Error> {
        self.state.ensure_open()?;
        if self.emitted {
            return Err(Error::LateLength);
        }
        self.length = Some(length);
        Ok(())
    }

    fn set_error(&mut self, error: CommandError) -> Result<(), Error> {
        self.state.ensure_open()?;
        let value = serde_json::to_value(&error)?;
        let written = self.encoder.encode(&value, &mut *self.writer);
        self.state = EmitterState::ClosedError;
        self.writer.flush()?;
        written
    }

    fn close(&mut self) -> Result<(), Error> {
        self.state.ensure_open()?;
        self.state = EmitterState::ClosedOk;
        self.writer.flush()?;
        Ok(())
    }

    fn kind(&self) -> EmitterKind {
        self.kind
    }

    fn as_encoding(&mut self) -> Option<&mut dyn EncodingEmitter> {
        Some(self)
    }
}

impl EncodingEmitter for WriterResponseEmitter {
    fn set_encoder(&mut self, encoding: EncodingType, encoder: Box<dyn Encoder>) {
        self.encoding = encoding;
        self.encoder = encoder;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::encoding;
    use crate::test_support::SharedBuffer;

    fn fixture_request() -> crate::Request {
        crate::Request::new(
            crate::Context::background(),
            Vec::new(),
            Default::default(),
            Vec::new(),
            Vec::new(),
            crate::Command::default(),
        )
        .expect("fixture request")
    }

    #[test]
    fn emits_encoded_values() {
        let buffer = SharedBuffer::default();
        let req = fixture_request();
        let mut emitter = WriterResponseEmitter::new(
            buffer.clone(),
            encoding::JSON,
            encoding::json_encoder()(&req),
        );

        emitter.emit(json!({"ok": true})).expect("emit");
        emitter.close().expect("close");

        assert_eq!(buffer.contents(), b"{\"ok\":true}\n");
    }

    #[test]
    fn swapping_the_encoder_changes_the_output() {
        let buffer = SharedBuffer::default();
        let req = fixture_request();
        let mut emitter = WriterResponseEmitter::new(
            buffer.clone(),
            encoding::JSON,
            encoding::json_encoder()(&req),
        );

        emitter.set_encoder(encoding::TEXT, encoding::text_encoder()(&req));
        emitter.emit(json!("plain")).expect("emit");
        emitter.close().expect("close");

        assert_eq!(emitter.encoding(), &encoding::TEXT);
        assert_eq!(buffer.contents(), b"plain\n");
    }

    #[test]
    fn set_error_writes_the_structured_error() {
        let buffer = SharedBuffer::default();
        let req = fixture_request();
        let mut emitter = WriterResponseEmitter::new(
            buffer.clone(),
            encoding::JSON,
            encoding::json_encoder()(&req),
        );

        emitter
            .set_error(CommandError::normal("store unavailable"))
            .expect("set error");

        let output = String::from_utf8(buffer.contents()).expect("utf8");
        assert!(output.contains("store unavailable"));
        assert!(output.contains(r#""code":"normal""#));
        assert!(matches!(emitter.emit(json!(1)), Err(Error::Closed)));
    }

    #[test]
    fn length_must_precede_the_first_value() {
        let buffer = SharedBuffer::default();
        let req = fixture_request();
        let mut emitter = WriterResponseEmitter::new(
            buffer,
            encoding::JSON,
            encoding::json_encoder()(&req),
        );

        emitter.set_length(2).expect("set length");
        emitter.emit(json!(1)).expect("emit");
        assert!(matches!(emitter.set_length(3), Err(Error::LateLength)));
        assert_eq!(emitter.length(), Some(2));
    }

    #[test]
    fn kind_can_be_retagged_for_the_cli() {
        let buffer = SharedBuffer::default();
        let req = fixture_request();
        let emitter = WriterResponseEmitter::new(
            buffer,
            encoding::TEXT,
            encoding::text_encoder()(&req),
        )
        .with_kind(EmitterKind::Cli);

        assert_eq!(emitter.kind(), EmitterKind::Cli);
    }
}
