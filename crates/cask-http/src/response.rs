//! Response emitter streaming a chunked HTTP response.
//!
//! The emitter runs on the executor's blocking thread and talks to the
//! async handler through a channel of [`BridgeEvent`]s. Headers are
//! written lazily: the first emitted value (or a close on an empty
//! stream) produces a `Head` event carrying the Content-Type chosen from
//! the selected encoding and the advisory length hint. Errors raised
//! before the head become a plain HTTP error response; errors raised
//! afterwards travel as an `X-Stream-Error` trailer at the end of the
//! chunked body.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use bytes::Bytes;
use futures::Stream;
use http::{HeaderMap, HeaderValue};
use http_body::Frame;
use serde_json::Value;
use tokio::sync::mpsc::{Receiver, Sender};

use cask_cmds::{
    default_encoder, json_encoder, Canceller, CommandError, Encoder, EncodingType, EmitterKind,
    EncodingEmitter, Error, Request, ResponseEmitter,
};

/// Marks a chunked value stream.
pub const X_CHUNKED_OUTPUT: &str = "X-Chunked-Output";
/// Marks a raw byte stream response.
pub const X_STREAM_OUTPUT: &str = "X-Stream-Output";
/// Carries the advisory length hint set by the command.
pub const X_CONTENT_LENGTH: &str = "X-Content-Length";
/// Trailer carrying an error raised after headers were written.
pub const X_STREAM_ERROR: &str = "X-Stream-Error";

/// Returns the Content-Type for an encoding tag.
pub(crate) fn mime_type(encoding: &EncodingType) -> &'static str {
    if *encoding == cask_cmds::JSON {
        "application/json"
    } else if *encoding == cask_cmds::XML {
        "application/xml"
    } else if *encoding == cask_cmds::PROTOBUF {
        "application/protobuf"
    } else if *encoding == cask_cmds::TEXT {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

/// Header data for the lazily written response head.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ResponseHead {
    pub(crate) content_type: &'static str,
    pub(crate) length: Option<u64>,
}

/// Events flowing from the executor thread to the async handler.
pub(crate) enum BridgeEvent {
    /// First event of a successful stream: response headers.
    Head(ResponseHead),
    /// One encoded value.
    Chunk(Bytes),
    /// Failure before the head was written; becomes an error response.
    Fail(Error),
    /// Failure after the head was written; becomes a trailer.
    Trailer(CommandError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Open,
    ClosedOk,
    ClosedError,
}

/// Response emitter backing one HTTP request.
pub struct HttpResponseEmitter {
    sender: Sender<BridgeEvent>,
    encoder: Box<dyn Encoder>,
    encoding: EncodingType,
    head_sent: Arc<AtomicBool>,
    state: StreamState,
    emitted: bool,
    length: Option<u64>,
}

impl HttpResponseEmitter {
    /// Creates an emitter for the request, with the caller's requested
    /// encoding as the starting point. The executor installs the final
    /// encoder before the run function starts.
    pub(crate) fn new(
        sender: Sender<BridgeEvent>,
        head_sent: Arc<AtomicBool>,
        req: &Request,
    ) -> Self {
        let encoding = req.encoding_type();
        let encoder = default_encoder(&encoding).unwrap_or_else(json_encoder)(req);
        Self {
            sender,
            encoder,
            encoding,
            head_sent,
            state: StreamState::Open,
            emitted: false,
            length: None,
        }
    }

    fn ensure_open(&self) -> Result<(), Error> {
        match self.state {
            StreamState::Open => Ok(()),
            StreamState::ClosedOk | StreamState::ClosedError => Err(Error::Closed),
        }
    }

    fn send(&self, event: BridgeEvent) -> Result<(), Error> {
        // A dropped receiver means the client is gone; the body's drop
        // guard cancels the request context right after.
        self.sender
            .blocking_send(event)
            .map_err(|_| Error::Cancelled)
    }

    fn send_head(&mut self) -> Result<(), Error> {
        if self.head_sent.load(Ordering::SeqCst) {
            return Ok(());
        }
        let head = ResponseHead {
            content_type: mime_type(&self.encoding),
            length: self.length,
        };
        self.send(BridgeEvent::Head(head))?;
        self.head_sent.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl ResponseEmitter for HttpResponseEmitter {
    fn emit(&mut self, value: Value) -> Result<(), Error> {
        self.ensure_open()?;
        self.send_head()?;

        let mut encoded = Vec::new();
        self.encoder.encode(&value, &mut encoded)?;
        self.emitted = true;
        self.send(BridgeEvent::Chunk(Bytes::from(encoded)))
    }

    fn set_length(&mut self, length: u64) -> Result<(), Error> {
        self.ensure_open()?;
        if self.emitted {
            return Err(Error::LateLength);
        }
        self.length = Some(length);
        Ok(())
    }

    fn set_error(&mut self, error: CommandError) -> Result<(), Error> {
        self.ensure_open()?;
        let event = if self.head_sent.load(Ordering::SeqCst) {
            BridgeEvent::Trailer(error)
        } else {
            BridgeEvent::Fail(Error::Command(error))
        };
        self.state = StreamState::ClosedError;
        self.send(event)
    }

    fn close(&mut self) -> Result<(), Error> {
        self.ensure_open()?;
        // An empty stream still gets its headers on close.
        self.send_head()?;
        self.state = StreamState::ClosedOk;
        Ok(())
    }

    fn kind(&self) -> EmitterKind {
        EmitterKind::Http
    }

    fn as_encoding(&mut self) -> Option<&mut dyn EncodingEmitter> {
        Some(self)
    }
}

impl EncodingEmitter for HttpResponseEmitter {
    fn set_encoder(&mut self, encoding: EncodingType, encoder: Box<dyn Encoder>) {
        self.encoding = encoding;
        self.encoder = encoder;
    }
}

/// Cancels the request context when the response body is dropped.
///
/// Both normal completion and a client disconnect end with the body being
/// dropped, so the context watcher thread is always released.
pub(crate) struct CancelOnDrop(pub(crate) Canceller);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Body stream adapting bridge events to HTTP frames.
pub(crate) struct BridgeBody {
    receiver: Receiver<BridgeEvent>,
    _cancel: CancelOnDrop,
}

impl BridgeBody {
    pub(crate) fn new(receiver: Receiver<BridgeEvent>, canceller: Canceller) -> Self {
        Self {
            receiver,
            _cancel: CancelOnDrop(canceller),
        }
    }
}

impl Stream for BridgeBody {
    type Item = Result<Frame<Bytes>, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            return match this.receiver.poll_recv(cx) {
                Poll::Ready(Some(BridgeEvent::Chunk(bytes))) => {
                    Poll::Ready(Some(Ok(Frame::data(bytes))))
                }
                Poll::Ready(Some(BridgeEvent::Trailer(error))) => {
                    Poll::Ready(Some(Ok(Frame::trailers(trailer_map(&error)))))
                }
                Poll::Ready(Some(BridgeEvent::Fail(error))) => {
                    // The head is already on the wire; degrade to a trailer.
                    let error = match error {
                        Error::Command(command_error) => command_error,
                        other => CommandError::normal(other.to_string()),
                    };
                    Poll::Ready(Some(Ok(Frame::trailers(trailer_map(&error)))))
                }
                Poll::Ready(Some(BridgeEvent::Head(_))) => continue,
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            };
        }
    }
}

fn trailer_map(error: &CommandError) -> HeaderMap {
    let mut trailers = HeaderMap::new();
    let message = error
        .message
        .split(['\n', '\r'])
        .next()
        .unwrap_or_default();
    let value = HeaderValue::from_str(message)
        .unwrap_or_else(|_| HeaderValue::from_static("command error"));
    if let Ok(name) = X_STREAM_ERROR.parse::<http::header::HeaderName>() {
        trailers.insert(name, value);
    }
    trailers
}
