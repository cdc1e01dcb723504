//! In-process channel response pair.
//!
//! [`channel_response_pair`] links a producer and a consumer through a
//! zero-capacity rendezvous: `emit` blocks until the matching `next`
//! arrives, and both sides select against the request context so
//! cancellation unblocks them with the [`Error::Cancelled`] sentinel.
//!
//! The length hint is kept in a shared cell that settles on the first
//! emitted value (or on close), so a consumer on another thread can read
//! the hint race-free before pulling values.

use std::sync::{Arc, Condvar, Mutex, PoisonError};

use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError};
use serde_json::Value;

use crate::context::Context;
use crate::emitter::{EmitterKind, EmitterState, ResponseEmitter};
use crate::error::{CommandError, Error};
use crate::request::Request;

/// Creates a connected emitter and response for in-process streaming.
///
/// The pair shares the request's context: cancelling it unblocks pending
/// `emit` and `next` calls on either side.
pub fn channel_response_pair(req: &Request) -> (ChanResponseEmitter, ChanResponse) {
    let (sender, receiver) = bounded(0);
    let length = Arc::new(LengthCell::default());

    let emitter = ChanResponseEmitter {
        sender: Some(sender),
        context: req.context.clone(),
        length: Arc::clone(&length),
        state: EmitterState::Open,
        emitted: false,
    };
    let response = ChanResponse {
        receiver,
        context: req.context.clone(),
        length,
        terminal: None,
        cancel_delivered: false,
    };
    (emitter, response)
}

enum ChanMessage {
    Value(Value),
    Error(CommandError),
}

/// Producer half of a channel response pair.
pub struct ChanResponseEmitter {
    sender: Option<Sender<ChanMessage>>,
    context: Context,
    length: Arc<LengthCell>,
    state: EmitterState,
    emitted: bool,
}

impl ChanResponseEmitter {
    fn deliver(&mut self, message: ChanMessage) -> Result<(), Error> {
        let Some(sender) = self.sender.as_ref() else {
            return Err(Error::Closed);
        };
        select! {
            send(sender, message) -> result => result.map_err(|_| Error::Cancelled),
            recv(self.context.done()) -> _ => Err(Error::Cancelled),
            recv(self.context.deadline_channel()) -> _ => Err(Error::Cancelled),
        }
    }
}

impl ResponseEmitter for ChanResponseEmitter {
    fn emit(&mut self, value: Value) -> Result<(), Error> {
        self.state.ensure_open()?;
        self.context.check()?;

        // Settle before the rendezvous so a consumer blocked on the length
        // hint wakes while this value is still pending.
        self.length.settle();
        self.emitted = true;
        self.deliver(ChanMessage::Value(value))
    }

    fn set_length(&mut self, length: u64) -> Result<(), Error> {
        self.state.ensure_open()?;
        if self.emitted {
            return Err(Error::LateLength);
        }
        self.length.set(length);
        Ok(())
    }

    fn set_error(&mut self, error: CommandError) -> Result<(), Error> {
        self.state.ensure_open()?;
        self.length.settle();

        let delivered = self.deliver(ChanMessage::Error(error));
        self.state = EmitterState::ClosedError;
        self.sender = None;
        delivered
    }

    fn close(&mut self) -> Result<(), Error> {
        self.state.ensure_open()?;
        self.length.settle();
        self.state = EmitterState::ClosedOk;
        self.sender = None;
        Ok(())
    }

    fn kind(&self) -> EmitterKind {
        EmitterKind::Channel
    }
}

impl Drop for ChanResponseEmitter {
    fn drop(&mut self) {
        // A dropped emitter must not leave a consumer blocked on the hint.
        if self.state == EmitterState::Open {
            self.length.settle();
        }
    }
}

enum Terminal {
    EndOfStream,
    Failed(CommandError),
}

/// Consumer half of a channel response pair.
pub struct ChanResponse {
    receiver: Receiver<ChanMessage>,
    context: Context,
    length: Arc<LengthCell>,
    terminal: Option<Terminal>,
    cancel_delivered: bool,
}

impl ChanResponse {
    /// Pulls the next emitted value, blocking until one arrives.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EndOfStream`] once the producer closes without an
    /// error, [`Error::Command`] carrying the producer's terminal error,
    /// and [`Error::Cancelled`] when the request context fires first.
    pub fn next(&mut self) -> Result<Value, Error> {
        if let Some(terminal) = &self.terminal {
            return Err(match terminal {
                Terminal::EndOfStream => Error::EndOfStream,
                Terminal::Failed(error) => Error::Command(error.clone()),
            });
        }

        if !self.cancel_delivered && self.context.is_cancelled() {
            self.cancel_delivered = true;
            return Err(Error::Cancelled);
        }

        // Prefer a ready message over a raced cancellation signal so a
        // producer that closed cleanly always ends in end-of-stream.
        match self.receiver.try_recv() {
            Ok(message) => return self.accept(message),
            Err(TryRecvError::Disconnected) => {
                self.terminal = Some(Terminal::EndOfStream);
                return Err(Error::EndOfStream);
            }
            Err(TryRecvError::Empty) => {}
        }

        let pulled = select! {
            recv(self.receiver) -> result => Some(result.ok()),
            recv(self.context.done()) -> _ => None,
            recv(self.context.deadline_channel()) -> _ => None,
        };
        match pulled {
            Some(Some(message)) => self.accept(message),
            Some(None) => {
                self.terminal = Some(Terminal::EndOfStream);
                Err(Error::EndOfStream)
            }
            None => {
                self.cancel_delivered = true;
                Err(Error::Cancelled)
            }
        }
    }

    /// Returns the producer's length hint.
    ///
    /// Blocks until the producer has emitted its first value, set an error,
    /// or closed. Defaults to zero when the hint was never set.
    pub fn length(&self) -> u64 {
        self.length.get_blocking()
    }

    fn accept(&mut self, message: ChanMessage) -> Result<Value, Error> {
        match message {
            ChanMessage::Value(value) => Ok(value),
            ChanMessage::Error(error) => {
                self.terminal = Some(Terminal::Failed(error.clone()));
                Err(Error::Command(error))
            }
        }
    }
}

#[derive(Default)]
struct LengthCell {
    state: Mutex<LengthState>,
    settled: Condvar,
}

#[derive(Default)]
struct LengthState {
    length: u64,
    settled: bool,
}

impl LengthCell {
    fn set(&self, length: u64) {
        let mut state = self.lock();
        if !state.settled {
            state.length = length;
        }
    }

    fn settle(&self) {
        let mut state = self.lock();
        state.settled = true;
        self.settled.notify_all();
    }

    fn get_blocking(&self) -> u64 {
        let mut state = self.lock();
        while !state.settled {
            state = self
                .settled
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.length
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LengthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::command::Command;

    fn fixture_request(context: Context) -> Request {
        Request::new(
            context,
            Vec::new(),
            Default::default(),
            Vec::new(),
            Vec::new(),
            Command::default(),
        )
        .expect("fixture request")
    }

    #[test]
    fn values_arrive_in_emission_order() {
        let req = fixture_request(Context::background());
        let (mut emitter, mut response) = channel_response_pair(&req);

        let producer = thread::spawn(move || {
            emitter.emit(json!(1)).expect("emit 1");
            emitter.emit(json!(2)).expect("emit 2");
            emitter.close().expect("close");
        });

        assert_eq!(response.next().expect("first"), json!(1));
        assert_eq!(response.next().expect("second"), json!(2));
        assert!(matches!(response.next(), Err(Error::EndOfStream)));
        assert!(matches!(response.next(), Err(Error::EndOfStream)));
        producer.join().expect("join producer");
    }

    #[test]
    fn length_hint_reaches_the_consumer() {
        let req = fixture_request(Context::background());
        let (mut emitter, mut response) = channel_response_pair(&req);

        let producer = thread::spawn(move || {
            emitter.set_length(3).expect("set length");
            emitter.emit(json!(7)).expect("emit");
            emitter.close().expect("close");
        });

        // Blocks until the producer's first emit settles the hint.
        assert_eq!(response.length(), 3);
        assert_eq!(response.next().expect("value"), json!(7));
        producer.join().expect("join producer");
    }

    #[test]
    fn length_defaults_to_zero() {
        let req = fixture_request(Context::background());
        let (mut emitter, response) = channel_response_pair(&req);
        emitter.close().expect("close");
        assert_eq!(response.length(), 0);
    }

    #[test]
    fn length_after_first_emit_is_rejected() {
        let req = fixture_request(Context::background());
        let (mut emitter, mut response) = channel_response_pair(&req);

        let producer = thread::spawn(move || {
            emitter.emit(json!("x")).expect("emit");
            let result = emitter.set_length(9);
            assert!(matches!(result, Err(Error::LateLength)));
            emitter.close().expect("close");
        });

        assert_eq!(response.next().expect("value"), json!("x"));
        producer.join().expect("join producer");
    }

    #[test]
    fn cancel_before_any_next_yields_the_sentinel_on_both_sides() {
        let (ctx, canceller) = Context::background().with_cancel();
        let req = fixture_request(ctx);
        let (mut emitter, mut response) = channel_response_pair(&req);

        canceller.cancel();

        let producer = thread::spawn(move || {
            let result = emitter.emit(json!("abc"));
            assert!(matches!(result, Err(Error::Cancelled)));
            // The producer still owes a close after observing cancellation.
            emitter.close().expect("close after cancel");
        });

        assert!(matches!(response.next(), Err(Error::Cancelled)));
        producer.join().expect("join producer");

        // After the producer's close the consumer sees a normal end.
        assert!(matches!(response.next(), Err(Error::EndOfStream)));
    }

    #[test]
    fn deadline_fires_like_cancellation() {
        let ctx = Context::background().with_timeout(Duration::from_millis(5));
        let req = fixture_request(ctx);
        let (mut emitter, mut response) = channel_response_pair(&req);

        thread::sleep(Duration::from_millis(10));

        assert!(matches!(emitter.emit(json!(1)), Err(Error::Cancelled)));
        assert!(matches!(response.next(), Err(Error::Cancelled)));
    }

    #[test]
    fn set_error_reaches_the_consumer_and_sticks() {
        let req = fixture_request(Context::background());
        let (mut emitter, mut response) = channel_response_pair(&req);

        let producer = thread::spawn(move || {
            emitter
                .set_error(CommandError::normal("tank empty"))
                .expect("set error");
            assert!(matches!(emitter.emit(json!(1)), Err(Error::Closed)));
        });

        match response.next() {
            Err(Error::Command(error)) => assert_eq!(error.message, "tank empty"),
            other => panic!("expected command error, got {other:?}"),
        }
        match response.next() {
            Err(Error::Command(error)) => assert_eq!(error.message, "tank empty"),
            other => panic!("expected repeated command error, got {other:?}"),
        }
        producer.join().expect("join producer");
    }

    #[test]
    fn methods_after_close_are_rejected() {
        let req = fixture_request(Context::background());
        let (mut emitter, _response) = channel_response_pair(&req);

        emitter.close().expect("close");
        assert!(matches!(emitter.emit(json!(1)), Err(Error::Closed)));
        assert!(matches!(emitter.set_length(1), Err(Error::Closed)));
        assert!(matches!(emitter.close(), Err(Error::Closed)));
        assert!(matches!(
            emitter.set_error(CommandError::normal("late")),
            Err(Error::Closed)
        ));
    }
}
