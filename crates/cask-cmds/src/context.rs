//! Cancellable request contexts.
//!
//! A [`Context`] is the single cancellation source for a request. Emitters
//! and response consumers select against it so that a cancelled request
//! unblocks every pending `emit` and `next` with the [`Error::Cancelled`]
//! sentinel. Deadlines derived from the timeout option are carried on the
//! context and fire identically to explicit cancellation.
//!
//! Cancellation is signalled by disconnecting a zero-capacity channel: the
//! [`Canceller`] holds the only sender, and taking it out of the shared
//! state wakes every receiver at once. Both triggers of an HTTP request
//! (parent context completion and client disconnect) act on the same shared
//! state, so neither signal can be lost to the other.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{at, bounded, never, select, Receiver, Sender, TryRecvError};

use crate::error::Error;

/// Uninhabited message type: done channels only ever signal by
/// disconnecting.
pub(crate) enum Never {}

/// Cancellation and deadline state observed by a request.
#[derive(Debug, Clone)]
pub struct Context {
    done: Receiver<Never>,
    deadline: Option<Instant>,
    cancellable: bool,
}

impl Context {
    /// Returns a context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            done: never(),
            deadline: None,
            cancellable: false,
        }
    }

    /// Derives a cancellable child context.
    ///
    /// The child is cancelled when [`Canceller::cancel`] is called, when
    /// every [`Canceller`] handle is dropped, or when the parent context
    /// fires. Parent propagation uses a watcher thread that exits once
    /// either side fires, so a cancellable request should always end with a
    /// `cancel` call (the HTTP bridge cancels when the response body is
    /// dropped).
    pub fn with_cancel(&self) -> (Self, Canceller) {
        let (sender, receiver) = bounded::<Never>(0);
        let canceller = Canceller {
            state: Arc::new(CancelState {
                sender: Mutex::new(Some(sender)),
            }),
        };

        let child = Self {
            done: receiver,
            deadline: self.deadline,
            cancellable: true,
        };

        if self.cancellable || self.deadline.is_some() {
            let parent_done = self.done.clone();
            let parent_deadline = deadline_channel(self.deadline);
            let child_done = child.done.clone();
            let state = Arc::clone(&canceller.state);
            thread::spawn(move || {
                select! {
                    recv(parent_done) -> _ => {}
                    recv(parent_deadline) -> _ => {}
                    recv(child_done) -> _ => {}
                }
                state.cancel();
            });
        }

        (child, canceller)
    }

    /// Derives a child context whose deadline is at most `timeout` from now.
    ///
    /// An earlier parent deadline is kept. The child shares the parent's
    /// cancellation signal.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            done: self.done.clone(),
            deadline: Some(deadline),
            cancellable: self.cancellable,
        }
    }

    /// Returns true if the context has been cancelled or its deadline has
    /// passed.
    pub fn is_cancelled(&self) -> bool {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return true;
            }
        }
        matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Returns the deadline, if one has been set.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Blocks until the context is cancelled or its deadline passes.
    pub fn wait(&self) {
        select! {
            recv(self.done) -> _ => {}
            recv(deadline_channel(self.deadline)) -> _ => {}
        }
    }

    /// Returns the sentinel if the context has fired.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] when the context is cancelled.
    pub fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Channel that disconnects when the context is cancelled.
    pub(crate) fn done(&self) -> &Receiver<Never> {
        &self.done
    }

    /// Channel that delivers once the deadline passes, or never.
    pub(crate) fn deadline_channel(&self) -> Receiver<Instant> {
        deadline_channel(self.deadline)
    }
}

fn deadline_channel(deadline: Option<Instant>) -> Receiver<Instant> {
    match deadline {
        Some(instant) => at(instant),
        None => never(),
    }
}

/// Handle that cancels the context it was created with.
///
/// Cloning yields another handle to the same state. Dropping the last
/// handle cancels the context, so a request that completes normally should
/// keep its canceller alive until the response has been fully consumed.
#[derive(Debug, Clone)]
pub struct Canceller {
    state: Arc<CancelState>,
}

impl Canceller {
    /// Cancels the context. Safe to call more than once.
    pub fn cancel(&self) {
        self.state.cancel();
    }
}

#[derive(Debug)]
struct CancelState {
    sender: Mutex<Option<Sender<Never>>>,
}

impl CancelState {
    fn cancel(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
