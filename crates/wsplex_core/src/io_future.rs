//! Completion handles for asynchronous sends.
//!
//! An [`IoFuture`] starts uncompleted and moves to exactly one terminal state:
//! succeeded, failed or cancelled. The first transition wins and every later
//! attempt returns `false`. Listeners run once, outside the internal lock, and
//! a listener added after completion runs immediately on the caller's thread.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::error;

use crate::dispatch::panic_message;
use crate::error::SendError;

/// Terminal state of an [`IoFuture`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoOutcome {
    Success,
    Failure(SendError),
    Cancelled,
}

/// Callback interface for [`IoFuture`] completion and progress.
///
/// Any `Fn(&IoFuture)` closure is a listener that only cares about completion.
pub trait IoFutureListener: Send + Sync {
    /// Called once when the future reaches a terminal state.
    fn operation_complete(&self, future: &IoFuture);

    /// Called for each progress report while the future is still pending.
    fn operation_progressed(&self, _future: &IoFuture, _amount: u64, _current: u64, _total: u64) {}
}

impl<F> IoFutureListener for F
where
    F: Fn(&IoFuture) + Send + Sync,
{
    fn operation_complete(&self, future: &IoFuture) {
        self(future)
    }
}

/// Handle returned by [`IoFuture::add_listener`], used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type ListenerEntry = (ListenerId, Arc<dyn IoFutureListener>);

struct State {
    outcome: Option<IoOutcome>,
    listeners: Vec<ListenerEntry>,
    next_listener: u64,
}

struct Inner {
    connector_id: String,
    state: Mutex<State>,
    done: Notify,
}

/// Result handle of an asynchronous send. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct IoFuture {
    inner: Arc<Inner>,
}

impl IoFuture {
    /// Creates an uncompleted future for a send to `connector_id`.
    pub fn new(connector_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector_id: connector_id.into(),
                state: Mutex::new(State {
                    outcome: None,
                    listeners: Vec::new(),
                    next_listener: 0,
                }),
                done: Notify::new(),
            }),
        }
    }

    /// Creates a future that has already failed.
    pub fn failed(connector_id: impl Into<String>, cause: SendError) -> Self {
        let future = Self::new(connector_id);
        future.set_failure(cause);
        future
    }

    /// Id of the connector this send targets.
    pub fn connector_id(&self) -> &str {
        &self.inner.connector_id
    }

    pub fn is_done(&self) -> bool {
        self.inner.state.lock().outcome.is_some()
    }

    pub fn is_success(&self) -> bool {
        matches!(self.inner.state.lock().outcome, Some(IoOutcome::Success))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.inner.state.lock().outcome, Some(IoOutcome::Cancelled))
    }

    /// The failure cause, if the future failed.
    pub fn cause(&self) -> Option<SendError> {
        match &self.inner.state.lock().outcome {
            Some(IoOutcome::Failure(cause)) => Some(cause.clone()),
            _ => None,
        }
    }

    /// The terminal state, or `None` while pending.
    pub fn outcome(&self) -> Option<IoOutcome> {
        self.inner.state.lock().outcome.clone()
    }

    pub fn set_success(&self) -> bool {
        self.complete(IoOutcome::Success)
    }

    pub fn set_failure(&self, cause: SendError) -> bool {
        self.complete(IoOutcome::Failure(cause))
    }

    pub fn cancel(&self) -> bool {
        self.complete(IoOutcome::Cancelled)
    }

    /// Reports transfer progress. Returns `false` once the future is done.
    pub fn set_progress(&self, amount: u64, current: u64, total: u64) -> bool {
        let listeners: Vec<ListenerEntry> = {
            let state = self.inner.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.listeners.clone()
        };
        for (_, listener) in listeners {
            self.notify(|| listener.operation_progressed(self, amount, current, total));
        }
        true
    }

    /// Registers a listener.
    ///
    /// If the future is already done the listener is invoked immediately, once,
    /// and is not retained.
    pub fn add_listener<L>(&self, listener: L) -> ListenerId
    where
        L: IoFutureListener + 'static,
    {
        let listener: Arc<dyn IoFutureListener> = Arc::new(listener);
        let id = {
            let mut state = self.inner.state.lock();
            let id = ListenerId(state.next_listener);
            state.next_listener += 1;
            if state.outcome.is_none() {
                state.listeners.push((id, listener));
                return id;
            }
            id
        };
        self.notify(|| listener.operation_complete(self));
        id
    }

    /// Removes a pending listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut state = self.inner.state.lock();
        let before = state.listeners.len();
        state.listeners.retain(|(existing, _)| *existing != id);
        state.listeners.len() != before
    }

    /// Waits for the terminal state.
    pub async fn wait(&self) -> IoOutcome {
        loop {
            let notified = self.inner.done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            notified.await;
        }
    }

    fn complete(&self, outcome: IoOutcome) -> bool {
        let listeners = {
            let mut state = self.inner.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome);
            std::mem::take(&mut state.listeners)
        };
        self.inner.done.notify_waiters();
        for (_, listener) in listeners {
            self.notify(|| listener.operation_complete(self));
        }
        true
    }

    fn notify(&self, callback: impl FnOnce()) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(callback)) {
            error!(
                connector_id = %self.inner.connector_id,
                "IoFuture listener panicked: {}",
                panic_message(payload.as_ref())
            );
        }
    }
}

impl fmt::Debug for IoFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoFuture")
            .field("connector_id", &self.inner.connector_id)
            .field("outcome", &self.outcome())
            .finish()
    }
}
