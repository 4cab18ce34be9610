//! Event recording handler consumed by the engine.
use std::time;

use crossbeam_channel as chan;

use crate::engine::{AggregateError, Condition, Endpoint as _, Engine, Handler};

/// Whether a blocking operation surfaces recorded errors on completion.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum OnError {
    /// Drain the error queue and fail with the aggregate.
    #[default]
    Raise,
    /// Leave errors queued for the caller to inspect.
    Keep,
}

/// A thread-safe FIFO fed from the engine thread and drained from the
/// caller thread.
///
/// Items come out in arrival order; nothing is ever removed from callback
/// context. Clones share the same queue.
pub struct Queue<T> {
    sender: chan::Sender<T>,
    receiver: chan::Receiver<T>,
}

impl<T> Queue<T> {
    fn new() -> Self {
        let (sender, receiver) = chan::unbounded();

        Self { sender, receiver }
    }

    /// Append an item. Called from callback context.
    pub fn push(&self, item: T) {
        self.sender.send(item).ok();
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Remove and return everything queued, in arrival order.
    pub fn drain(&self) -> Vec<T> {
        self.receiver.try_iter().collect()
    }

    /// Remove and return the next item, without blocking.
    pub fn try_pop(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Block until the next item arrives, giving up after `timeout`.
    pub fn next_within(&self, timeout: time::Duration) -> Option<T> {
        self.receiver.recv_timeout(timeout).ok()
    }
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
        }
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulates every lifecycle event and error report the engine raises.
///
/// One queue per event category, so tests can assert on a category without
/// filtering a heterogeneous stream. Queues are pushed from the engine
/// thread and drained from the caller thread; cloning the recorder shares
/// all queues.
pub struct EventRecorder<E: Engine> {
    /// Formatted diagnostics, in arrival order.
    pub errors: Queue<String>,
    /// Connections the engine reported open.
    pub connections: Queue<E::Connection>,
    /// Sessions the engine reported open.
    pub sessions: Queue<E::Session>,
    /// Links the engine reported open.
    pub links: Queue<E::Link>,
    /// Received message values.
    pub messages: Queue<E::Message>,
}

impl<E: Engine> EventRecorder<E> {
    pub fn new() -> Self {
        Self {
            errors: Queue::new(),
            connections: Queue::new(),
            sessions: Queue::new(),
            links: Queue::new(),
            messages: Queue::new(),
        }
    }

    /// Drain the error queue, failing with the aggregate of everything
    /// recorded since the last drain.
    ///
    /// Draining is destructive: once surfaced, an error is not reported
    /// again, and a second drain with nothing new queued succeeds.
    pub fn drain_errors(&self) -> Result<(), AggregateError> {
        match AggregateError::join(self.errors.drain()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Drive the engine's blocking run loop with this recorder as the
    /// handler, surfacing recorded errors once it returns unless the
    /// caller opted out.
    pub fn run(&mut self, engine: &mut E, on_error: OnError) -> Result<(), AggregateError> {
        engine.run(self)?;

        match on_error {
            OnError::Raise => self.drain_errors(),
            OnError::Keep => Ok(()),
        }
    }

    /// Record a condition reported on `source` and surface it at once.
    fn record(&self, source: &str, condition: &Condition) -> Result<(), AggregateError> {
        let diagnostic = format!("{source} error: {condition}");

        log::error!(target: "recorder", "{diagnostic}");
        self.errors.push(diagnostic);
        self.drain_errors()
    }
}

impl<E: Engine> Default for EventRecorder<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Engine> Clone for EventRecorder<E> {
    fn clone(&self) -> Self {
        Self {
            errors: self.errors.clone(),
            connections: self.connections.clone(),
            sessions: self.sessions.clone(),
            links: self.links.clone(),
            messages: self.messages.clone(),
        }
    }
}

impl<E: Engine> Handler<E> for EventRecorder<E> {
    fn on_transport_error(&mut self, condition: &Condition) -> Result<(), AggregateError> {
        self.record("transport", condition)
    }

    fn on_connection_error(&mut self, condition: &Condition) -> Result<(), AggregateError> {
        self.record("connection", condition)
    }

    fn on_session_error(&mut self, condition: &Condition) -> Result<(), AggregateError> {
        self.record("session", condition)
    }

    fn on_link_error(&mut self, condition: &Condition) -> Result<(), AggregateError> {
        self.record("link", condition)
    }

    fn on_connection_opened(&mut self, connection: &E::Connection) -> Result<(), AggregateError> {
        self.connections.push(connection.clone());
        connection.open();

        Ok(())
    }

    fn on_session_opened(&mut self, session: &E::Session) -> Result<(), AggregateError> {
        self.sessions.push(session.clone());
        session.open();

        Ok(())
    }

    fn on_link_opened(&mut self, link: &E::Link) -> Result<(), AggregateError> {
        self.links.push(link.clone());
        link.open();

        Ok(())
    }

    fn on_message(&mut self, message: &E::Message) -> Result<(), AggregateError> {
        self.messages.push(message.clone());

        Ok(())
    }
}
