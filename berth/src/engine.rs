//! Contract between the harness and the protocol engine it drives.
//!
//! The engine is an external collaborator: a reactor-style message
//! transport container that accepts connections and dispatches lifecycle
//! callbacks from its own blocking run loop. The harness is handed any
//! type implementing [`Engine`] and never looks inside its protocol
//! logic, framing or I/O.
use std::fmt;
use std::io;

use thiserror::Error;

/// Aggregation of every diagnostic recorded since the last drain,
/// newline-joined in arrival order.
///
/// This is the only error a [`Handler`] callback may abort dispatch with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct AggregateError(String);

impl AggregateError {
    /// Join diagnostics into one error, or `None` if there are none.
    pub fn join(errors: impl IntoIterator<Item = String>) -> Option<Self> {
        let errors = errors.into_iter().collect::<Vec<_>>();

        if errors.is_empty() {
            None
        } else {
            Some(Self(errors.join("\n")))
        }
    }

    /// The aggregated diagnostic text.
    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Structured condition reported by the engine on a failing endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    /// Symbolic error name, eg. `resource-limit-exceeded`.
    pub name: String,
    /// Human-readable description.
    pub description: String,
}

impl Condition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.description)
    }
}

/// Handle to a newly opened remote endpoint.
///
/// Handles are opaque and engine-owned. The harness only clones them into
/// its queues and acknowledges the open handshake; it never mutates them
/// otherwise.
pub trait Endpoint: Clone + Send + 'static {
    /// Acknowledge the open handshake on this endpoint.
    fn open(&self);
}

/// Cloneable remote control over an engine's run loop.
pub trait Controller: Clone + Send + 'static {
    /// Request orderly shutdown of the run loop. Callable from any thread,
    /// including before the loop has started.
    fn stop(&self);
}

/// A reactor-style message-transport container driven by the harness.
pub trait Engine: Sized + Send + 'static {
    /// Handle to an opened connection.
    type Connection: Endpoint;
    /// Handle to an opened session.
    type Session: Endpoint;
    /// Handle to an opened link.
    type Link: Endpoint;
    /// A received message value.
    type Message: Clone + Send + 'static;
    /// Remote control over the run loop.
    type Controller: Controller;

    /// Remote control handle, usable while [`Engine::run`] blocks another
    /// thread.
    fn controller(&self) -> Self::Controller;

    /// Begin accepting connections on a `host:port` address.
    fn listen(&mut self, addr: &str) -> io::Result<()>;

    /// Run the event loop, dispatching callbacks to `handler` until
    /// stopped or until no active endpoints remain.
    ///
    /// The loop must check the result of every callback it dispatches and
    /// stop as soon as one returns an error, returning that error.
    fn run(&mut self, handler: &mut dyn Handler<Self>) -> Result<(), AggregateError>;
}

/// Callback capability set invoked by the engine from its run loop.
///
/// Every callback returns a verdict: `Ok` to keep dispatching, `Err` to
/// abort the loop with the given aggregate. The default implementations
/// ignore the event, so handlers override only what they observe.
#[allow(unused_variables)]
pub trait Handler<E: Engine>: Send {
    /// The run loop has started and the engine is accepting connections.
    fn on_start(&mut self) -> Result<(), AggregateError> {
        Ok(())
    }

    /// A condition was reported on a transport.
    fn on_transport_error(&mut self, condition: &Condition) -> Result<(), AggregateError> {
        Ok(())
    }

    /// A condition was reported on a connection.
    fn on_connection_error(&mut self, condition: &Condition) -> Result<(), AggregateError> {
        Ok(())
    }

    /// A condition was reported on a session.
    fn on_session_error(&mut self, condition: &Condition) -> Result<(), AggregateError> {
        Ok(())
    }

    /// A condition was reported on a link.
    fn on_link_error(&mut self, condition: &Condition) -> Result<(), AggregateError> {
        Ok(())
    }

    /// The remote peer opened a connection.
    fn on_connection_opened(&mut self, connection: &E::Connection) -> Result<(), AggregateError> {
        Ok(())
    }

    /// The remote peer opened a session.
    fn on_session_opened(&mut self, session: &E::Session) -> Result<(), AggregateError> {
        Ok(())
    }

    /// The remote peer opened a link.
    fn on_link_opened(&mut self, link: &E::Link) -> Result<(), AggregateError> {
        Ok(())
    }

    /// A message was received.
    fn on_message(&mut self, message: &E::Message) -> Result<(), AggregateError> {
        Ok(())
    }
}
