//! Synchronization harness for driving a reactor-style messaging engine
//! from synchronous test code.
//!
//! The engine runs its blocking event loop on a dedicated worker thread,
//! raising callbacks in that thread's context. The harness lets code on
//! the caller thread block until specific lifecycle milestones occur,
//! collect every observed event without races, detect failures reported
//! asynchronously, and tear the engine down deterministically.
//!
//! Three components, composed bottom-up:
//!
//! * [`PortReservation`] binds an unused local port and holds the OS-level
//!   reservation open until released.
//! * [`EventRecorder`] accumulates observed lifecycle events and error
//!   reports into thread-safe ordered queues, and acknowledges the open
//!   handshake on any endpoint reported as newly opened.
//! * [`Server`] wraps both, runs the engine's event loop on a worker
//!   thread, and provides a blocking start/stop protocol with a ready
//!   handshake and failure-aware teardown.
//!
//! The engine itself is an external collaborator, injected through the
//! [`Engine`] trait; its protocol logic, framing and I/O are out of scope.
pub mod engine;
pub mod port;
pub mod recorder;
pub mod server;
#[cfg(any(test, feature = "test"))]
pub mod test;

pub use engine::{AggregateError, Condition, Controller, Endpoint, Engine, Handler};
pub use port::PortReservation;
pub use recorder::{EventRecorder, OnError, Queue};
pub use server::{Server, State};
