//! Blocking start/stop protocol around an engine run loop.
use std::io;
use std::iter;
use std::mem;
use std::net;
use std::panic;
use std::thread;

use crossbeam_channel as chan;
use thiserror::Error;

use crate::engine::{AggregateError, Condition, Controller as _, Engine, Handler};
use crate::port::{PortReservation, LOCALHOST};
use crate::recorder::{EventRecorder, OnError};

/// A server error.
#[derive(Error, Debug)]
pub enum Error {
    /// Aggregated errors recorded while the engine ran.
    #[error(transparent)]
    Errors(#[from] AggregateError),
    /// The engine failed before it began listening.
    #[error("engine failed to start")]
    Failed,
    /// `start` was called on a server that already ran.
    #[error("server was already started")]
    AlreadyStarted,
    /// An I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Server lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Constructed; the port is reserved but no thread is running.
    Created,
    /// `start` was called and the worker is coming up.
    Starting,
    /// The engine is accepting connections on the reserved address.
    Running,
    /// The worker failed before it began listening.
    Failed,
    /// Stopped; the port reservation is released.
    Stopped,
}

/// Token posted on the ready rendezvous by the worker. `start` pops
/// exactly one per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ready {
    /// The engine is listening on the reserved address.
    Listening,
    /// The worker failed; details are on the error queue.
    Failed,
}

/// Wraps the recorder on the worker thread: posts the ready token when
/// the run loop comes up, and fans events out to any caller-registered
/// handlers, recorder first.
struct Dispatcher<E: Engine> {
    recorder: EventRecorder<E>,
    chained: Vec<Box<dyn Handler<E>>>,
    ready: chan::Sender<Ready>,
}

impl<E: Engine> Dispatcher<E> {
    fn handlers<'a>(&'a mut self) -> impl Iterator<Item = &'a mut dyn Handler<E>> + 'a {
        iter::once(&mut self.recorder as &'a mut dyn Handler<E>)
            .chain(self.chained.iter_mut().map(|h| h.as_mut() as &'a mut dyn Handler<E>))
    }
}

impl<E: Engine> Handler<E> for Dispatcher<E> {
    fn on_start(&mut self) -> Result<(), AggregateError> {
        log::debug!(target: "server", "Engine run loop started");
        self.ready.try_send(Ready::Listening).ok();

        for handler in self.handlers() {
            handler.on_start()?;
        }
        Ok(())
    }

    fn on_transport_error(&mut self, condition: &Condition) -> Result<(), AggregateError> {
        for handler in self.handlers() {
            handler.on_transport_error(condition)?;
        }
        Ok(())
    }

    fn on_connection_error(&mut self, condition: &Condition) -> Result<(), AggregateError> {
        for handler in self.handlers() {
            handler.on_connection_error(condition)?;
        }
        Ok(())
    }

    fn on_session_error(&mut self, condition: &Condition) -> Result<(), AggregateError> {
        for handler in self.handlers() {
            handler.on_session_error(condition)?;
        }
        Ok(())
    }

    fn on_link_error(&mut self, condition: &Condition) -> Result<(), AggregateError> {
        for handler in self.handlers() {
            handler.on_link_error(condition)?;
        }
        Ok(())
    }

    fn on_connection_opened(&mut self, connection: &E::Connection) -> Result<(), AggregateError> {
        for handler in self.handlers() {
            handler.on_connection_opened(connection)?;
        }
        Ok(())
    }

    fn on_session_opened(&mut self, session: &E::Session) -> Result<(), AggregateError> {
        for handler in self.handlers() {
            handler.on_session_opened(session)?;
        }
        Ok(())
    }

    fn on_link_opened(&mut self, link: &E::Link) -> Result<(), AggregateError> {
        for handler in self.handlers() {
            handler.on_link_opened(link)?;
        }
        Ok(())
    }

    fn on_message(&mut self, message: &E::Message) -> Result<(), AggregateError> {
        for handler in self.handlers() {
            handler.on_message(message)?;
        }
        Ok(())
    }
}

/// Runs an engine's event loop on a dedicated worker thread, with a
/// blocking start/stop protocol around it.
///
/// The port is reserved at construction, so the address is known before
/// the engine comes up. Exactly two threads are of interest: the caller
/// thread blocking on [`Server::start`] and [`Server::stop`], and the
/// worker thread blocking inside the engine's run loop.
pub struct Server<E: Engine> {
    recorder: EventRecorder<E>,
    reservation: Option<PortReservation>,
    engine: Option<E>,
    controller: E::Controller,
    chained: Vec<Box<dyn Handler<E>>>,
    worker: Option<thread::JoinHandle<()>>,
    ready: (chan::Sender<Ready>, chan::Receiver<Ready>),
    state: State,
    host: net::IpAddr,
    port: u16,
}

impl<E: Engine> Server<E> {
    /// Create a server around `engine`, reserving a loopback port for it.
    pub fn new(engine: E) -> io::Result<Self> {
        Self::with_host(engine, LOCALHOST)
    }

    /// Create a server around `engine`, reserving a port on `host`.
    pub fn with_host(engine: E, host: impl Into<net::IpAddr>) -> io::Result<Self> {
        let reservation = PortReservation::bind(host)?;
        let controller = engine.controller();

        Ok(Self {
            host: reservation.host(),
            port: reservation.port(),
            recorder: EventRecorder::new(),
            reservation: Some(reservation),
            engine: Some(engine),
            controller,
            chained: Vec::new(),
            worker: None,
            ready: chan::bounded(1),
            state: State::Created,
        })
    }

    /// Dispatch engine events to `handler` as well, after the recorder.
    /// Handlers registered after `start` are not seen by the worker.
    pub fn add_handler(&mut self, handler: impl Handler<E> + 'static) {
        self.chained.push(Box::new(handler));
    }

    /// The recorder observing this server's engine.
    pub fn recorder(&self) -> &EventRecorder<E> {
        &self.recorder
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn host(&self) -> net::IpAddr {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The reserved address, as `"host:port"`.
    pub fn addr(&self) -> String {
        net::SocketAddr::new(self.host, self.port).to_string()
    }

    /// Start the engine on the worker thread and block until it is
    /// accepting connections on [`Server::addr`], or until it fails.
    ///
    /// There is no timeout on the wait: a worker that neither comes up nor
    /// fails hangs the caller. Failures self-report through the error
    /// queue and unblock the wait, so a failing `start` never hangs.
    pub fn start(&mut self, on_error: OnError) -> Result<(), Error> {
        if self.state != State::Created {
            return Err(Error::AlreadyStarted);
        }
        let mut engine = self.engine.take().ok_or(Error::AlreadyStarted)?;
        let mut dispatcher = Dispatcher {
            recorder: self.recorder.clone(),
            chained: mem::take(&mut self.chained),
            ready: self.ready.0.clone(),
        };
        let addr = self.addr();
        let errors = self.recorder.errors.clone();
        let ready = self.ready.0.clone();

        log::debug!(target: "server", "Starting engine on {addr}..");
        self.state = State::Starting;
        self.worker = Some(spawn(self.addr(), move || {
            let outcome = panic::catch_unwind(panic::AssertUnwindSafe(|| {
                engine
                    .listen(&addr)
                    .map_err(|e| format!("listen on {addr} failed: {e}"))?;
                engine.run(&mut dispatcher).map_err(|e| e.to_string())
            }));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(failure)) => Some(failure),
                Err(payload) => Some(format!(
                    "engine thread panicked: {}",
                    panic_message(&payload)
                )),
            };
            if let Some(failure) = failure {
                log::error!(target: "server", "{failure}");
                errors.push(failure);
                ready.try_send(Ready::Failed).ok();
            }
        }));

        match self.ready.1.recv() {
            Ok(Ready::Listening) => {
                log::debug!(target: "server", "Server listening on {}", self.addr());
                self.state = State::Running;

                Ok(())
            }
            Ok(Ready::Failed) | Err(chan::RecvError) => {
                self.state = State::Failed;
                if let OnError::Raise = on_error {
                    self.recorder.drain_errors()?;
                }
                Ok(())
            }
        }
    }

    /// Stop the engine and tear the server down.
    ///
    /// With errors on the queue the worker is presumed hung or faulted and
    /// is abandoned rather than joined; otherwise this blocks until the
    /// worker exits, which makes every event pushed before the stop
    /// visible afterwards. The port reservation is released
    /// unconditionally, as the last teardown step before errors are
    /// surfaced. Safe to call after a failed `start`.
    pub fn stop(&mut self, on_error: OnError) -> Result<(), Error> {
        log::debug!(target: "server", "Stopping server on {}..", self.addr());
        self.controller.stop();

        if let Some(worker) = self.worker.take() {
            if self.recorder.errors.is_empty() {
                worker.join().ok();
            } else {
                log::warn!(
                    target: "server",
                    "Abandoning engine thread after {} recorded error(s)",
                    self.recorder.errors.len()
                );
                drop(worker);
            }
        }
        if let Some(reservation) = self.reservation.take() {
            reservation.close();
        }
        self.state = State::Stopped;

        match on_error {
            OnError::Raise => self.recorder.drain_errors().map_err(Error::from),
            OnError::Keep => Ok(()),
        }
    }

    /// Start the server, pass it to `f`, and guarantee [`Server::stop`]
    /// runs on every exit path before any error propagates.
    pub fn run<T>(
        &mut self,
        on_error: OnError,
        f: impl FnOnce(&mut Self) -> T,
    ) -> Result<T, Error> {
        match self.start(OnError::Keep) {
            Ok(()) if self.state == State::Running => {
                let value = f(self);

                self.stop(on_error)?;
                Ok(value)
            }
            outcome => {
                self.stop(on_error)?;
                outcome?;

                Err(Error::Failed)
            }
        }
    }
}

impl<E: Engine> Drop for Server<E> {
    fn drop(&mut self) {
        if self.state != State::Stopped {
            self.stop(OnError::Keep).ok();
        }
    }
}

/// Spawn the engine worker thread, labeled for debugging.
fn spawn<F>(label: String, f: F) -> thread::JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(format!("{label} <engine>"))
        .spawn(f)
        .expect("Server::start: thread label must not contain NULL bytes")
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown cause"
    }
}
