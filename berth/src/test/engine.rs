//! Scripted in-process engine for exercising the harness.
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel as chan;

use crate::engine::{AggregateError, Condition, Controller, Endpoint, Engine, Handler};

/// Scripted events the mock engine dispatches from its run loop.
#[derive(Debug, Clone)]
pub enum Action {
    /// Report the endpoint as a newly opened connection.
    ConnectionOpened(MockEndpoint),
    /// Report the endpoint as a newly opened session.
    SessionOpened(MockEndpoint),
    /// Report the endpoint as a newly opened link.
    LinkOpened(MockEndpoint),
    /// Deliver a message value.
    Message(String),
    /// Report a condition on the given error source.
    Error(Source, Condition),
    /// Exit the run loop.
    Stop,
}

/// Where a scripted condition is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Transport,
    Connection,
    Session,
    Link,
}

/// Endpoint handle that counts its open acknowledgments.
///
/// Clones share the counter; equality is handle identity.
#[derive(Debug, Clone, Default)]
pub struct MockEndpoint {
    opens: Arc<AtomicUsize>,
}

impl MockEndpoint {
    /// Number of times the open handshake was acknowledged on this handle.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl PartialEq for MockEndpoint {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.opens, &other.opens)
    }
}

impl Eq for MockEndpoint {}

impl Endpoint for MockEndpoint {
    fn open(&self) {
        self.opens.fetch_add(1, Ordering::SeqCst);
    }
}

/// Injects actions into a running [`MockEngine`] from the test thread.
#[derive(Debug, Clone)]
pub struct Injector {
    actions: chan::Sender<Action>,
}

impl Injector {
    pub fn send(&self, action: Action) {
        self.actions.send(action).ok();
    }

    /// Open a connection, returning the handle for later assertions.
    pub fn connection(&self) -> MockEndpoint {
        let endpoint = MockEndpoint::default();

        self.send(Action::ConnectionOpened(endpoint.clone()));
        endpoint
    }

    /// Open a session, returning the handle.
    pub fn session(&self) -> MockEndpoint {
        let endpoint = MockEndpoint::default();

        self.send(Action::SessionOpened(endpoint.clone()));
        endpoint
    }

    /// Open a link, returning the handle.
    pub fn link(&self) -> MockEndpoint {
        let endpoint = MockEndpoint::default();

        self.send(Action::LinkOpened(endpoint.clone()));
        endpoint
    }

    /// Deliver a message.
    pub fn message(&self, body: impl Into<String>) {
        self.send(Action::Message(body.into()));
    }

    /// Report a condition on the given source.
    pub fn error(&self, source: Source, name: &str, description: &str) {
        self.send(Action::Error(source, Condition::new(name, description)));
    }
}

/// Remote control for [`MockEngine`].
#[derive(Debug, Clone)]
pub struct MockController {
    actions: chan::Sender<Action>,
}

impl Controller for MockController {
    fn stop(&self) {
        self.actions.send(Action::Stop).ok();
    }
}

/// In-process engine driven by a script of [`Action`]s.
///
/// The run loop blocks on the action channel, dispatches each action to
/// the handler, and checks every callback verdict immediately, stopping
/// on the first error.
pub struct MockEngine {
    actions: chan::Sender<Action>,
    script: chan::Receiver<Action>,
    listening: Option<String>,
    /// Fail the next `listen` call.
    pub refuse_listen: bool,
    /// Panic on entering the run loop.
    pub panic_on_run: bool,
}

impl MockEngine {
    pub fn new() -> Self {
        let (actions, script) = chan::unbounded();

        Self {
            actions,
            script,
            listening: None,
            refuse_listen: false,
            panic_on_run: false,
        }
    }

    /// Handle for injecting actions while the engine runs elsewhere.
    pub fn injector(&self) -> Injector {
        Injector {
            actions: self.actions.clone(),
        }
    }

    /// Address `listen` was called with, if any.
    pub fn listening(&self) -> Option<&str> {
        self.listening.as_deref()
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for MockEngine {
    type Connection = MockEndpoint;
    type Session = MockEndpoint;
    type Link = MockEndpoint;
    type Message = String;
    type Controller = MockController;

    fn controller(&self) -> MockController {
        MockController {
            actions: self.actions.clone(),
        }
    }

    fn listen(&mut self, addr: &str) -> io::Result<()> {
        if self.refuse_listen {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{addr} is refusing listeners"),
            ));
        }
        log::debug!(target: "mock", "Listening on {addr}");
        self.listening = Some(addr.to_owned());

        Ok(())
    }

    fn run(&mut self, handler: &mut dyn Handler<Self>) -> Result<(), AggregateError> {
        if self.panic_on_run {
            panic!("mock engine was scripted to panic");
        }
        handler.on_start()?;

        while let Ok(action) = self.script.recv() {
            log::debug!(target: "mock", "Dispatching {action:?}");

            let verdict = match action {
                Action::ConnectionOpened(connection) => handler.on_connection_opened(&connection),
                Action::SessionOpened(session) => handler.on_session_opened(&session),
                Action::LinkOpened(link) => handler.on_link_opened(&link),
                Action::Message(message) => handler.on_message(&message),
                Action::Error(Source::Transport, c) => handler.on_transport_error(&c),
                Action::Error(Source::Connection, c) => handler.on_connection_error(&c),
                Action::Error(Source::Session, c) => handler.on_session_error(&c),
                Action::Error(Source::Link, c) => handler.on_link_error(&c),
                Action::Stop => break,
            };
            verdict?;
        }
        log::debug!(target: "mock", "Run loop exiting");

        Ok(())
    }
}
