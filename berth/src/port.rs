//! Ephemeral local port reservation.
use std::io;
use std::net;

use socket2::{Domain, Protocol, Socket, Type};

/// Interface reservations bind on by default.
pub const LOCALHOST: net::IpAddr = net::IpAddr::V4(net::Ipv4Addr::LOCALHOST);

/// An OS-level reservation of an unused local port.
///
/// The reservation holds the bound socket open until released, which keeps
/// other processes from binding the same port (best-effort, via address
/// reuse). Release is by-value, so a reservation cannot be closed twice;
/// dropping one also releases it, which is what makes [`PortReservation::with`]
/// safe on unwind.
#[derive(Debug)]
pub struct PortReservation {
    host: net::IpAddr,
    port: u16,
    socket: Socket,
}

impl PortReservation {
    /// Reserve an unused port on the IPv4 loopback interface.
    pub fn new() -> io::Result<Self> {
        Self::bind(LOCALHOST)
    }

    /// Reserve an unused port on the given host.
    pub fn bind(host: impl Into<net::IpAddr>) -> io::Result<Self> {
        let host = host.into();
        let addr = net::SocketAddr::new(host, 0);
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;

        let port = socket
            .local_addr()?
            .as_socket()
            .ok_or_else(|| io::Error::other("bound socket has no inet address"))?
            .port();
        log::debug!(target: "port", "Reserved {host}:{port}");

        Ok(Self { host, port, socket })
    }

    /// Reserve a loopback port, pass the reservation to `f`, and release
    /// it on every exit path, including unwinding out of `f`.
    pub fn with<T>(f: impl FnOnce(&Self) -> T) -> io::Result<T> {
        let reservation = Self::new()?;

        Ok(f(&reservation))
    }

    pub fn host(&self) -> net::IpAddr {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The reserved address, as `"host:port"`.
    pub fn addr(&self) -> String {
        self.socket_addr().to_string()
    }

    pub fn socket_addr(&self) -> net::SocketAddr {
        net::SocketAddr::new(self.host, self.port)
    }

    /// Release the reservation, freeing the port for the caller to bind.
    pub fn close(self) {
        log::debug!(target: "port", "Releasing {}:{}", self.host, self.port);
        drop(self.socket);
    }
}
