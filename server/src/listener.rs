//! Listener setup and the accept loop.

use crate::config::Config;
use crate::worker::WorkerHandle;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, trace, warn};

const LISTEN_BACKLOG: i32 = 1024;
const LISTENER_TOKEN: Token = Token(0);

/// Resolve the configured address and bind the first candidate that works.
pub fn bind(config: &Config) -> io::Result<TcpListener> {
    let host = config.address.as_deref().unwrap_or("0.0.0.0");
    let candidates: Vec<SocketAddr> = (host, config.port).to_socket_addrs()?.collect();

    let mut last_error = None;
    for addr in candidates {
        match bind_one(addr) {
            Ok(listener) => {
                info!("listening on {}", addr);
                return Ok(listener);
            }
            Err(e) => {
                warn!("cannot listen on {}: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "no usable listen address")
    }))
}

fn bind_one(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(
        Domain::for_address(addr),
        Type::STREAM,
        Some(Protocol::TCP),
    )?;
    socket.set_reuse_address(true)?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(TcpListener::from_std(socket.into()))
}

/// The accept loop for multi-worker deployments: accepted sockets are dealt
/// to worker inboxes round-robin.
pub struct Acceptor {
    poll: Poll,
    listener: TcpListener,
    workers: Vec<WorkerHandle>,
    next_worker: usize,
    shutdown: Arc<AtomicBool>,
}

impl Acceptor {
    pub fn new(
        mut listener: TcpListener,
        workers: Vec<WorkerHandle>,
        shutdown: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        assert!(!workers.is_empty());
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        Ok(Self {
            poll,
            listener,
            workers,
            next_worker: 0,
            shutdown,
        })
    }

    /// Accept until shutdown. The poll timeout bounds how long a shutdown
    /// request can go unnoticed.
    pub fn run(mut self) {
        let mut events = Events::with_capacity(64);
        while !self.shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self
                .poll
                .poll(&mut events, Some(Duration::from_millis(500)))
            {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!("acceptor poll failed: {}", e);
                break;
            }
            for event in events.iter() {
                if event.token() == LISTENER_TOKEN {
                    self.accept_ready();
                }
            }
        }
    }

    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((sock, peer)) => {
                    trace!(%peer, "accepted");
                    self.dispatch(sock);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn dispatch(&mut self, sock: TcpStream) {
        let handle = &self.workers[self.next_worker];
        self.next_worker = (self.next_worker + 1) % self.workers.len();
        handle.dispatch(sock);
    }
}
