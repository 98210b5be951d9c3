//! Worker event loops.
//!
//! Each worker owns a mio `Poll`, a `Sessions` registry and an inbox of
//! accepted sockets. The inbox is the only cross-thread structure: the
//! acceptor pushes under the mutex and wakes the loop; the loop swaps the
//! queue out whole and processes it outside the lock.

use crate::config::Config;
use crate::date::DateCache;
use crate::handler::Http2Handler;
use crate::metrics;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

const WAKER_TOKEN: Token = Token(usize::MAX - 1);
const LISTENER_TOKEN: Token = Token(usize::MAX - 2);

/// Handoff queue of accepted sockets. Any thread enqueues; only the owning
/// worker drains.
pub struct Inbox {
    queue: Mutex<VecDeque<TcpStream>>,
}

impl Inbox {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    fn push(&self, sock: TcpStream) {
        self.queue.lock().unwrap().push_back(sock);
    }

    /// Swap the queue out under the lock; processing happens outside it.
    fn swap(&self) -> VecDeque<TcpStream> {
        std::mem::take(&mut *self.queue.lock().unwrap())
    }
}

/// Producer-side handle to a worker: enqueue a socket, kick the loop.
#[derive(Clone)]
pub struct WorkerHandle {
    inbox: Arc<Inbox>,
    waker: Arc<Waker>,
}

impl WorkerHandle {
    pub fn dispatch(&self, sock: TcpStream) {
        self.inbox.push(sock);
        let _ = self.waker.wake();
    }

    pub fn wake(&self) {
        let _ = self.waker.wake();
    }
}

/// Per-loop session registry: the handlers plus everything they share.
struct Sessions {
    config: Arc<Config>,
    tls: Option<Arc<rustls::ServerConfig>>,
    date: DateCache,
    next_session_id: u64,
    handlers: Slab<Http2Handler>,
}

impl Sessions {
    fn next_session_id(&mut self) -> u64 {
        let id = self.next_session_id;
        self.next_session_id = if id == u64::MAX { 1 } else { id + 1 };
        id
    }
}

/// One event loop plus its sessions and inbox.
pub struct Worker {
    id: usize,
    poll: Poll,
    inbox: Arc<Inbox>,
    waker: Arc<Waker>,
    /// Present when this worker doubles as the acceptor (single-worker
    /// deployments).
    listener: Option<TcpListener>,
    sessions: Sessions,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(
        id: usize,
        config: Arc<Config>,
        tls: Option<Arc<rustls::ServerConfig>>,
        listener: Option<TcpListener>,
        shutdown: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        let mut listener = listener;
        if let Some(l) = listener.as_mut() {
            poll.registry()
                .register(l, LISTENER_TOKEN, Interest::READABLE)?;
        }

        Ok(Self {
            id,
            poll,
            inbox: Arc::new(Inbox::new()),
            waker,
            listener,
            sessions: Sessions {
                config,
                tls,
                date: DateCache::new(),
                next_session_id: 1,
                handlers: Slab::new(),
            },
            shutdown,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            inbox: self.inbox.clone(),
            waker: self.waker.clone(),
        }
    }

    /// Run the loop until shutdown. Consumes the worker.
    pub fn run(mut self) {
        debug!(worker = self.id, "worker started");
        let mut events = Events::with_capacity(1024);

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            let timeout = self.poll_timeout();
            if let Err(e) = self.poll.poll(&mut events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(worker = self.id, "poll failed: {}", e);
                break;
            }

            for event in events.iter() {
                match event.token() {
                    WAKER_TOKEN => self.drain_inbox(),
                    LISTENER_TOKEN => self.accept_ready(),
                    token => self.drive(token, event.is_readable(), event.is_writable()),
                }
            }

            self.fire_timers();
        }

        self.teardown();
    }

    /// Sleep until the next handler deadline, or indefinitely when no timer
    /// is armed (the waker interrupts either way).
    fn poll_timeout(&self) -> Option<Duration> {
        let mut next: Option<Instant> = None;
        for (_, handler) in self.sessions.handlers.iter() {
            if let Some(deadline) = handler.next_deadline() {
                next = Some(match next {
                    Some(current) => current.min(deadline),
                    None => deadline,
                });
            }
        }
        next.map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    fn drain_inbox(&mut self) {
        let sockets = self.inbox.swap();
        for sock in sockets {
            self.accept_connection(sock);
        }
    }

    fn accept_ready(&mut self) {
        loop {
            let accepted = match self.listener.as_ref() {
                Some(listener) => listener.accept(),
                None => return,
            };
            match accepted {
                Ok((sock, peer)) => {
                    trace!(worker = self.id, %peer, "accepted");
                    self.accept_connection(sock);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(worker = self.id, "accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn accept_connection(&mut self, sock: TcpStream) {
        metrics::CONNECTIONS_ACCEPTED.increment();
        metrics::CONNECTIONS_ACTIVE.increment();

        let session_id = self.sessions.next_session_id();
        let handler = match Http2Handler::new(
            session_id,
            sock,
            self.sessions.tls.clone(),
            self.sessions.config.clone(),
        ) {
            Ok(handler) => handler,
            Err(e) => {
                debug!(worker = self.id, "session setup failed: {}", e);
                metrics::CONNECTIONS_ACTIVE.decrement();
                return;
            }
        };

        let key = self.sessions.handlers.insert(handler);
        let registered = self.poll.registry().register(
            self.sessions.handlers.get_mut(key).unwrap().sock_mut(),
            Token(key),
            Interest::READABLE | Interest::WRITABLE,
        );
        if let Err(e) = registered {
            error!(worker = self.id, "register failed: {}", e);
            let mut handler = self.sessions.handlers.remove(key);
            handler.close();
            return;
        }

        let Sessions {
            handlers, date, ..
        } = &mut self.sessions;
        if handlers.get_mut(key).unwrap().on_open(date).is_err() {
            self.destroy(key);
        }
    }

    fn drive(&mut self, token: Token, readable: bool, writable: bool) {
        let Sessions {
            handlers, date, ..
        } = &mut self.sessions;
        let Some(handler) = handlers.get_mut(token.0) else {
            return;
        };

        let mut result = Ok(());
        if readable {
            result = handler.on_readable(date);
        }
        if result.is_ok() && writable {
            result = handler.on_writable(date);
        }
        if result.is_err() {
            self.destroy(token.0);
        }
    }

    fn fire_timers(&mut self) {
        let now = Instant::now();
        let due: Vec<usize> = self
            .sessions
            .handlers
            .iter()
            .filter(|(_, handler)| {
                handler
                    .next_deadline()
                    .map(|deadline| deadline <= now)
                    .unwrap_or(false)
            })
            .map(|(key, _)| key)
            .collect();

        for key in due {
            let Sessions {
                handlers, date, ..
            } = &mut self.sessions;
            let Some(handler) = handlers.get_mut(key) else {
                continue;
            };
            if handler.on_timer(now, date).is_err() {
                self.destroy(key);
            }
        }
    }

    fn destroy(&mut self, key: usize) {
        if !self.sessions.handlers.contains(key) {
            return;
        }
        let mut handler = self.sessions.handlers.remove(key);
        let _ = self.poll.registry().deregister(handler.sock_mut());
        handler.close();
    }

    fn teardown(&mut self) {
        let keys: Vec<usize> = self.sessions.handlers.iter().map(|(key, _)| key).collect();
        for key in keys {
            self.destroy(key);
        }
        debug!(worker = self.id, "worker stopped");
    }
}
