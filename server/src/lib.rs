//! h2d, an event-driven HTTP/2 static file server.
//!
//! A fixed pool of single-threaded worker event loops serves HTTP/2
//! sessions over plain TCP or TLS (ALPN `h2`); a listener deals accepted
//! sockets to the workers round-robin. Files come from a document root,
//! with directory redirects, conditional requests, configurable trailers
//! and server push.

pub mod buffer;
pub mod config;
pub mod date;
pub mod handler;
pub mod listener;
pub mod logging;
pub mod metrics;
pub mod path;
pub mod responder;
pub mod signal;
pub mod stream;
pub mod tls;
pub mod transport;
pub mod worker;

pub use config::Config;
pub use responder::SERVER_SOFTWARE;

use crate::listener::Acceptor;
use crate::worker::{Worker, WorkerHandle};
use mio::net::TcpListener;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// The assembled server: listener bound, TLS context built, workers
/// constructed but not yet running.
pub struct HttpServer {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    workers: Vec<Worker>,
    handles: Vec<WorkerHandle>,
    shutdown: Arc<AtomicBool>,
}

impl HttpServer {
    /// Bind the listener, build the shared TLS context and the worker
    /// loops. Failures here are startup failures: the process should exit
    /// nonzero.
    pub fn new(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        let tls = if config.no_tls {
            None
        } else {
            let files = config
                .tls
                .as_ref()
                .ok_or("TLS is enabled but [tls] is not configured")?;
            Some(tls::build_server_config(files, config.verify_client)?)
        };

        let listener = listener::bind(&config)?;
        let local_addr = listener.local_addr()?;

        let config = Arc::new(config);
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_count = config.num_worker;

        let mut listener = Some(listener);
        let mut workers = Vec::with_capacity(worker_count);
        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            // With a single worker the listener lives in its loop and the
            // dispatch queue is never used.
            let own_listener = if worker_count == 1 {
                listener.take()
            } else {
                None
            };
            let worker = Worker::new(
                worker_id,
                config.clone(),
                tls.clone(),
                own_listener,
                shutdown.clone(),
            )?;
            handles.push(worker.handle());
            workers.push(worker);
        }

        Ok(Self {
            listener,
            local_addr,
            workers,
            handles,
            shutdown,
        })
    }

    /// The address actually bound, useful with `port = 0`.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A handle that stops the server from any thread.
    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        ShutdownTrigger {
            flag: self.shutdown.clone(),
            workers: self.handles.clone(),
        }
    }

    /// Serve until shut down. Worker threads are joined before returning.
    pub fn run(mut self) -> io::Result<()> {
        if self.workers.len() == 1 {
            let worker = self.workers.pop().unwrap();
            worker.run();
            return Ok(());
        }

        let mut joins = Vec::with_capacity(self.workers.len());
        for worker in self.workers.drain(..) {
            let name = format!("worker-{}", worker.id());
            joins.push(
                std::thread::Builder::new()
                    .name(name)
                    .spawn(move || worker.run())?,
            );
        }

        let listener = self.listener.take().expect("listener unassigned");
        Acceptor::new(listener, self.handles.clone(), self.shutdown.clone())?.run();

        // The acceptor is done; make sure every worker notices and drains.
        self.shutdown.store(true, Ordering::SeqCst);
        for handle in &self.handles {
            handle.wake();
        }
        for join in joins {
            let _ = join.join();
        }
        Ok(())
    }
}

/// Stops the server: sets the shared flag and wakes every worker loop.
#[derive(Clone)]
pub struct ShutdownTrigger {
    flag: Arc<AtomicBool>,
    workers: Vec<WorkerHandle>,
}

impl ShutdownTrigger {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        for worker in &self.workers {
            worker.wake();
        }
    }
}
