//! Transport over a nonblocking socket: plain TCP or server-side TLS.

use mio::net::TcpStream;
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::sync::Arc;

/// Result of a read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes were read.
    Data(usize),
    /// Nothing available; readiness will tell us when to retry.
    WouldBlock,
    /// The peer closed its sending side.
    Closed,
}

/// Result of a write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Bytes were accepted (for TLS: plaintext buffered and flushed as far
    /// as the socket allowed).
    Written(usize),
    /// The socket is full; retry on writable readiness.
    WouldBlock,
}

/// Result of driving a TLS handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    Done,
    WantRead,
    WantWrite,
}

/// A connection's byte transport. Fatal conditions surface as `Err`;
/// everything retryable is in the outcome enums.
pub enum Transport {
    Plain(TcpStream),
    Tls(TlsStream),
}

/// rustls server session over a nonblocking socket.
pub struct TlsStream {
    sock: TcpStream,
    tls: rustls::ServerConnection,
}

impl Transport {
    pub fn plain(sock: TcpStream) -> Self {
        Transport::Plain(sock)
    }

    pub fn tls(
        sock: TcpStream,
        config: Arc<rustls::ServerConfig>,
    ) -> io::Result<Self> {
        let mut tls = rustls::ServerConnection::new(config)
            .map_err(|e| io::Error::other(e))?;
        // Bound the plaintext rustls will buffer for us; write_bytes
        // reports WouldBlock once this fills.
        tls.set_buffer_limit(Some(64 * 1024));
        Ok(Transport::Tls(TlsStream { sock, tls }))
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    pub fn sock_mut(&mut self) -> &mut TcpStream {
        match self {
            Transport::Plain(sock) => sock,
            Transport::Tls(stream) => &mut stream.sock,
        }
    }

    /// Attempt to read decrypted bytes into `buf`.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        match self {
            Transport::Plain(sock) => loop {
                match sock.read(buf) {
                    Ok(0) => return Ok(ReadOutcome::Closed),
                    Ok(n) => return Ok(ReadOutcome::Data(n)),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        return Ok(ReadOutcome::WouldBlock);
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            },
            Transport::Tls(stream) => stream.read_bytes(buf),
        }
    }

    /// Attempt to write `data`.
    pub fn write_bytes(&mut self, data: &[u8]) -> io::Result<WriteOutcome> {
        match self {
            Transport::Plain(sock) => loop {
                match sock.write(data) {
                    Ok(n) => return Ok(WriteOutcome::Written(n)),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        return Ok(WriteOutcome::WouldBlock);
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            },
            Transport::Tls(stream) => stream.write_bytes(data),
        }
    }

    /// Drive the TLS handshake. Plain transports are born complete.
    pub fn handshake(&mut self) -> io::Result<Handshake> {
        match self {
            Transport::Plain(_) => Ok(Handshake::Done),
            Transport::Tls(stream) => stream.handshake(),
        }
    }

    /// The ALPN protocol the handshake settled on, if any.
    pub fn negotiated_protocol(&self) -> Option<&[u8]> {
        match self {
            Transport::Plain(_) => None,
            Transport::Tls(stream) => stream.tls.alpn_protocol(),
        }
    }

    /// Orderly teardown: close_notify for TLS, then shut down the write
    /// side of the socket.
    pub fn shutdown(&mut self) {
        if let Transport::Tls(stream) = self {
            stream.tls.send_close_notify();
            while stream.tls.wants_write() {
                match stream.tls.write_tls(&mut stream.sock) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        }
        let _ = self.sock_mut().shutdown(Shutdown::Write);
    }
}

impl TlsStream {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        loop {
            match self.tls.reader().read(buf) {
                Ok(0) => return Ok(ReadOutcome::Closed),
                Ok(n) => return Ok(ReadOutcome::Data(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    // No plaintext buffered; pull ciphertext off the socket.
                    match self.tls.read_tls(&mut self.sock) {
                        Ok(0) => return Ok(ReadOutcome::Closed),
                        Ok(_) => {
                            self.tls
                                .process_new_packets()
                                .map_err(io::Error::other)?;
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            return Ok(ReadOutcome::WouldBlock);
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => return Err(e),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    // Peer closed without close_notify; treat as EOF.
                    return Ok(ReadOutcome::Closed);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn write_bytes(&mut self, data: &[u8]) -> io::Result<WriteOutcome> {
        // Flush ciphertext left from earlier writes first.
        if !self.flush_tls()? {
            return Ok(WriteOutcome::WouldBlock);
        }

        let n = self.tls.writer().write(data)?;
        self.flush_tls()?;

        if n == 0 && !data.is_empty() {
            // rustls' buffer limit is full; socket backpressure.
            return Ok(WriteOutcome::WouldBlock);
        }
        Ok(WriteOutcome::Written(n))
    }

    /// Push pending ciphertext to the socket. Returns false when the socket
    /// blocked with ciphertext still queued.
    fn flush_tls(&mut self) -> io::Result<bool> {
        while self.tls.wants_write() {
            match self.tls.write_tls(&mut self.sock) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    fn handshake(&mut self) -> io::Result<Handshake> {
        loop {
            if !self.tls.is_handshaking() {
                return Ok(Handshake::Done);
            }
            if self.tls.wants_write() {
                match self.tls.write_tls(&mut self.sock) {
                    Ok(_) => continue,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        return Ok(Handshake::WantWrite);
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }
            match self.tls.read_tls(&mut self.sock) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "eof during tls handshake",
                    ));
                }
                Ok(_) => {
                    self.tls
                        .process_new_packets()
                        .map_err(io::Error::other)?;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Handshake::WantRead);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
}
