//! One accepted connection: transport, HTTP/2 session, streams, timers.
//!
//! The worker loop calls `on_readable`/`on_writable`/`on_timer`; any `Err`
//! means the handler is finished and must be destroyed. The handler logs
//! its own demise, so the worker tears down silently.

use crate::buffer::WriteBuf;
use crate::config::Config;
use crate::date::DateCache;
use crate::metrics;
use crate::responder::{self, ResponderCx};
use crate::stream::{HeaderToken, Stream};
use crate::tls::ALPN_H2;
use crate::transport::{Handshake, ReadOutcome, Transport, WriteOutcome};
use http2::{
    ConnectionError, ConnectionSettings, ErrorCode, HeaderField, ServerConnection, ServerEvent,
    StreamId,
};
use mio::net::TcpStream;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Socket read chunk.
const READ_CHUNK: usize = 8192;
/// File read chunk while pumping a body.
const BODY_CHUNK: usize = 16384;
/// Stop pulling body bytes while this much session output is undelivered.
const SESSION_HIGH_WATER: usize = 64 * 1024;
/// Capacity of the socket-facing write buffer.
const WRITE_BUF_SIZE: usize = 64 * 1024;
/// How long the peer gets to acknowledge our SETTINGS.
const SETTINGS_ACK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(PartialEq, Eq)]
enum Mode {
    /// TLS accept in progress; no HTTP/2 yet.
    TlsHandshake,
    /// Session running (or plain TCP from the start).
    Active,
}

/// Handler for one connection.
pub struct Http2Handler {
    session_id: u64,
    config: Arc<Config>,
    transport: Transport,
    conn: ServerConnection,
    wb: WriteBuf,
    mode: Mode,
    settings_deadline: Option<Instant>,
    /// Set once the session should be destroyed as soon as output drains.
    closing: bool,
    streams: HashMap<u32, Stream>,
}

impl Http2Handler {
    pub fn new(
        session_id: u64,
        sock: TcpStream,
        tls: Option<Arc<rustls::ServerConfig>>,
        config: Arc<Config>,
    ) -> io::Result<Self> {
        let _ = sock.set_nodelay(true);

        let (transport, mode) = match tls {
            Some(ctx) => (Transport::tls(sock, ctx)?, Mode::TlsHandshake),
            None => (Transport::plain(sock), Mode::Active),
        };

        let settings = ConnectionSettings::default()
            .header_table_size(config.header_table_size)
            .padding(config.padding);

        Ok(Self {
            session_id,
            config,
            transport,
            conn: ServerConnection::new(settings),
            wb: WriteBuf::with_capacity(WRITE_BUF_SIZE),
            mode,
            settings_deadline: None,
            closing: false,
            streams: HashMap::new(),
        })
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn sock_mut(&mut self) -> &mut TcpStream {
        self.transport.sock_mut()
    }

    /// First contact after registration. Plain connections start the
    /// session immediately; TLS connections drive the handshake.
    pub fn on_open(&mut self, date: &mut DateCache) -> io::Result<()> {
        match self.mode {
            Mode::Active => self.on_connect(),
            Mode::TlsHandshake => self.try_handshake(date),
        }
    }

    fn on_connect(&mut self) -> io::Result<()> {
        trace!(session = self.session_id, "session start");
        self.conn.start();
        self.settings_deadline = Some(Instant::now() + SETTINGS_ACK_TIMEOUT);
        self.do_write()
    }

    fn try_handshake(&mut self, date: &mut DateCache) -> io::Result<()> {
        match self.transport.handshake() {
            Ok(Handshake::Done) => {
                match self.transport.negotiated_protocol() {
                    Some(proto) if proto == ALPN_H2 => {}
                    other => {
                        debug!(
                            session = self.session_id,
                            "client negotiated {:?}, not h2; dropping",
                            other.map(String::from_utf8_lossy)
                        );
                        return Err(io::Error::other("peer did not negotiate h2"));
                    }
                }
                self.mode = Mode::Active;
                self.on_connect()?;
                // The first flight often rides in with the handshake.
                self.do_read(date)
            }
            Ok(Handshake::WantRead) | Ok(Handshake::WantWrite) => Ok(()),
            Err(e) => {
                debug!(session = self.session_id, "tls handshake failed: {}", e);
                Err(e)
            }
        }
    }

    pub fn on_readable(&mut self, date: &mut DateCache) -> io::Result<()> {
        if self.mode == Mode::TlsHandshake {
            return self.try_handshake(date);
        }
        self.do_read(date)
    }

    pub fn on_writable(&mut self, date: &mut DateCache) -> io::Result<()> {
        if self.mode == Mode::TlsHandshake {
            return self.try_handshake(date);
        }
        self.do_write()?;
        self.drive_output(date)
    }

    /// Pump bodies and flush until nothing moves: every sending stream is
    /// either done, flow-control blocked (a WINDOW_UPDATE will wake us via
    /// readable) or the socket blocked (writable readiness resumes).
    fn drive_output(&mut self, date: &mut DateCache) -> io::Result<()> {
        loop {
            let queued = self.pump_streams();
            self.dispatch_events(date)?;
            self.do_write()?;
            if queued == 0 || !self.wb.is_empty() {
                return Ok(());
            }
        }
    }

    /// Read until the transport runs dry, feeding the session as we go,
    /// then drain whatever output that produced.
    fn do_read(&mut self, date: &mut DateCache) -> io::Result<()> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match self.transport.read_bytes(&mut buf) {
                Ok(ReadOutcome::Data(n)) => {
                    self.conn.feed_data(&buf[..n]);
                    self.dispatch_events(date)?;
                }
                Ok(ReadOutcome::WouldBlock) => break,
                Ok(ReadOutcome::Closed) => {
                    debug!(session = self.session_id, "peer closed connection");
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed"));
                }
                Err(e) => {
                    debug!(session = self.session_id, "read failed: {}", e);
                    return Err(e);
                }
            }
        }
        self.drive_output(date)
    }

    /// Drain the write buffer, refilling it from the session until both
    /// are empty or the socket blocks.
    fn do_write(&mut self) -> io::Result<()> {
        loop {
            if !self.wb.is_empty() {
                match self.transport.write_bytes(self.wb.pending())? {
                    WriteOutcome::Written(0) => {
                        return Err(io::Error::new(
                            io::ErrorKind::WriteZero,
                            "socket accepted no bytes",
                        ));
                    }
                    WriteOutcome::Written(n) => {
                        self.wb.drain(n);
                        continue;
                    }
                    // Writable readiness will bring us back.
                    WriteOutcome::WouldBlock => return Ok(()),
                }
            }
            if self.fill_wb() == 0 {
                break;
            }
        }

        // Everything flushed. A session that can make no further progress
        // is done: it is draining with no streams left, or was marked for
        // teardown (settings timeout).
        let drained = self.conn.is_draining() && self.conn.active_streams() == 0;
        if (self.closing || drained) && !self.conn.has_pending_send() {
            debug!(session = self.session_id, "session complete");
            return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "session complete"));
        }
        Ok(())
    }

    /// Move session output into the write buffer. The session keeps
    /// whatever does not fit and re-presents it on the next call.
    fn fill_wb(&mut self) -> usize {
        let pending = self.conn.pending_send();
        if pending.is_empty() {
            return 0;
        }
        let n = self.wb.write(pending);
        self.conn.advance_send(n);
        n
    }

    fn dispatch_events(&mut self, date: &mut DateCache) -> io::Result<()> {
        for event in self.conn.poll_events() {
            match event {
                ServerEvent::Ready => {
                    trace!(session = self.session_id, "peer settings received");
                }
                ServerEvent::Request {
                    stream_id,
                    headers,
                    end_stream,
                } => self.on_request(date, stream_id, headers, end_stream),
                ServerEvent::Data {
                    stream_id,
                    len,
                    end_stream,
                } => {
                    trace!(
                        session = self.session_id,
                        stream = stream_id.value(),
                        len,
                        "request body discarded"
                    );
                    let respond_now = match self.streams.get_mut(&stream_id.value()) {
                        Some(stream) => {
                            if end_stream {
                                stream.disarm_read_timer();
                                !self.config.early_response
                            } else {
                                stream.arm_read_timer(self.config.read_timeout());
                                false
                            }
                        }
                        None => false,
                    };
                    if respond_now {
                        self.respond(date, stream_id.value(), true);
                    }
                }
                ServerEvent::SettingsAck => {
                    trace!(session = self.session_id, "settings acknowledged");
                    self.settings_deadline = None;
                }
                ServerEvent::StreamReset {
                    stream_id,
                    error_code,
                } => {
                    debug!(
                        session = self.session_id,
                        stream = stream_id.value(),
                        "reset by peer: {}",
                        error_code
                    );
                    self.streams.remove(&stream_id.value());
                }
                ServerEvent::StreamClosed { stream_id } => {
                    trace!(
                        session = self.session_id,
                        stream = stream_id.value(),
                        "stream closed"
                    );
                    self.streams.remove(&stream_id.value());
                }
                ServerEvent::GoAway { error_code, .. } => {
                    debug!(session = self.session_id, "peer goaway: {}", error_code);
                }
                ServerEvent::Error(ConnectionError::BadPreface) => {
                    // Anything may connect to a listening socket; drop the
                    // connection without noise.
                    trace!(session = self.session_id, "not an HTTP/2 client");
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "bad preface"));
                }
                ServerEvent::Error(e) => {
                    warn!(session = self.session_id, "session error: {}", e);
                    return Err(io::Error::other(e.to_string()));
                }
            }
        }
        Ok(())
    }

    fn on_request(
        &mut self,
        date: &mut DateCache,
        stream_id: StreamId,
        headers: Vec<HeaderField>,
        end_stream: bool,
    ) {
        metrics::REQUESTS_RECEIVED.increment();
        let id = stream_id.value();
        trace!(session = self.session_id, stream = id, "request received");

        let mut stream = Stream::new(id, headers);
        stream.arm_read_timer(self.config.read_timeout());

        let expects_continue = stream
            .header(HeaderToken::Expect)
            .map(|v| v.eq_ignore_ascii_case(b"100-continue"))
            .unwrap_or(false);
        if expects_continue {
            let interim = [HeaderField::new(&b":status"[..], &b"100"[..])];
            if let Err(e) = self.conn.send_headers(stream_id, &interim, false) {
                debug!(session = self.session_id, stream = id, "100-continue failed: {}", e);
            }
        }

        let mut respond_now = self.config.early_response;
        if end_stream {
            stream.disarm_read_timer();
            if !self.config.early_response {
                respond_now = true;
            }
        }

        self.streams.insert(id, stream);
        if respond_now {
            self.respond(date, id, true);
        }
    }

    /// Run the responder for `id`, then immediately answer any streams it
    /// promised (push is suppressed on those).
    fn respond(&mut self, date: &mut DateCache, id: u32, allow_push: bool) {
        let Some(mut stream) = self.streams.remove(&id) else {
            return;
        };

        let pushed = {
            let mut cx = ResponderCx {
                conn: &mut self.conn,
                config: &self.config,
                date,
            };
            responder::prepare_response(&mut cx, &mut stream, allow_push)
        };
        if !pushed.is_empty() {
            // Promised responses ride on this stream's session; watch for a
            // peer that stops draining them.
            stream.rearm_read_timer_if_active(self.config.read_timeout());
            stream.arm_write_timer(self.config.write_timeout());
        }
        self.streams.insert(id, stream);

        for mut promised in pushed {
            let nested = {
                let mut cx = ResponderCx {
                    conn: &mut self.conn,
                    config: &self.config,
                    date,
                };
                responder::prepare_response(&mut cx, &mut promised, false)
            };
            debug_assert!(nested.is_empty());
            self.streams.insert(promised.id, promised);
        }
    }

    /// Move response body bytes into the session for every stream with a
    /// body in flight, as far as flow control allows. Returns the number of
    /// body bytes queued.
    fn pump_streams(&mut self) -> usize {
        let ids: Vec<u32> = self
            .streams
            .iter()
            .filter(|(_, s)| s.sending())
            .map(|(&id, _)| id)
            .collect();
        let mut queued = 0;
        for id in ids {
            queued += self.pump_stream(id);
        }
        queued
    }

    fn pump_stream(&mut self, id: u32) -> usize {
        let sid = StreamId::new(id);
        let read_timeout = self.config.read_timeout();
        let write_timeout = self.config.write_timeout();
        let mut queued = 0;

        loop {
            if self.conn.pending_send().len() >= SESSION_HIGH_WATER {
                return queued;
            }
            let Some(stream) = self.streams.get_mut(&id) else {
                return queued;
            };
            if !stream.sending() {
                return queued;
            }

            if stream.body_left == 0 {
                complete_body(&mut self.conn, &self.config, stream, false);
                return queued;
            }

            let capacity = self.conn.send_capacity(sid);
            if capacity <= 0 {
                // Blocked by flow control: the write-blocked timer watches
                // for a peer that never opens its window.
                stream.rearm_read_timer_if_active(read_timeout);
                stream.arm_write_timer(write_timeout);
                return queued;
            }

            let want = (capacity as u64)
                .min(BODY_CHUNK as u64)
                .min(stream.body_left) as usize;
            let mut chunk = [0u8; BODY_CHUNK];
            let n = match stream.read_body(&mut chunk[..want]) {
                Ok(n) => n,
                Err(e) => {
                    warn!(
                        session = self.session_id,
                        stream = id,
                        "body read failed: {}",
                        e
                    );
                    stream.finish_body();
                    self.conn.reset_stream(sid, ErrorCode::InternalError);
                    metrics::STREAMS_RESET.increment();
                    return queued;
                }
            };
            if n == 0 {
                // File ended short of its advertised length.
                complete_body(&mut self.conn, &self.config, stream, false);
                return queued;
            }

            let last = stream.body_left == n as u64;
            let end_stream = last && self.config.trailer.is_empty();
            let accepted = match self.conn.send_data(sid, &chunk[..n], end_stream) {
                Ok(accepted) => accepted,
                Err(_) => return queued,
            };
            debug_assert_eq!(accepted, n);
            stream.body_left -= accepted as u64;
            queued += accepted;

            if stream.body_left == 0 {
                complete_body(&mut self.conn, &self.config, stream, end_stream);
                return queued;
            }

            // The frame went out mid-body: keep the liveness timers honest.
            stream.rearm_read_timer_if_active(read_timeout);
            if self.conn.send_capacity(sid) <= 0 {
                stream.arm_write_timer(write_timeout);
                return queued;
            }
            stream.disarm_write_timer();
        }
    }

    /// Earliest deadline among the settings-ACK timer and all stream
    /// timers; the worker turns this into its poll timeout.
    pub fn next_deadline(&self) -> Option<Instant> {
        let mut next = self.settings_deadline;
        for stream in self.streams.values() {
            if let Some(deadline) = stream.next_deadline() {
                next = Some(match next {
                    Some(current) => current.min(deadline),
                    None => deadline,
                });
            }
        }
        next
    }

    /// Fire whatever deadlines have passed.
    pub fn on_timer(&mut self, now: Instant, date: &mut DateCache) -> io::Result<()> {
        if let Some(deadline) = self.settings_deadline {
            if deadline <= now {
                self.settings_deadline = None;
                metrics::SETTINGS_TIMEOUTS.increment();
                warn!(
                    session = self.session_id,
                    "SETTINGS not acknowledged in time; closing session"
                );
                self.conn
                    .send_goaway(ErrorCode::SettingsTimeout, b"settings timeout");
                self.closing = true;
                return self.do_write();
            }
        }

        let expired: Vec<u32> = self
            .streams
            .iter()
            .filter(|(_, s)| s.expired(now))
            .map(|(&id, _)| id)
            .collect();
        if expired.is_empty() {
            return Ok(());
        }

        for id in expired {
            debug!(session = self.session_id, stream = id, "stream timeout");
            if let Some(stream) = self.streams.get_mut(&id) {
                stream.finish_body();
            }
            self.conn.reset_stream(StreamId::new(id), ErrorCode::InternalError);
            metrics::STREAMS_RESET.increment();
        }

        self.dispatch_events(date)?;
        self.do_write()
    }

    /// Orderly teardown before the handler is dropped.
    pub fn close(&mut self) {
        trace!(session = self.session_id, "closed");
        self.transport.shutdown();
        metrics::CONNECTIONS_ACTIVE.decrement();
    }
}

/// The body is exhausted: emit trailers or the final END_STREAM if the
/// last DATA frame did not carry it, and reset the stream when the peer
/// never half-closed its side.
fn complete_body(
    conn: &mut ServerConnection,
    config: &Config,
    stream: &mut Stream,
    end_already_sent: bool,
) {
    let sid = StreamId::new(stream.id);

    if !end_already_sent {
        if config.trailer.is_empty() {
            let _ = conn.send_data(sid, &[], true);
        } else {
            let trailers: Vec<HeaderField> = config
                .trailer
                .iter()
                .map(|t| HeaderField::new(t.name.as_bytes(), t.value.as_bytes()))
                .collect();
            let _ = conn.send_headers(sid, &trailers, true);
        }
    }

    if !conn.peer_closed(sid) {
        conn.reset_stream(sid, ErrorCode::NoError);
    }

    stream.finish_body();
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use http2::frame::{Frame, FrameDecoder, FrameEncoder, SettingsFrame};
    use std::io::{Read, Write};
    use std::net::TcpListener as StdTcpListener;

    fn socket_pair() -> (TcpStream, std::net::TcpStream) {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = std::net::TcpStream::connect(addr).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();
        (TcpStream::from_std(accepted), peer)
    }

    fn test_config() -> Arc<Config> {
        Arc::new(Config::parse("port = 0\nno_tls = true\n").unwrap())
    }

    #[test]
    fn settings_timeout_sends_goaway_and_ends_session() {
        let (sock, mut peer) = socket_pair();
        let mut date = DateCache::new();
        let mut handler = Http2Handler::new(1, sock, None, test_config()).unwrap();

        handler.on_open(&mut date).unwrap();
        assert!(handler.next_deadline().is_some());

        // Nothing acknowledged our SETTINGS before the deadline.
        let fired = Instant::now() + SETTINGS_ACK_TIMEOUT + Duration::from_secs(1);
        assert!(handler.on_timer(fired, &mut date).is_err());
        handler.close();
        drop(handler);

        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut raw = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match peer.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => raw.extend_from_slice(&chunk[..n]),
            }
        }

        let decoder = FrameDecoder::new();
        let mut buf = BytesMut::from(&raw[..]);
        match decoder.decode(&mut buf).unwrap().unwrap() {
            Frame::Settings(s) => assert!(!s.ack),
            other => panic!("expected SETTINGS first, got {:?}", other),
        }
        match decoder.decode(&mut buf).unwrap().unwrap() {
            Frame::GoAway(g) => {
                assert_eq!(g.error_code, ErrorCode::SettingsTimeout.to_u32());
            }
            other => panic!("expected GOAWAY, got {:?}", other),
        }
    }

    #[test]
    fn settings_ack_disarms_the_timer() {
        let (sock, mut peer) = socket_pair();
        let mut date = DateCache::new();
        let mut handler = Http2Handler::new(2, sock, None, test_config()).unwrap();
        handler.on_open(&mut date).unwrap();
        assert!(handler.next_deadline().is_some());

        let encoder = FrameEncoder::new();
        let mut buf = BytesMut::new();
        encoder.encode(
            &Frame::Settings(SettingsFrame {
                ack: false,
                settings: vec![],
            }),
            &mut buf,
        );
        encoder.encode(
            &Frame::Settings(SettingsFrame {
                ack: true,
                settings: vec![],
            }),
            &mut buf,
        );
        peer.write_all(http2::CONNECTION_PREFACE).unwrap();
        peer.write_all(&buf).unwrap();

        // The nonblocking socket may not have the bytes yet; poll briefly.
        for _ in 0..100 {
            handler.on_readable(&mut date).unwrap();
            if handler.next_deadline().is_none() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(handler.next_deadline().is_none());
    }
}
