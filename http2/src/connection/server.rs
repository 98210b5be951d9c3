//! Server side of one HTTP/2 session.

use super::{ConnectionError, ConnectionSettings, ConnectionState, FlowControl, Stream};
use crate::frame::{
    self, DataFrame, ErrorCode, Frame, FrameDecoder, FrameEncoder, GoAwayFrame, HeadersFrame,
    PingFrame, PushPromiseFrame, RstStreamFrame, Setting, SettingId, SettingsFrame, StreamId,
    WindowUpdateFrame,
};
use crate::hpack::{HeaderField, HpackDecoder, HpackEncoder};

use bytes::{Bytes, BytesMut};
use std::collections::HashMap;

/// Something that happened on the session, surfaced to the handler.
#[derive(Debug)]
pub enum ServerEvent {
    /// Preface and client SETTINGS are in; requests may arrive.
    Ready,
    /// A complete request header block.
    Request {
        stream_id: StreamId,
        headers: Vec<HeaderField>,
        end_stream: bool,
    },
    /// Request body bytes arrived. The bytes themselves are discarded;
    /// only the amount is reported.
    Data {
        stream_id: StreamId,
        len: usize,
        end_stream: bool,
    },
    /// The peer acknowledged our SETTINGS.
    SettingsAck,
    /// The peer reset a stream.
    StreamReset {
        stream_id: StreamId,
        error_code: ErrorCode,
    },
    /// A stream reached the Closed state and was dropped from the session.
    StreamClosed { stream_id: StreamId },
    /// The peer is going away.
    GoAway {
        last_stream_id: StreamId,
        error_code: ErrorCode,
    },
    /// The session is broken.
    Error(ConnectionError),
}

/// HTTP/2 server session.
pub struct ServerConnection {
    state: ConnectionState,
    local_settings: ConnectionSettings,
    remote_settings: ConnectionSettings,
    got_preface: bool,
    got_settings: bool,
    frame_encoder: FrameEncoder,
    frame_decoder: FrameDecoder,
    hpack_encoder: HpackEncoder,
    hpack_decoder: HpackDecoder,
    streams: HashMap<u32, Stream>,
    /// Connection-level receive window and owed WINDOW_UPDATE.
    recv_flow: FlowControl,
    /// Connection-level send window, raised by peer WINDOW_UPDATEs.
    send_window: i32,
    write_buf: BytesMut,
    read_buf: BytesMut,
    events: Vec<ServerEvent>,
    last_client_stream_id: u32,
    /// Next even id handed to a PUSH_PROMISE.
    next_promised_id: u32,
}

impl ServerConnection {
    pub fn new(settings: ConnectionSettings) -> Self {
        let mut frame_encoder = FrameEncoder::new();
        frame_encoder.set_padding(settings.padding);

        Self {
            state: ConnectionState::AwaitingPreface,
            local_settings: settings,
            remote_settings: ConnectionSettings::default(),
            got_preface: false,
            got_settings: false,
            frame_encoder,
            frame_decoder: FrameDecoder::new(),
            hpack_encoder: HpackEncoder::new(),
            hpack_decoder: HpackDecoder::new(),
            streams: HashMap::new(),
            recv_flow: FlowControl::new(frame::DEFAULT_INITIAL_WINDOW_SIZE),
            send_window: frame::DEFAULT_INITIAL_WINDOW_SIZE as i32,
            write_buf: BytesMut::with_capacity(16384),
            read_buf: BytesMut::with_capacity(16384),
            events: Vec::new(),
            last_client_stream_id: 0,
            next_promised_id: 2,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, ConnectionState::Open)
    }

    pub fn is_draining(&self) -> bool {
        matches!(self.state, ConnectionState::Draining)
    }

    /// Queue the server preface: our SETTINGS. Advertises
    /// MAX_CONCURRENT_STREAMS and, when configured, HEADER_TABLE_SIZE.
    pub fn start(&mut self) {
        let mut settings = vec![Setting {
            id: SettingId::MaxConcurrentStreams,
            value: self.local_settings.max_concurrent_streams,
        }];
        if let Some(size) = self.local_settings.header_table_size {
            settings.push(Setting {
                id: SettingId::HeaderTableSize,
                value: size,
            });
            self.hpack_decoder.set_max_table_size(size as usize);
        }
        self.frame_encoder.encode(
            &Frame::Settings(SettingsFrame {
                ack: false,
                settings,
            }),
            &mut self.write_buf,
        );
    }

    /// Feed bytes received from the peer.
    pub fn feed_data(&mut self, data: &[u8]) {
        self.read_buf.extend_from_slice(data);

        if !self.got_preface {
            let preface = frame::CONNECTION_PREFACE;
            if self.read_buf.len() < preface.len() {
                return;
            }
            if &self.read_buf[..preface.len()] != preface {
                self.events
                    .push(ServerEvent::Error(ConnectionError::BadPreface));
                return;
            }
            let _ = self.read_buf.split_to(preface.len());
            self.got_preface = true;
            self.state = ConnectionState::AwaitingSettings;
        }

        self.process_frames();
    }

    fn process_frames(&mut self) {
        loop {
            match self.frame_decoder.decode(&mut self.read_buf) {
                Ok(Some(frame)) => self.handle_frame(frame),
                Ok(None) => break,
                Err(e) => {
                    self.events.push(ServerEvent::Error(e.into()));
                    break;
                }
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Settings(f) => self.handle_settings(f),
            Frame::Ping(f) => self.handle_ping(f),
            Frame::GoAway(f) => self.handle_goaway(f),
            Frame::WindowUpdate(f) => self.handle_window_update(f),
            Frame::Headers(f) => self.handle_headers(f),
            Frame::Data(f) => self.handle_data(f),
            Frame::RstStream(f) => self.handle_rst_stream(f),
            Frame::Priority(_) => {}
            Frame::Unknown(_) => {}
            Frame::PushPromise(_) => {
                self.events.push(ServerEvent::Error(ConnectionError::Protocol(
                    "PUSH_PROMISE from client".into(),
                )));
            }
            Frame::Continuation(_) => {
                self.events.push(ServerEvent::Error(ConnectionError::Protocol(
                    "unexpected CONTINUATION".into(),
                )));
            }
        }
    }

    fn handle_settings(&mut self, frame: SettingsFrame) {
        if frame.ack {
            self.events.push(ServerEvent::SettingsAck);
            return;
        }

        for setting in &frame.settings {
            match setting.id {
                SettingId::HeaderTableSize => {
                    self.hpack_encoder.set_table_size(setting.value as usize);
                }
                SettingId::EnablePush => {
                    self.remote_settings.enable_push = setting.value == 1;
                }
                SettingId::MaxConcurrentStreams => {
                    self.remote_settings.max_concurrent_streams = setting.value;
                }
                SettingId::InitialWindowSize => {
                    let delta =
                        setting.value as i32 - self.remote_settings.initial_window_size as i32;
                    self.remote_settings.initial_window_size = setting.value;
                    for stream in self.streams.values_mut() {
                        stream.adjust_send_window(delta);
                    }
                }
                SettingId::MaxFrameSize => {
                    self.remote_settings.max_frame_size = setting.value;
                    self.frame_encoder.set_max_frame_size(setting.value);
                }
                SettingId::MaxHeaderListSize | SettingId::Unknown(_) => {}
            }
        }

        self.frame_encoder.encode(
            &Frame::Settings(SettingsFrame {
                ack: true,
                settings: Vec::new(),
            }),
            &mut self.write_buf,
        );

        if !self.got_settings {
            self.got_settings = true;
            if self.state == ConnectionState::AwaitingSettings {
                self.state = ConnectionState::Open;
            }
            self.events.push(ServerEvent::Ready);
        }
    }

    fn handle_ping(&mut self, frame: PingFrame) {
        if frame.ack {
            return;
        }
        self.frame_encoder.encode(
            &Frame::Ping(PingFrame {
                ack: true,
                data: frame.data,
            }),
            &mut self.write_buf,
        );
    }

    fn handle_goaway(&mut self, frame: GoAwayFrame) {
        self.state = ConnectionState::Draining;
        self.events.push(ServerEvent::GoAway {
            last_stream_id: frame.last_stream_id,
            error_code: ErrorCode::from_u32(frame.error_code),
        });
    }

    fn handle_window_update(&mut self, frame: WindowUpdateFrame) {
        if frame.stream_id.is_connection_level() {
            self.send_window = self.send_window.saturating_add(frame.increment as i32);
        } else if let Some(stream) = self.streams.get_mut(&frame.stream_id.value()) {
            stream.increase_send_window(frame.increment);
        }
    }

    fn handle_headers(&mut self, frame: HeadersFrame) {
        let stream_id = frame.stream_id;

        if !frame.end_headers {
            self.events.push(ServerEvent::Error(ConnectionError::Protocol(
                "header block continuation not supported".into(),
            )));
            return;
        }
        if !stream_id.is_client_initiated() {
            self.events.push(ServerEvent::Error(ConnectionError::Protocol(
                "even stream id from client".into(),
            )));
            return;
        }
        if stream_id.value() <= self.last_client_stream_id {
            self.events.push(ServerEvent::Error(ConnectionError::Protocol(
                "stream id not monotonically increasing".into(),
            )));
            return;
        }

        let headers = match self.hpack_decoder.decode(&frame.header_block) {
            Ok(h) => h,
            Err(e) => {
                self.events.push(ServerEvent::Error(e.into()));
                return;
            }
        };

        self.last_client_stream_id = stream_id.value();

        let mut stream = Stream::new(stream_id, self.remote_settings.initial_window_size);
        if frame.end_stream {
            stream.recv_end_stream();
        }
        self.streams.insert(stream_id.value(), stream);

        self.events.push(ServerEvent::Request {
            stream_id,
            headers,
            end_stream: frame.end_stream,
        });
    }

    fn handle_data(&mut self, frame: DataFrame) {
        let len = frame.data.len();
        let stream_id = frame.stream_id;

        match self.streams.get_mut(&stream_id.value()) {
            Some(stream) => {
                stream.recv_data(len as u32);
                if frame.end_stream {
                    stream.recv_end_stream();
                } else if len > 0 {
                    // Bodies are discarded, so hand the stream window
                    // straight back.
                    stream.restore_recv_window(len as u32);
                    self.frame_encoder.encode(
                        &Frame::WindowUpdate(WindowUpdateFrame {
                            stream_id,
                            increment: len as u32,
                        }),
                        &mut self.write_buf,
                    );
                }
            }
            None => return,
        }

        self.recv_flow.consume(len as u32);
        if self.recv_flow.should_update() {
            let increment = self.recv_flow.pending_update();
            self.recv_flow.reset_pending();
            self.frame_encoder.encode(
                &Frame::WindowUpdate(WindowUpdateFrame {
                    stream_id: StreamId::CONNECTION,
                    increment,
                }),
                &mut self.write_buf,
            );
        }

        self.events.push(ServerEvent::Data {
            stream_id,
            len,
            end_stream: frame.end_stream,
        });
    }

    fn handle_rst_stream(&mut self, frame: RstStreamFrame) {
        if self.streams.remove(&frame.stream_id.value()).is_some() {
            self.events.push(ServerEvent::StreamReset {
                stream_id: frame.stream_id,
                error_code: ErrorCode::from_u32(frame.error_code),
            });
        }
    }

    /// True once the peer can no longer send on the stream (it half-closed,
    /// was pushed, or is already gone).
    pub fn peer_closed(&self, stream_id: StreamId) -> bool {
        self.streams
            .get(&stream_id.value())
            .map(|s| s.peer_closed())
            .unwrap_or(true)
    }

    /// Bytes a single `send_data` call could emit right now: the smaller of
    /// the connection and stream send windows, capped at one frame.
    pub fn send_capacity(&self, stream_id: StreamId) -> i32 {
        let stream_window = match self.streams.get(&stream_id.value()) {
            Some(s) if s.can_send() => s.send_window(),
            _ => return 0,
        };
        self.send_window
            .min(stream_window)
            .min(self.frame_encoder.max_data_len() as i32)
    }

    /// Queue a HEADERS frame: a response, a non-final (1xx) response, or
    /// trailers when `end_stream` is set after DATA.
    pub fn send_headers(
        &mut self,
        stream_id: StreamId,
        headers: &[HeaderField],
        end_stream: bool,
    ) -> Result<(), ConnectionError> {
        {
            let stream = self
                .streams
                .get_mut(&stream_id.value())
                .ok_or(ConnectionError::StreamNotFound(stream_id))?;
            stream.send_headers();
        }

        let mut block = Vec::new();
        self.hpack_encoder.encode(headers, &mut block);

        self.frame_encoder.encode(
            &Frame::Headers(HeadersFrame {
                stream_id,
                end_stream,
                end_headers: true,
                priority: None,
                header_block: Bytes::from(block),
            }),
            &mut self.write_buf,
        );

        if end_stream {
            self.finish_send(stream_id);
        }
        Ok(())
    }

    /// Queue up to one frame of DATA, bounded by flow control. Returns the
    /// number of payload bytes accepted; zero means blocked.
    pub fn send_data(
        &mut self,
        stream_id: StreamId,
        data: &[u8],
        end_stream: bool,
    ) -> Result<usize, ConnectionError> {
        let capacity = {
            let stream = self
                .streams
                .get(&stream_id.value())
                .ok_or(ConnectionError::StreamNotFound(stream_id))?;
            self.send_window
                .min(stream.send_window())
                .min(self.frame_encoder.max_data_len() as i32)
                .max(0) as usize
        };

        let to_send = data.len().min(capacity);
        if to_send == 0 && !data.is_empty() {
            return Ok(0);
        }
        let is_end = end_stream && to_send == data.len();

        self.send_window -= to_send as i32;
        if let Some(stream) = self.streams.get_mut(&stream_id.value()) {
            stream.send_data(to_send as u32);
        }

        self.frame_encoder.encode(
            &Frame::Data(DataFrame {
                stream_id,
                end_stream: is_end,
                data: Bytes::copy_from_slice(&data[..to_send]),
            }),
            &mut self.write_buf,
        );

        if is_end {
            self.finish_send(stream_id);
        }
        Ok(to_send)
    }

    /// Queue a PUSH_PROMISE on `stream_id` and reserve the promised stream.
    /// Returns the promised (even) stream id.
    pub fn send_push_promise(
        &mut self,
        stream_id: StreamId,
        headers: &[HeaderField],
    ) -> Result<StreamId, ConnectionError> {
        if !self.remote_settings.enable_push || self.is_draining() {
            return Err(ConnectionError::PushRefused);
        }
        if !self.streams.contains_key(&stream_id.value()) {
            return Err(ConnectionError::StreamNotFound(stream_id));
        }

        let promised = StreamId::new(self.next_promised_id);
        self.next_promised_id += 2;

        let mut block = Vec::new();
        self.hpack_encoder.encode(headers, &mut block);

        self.frame_encoder.encode(
            &Frame::PushPromise(PushPromiseFrame {
                stream_id,
                end_headers: true,
                promised_stream_id: promised,
                header_block: Bytes::from(block),
            }),
            &mut self.write_buf,
        );

        self.streams.insert(
            promised.value(),
            Stream::new_pushed(promised, self.remote_settings.initial_window_size),
        );

        Ok(promised)
    }

    /// Queue RST_STREAM and drop the stream.
    pub fn reset_stream(&mut self, stream_id: StreamId, error_code: ErrorCode) {
        self.frame_encoder.encode(
            &Frame::RstStream(RstStreamFrame {
                stream_id,
                error_code: error_code.to_u32(),
            }),
            &mut self.write_buf,
        );
        if self.streams.remove(&stream_id.value()).is_some() {
            self.events.push(ServerEvent::StreamClosed { stream_id });
        }
    }

    /// Queue GOAWAY and stop accepting new streams.
    pub fn send_goaway(&mut self, error_code: ErrorCode, debug_data: &[u8]) {
        self.frame_encoder.encode(
            &Frame::GoAway(GoAwayFrame {
                last_stream_id: StreamId::new(self.last_client_stream_id),
                error_code: error_code.to_u32(),
                debug_data: Bytes::copy_from_slice(debug_data),
            }),
            &mut self.write_buf,
        );
        self.state = ConnectionState::Draining;
    }

    /// Our END_STREAM went out; retire the stream if both sides are done.
    fn finish_send(&mut self, stream_id: StreamId) {
        let closed = match self.streams.get_mut(&stream_id.value()) {
            Some(stream) => {
                stream.send_end_stream();
                stream.is_closed()
            }
            None => false,
        };
        if closed {
            self.streams.remove(&stream_id.value());
            self.events.push(ServerEvent::StreamClosed { stream_id });
        }
    }

    pub fn poll_events(&mut self) -> Vec<ServerEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn pending_send(&self) -> &[u8] {
        &self.write_buf
    }

    pub fn advance_send(&mut self, n: usize) {
        let _ = self.write_buf.split_to(n);
    }

    pub fn has_pending_send(&self) -> bool {
        !self.write_buf.is_empty()
    }

    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    #[cfg(test)]
    pub(crate) fn remote_settings(&self) -> &ConnectionSettings {
        &self.remote_settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Peer {
        enc: FrameEncoder,
        dec: FrameDecoder,
        hpe: HpackEncoder,
        hpd: HpackDecoder,
        inbound: BytesMut,
    }

    impl Peer {
        fn new() -> Self {
            Self {
                enc: FrameEncoder::new(),
                dec: FrameDecoder::new(),
                hpe: HpackEncoder::new(),
                hpd: HpackDecoder::new(),
                inbound: BytesMut::new(),
            }
        }

        fn settings(&mut self, settings: &[Setting]) -> BytesMut {
            let mut buf = BytesMut::new();
            self.enc.encode(
                &Frame::Settings(SettingsFrame {
                    ack: false,
                    settings: settings.to_vec(),
                }),
                &mut buf,
            );
            buf
        }

        fn request(&mut self, stream_id: u32, path: &str, end_stream: bool) -> BytesMut {
            let headers = vec![
                HeaderField::new(&b":method"[..], &b"GET"[..]),
                HeaderField::new(&b":path"[..], path.as_bytes()),
                HeaderField::new(&b":scheme"[..], &b"http"[..]),
                HeaderField::new(&b":authority"[..], &b"test"[..]),
            ];
            let mut block = Vec::new();
            self.hpe.encode(&headers, &mut block);
            let mut buf = BytesMut::new();
            self.enc.encode(
                &Frame::Headers(HeadersFrame {
                    stream_id: StreamId::new(stream_id),
                    end_stream,
                    end_headers: true,
                    priority: None,
                    header_block: Bytes::from(block),
                }),
                &mut buf,
            );
            buf
        }

        /// Pull every queued frame out of the server.
        fn drain(&mut self, conn: &mut ServerConnection) -> Vec<Frame> {
            self.inbound.extend_from_slice(conn.pending_send());
            let n = conn.pending_send().len();
            conn.advance_send(n);
            let mut frames = Vec::new();
            while let Some(f) = self.dec.decode(&mut self.inbound).unwrap() {
                frames.push(f);
            }
            frames
        }
    }

    fn open_session() -> (ServerConnection, Peer) {
        let mut conn = ServerConnection::new(ConnectionSettings::default());
        let mut peer = Peer::new();
        conn.start();

        conn.feed_data(frame::CONNECTION_PREFACE);
        let client_settings = peer.settings(&[]);
        conn.feed_data(&client_settings);

        let events = conn.poll_events();
        assert!(events.iter().any(|e| matches!(e, ServerEvent::Ready)));
        (conn, peer)
    }

    #[test]
    fn server_settings_queued_before_preface_arrives() {
        let mut conn = ServerConnection::new(
            ConnectionSettings::default().header_table_size(Some(8192)),
        );
        conn.start();

        let mut peer = Peer::new();
        let frames = peer.drain(&mut conn);
        match &frames[0] {
            Frame::Settings(s) => {
                assert!(!s.ack);
                assert_eq!(s.settings[0].id, SettingId::MaxConcurrentStreams);
                assert_eq!(s.settings[0].value, 100);
                assert_eq!(s.settings[1].id, SettingId::HeaderTableSize);
                assert_eq!(s.settings[1].value, 8192);
            }
            other => panic!("expected SETTINGS, got {:?}", other),
        }
    }

    #[test]
    fn bad_preface_is_reported_as_such() {
        let mut conn = ServerConnection::new(ConnectionSettings::default());
        conn.feed_data(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n padding...");
        let events = conn.poll_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerEvent::Error(ConnectionError::BadPreface))));
    }

    #[test]
    fn partial_preface_waits() {
        let mut conn = ServerConnection::new(ConnectionSettings::default());
        conn.feed_data(&frame::CONNECTION_PREFACE[..10]);
        assert!(conn.poll_events().is_empty());
        assert_eq!(conn.state(), ConnectionState::AwaitingPreface);

        conn.feed_data(&frame::CONNECTION_PREFACE[10..]);
        assert_eq!(conn.state(), ConnectionState::AwaitingSettings);
    }

    #[test]
    fn request_event_carries_headers() {
        let (mut conn, mut peer) = open_session();
        let req = peer.request(1, "/hello.txt", true);
        conn.feed_data(&req);

        let events = conn.poll_events();
        let found = events.iter().any(|e| match e {
            ServerEvent::Request {
                stream_id,
                headers,
                end_stream,
            } => {
                assert_eq!(stream_id.value(), 1);
                assert!(*end_stream);
                headers
                    .iter()
                    .any(|h| h.name == b":path" && h.value == b"/hello.txt")
            }
            _ => false,
        });
        assert!(found);
    }

    #[test]
    fn even_stream_id_rejected() {
        let (mut conn, mut peer) = open_session();
        let req = peer.request(2, "/", true);
        conn.feed_data(&req);
        assert!(conn
            .poll_events()
            .iter()
            .any(|e| matches!(e, ServerEvent::Error(ConnectionError::Protocol(_)))));
    }

    #[test]
    fn stream_ids_must_increase() {
        let (mut conn, mut peer) = open_session();
        let a = peer.request(5, "/a", true);
        conn.feed_data(&a);
        let _ = conn.poll_events();
        let b = peer.request(3, "/b", true);
        conn.feed_data(&b);
        assert!(conn
            .poll_events()
            .iter()
            .any(|e| matches!(e, ServerEvent::Error(ConnectionError::Protocol(_)))));
    }

    #[test]
    fn settings_ack_surfaces() {
        let (mut conn, _peer) = open_session();
        let mut buf = BytesMut::new();
        FrameEncoder::new().encode(
            &Frame::Settings(SettingsFrame {
                ack: true,
                settings: vec![],
            }),
            &mut buf,
        );
        conn.feed_data(&buf);
        assert!(conn
            .poll_events()
            .iter()
            .any(|e| matches!(e, ServerEvent::SettingsAck)));
    }

    #[test]
    fn response_roundtrips_to_peer() {
        let (mut conn, mut peer) = open_session();
        let req = peer.request(1, "/x", true);
        conn.feed_data(&req);
        let _ = conn.poll_events();
        let _ = peer.drain(&mut conn);

        conn.send_headers(
            StreamId::new(1),
            &[HeaderField::new(&b":status"[..], &b"200"[..])],
            false,
        )
        .unwrap();
        let sent = conn.send_data(StreamId::new(1), b"hi\n", true).unwrap();
        assert_eq!(sent, 3);

        let frames = peer.drain(&mut conn);
        match &frames[0] {
            Frame::Headers(h) => {
                let fields = peer.hpd.decode(&h.header_block).unwrap();
                assert_eq!(fields[0], HeaderField::new(&b":status"[..], &b"200"[..]));
            }
            other => panic!("expected HEADERS, got {:?}", other),
        }
        match &frames[1] {
            Frame::Data(d) => {
                assert_eq!(&d.data[..], b"hi\n");
                assert!(d.end_stream);
            }
            other => panic!("expected DATA, got {:?}", other),
        }

        // Both sides closed: the stream is gone.
        let events = conn.poll_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerEvent::StreamClosed { stream_id } if stream_id.value() == 1)));
        assert_eq!(conn.active_streams(), 0);
    }

    #[test]
    fn send_data_respects_stream_window() {
        let (mut conn, mut peer) = open_session();

        // Shrink the stream send window to 8 bytes.
        let small = peer.settings(&[Setting {
            id: SettingId::InitialWindowSize,
            value: 8,
        }]);
        conn.feed_data(&small);
        let req = peer.request(1, "/x", true);
        conn.feed_data(&req);
        let _ = conn.poll_events();

        conn.send_headers(
            StreamId::new(1),
            &[HeaderField::new(&b":status"[..], &b"200"[..])],
            false,
        )
        .unwrap();

        assert_eq!(conn.send_capacity(StreamId::new(1)), 8);
        let sent = conn
            .send_data(StreamId::new(1), b"0123456789abcdef", true)
            .unwrap();
        assert_eq!(sent, 8);
        assert_eq!(conn.send_capacity(StreamId::new(1)), 0);

        // Blocked until a WINDOW_UPDATE arrives.
        let blocked = conn
            .send_data(StreamId::new(1), b"89abcdef", true)
            .unwrap();
        assert_eq!(blocked, 0);

        let mut wu = BytesMut::new();
        FrameEncoder::new().encode(
            &Frame::WindowUpdate(WindowUpdateFrame {
                stream_id: StreamId::new(1),
                increment: 100,
            }),
            &mut wu,
        );
        conn.feed_data(&wu);
        let sent = conn
            .send_data(StreamId::new(1), b"89abcdef", true)
            .unwrap();
        assert_eq!(sent, 8);
    }

    #[test]
    fn push_promise_reserves_even_stream() {
        let (mut conn, mut peer) = open_session();
        let req = peer.request(1, "/a.html", true);
        conn.feed_data(&req);
        let _ = conn.poll_events();
        let _ = peer.drain(&mut conn);

        let promised = conn
            .send_push_promise(
                StreamId::new(1),
                &[
                    HeaderField::new(&b":method"[..], &b"GET"[..]),
                    HeaderField::new(&b":path"[..], &b"/b.css"[..]),
                ],
            )
            .unwrap();
        assert_eq!(promised.value(), 2);
        assert!(conn.peer_closed(promised));

        let frames = peer.drain(&mut conn);
        assert!(matches!(
            &frames[0],
            Frame::PushPromise(pp) if pp.promised_stream_id.value() == 2
        ));

        // The promised stream can carry a response.
        conn.send_headers(
            promised,
            &[HeaderField::new(&b":status"[..], &b"200"[..])],
            false,
        )
        .unwrap();
        conn.send_data(promised, b"css", true).unwrap();
        assert_eq!(conn.active_streams(), 1); // stream 1 still open for send
    }

    #[test]
    fn push_refused_when_disabled() {
        let (mut conn, mut peer) = open_session();
        let off = peer.settings(&[Setting {
            id: SettingId::EnablePush,
            value: 0,
        }]);
        conn.feed_data(&off);
        let req = peer.request(1, "/a", true);
        conn.feed_data(&req);
        let _ = conn.poll_events();

        assert!(matches!(
            conn.send_push_promise(StreamId::new(1), &[]),
            Err(ConnectionError::PushRefused)
        ));
    }

    #[test]
    fn goaway_drains_session() {
        let (mut conn, mut peer) = open_session();
        conn.send_goaway(ErrorCode::SettingsTimeout, b"settings timeout");
        assert!(conn.is_draining());

        let frames = peer.drain(&mut conn);
        assert!(frames.iter().any(|f| matches!(
            f,
            Frame::GoAway(g) if g.error_code == ErrorCode::SettingsTimeout.to_u32()
        )));
    }

    #[test]
    fn rst_stream_drops_stream() {
        let (mut conn, mut peer) = open_session();
        let req = peer.request(1, "/slow", false);
        conn.feed_data(&req);
        let _ = conn.poll_events();
        assert_eq!(conn.active_streams(), 1);

        conn.reset_stream(StreamId::new(1), ErrorCode::InternalError);
        assert_eq!(conn.active_streams(), 0);

        let frames = peer.drain(&mut conn);
        assert!(frames.iter().any(|f| matches!(
            f,
            Frame::RstStream(r) if r.error_code == ErrorCode::InternalError.to_u32()
        )));
    }

    #[test]
    fn request_data_is_counted_and_discarded() {
        let (mut conn, mut peer) = open_session();
        let req = peer.request(1, "/upload", false);
        conn.feed_data(&req);
        let _ = conn.poll_events();

        let mut buf = BytesMut::new();
        peer.enc.encode(
            &Frame::Data(DataFrame {
                stream_id: StreamId::new(1),
                end_stream: true,
                data: Bytes::from_static(b"ignored body"),
            }),
            &mut buf,
        );
        conn.feed_data(&buf);

        let events = conn.poll_events();
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::Data {
                len: 12,
                end_stream: true,
                ..
            }
        )));
    }

    #[test]
    fn ping_is_answered() {
        let (mut conn, mut peer) = open_session();
        let _ = peer.drain(&mut conn);

        let mut buf = BytesMut::new();
        peer.enc.encode(
            &Frame::Ping(PingFrame {
                ack: false,
                data: [7; 8],
            }),
            &mut buf,
        );
        conn.feed_data(&buf);

        let frames = peer.drain(&mut conn);
        assert!(frames
            .iter()
            .any(|f| matches!(f, Frame::Ping(p) if p.ack && p.data == [7; 8])));
    }

    #[test]
    fn enable_push_tracked_from_settings() {
        let (mut conn, mut peer) = open_session();
        assert!(conn.remote_settings().enable_push);
        let off = peer.settings(&[Setting {
            id: SettingId::EnablePush,
            value: 0,
        }]);
        conn.feed_data(&off);
        assert!(!conn.remote_settings().enable_push);
    }
}
