//! Frame encoding.

use bytes::{BufMut, BytesMut};

use super::types::*;
use super::{FRAME_HEADER_SIZE, flags};

/// Writes HTTP/2 frames into a `BytesMut`.
///
/// The encoder carries the peer's SETTINGS_MAX_FRAME_SIZE and an optional
/// fixed padding amount. When padding is nonzero, DATA, HEADERS and
/// PUSH_PROMISE frames are emitted with the PADDED flag and that many pad
/// octets, clamped to what the frame-size limit leaves room for.
pub struct FrameEncoder {
    max_frame_size: u32,
    padding: u8,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self {
            max_frame_size: super::DEFAULT_MAX_FRAME_SIZE,
            padding: 0,
        }
    }

    pub fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size;
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Set the pad octets added to each padded-capable frame.
    pub fn set_padding(&mut self, padding: u8) {
        self.padding = padding;
    }

    /// Largest DATA payload a single frame may carry, accounting for the
    /// pad length octet and padding when configured.
    pub fn max_data_len(&self) -> usize {
        let max = self.max_frame_size as usize;
        if self.padding == 0 {
            max
        } else {
            max.saturating_sub(1 + self.padding as usize)
        }
    }

    pub fn encode(&self, frame: &Frame, buf: &mut BytesMut) {
        match frame {
            Frame::Data(f) => self.encode_data(f, buf),
            Frame::Headers(f) => self.encode_headers(f, buf),
            Frame::Priority(f) => self.encode_priority(f, buf),
            Frame::RstStream(f) => self.encode_rst_stream(f, buf),
            Frame::Settings(f) => self.encode_settings(f, buf),
            Frame::PushPromise(f) => self.encode_push_promise(f, buf),
            Frame::Ping(f) => self.encode_ping(f, buf),
            Frame::GoAway(f) => self.encode_goaway(f, buf),
            Frame::WindowUpdate(f) => self.encode_window_update(f, buf),
            Frame::Continuation(f) => self.encode_continuation(f, buf),
            Frame::Unknown(f) => self.encode_unknown(f, buf),
        }
    }

    #[inline]
    fn write_header(
        &self,
        buf: &mut BytesMut,
        length: u32,
        frame_type: FrameType,
        frame_flags: u8,
        stream_id: StreamId,
    ) {
        buf.put_u8((length >> 16) as u8);
        buf.put_u8((length >> 8) as u8);
        buf.put_u8(length as u8);
        buf.put_u8(frame_type as u8);
        buf.put_u8(frame_flags);
        buf.put_u32(stream_id.value() & 0x7FFF_FFFF);
    }

    /// Pad octets that fit alongside `base_len` payload bytes.
    fn pad_for(&self, base_len: usize) -> u8 {
        if self.padding == 0 {
            return 0;
        }
        let room = (self.max_frame_size as usize).saturating_sub(base_len + 1);
        self.padding.min(room.min(255) as u8)
    }

    fn encode_data(&self, frame: &DataFrame, buf: &mut BytesMut) {
        let mut frame_flags = 0u8;
        if frame.end_stream {
            frame_flags |= flags::END_STREAM;
        }

        let pad = self.pad_for(frame.data.len());
        let mut length = frame.data.len() as u32;
        if pad > 0 || self.padding > 0 {
            frame_flags |= flags::PADDED;
            length += 1 + pad as u32;
        }

        buf.reserve(FRAME_HEADER_SIZE + length as usize);
        self.write_header(buf, length, FrameType::Data, frame_flags, frame.stream_id);
        if frame_flags & flags::PADDED != 0 {
            buf.put_u8(pad);
        }
        buf.extend_from_slice(&frame.data);
        buf.put_bytes(0, pad as usize);
    }

    fn encode_headers(&self, frame: &HeadersFrame, buf: &mut BytesMut) {
        let mut frame_flags = 0u8;
        if frame.end_stream {
            frame_flags |= flags::END_STREAM;
        }
        if frame.end_headers {
            frame_flags |= flags::END_HEADERS;
        }
        if frame.priority.is_some() {
            frame_flags |= flags::PRIORITY;
        }

        let priority_len = if frame.priority.is_some() { 5 } else { 0 };
        let base = priority_len + frame.header_block.len();
        let pad = self.pad_for(base);
        let mut length = base as u32;
        if pad > 0 || self.padding > 0 {
            frame_flags |= flags::PADDED;
            length += 1 + pad as u32;
        }

        buf.reserve(FRAME_HEADER_SIZE + length as usize);
        self.write_header(buf, length, FrameType::Headers, frame_flags, frame.stream_id);
        if frame_flags & flags::PADDED != 0 {
            buf.put_u8(pad);
        }
        if let Some(priority) = &frame.priority {
            let mut dep = priority.dependency.value();
            if priority.exclusive {
                dep |= 0x8000_0000;
            }
            buf.put_u32(dep);
            buf.put_u8(priority.weight);
        }
        buf.extend_from_slice(&frame.header_block);
        buf.put_bytes(0, pad as usize);
    }

    fn encode_priority(&self, frame: &PriorityFrame, buf: &mut BytesMut) {
        buf.reserve(FRAME_HEADER_SIZE + 5);
        self.write_header(buf, 5, FrameType::Priority, 0, frame.stream_id);
        let mut dep = frame.priority.dependency.value();
        if frame.priority.exclusive {
            dep |= 0x8000_0000;
        }
        buf.put_u32(dep);
        buf.put_u8(frame.priority.weight);
    }

    fn encode_rst_stream(&self, frame: &RstStreamFrame, buf: &mut BytesMut) {
        buf.reserve(FRAME_HEADER_SIZE + 4);
        self.write_header(buf, 4, FrameType::RstStream, 0, frame.stream_id);
        buf.put_u32(frame.error_code);
    }

    fn encode_settings(&self, frame: &SettingsFrame, buf: &mut BytesMut) {
        let frame_flags = if frame.ack { flags::ACK } else { 0 };
        let length = if frame.ack {
            0
        } else {
            (frame.settings.len() * 6) as u32
        };

        buf.reserve(FRAME_HEADER_SIZE + length as usize);
        self.write_header(
            buf,
            length,
            FrameType::Settings,
            frame_flags,
            StreamId::CONNECTION,
        );
        if !frame.ack {
            for setting in &frame.settings {
                buf.put_u16(setting.id.to_u16());
                buf.put_u32(setting.value);
            }
        }
    }

    fn encode_push_promise(&self, frame: &PushPromiseFrame, buf: &mut BytesMut) {
        let mut frame_flags = 0u8;
        if frame.end_headers {
            frame_flags |= flags::END_HEADERS;
        }

        let base = 4 + frame.header_block.len();
        let pad = self.pad_for(base);
        let mut length = base as u32;
        if pad > 0 || self.padding > 0 {
            frame_flags |= flags::PADDED;
            length += 1 + pad as u32;
        }

        buf.reserve(FRAME_HEADER_SIZE + length as usize);
        self.write_header(
            buf,
            length,
            FrameType::PushPromise,
            frame_flags,
            frame.stream_id,
        );
        if frame_flags & flags::PADDED != 0 {
            buf.put_u8(pad);
        }
        buf.put_u32(frame.promised_stream_id.value() & 0x7FFF_FFFF);
        buf.extend_from_slice(&frame.header_block);
        buf.put_bytes(0, pad as usize);
    }

    fn encode_ping(&self, frame: &PingFrame, buf: &mut BytesMut) {
        let frame_flags = if frame.ack { flags::ACK } else { 0 };
        buf.reserve(FRAME_HEADER_SIZE + 8);
        self.write_header(buf, 8, FrameType::Ping, frame_flags, StreamId::CONNECTION);
        buf.extend_from_slice(&frame.data);
    }

    fn encode_goaway(&self, frame: &GoAwayFrame, buf: &mut BytesMut) {
        let length = 8 + frame.debug_data.len() as u32;
        buf.reserve(FRAME_HEADER_SIZE + length as usize);
        self.write_header(buf, length, FrameType::GoAway, 0, StreamId::CONNECTION);
        buf.put_u32(frame.last_stream_id.value() & 0x7FFF_FFFF);
        buf.put_u32(frame.error_code);
        buf.extend_from_slice(&frame.debug_data);
    }

    fn encode_window_update(&self, frame: &WindowUpdateFrame, buf: &mut BytesMut) {
        buf.reserve(FRAME_HEADER_SIZE + 4);
        self.write_header(buf, 4, FrameType::WindowUpdate, 0, frame.stream_id);
        buf.put_u32(frame.increment & 0x7FFF_FFFF);
    }

    fn encode_continuation(&self, frame: &ContinuationFrame, buf: &mut BytesMut) {
        let frame_flags = if frame.end_headers {
            flags::END_HEADERS
        } else {
            0
        };
        let length = frame.header_block.len() as u32;
        buf.reserve(FRAME_HEADER_SIZE + length as usize);
        self.write_header(
            buf,
            length,
            FrameType::Continuation,
            frame_flags,
            frame.stream_id,
        );
        buf.extend_from_slice(&frame.header_block);
    }

    fn encode_unknown(&self, frame: &UnknownFrame, buf: &mut BytesMut) {
        let length = frame.payload.len() as u32;
        buf.reserve(FRAME_HEADER_SIZE + length as usize);
        buf.put_u8((length >> 16) as u8);
        buf.put_u8((length >> 8) as u8);
        buf.put_u8(length as u8);
        buf.put_u8(frame.frame_type);
        buf.put_u8(frame.flags);
        buf.put_u32(frame.stream_id.value() & 0x7FFF_FFFF);
        buf.extend_from_slice(&frame.payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameDecoder;
    use bytes::Bytes;

    fn roundtrip(frame: Frame) -> Frame {
        let encoder = FrameEncoder::new();
        let decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();
        encoder.encode(&frame, &mut buf);
        decoder.decode(&mut buf).unwrap().unwrap()
    }

    #[test]
    fn roundtrip_data() {
        let out = roundtrip(Frame::Data(DataFrame {
            stream_id: StreamId::new(1),
            end_stream: true,
            data: Bytes::from_static(b"hello world"),
        }));
        match out {
            Frame::Data(d) => {
                assert_eq!(d.stream_id.value(), 1);
                assert!(d.end_stream);
                assert_eq!(&d.data[..], b"hello world");
            }
            other => panic!("expected DATA, got {:?}", other),
        }
    }

    #[test]
    fn roundtrip_headers_with_priority() {
        let out = roundtrip(Frame::Headers(HeadersFrame {
            stream_id: StreamId::new(3),
            end_stream: false,
            end_headers: true,
            priority: Some(Priority {
                exclusive: true,
                dependency: StreamId::new(1),
                weight: 200,
            }),
            header_block: Bytes::from_static(&[0x82, 0x84]),
        }));
        match out {
            Frame::Headers(h) => {
                let p = h.priority.unwrap();
                assert!(p.exclusive);
                assert_eq!(p.dependency.value(), 1);
                assert_eq!(p.weight, 200);
                assert_eq!(&h.header_block[..], &[0x82, 0x84]);
            }
            other => panic!("expected HEADERS, got {:?}", other),
        }
    }

    #[test]
    fn roundtrip_settings() {
        let out = roundtrip(Frame::Settings(SettingsFrame {
            ack: false,
            settings: vec![Setting {
                id: SettingId::MaxConcurrentStreams,
                value: 100,
            }],
        }));
        match out {
            Frame::Settings(s) => {
                assert!(!s.ack);
                assert_eq!(s.settings.len(), 1);
                assert_eq!(s.settings[0].value, 100);
            }
            other => panic!("expected SETTINGS, got {:?}", other),
        }
    }

    #[test]
    fn roundtrip_push_promise() {
        let out = roundtrip(Frame::PushPromise(PushPromiseFrame {
            stream_id: StreamId::new(1),
            end_headers: true,
            promised_stream_id: StreamId::new(2),
            header_block: Bytes::from_static(&[0x82]),
        }));
        match out {
            Frame::PushPromise(pp) => {
                assert_eq!(pp.stream_id.value(), 1);
                assert_eq!(pp.promised_stream_id.value(), 2);
            }
            other => panic!("expected PUSH_PROMISE, got {:?}", other),
        }
    }

    #[test]
    fn roundtrip_goaway() {
        let out = roundtrip(Frame::GoAway(GoAwayFrame {
            last_stream_id: StreamId::new(7),
            error_code: ErrorCode::SettingsTimeout.to_u32(),
            debug_data: Bytes::from_static(b"bye"),
        }));
        match out {
            Frame::GoAway(g) => {
                assert_eq!(g.last_stream_id.value(), 7);
                assert_eq!(g.error_code, 0x4);
                assert_eq!(&g.debug_data[..], b"bye");
            }
            other => panic!("expected GOAWAY, got {:?}", other),
        }
    }

    use crate::frame::ErrorCode;

    #[test]
    fn padded_data_roundtrips_to_same_payload() {
        let mut encoder = FrameEncoder::new();
        encoder.set_padding(16);
        let decoder = FrameDecoder::new();

        let mut buf = BytesMut::new();
        encoder.encode(
            &Frame::Data(DataFrame {
                stream_id: StreamId::new(1),
                end_stream: false,
                data: Bytes::from_static(b"payload"),
            }),
            &mut buf,
        );

        // On the wire: header + pad-length octet + payload + 16 pad octets.
        assert_eq!(buf.len(), 9 + 1 + 7 + 16);
        match decoder.decode(&mut buf).unwrap().unwrap() {
            Frame::Data(d) => assert_eq!(&d.data[..], b"payload"),
            other => panic!("expected DATA, got {:?}", other),
        }
    }

    #[test]
    fn max_data_len_accounts_for_padding() {
        let mut encoder = FrameEncoder::new();
        assert_eq!(encoder.max_data_len(), 16_384);
        encoder.set_padding(32);
        assert_eq!(encoder.max_data_len(), 16_384 - 33);
    }
}
