//! Frame decoding.

use bytes::{Buf, Bytes, BytesMut};

use super::error::FrameError;
use super::types::*;
use super::{DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE, flags};

/// Incrementally parses HTTP/2 frames out of a byte buffer.
pub struct FrameDecoder {
    max_frame_size: u32,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size;
    }

    /// Try to decode one frame.
    ///
    /// `Ok(Some(frame))` consumes the frame's bytes from `buf`;
    /// `Ok(None)` means more bytes are needed.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let header = peek_header(buf);

        if header.length > self.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size: header.length,
                max: self.max_frame_size,
            });
        }

        let total = FRAME_HEADER_SIZE + header.length as usize;
        if buf.len() < total {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(header.length as usize).freeze();

        self.parse(header, payload).map(Some)
    }

    fn parse(&self, header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
        match FrameType::from_u8(header.frame_type) {
            Some(FrameType::Data) => parse_data(header, payload),
            Some(FrameType::Headers) => parse_headers(header, payload),
            Some(FrameType::Priority) => parse_priority(header, payload),
            Some(FrameType::RstStream) => parse_rst_stream(header, payload),
            Some(FrameType::Settings) => parse_settings(header, payload),
            Some(FrameType::PushPromise) => parse_push_promise(header, payload),
            Some(FrameType::Ping) => parse_ping(header, payload),
            Some(FrameType::GoAway) => parse_goaway(header, payload),
            Some(FrameType::WindowUpdate) => parse_window_update(header, payload),
            Some(FrameType::Continuation) => parse_continuation(header, payload),
            None => Ok(Frame::Unknown(UnknownFrame {
                frame_type: header.frame_type,
                flags: header.flags,
                stream_id: header.stream_id,
                payload,
            })),
        }
    }
}

fn peek_header(buf: &[u8]) -> FrameHeader {
    debug_assert!(buf.len() >= FRAME_HEADER_SIZE);
    let length = ((buf[0] as u32) << 16) | ((buf[1] as u32) << 8) | (buf[2] as u32);
    let stream_id = StreamId::new(
        ((buf[5] as u32) << 24)
            | ((buf[6] as u32) << 16)
            | ((buf[7] as u32) << 8)
            | (buf[8] as u32),
    );
    FrameHeader {
        length,
        frame_type: buf[3],
        flags: buf[4],
        stream_id,
    }
}

fn require_stream(header: &FrameHeader) -> Result<(), FrameError> {
    if header.stream_id.is_connection_level() {
        Err(FrameError::StreamIdRequired {
            frame_type: header.frame_type,
        })
    } else {
        Ok(())
    }
}

fn require_connection(header: &FrameHeader) -> Result<(), FrameError> {
    if header.stream_id.is_connection_level() {
        Ok(())
    } else {
        Err(FrameError::InvalidStreamZero {
            frame_type: header.frame_type,
        })
    }
}

/// Strip the pad-length octet and trailing pad octets from a PADDED payload.
fn remove_padding(mut payload: Bytes) -> Result<Bytes, FrameError> {
    if payload.is_empty() {
        return Err(FrameError::InvalidPadding {
            pad_length: 0,
            payload_length: 0,
        });
    }
    let pad_length = payload.get_u8() as usize;
    if pad_length > payload.len() {
        return Err(FrameError::InvalidPadding {
            pad_length: pad_length as u8,
            payload_length: payload.len() + 1,
        });
    }
    Ok(payload.slice(..payload.len() - pad_length))
}

fn parse_data(header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
    require_stream(&header)?;
    let data = if header.has_flag(flags::PADDED) {
        remove_padding(payload)?
    } else {
        payload
    };
    Ok(Frame::Data(DataFrame {
        stream_id: header.stream_id,
        end_stream: header.has_flag(flags::END_STREAM),
        data,
    }))
}

fn parse_headers(header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
    require_stream(&header)?;
    let mut payload = if header.has_flag(flags::PADDED) {
        remove_padding(payload)?
    } else {
        payload
    };

    let priority = if header.has_flag(flags::PRIORITY) {
        if payload.len() < 5 {
            return Err(FrameError::InvalidPayloadLength {
                frame_type: header.frame_type,
                expected: 5,
                actual: payload.len(),
            });
        }
        let word = payload.get_u32();
        Some(Priority {
            exclusive: word & 0x8000_0000 != 0,
            dependency: StreamId::new(word & 0x7FFF_FFFF),
            weight: payload.get_u8(),
        })
    } else {
        None
    };

    Ok(Frame::Headers(HeadersFrame {
        stream_id: header.stream_id,
        end_stream: header.has_flag(flags::END_STREAM),
        end_headers: header.has_flag(flags::END_HEADERS),
        priority,
        header_block: payload,
    }))
}

fn parse_priority(header: FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
    require_stream(&header)?;
    if payload.len() != 5 {
        return Err(FrameError::InvalidPayloadLength {
            frame_type: header.frame_type,
            expected: 5,
            actual: payload.len(),
        });
    }
    let word = payload.get_u32();
    Ok(Frame::Priority(PriorityFrame {
        stream_id: header.stream_id,
        priority: Priority {
            exclusive: word & 0x8000_0000 != 0,
            dependency: StreamId::new(word & 0x7FFF_FFFF),
            weight: payload.get_u8(),
        },
    }))
}

fn parse_rst_stream(header: FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
    require_stream(&header)?;
    if payload.len() != 4 {
        return Err(FrameError::InvalidPayloadLength {
            frame_type: header.frame_type,
            expected: 4,
            actual: payload.len(),
        });
    }
    Ok(Frame::RstStream(RstStreamFrame {
        stream_id: header.stream_id,
        error_code: payload.get_u32(),
    }))
}

fn parse_settings(header: FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
    require_connection(&header)?;
    let ack = header.has_flag(flags::ACK);

    if ack && !payload.is_empty() {
        return Err(FrameError::InvalidPayloadLength {
            frame_type: header.frame_type,
            expected: 0,
            actual: payload.len(),
        });
    }
    if payload.len() % 6 != 0 {
        return Err(FrameError::InvalidPayloadLength {
            frame_type: header.frame_type,
            expected: payload.len() / 6 * 6,
            actual: payload.len(),
        });
    }

    let mut settings = Vec::with_capacity(payload.len() / 6);
    while payload.has_remaining() {
        let id = SettingId::from_u16(payload.get_u16());
        let value = payload.get_u32();
        validate_setting(id, value)?;
        settings.push(Setting { id, value });
    }

    Ok(Frame::Settings(SettingsFrame { ack, settings }))
}

fn validate_setting(id: SettingId, value: u32) -> Result<(), FrameError> {
    let ok = match id {
        SettingId::EnablePush => value <= 1,
        SettingId::InitialWindowSize => value <= 0x7FFF_FFFF,
        SettingId::MaxFrameSize => (16_384..=16_777_215).contains(&value),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(FrameError::InvalidSettingValue {
            id: id.to_u16(),
            value,
        })
    }
}

fn parse_push_promise(header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
    require_stream(&header)?;
    let mut payload = if header.has_flag(flags::PADDED) {
        remove_padding(payload)?
    } else {
        payload
    };
    if payload.len() < 4 {
        return Err(FrameError::InvalidPayloadLength {
            frame_type: header.frame_type,
            expected: 4,
            actual: payload.len(),
        });
    }
    let promised_stream_id = StreamId::new(payload.get_u32() & 0x7FFF_FFFF);
    Ok(Frame::PushPromise(PushPromiseFrame {
        stream_id: header.stream_id,
        end_headers: header.has_flag(flags::END_HEADERS),
        promised_stream_id,
        header_block: payload,
    }))
}

fn parse_ping(header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
    require_connection(&header)?;
    if payload.len() != 8 {
        return Err(FrameError::InvalidPayloadLength {
            frame_type: header.frame_type,
            expected: 8,
            actual: payload.len(),
        });
    }
    let mut data = [0u8; 8];
    data.copy_from_slice(&payload);
    Ok(Frame::Ping(PingFrame {
        ack: header.has_flag(flags::ACK),
        data,
    }))
}

fn parse_goaway(header: FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
    require_connection(&header)?;
    if payload.len() < 8 {
        return Err(FrameError::InvalidPayloadLength {
            frame_type: header.frame_type,
            expected: 8,
            actual: payload.len(),
        });
    }
    let last_stream_id = StreamId::new(payload.get_u32() & 0x7FFF_FFFF);
    let error_code = payload.get_u32();
    Ok(Frame::GoAway(GoAwayFrame {
        last_stream_id,
        error_code,
        debug_data: payload,
    }))
}

fn parse_window_update(header: FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
    if payload.len() != 4 {
        return Err(FrameError::InvalidPayloadLength {
            frame_type: header.frame_type,
            expected: 4,
            actual: payload.len(),
        });
    }
    let increment = payload.get_u32() & 0x7FFF_FFFF;
    if increment == 0 {
        return Err(FrameError::InvalidWindowIncrement);
    }
    Ok(Frame::WindowUpdate(WindowUpdateFrame {
        stream_id: header.stream_id,
        increment,
    }))
}

fn parse_continuation(header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
    require_stream(&header)?;
    Ok(Frame::Continuation(ContinuationFrame {
        stream_id: header.stream_id,
        end_headers: header.has_flag(flags::END_HEADERS),
        header_block: payload,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_full_header() {
        let decoder = FrameDecoder::new();
        let mut buf = BytesMut::from(&[0u8; 5][..]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn needs_full_payload() {
        let decoder = FrameDecoder::new();
        // DATA, length 10, only 4 payload bytes present.
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x00, 0x00, 0x0a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01]);
        buf.extend_from_slice(&[1, 2, 3, 4]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn rejects_oversized_frame() {
        let decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x00, 0x50, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01]);
        buf.extend_from_slice(&vec![0u8; 0x5000]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(FrameError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn rejects_data_on_stream_zero() {
        let decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(FrameError::StreamIdRequired { .. })
        ));
    }

    #[test]
    fn rejects_ping_on_stream() {
        let decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x00, 0x00, 0x08, 0x06, 0x00, 0x00, 0x00, 0x00, 0x01]);
        buf.extend_from_slice(&[0u8; 8]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(FrameError::InvalidStreamZero { .. })
        ));
    }

    #[test]
    fn rejects_zero_window_increment() {
        let decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x00, 0x00, 0x04, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00]);
        buf.extend_from_slice(&[0, 0, 0, 0]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(FrameError::InvalidWindowIncrement)
        ));
    }

    #[test]
    fn rejects_padding_past_payload() {
        let decoder = FrameDecoder::new();
        // DATA, PADDED, 2-byte payload: pad length 200 with 1 byte left.
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x00, 0x00, 0x02, 0x00, 0x08, 0x00, 0x00, 0x00, 0x01]);
        buf.extend_from_slice(&[200, 0]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(FrameError::InvalidPadding { .. })
        ));
    }

    #[test]
    fn unknown_frame_type_is_passed_through() {
        let decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x00, 0x00, 0x03, 0xee, 0x07, 0x00, 0x00, 0x00, 0x09]);
        buf.extend_from_slice(b"abc");
        match decoder.decode(&mut buf).unwrap().unwrap() {
            Frame::Unknown(u) => {
                assert_eq!(u.frame_type, 0xee);
                assert_eq!(u.stream_id.value(), 9);
                assert_eq!(&u.payload[..], b"abc");
            }
            other => panic!("expected Unknown, got {:?}", other),
        }
    }

    #[test]
    fn decodes_back_to_back_frames() {
        let decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();
        // Two PINGs.
        for i in 0..2u8 {
            buf.extend_from_slice(&[0x00, 0x00, 0x08, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00]);
            buf.extend_from_slice(&[i; 8]);
        }
        for i in 0..2u8 {
            match decoder.decode(&mut buf).unwrap().unwrap() {
                Frame::Ping(p) => assert_eq!(p.data, [i; 8]),
                other => panic!("expected PING, got {:?}", other),
            }
        }
        assert!(buf.is_empty());
    }
}
