//! Error codes and framing errors.

use std::fmt;

/// HTTP/2 error codes (RFC 7540 Section 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ErrorCode {
    pub fn from_u32(code: u32) -> Self {
        match code {
            0x0 => ErrorCode::NoError,
            0x1 => ErrorCode::ProtocolError,
            0x2 => ErrorCode::InternalError,
            0x3 => ErrorCode::FlowControlError,
            0x4 => ErrorCode::SettingsTimeout,
            0x5 => ErrorCode::StreamClosed,
            0x6 => ErrorCode::FrameSizeError,
            0x7 => ErrorCode::RefusedStream,
            0x8 => ErrorCode::Cancel,
            0x9 => ErrorCode::CompressionError,
            0xa => ErrorCode::ConnectError,
            0xb => ErrorCode::EnhanceYourCalm,
            0xc => ErrorCode::InadequateSecurity,
            0xd => ErrorCode::Http11Required,
            // Unknown codes are treated as INTERNAL_ERROR per Section 7.
            _ => ErrorCode::InternalError,
        }
    }

    pub fn to_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::RefusedStream => "REFUSED_STREAM",
            ErrorCode::Cancel => "CANCEL",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
            ErrorCode::ConnectError => "CONNECT_ERROR",
            ErrorCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            ErrorCode::InadequateSecurity => "INADEQUATE_SECURITY",
            ErrorCode::Http11Required => "HTTP_1_1_REQUIRED",
        };
        f.write_str(name)
    }
}

/// Frame parse/validation errors.
#[derive(Debug)]
pub enum FrameError {
    /// Frame exceeds the negotiated maximum size.
    FrameTooLarge { size: u32, max: u32 },
    /// A connection-level frame carried a nonzero stream id.
    InvalidStreamZero { frame_type: u8 },
    /// A stream-level frame arrived on stream 0.
    StreamIdRequired { frame_type: u8 },
    /// Payload length does not match the frame type's requirements.
    InvalidPayloadLength {
        frame_type: u8,
        expected: usize,
        actual: usize,
    },
    /// Declared padding does not fit in the payload.
    InvalidPadding { pad_length: u8, payload_length: usize },
    /// A SETTINGS value outside its legal range.
    InvalidSettingValue { id: u16, value: u32 },
    /// WINDOW_UPDATE with a zero increment.
    InvalidWindowIncrement,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::FrameTooLarge { size, max } => {
                write!(f, "frame size {} exceeds maximum {}", size, max)
            }
            FrameError::InvalidStreamZero { frame_type } => {
                write!(f, "frame type 0x{:02x} requires stream 0", frame_type)
            }
            FrameError::StreamIdRequired { frame_type } => {
                write!(
                    f,
                    "frame type 0x{:02x} requires a nonzero stream id",
                    frame_type
                )
            }
            FrameError::InvalidPayloadLength {
                frame_type,
                expected,
                actual,
            } => write!(
                f,
                "frame type 0x{:02x} expected {} payload bytes, got {}",
                frame_type, expected, actual
            ),
            FrameError::InvalidPadding {
                pad_length,
                payload_length,
            } => write!(
                f,
                "padding length {} exceeds payload length {}",
                pad_length, payload_length
            ),
            FrameError::InvalidSettingValue { id, value } => {
                write!(f, "invalid value {} for setting 0x{:04x}", value, id)
            }
            FrameError::InvalidWindowIncrement => {
                write!(f, "window update with zero increment")
            }
        }
    }
}

impl std::error::Error for FrameError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_roundtrip() {
        for raw in 0u32..=0xd {
            assert_eq!(ErrorCode::from_u32(raw).to_u32(), raw);
        }
    }

    #[test]
    fn unknown_error_code_is_internal() {
        assert_eq!(ErrorCode::from_u32(0xbeef), ErrorCode::InternalError);
    }

    #[test]
    fn error_code_display() {
        assert_eq!(ErrorCode::NoError.to_string(), "NO_ERROR");
        assert_eq!(ErrorCode::SettingsTimeout.to_string(), "SETTINGS_TIMEOUT");
    }

    #[test]
    fn frame_error_display() {
        let e = FrameError::FrameTooLarge {
            size: 20000,
            max: 16384,
        };
        assert_eq!(e.to_string(), "frame size 20000 exceeds maximum 16384");
    }
}
