//! HTTP/2 framing (RFC 7540 Section 4).
//!
//! Every frame starts with a 9-byte header: a 24-bit payload length, an
//! 8-bit type, an 8-bit flag field and a 31-bit stream identifier (the high
//! bit is reserved and always masked off).

mod decode;
mod encode;
mod error;
mod types;

pub use decode::FrameDecoder;
pub use encode::FrameEncoder;
pub use error::{ErrorCode, FrameError};
pub use types::*;

/// Size of the fixed frame header.
pub const FRAME_HEADER_SIZE: usize = 9;

/// The 24-byte magic a client must send before any frame.
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Default SETTINGS_MAX_FRAME_SIZE.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Default SETTINGS_INITIAL_WINDOW_SIZE.
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;

/// Default SETTINGS_HEADER_TABLE_SIZE.
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4_096;
