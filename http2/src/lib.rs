//! HTTP/2 wire layer for the h2d server.
//!
//! This crate is sans-IO: the caller owns the socket and the event loop.
//! Bytes read from the transport are fed into
//! [`ServerConnection::feed_data`]; protocol events come back from
//! [`ServerConnection::poll_events`]; outbound bytes accumulate in an
//! internal buffer exposed through [`ServerConnection::pending_send`] /
//! [`ServerConnection::advance_send`].
//!
//! Modules:
//!
//! - `frame`: HTTP/2 frame types, encoding and decoding (RFC 7540)
//! - `hpack`: header compression (RFC 7541), including Huffman coding
//! - `connection`: the server-side session state machine

pub mod connection;
pub mod frame;
pub mod hpack;

pub use connection::{
    ConnectionError, ConnectionSettings, ServerConnection, ServerEvent,
};
pub use frame::{
    CONNECTION_PREFACE, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE,
    ErrorCode, Frame, FrameDecoder, FrameEncoder, FrameError, StreamId,
};
pub use hpack::{HeaderField, HpackDecoder, HpackEncoder};
