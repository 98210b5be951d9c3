//! HTTP/2 server session state machine.
//!
//! [`ServerConnection`] is sans-IO: `feed_data` consumes bytes off the
//! transport, `poll_events` yields what happened, the `send_*` calls queue
//! outbound frames, and `pending_send`/`advance_send` expose the bytes the
//! caller must put on the wire.

mod flow_control;
mod server;
mod settings;
mod stream;

pub use flow_control::FlowControl;
pub use server::{ServerConnection, ServerEvent};
pub use settings::ConnectionSettings;
pub use stream::{Stream, StreamId, StreamState};

use crate::frame::FrameError;
use crate::hpack::HpackError;
use std::fmt;

/// Session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the 24-byte client preface.
    AwaitingPreface,
    /// Preface seen, waiting for the client's SETTINGS.
    AwaitingSettings,
    /// Exchanging requests.
    Open,
    /// GOAWAY sent or received; existing streams drain, no new ones.
    Draining,
}

/// Session-level errors.
#[derive(Debug)]
pub enum ConnectionError {
    /// The client did not speak HTTP/2. Callers tear the connection down
    /// without logging; anything may connect to a listening port.
    BadPreface,
    /// Frame-layer violation.
    Frame(FrameError),
    /// Header block failed to decode.
    Hpack(HpackError),
    /// Other protocol violation.
    Protocol(String),
    /// Operation referenced a stream this session does not know.
    StreamNotFound(StreamId),
    /// Push is unavailable: the peer disabled it or the session is draining.
    PushRefused,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::BadPreface => write!(f, "invalid connection preface"),
            ConnectionError::Frame(e) => write!(f, "frame error: {}", e),
            ConnectionError::Hpack(e) => write!(f, "header decode error: {}", e),
            ConnectionError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            ConnectionError::StreamNotFound(id) => write!(f, "unknown stream {}", id),
            ConnectionError::PushRefused => write!(f, "push promise refused"),
        }
    }
}

impl std::error::Error for ConnectionError {}

impl From<FrameError> for ConnectionError {
    fn from(e: FrameError) -> Self {
        ConnectionError::Frame(e)
    }
}

impl From<HpackError> for ConnectionError {
    fn from(e: HpackError) -> Self {
        ConnectionError::Hpack(e)
    }
}
