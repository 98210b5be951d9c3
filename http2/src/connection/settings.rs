//! Connection settings.

use crate::frame;

/// Settings for one side of an HTTP/2 session.
///
/// Used both for what we advertise (local) and for tracking what the peer
/// advertised (remote).
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    /// SETTINGS_MAX_CONCURRENT_STREAMS.
    pub max_concurrent_streams: u32,
    /// SETTINGS_INITIAL_WINDOW_SIZE.
    pub initial_window_size: u32,
    /// SETTINGS_MAX_FRAME_SIZE.
    pub max_frame_size: u32,
    /// SETTINGS_HEADER_TABLE_SIZE; advertised only when set.
    pub header_table_size: Option<u32>,
    /// SETTINGS_ENABLE_PUSH. Defaults to on, the protocol default for
    /// client peers.
    pub enable_push: bool,
    /// Pad octets added to each padded-capable outbound frame.
    pub padding: u8,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_concurrent_streams: 100,
            initial_window_size: frame::DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: frame::DEFAULT_MAX_FRAME_SIZE,
            header_table_size: None,
            enable_push: true,
            padding: 0,
        }
    }
}

impl ConnectionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_concurrent_streams(mut self, value: u32) -> Self {
        self.max_concurrent_streams = value;
        self
    }

    pub fn header_table_size(mut self, value: Option<u32>) -> Self {
        self.header_table_size = value;
        self
    }

    pub fn padding(mut self, value: u8) -> Self {
        self.padding = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = ConnectionSettings::default();
        assert_eq!(s.max_concurrent_streams, 100);
        assert_eq!(s.initial_window_size, 65_535);
        assert_eq!(s.max_frame_size, 16_384);
        assert_eq!(s.header_table_size, None);
        assert!(s.enable_push);
    }

    #[test]
    fn builder() {
        let s = ConnectionSettings::new()
            .max_concurrent_streams(10)
            .header_table_size(Some(8192))
            .padding(16);
        assert_eq!(s.max_concurrent_streams, 10);
        assert_eq!(s.header_table_size, Some(8192));
        assert_eq!(s.padding, 16);
    }
}
