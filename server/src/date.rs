//! Cached HTTP date header value.
//!
//! The `date` header only changes once a second, so each worker keeps the
//! formatted 29-byte value and re-renders lazily when the wall clock passes
//! the next second boundary.

use httpdate::HttpDate;
use std::fmt::{self, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Length of an IMF-fixdate string ("Sun, 06 Nov 1994 08:49:37 GMT").
const DATE_VALUE_LENGTH: usize = 29;

/// Per-worker cache of the formatted HTTP date.
pub struct DateCache {
    bytes: [u8; DATE_VALUE_LENGTH],
    pos: usize,
    next_update: SystemTime,
}

impl Default for DateCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DateCache {
    pub fn new() -> Self {
        let mut cache = Self {
            bytes: [0; DATE_VALUE_LENGTH],
            pos: 0,
            next_update: SystemTime::now(),
        };
        cache.render(cache.next_update);
        cache
    }

    /// The current date value, re-rendered if the second has ticked.
    pub fn get(&mut self) -> &[u8] {
        let now = SystemTime::now();
        if now >= self.next_update {
            self.render(now);
        }
        &self.bytes
    }

    fn render(&mut self, now: SystemTime) {
        self.pos = 0;
        let _ = write!(self, "{}", HttpDate::from(now));
        debug_assert_eq!(self.pos, DATE_VALUE_LENGTH);

        // Align the next update to the coming second boundary.
        let nanos = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();
        self.next_update = now + Duration::new(1, 0) - Duration::from_nanos(nanos as u64);
    }
}

impl fmt::Write for DateCache {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        if self.pos + bytes.len() > DATE_VALUE_LENGTH {
            return Err(fmt::Error);
        }
        self.bytes[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_has_fixed_length() {
        assert_eq!(
            DATE_VALUE_LENGTH,
            "Sun, 06 Nov 1994 08:49:37 GMT".len()
        );
        let mut cache = DateCache::new();
        assert_eq!(cache.get().len(), DATE_VALUE_LENGTH);
    }

    #[test]
    fn value_parses_back_to_now() {
        let mut cache = DateCache::new();
        let text = std::str::from_utf8(cache.get()).unwrap().to_string();
        let parsed = httpdate::parse_http_date(&text).unwrap();
        let delta = SystemTime::now()
            .duration_since(parsed)
            .unwrap_or_default();
        assert!(delta < Duration::from_secs(2));
    }

    #[test]
    fn stable_within_a_second() {
        let mut cache = DateCache::new();
        let a = cache.get().to_vec();
        let b = cache.get().to_vec();
        assert_eq!(a, b);
    }
}
