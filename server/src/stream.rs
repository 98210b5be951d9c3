//! Per-request stream state.

use http2::HeaderField;
use std::fs::File;
use std::io::{self, Read};
use std::time::{Duration, Instant};

/// Well-known request headers the responder needs fast access to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderToken {
    Method,
    Path,
    Scheme,
    Authority,
    Host,
    Expect,
    IfModifiedSince,
}

const TOKEN_COUNT: usize = 7;

impl HeaderToken {
    fn from_name(name: &[u8]) -> Option<Self> {
        // Field names are case-insensitive; HTTP/2 sends them lowercased
        // but we do not rely on that.
        if name.eq_ignore_ascii_case(b":method") {
            Some(HeaderToken::Method)
        } else if name.eq_ignore_ascii_case(b":path") {
            Some(HeaderToken::Path)
        } else if name.eq_ignore_ascii_case(b":scheme") {
            Some(HeaderToken::Scheme)
        } else if name.eq_ignore_ascii_case(b":authority") {
            Some(HeaderToken::Authority)
        } else if name.eq_ignore_ascii_case(b"host") {
            Some(HeaderToken::Host)
        } else if name.eq_ignore_ascii_case(b"expect") {
            Some(HeaderToken::Expect)
        } else if name.eq_ignore_ascii_case(b"if-modified-since") {
            Some(HeaderToken::IfModifiedSince)
        } else {
            None
        }
    }

    fn slot(self) -> usize {
        match self {
            HeaderToken::Method => 0,
            HeaderToken::Path => 1,
            HeaderToken::Scheme => 2,
            HeaderToken::Authority => 3,
            HeaderToken::Host => 4,
            HeaderToken::Expect => 5,
            HeaderToken::IfModifiedSince => 6,
        }
    }
}

/// Side index mapping tokens to positions in the header list. First
/// occurrence wins.
#[derive(Debug, Default)]
struct HeaderIndex {
    slots: [Option<usize>; TOKEN_COUNT],
}

impl HeaderIndex {
    fn build(headers: &[HeaderField]) -> Self {
        let mut index = Self::default();
        for (pos, field) in headers.iter().enumerate() {
            if let Some(token) = HeaderToken::from_name(&field.name) {
                let slot = &mut index.slots[token.slot()];
                if slot.is_none() {
                    *slot = Some(pos);
                }
            }
        }
        index
    }
}

/// Where response body bytes come from.
pub enum BodySource {
    /// A file under the document root.
    File(File),
    /// A synthesized body (status pages).
    Buffer(io::Cursor<Vec<u8>>),
}

impl BodySource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BodySource::File(file) => file.read(buf),
            BodySource::Buffer(cursor) => cursor.read(buf),
        }
    }
}

/// One request/response exchange.
///
/// Owned by its handler in an id-keyed map; dropping it closes the body
/// file and forgets the timers.
pub struct Stream {
    pub id: u32,
    headers: Vec<HeaderField>,
    index: HeaderIndex,
    body: Option<BodySource>,
    /// Response body bytes not yet handed to the session.
    pub body_left: u64,
    /// A response (headers) has been submitted.
    pub response_started: bool,
    read_deadline: Option<Instant>,
    write_deadline: Option<Instant>,
}

impl Stream {
    pub fn new(id: u32, headers: Vec<HeaderField>) -> Self {
        let index = HeaderIndex::build(&headers);
        Self {
            id,
            headers,
            index,
            body: None,
            body_left: 0,
            response_started: false,
            read_deadline: None,
            write_deadline: None,
        }
    }

    /// Look up a well-known header value.
    pub fn header(&self, token: HeaderToken) -> Option<&[u8]> {
        self.index.slots[token.slot()]
            .map(|pos| self.headers[pos].value.as_slice())
    }

    /// Attach the response body.
    pub fn set_body(&mut self, source: BodySource, len: u64) {
        self.body = Some(source);
        self.body_left = len;
    }

    /// True while there is response body left to pump.
    pub fn sending(&self) -> bool {
        self.response_started && self.body.is_some()
    }

    pub fn read_body(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.body.as_mut() {
            Some(body) => body.read(buf),
            None => Ok(0),
        }
    }

    /// Body fully sent (or abandoned); timers off.
    pub fn finish_body(&mut self) {
        self.body = None;
        self.body_left = 0;
        self.read_deadline = None;
        self.write_deadline = None;
    }

    // Timers. "Arming" sets the deadline to now + timeout; both timers fire
    // through the owning handler's timer pass.

    pub fn arm_read_timer(&mut self, timeout: Duration) {
        self.read_deadline = Some(Instant::now() + timeout);
    }

    pub fn rearm_read_timer_if_active(&mut self, timeout: Duration) {
        if self.read_deadline.is_some() {
            self.arm_read_timer(timeout);
        }
    }

    pub fn disarm_read_timer(&mut self) {
        self.read_deadline = None;
    }

    pub fn arm_write_timer(&mut self, timeout: Duration) {
        self.write_deadline = Some(Instant::now() + timeout);
    }

    pub fn disarm_write_timer(&mut self) {
        self.write_deadline = None;
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.read_deadline, self.write_deadline) {
            (Some(r), Some(w)) => Some(r.min(w)),
            (Some(r), None) => Some(r),
            (None, Some(w)) => Some(w),
            (None, None) => None,
        }
    }

    pub fn expired(&self, now: Instant) -> bool {
        self.next_deadline().map(|d| d <= now).unwrap_or(false)
    }

    /// Clear both timers (stream reset or torn down).
    pub fn clear_timers(&mut self) {
        self.read_deadline = None;
        self.write_deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_headers() -> Vec<HeaderField> {
        vec![
            HeaderField::new(&b":method"[..], &b"GET"[..]),
            HeaderField::new(&b":path"[..], &b"/x?q=1"[..]),
            HeaderField::new(&b":scheme"[..], &b"https"[..]),
            HeaderField::new(&b":authority"[..], &b"example.org"[..]),
            HeaderField::new(&b"if-modified-since"[..], &b"Sun, 06 Nov 1994 08:49:37 GMT"[..]),
        ]
    }

    #[test]
    fn header_index_lookup() {
        let stream = Stream::new(1, request_headers());
        assert_eq!(stream.header(HeaderToken::Path).unwrap(), b"/x?q=1");
        assert_eq!(stream.header(HeaderToken::Scheme).unwrap(), b"https");
        assert_eq!(
            stream.header(HeaderToken::Authority).unwrap(),
            b"example.org"
        );
        assert!(stream.header(HeaderToken::Host).is_none());
        assert!(stream.header(HeaderToken::Expect).is_none());
    }

    #[test]
    fn first_occurrence_wins() {
        let mut headers = request_headers();
        headers.push(HeaderField::new(&b":path"[..], &b"/second"[..]));
        let stream = Stream::new(1, headers);
        assert_eq!(stream.header(HeaderToken::Path).unwrap(), b"/x?q=1");
    }

    #[test]
    fn buffer_body_reads_out() {
        let mut stream = Stream::new(1, request_headers());
        stream.set_body(BodySource::Buffer(io::Cursor::new(b"abc".to_vec())), 3);
        stream.response_started = true;
        assert!(stream.sending());

        let mut buf = [0u8; 8];
        assert_eq!(stream.read_body(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");

        stream.finish_body();
        assert!(!stream.sending());
    }

    #[test]
    fn timer_deadlines() {
        let mut stream = Stream::new(1, vec![]);
        assert!(stream.next_deadline().is_none());

        stream.arm_read_timer(Duration::from_secs(60));
        let read_only = stream.next_deadline().unwrap();

        stream.arm_write_timer(Duration::from_secs(1));
        let both = stream.next_deadline().unwrap();
        assert!(both < read_only);

        assert!(!stream.expired(Instant::now()));
        assert!(stream.expired(Instant::now() + Duration::from_secs(2)));

        stream.disarm_write_timer();
        assert_eq!(stream.next_deadline().unwrap(), read_only);

        stream.clear_timers();
        assert!(stream.next_deadline().is_none());
    }

    #[test]
    fn rearm_only_when_active() {
        let mut stream = Stream::new(1, vec![]);
        stream.rearm_read_timer_if_active(Duration::from_secs(1));
        assert!(stream.next_deadline().is_none());

        stream.arm_read_timer(Duration::from_secs(1));
        stream.rearm_read_timer_if_active(Duration::from_secs(1));
        assert!(stream.next_deadline().is_some());
    }
}
