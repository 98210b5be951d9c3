//! Maps a completed request to a response.
//!
//! Resolves the request path against the document root and produces a 200
//! file response, a 301 directory redirect, a 304, or a synthesized status
//! page; emits push promises for configured paths along the way.

use crate::config::Config;
use crate::date::DateCache;
use crate::metrics;
use crate::path;
use crate::stream::{BodySource, HeaderToken, Stream};
use flate2::Compression;
use flate2::write::GzEncoder;
use http2::{HeaderField, ServerConnection, StreamId};
use std::fs::File;
use std::io::{self, Write};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Value of the `server` response header.
pub const SERVER_SOFTWARE: &str = concat!("h2d/", env!("CARGO_PKG_VERSION"));

/// Document served for directory paths.
const DEFAULT_DOCUMENT: &str = "index.html";

/// Requests whose query string carries this marker get no response at all,
/// letting clients exercise their own timeout handling.
const DO_NOT_RESPOND_MARKER: &str = "nghttpd_do_not_respond_to_req=yes";

/// Everything a response decision needs besides the stream itself.
pub struct ResponderCx<'a> {
    pub conn: &'a mut ServerConnection,
    pub config: &'a Config,
    pub date: &'a mut DateCache,
}

impl ResponderCx<'_> {
    /// `:status`, `server` and `date` open every response.
    fn base_headers(&mut self, status: &str) -> Vec<HeaderField> {
        vec![
            HeaderField::new(&b":status"[..], status.as_bytes()),
            HeaderField::new(&b"server"[..], SERVER_SOFTWARE.as_bytes()),
            HeaderField::new(&b"date"[..], self.date.get()),
        ]
    }
}

/// Answer `stream`. Returns promised streams that still need their own
/// responses (each must be answered with `allow_push = false`).
pub fn prepare_response(
    cx: &mut ResponderCx<'_>,
    stream: &mut Stream,
    allow_push: bool,
) -> Vec<Stream> {
    let mut pushed = Vec::new();

    let reqpath = match stream.header(HeaderToken::Path) {
        Some(p) => String::from_utf8_lossy(p).into_owned(),
        None => {
            status_response(cx, stream, "400");
            return pushed;
        }
    };

    let query_pos = reqpath.find('?');
    let raw_path = match query_pos {
        Some(q) => {
            if reqpath[q..].contains(DO_NOT_RESPOND_MARKER) {
                return pushed;
            }
            &reqpath[..q]
        }
        None => reqpath.as_str(),
    };

    let url = match path::percent_decode(raw_path) {
        Some(url) => url,
        None => {
            status_response(cx, stream, "404");
            return pushed;
        }
    };
    if !path::check_path(&url) {
        status_response(cx, stream, "404");
        return pushed;
    }

    if allow_push {
        if let Some(targets) = cx.config.push.get(&url) {
            for target in targets {
                match promise_push(cx, stream, target) {
                    Ok(promised) => pushed.push(promised),
                    Err(reason) => {
                        warn!(
                            stream = stream.id,
                            path = target.as_str(),
                            "push promise failed: {}",
                            reason
                        );
                    }
                }
            }
        }
    }

    let mut fspath = format!("{}{}", cx.config.htdocs, url);
    if fspath.ends_with('/') {
        fspath.push_str(DEFAULT_DOCUMENT);
    }

    let file = match File::open(&fspath) {
        Ok(file) => file,
        Err(_) => {
            status_response(cx, stream, "404");
            return pushed;
        }
    };
    let meta = match file.metadata() {
        Ok(meta) => meta,
        Err(_) => {
            status_response(cx, stream, "404");
            return pushed;
        }
    };

    if meta.is_dir() {
        // Redirect to the same path with a trailing slash, keeping any
        // query string in place.
        let mut location = reqpath.clone();
        match query_pos {
            Some(q) => location.insert(q, '/'),
            None => location.push('/'),
        }
        redirect_response(cx, stream, &location);
        return pushed;
    }

    let mtime = meta.modified().ok();

    let not_modified = {
        let ims = stream
            .header(HeaderToken::IfModifiedSince)
            .and_then(|v| std::str::from_utf8(v).ok())
            .and_then(|v| httpdate::parse_http_date(v).ok());
        match (mtime, ims) {
            // Compare at whole-second granularity, the precision of an
            // HTTP date.
            (Some(mtime), Some(ims)) => whole_seconds(mtime) <= whole_seconds(ims),
            _ => false,
        }
    };
    if not_modified {
        status_response(cx, stream, "304");
        return pushed;
    }

    file_response(cx, stream, file, meta.len(), mtime);
    pushed
}

fn whole_seconds(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Emit a PUSH_PROMISE for `target` and build the promised stream carrying
/// the pushed request's pseudo-headers.
fn promise_push(
    cx: &mut ResponderCx<'_>,
    stream: &mut Stream,
    target: &str,
) -> Result<Stream, String> {
    let authority = stream
        .header(HeaderToken::Authority)
        .or_else(|| stream.header(HeaderToken::Host))
        .map(|v| v.to_vec())
        .ok_or_else(|| "request carries neither :authority nor host".to_string())?;

    let headers = vec![
        HeaderField::new(&b":method"[..], &b"GET"[..]),
        HeaderField::new(&b":path"[..], target.as_bytes()),
        HeaderField::new(&b":scheme"[..], cx.config.scheme().as_bytes()),
        HeaderField::new(&b":authority"[..], authority),
    ];

    let promised = cx
        .conn
        .send_push_promise(StreamId::new(stream.id), &headers)
        .map_err(|e| e.to_string())?;

    metrics::PUSH_PROMISES_SENT.increment();
    debug!(
        stream = stream.id,
        promised = promised.value(),
        path = target,
        "push promised"
    );

    Ok(Stream::new(promised.value(), headers))
}

/// 200 with the file as body; the handler pumps the bytes out under flow
/// control.
fn file_response(
    cx: &mut ResponderCx<'_>,
    stream: &mut Stream,
    file: File,
    len: u64,
    mtime: Option<SystemTime>,
) {
    let mut headers = cx.base_headers("200");
    headers.push(HeaderField::new(
        &b"content-length"[..],
        len.to_string().into_bytes(),
    ));
    headers.push(HeaderField::new(
        &b"cache-control"[..],
        &b"max-age=3600"[..],
    ));
    if let Some(mtime) = mtime {
        headers.push(HeaderField::new(
            &b"last-modified"[..],
            httpdate::fmt_http_date(mtime).into_bytes(),
        ));
    }
    if !cx.config.trailer.is_empty() {
        headers.push(HeaderField::new(
            &b"trailer"[..],
            trailer_names(cx.config).into_bytes(),
        ));
    }

    submit(cx, stream, &headers, false);
    stream.set_body(BodySource::File(file), len);
}

/// 301 to `scheme://authority<path>`, headers only.
fn redirect_response(cx: &mut ResponderCx<'_>, stream: &mut Stream, location_path: &str) {
    let scheme = stream
        .header(HeaderToken::Scheme)
        .map(|v| v.to_vec())
        .unwrap_or_else(|| cx.config.scheme().as_bytes().to_vec());
    let authority = stream
        .header(HeaderToken::Authority)
        .or_else(|| stream.header(HeaderToken::Host))
        .map(|v| v.to_vec())
        .unwrap_or_default();

    let mut location = scheme;
    location.extend_from_slice(b"://");
    location.extend_from_slice(&authority);
    location.extend_from_slice(location_path.as_bytes());

    let mut headers = cx.base_headers("301");
    headers.push(HeaderField::new(&b"location"[..], location));

    submit(cx, stream, &headers, true);
}

/// A canned status page. 304 is headers-only; everything else carries a
/// small HTML body, gzip-coded when configured.
fn status_response(cx: &mut ResponderCx<'_>, stream: &mut Stream, status: &str) {
    if status == "304" {
        let headers = cx.base_headers(status);
        submit(cx, stream, &headers, true);
        return;
    }

    let plain = status_body(status, cx.config.port);
    let mut headers = cx.base_headers(status);
    headers.push(HeaderField::new(
        &b"content-type"[..],
        &b"text/html; charset=UTF-8"[..],
    ));

    let body = if cx.config.error_gzip {
        match gzip(plain.as_bytes()) {
            Ok(compressed) => {
                headers.push(HeaderField::new(&b"content-encoding"[..], &b"gzip"[..]));
                compressed
            }
            Err(e) => {
                warn!("gzip of status body failed: {}", e);
                plain.into_bytes()
            }
        }
    } else {
        plain.into_bytes()
    };

    let len = body.len() as u64;
    submit(cx, stream, &headers, false);
    stream.set_body(BodySource::Buffer(io::Cursor::new(body)), len);
}

/// The status-page HTML template.
fn status_body(status: &str, port: u16) -> String {
    format!(
        "<html><head><title>{status}</title></head><body><h1>{status}</h1>\
         <hr><address>{SERVER_SOFTWARE} at port {port}</address></body></html>"
    )
}

fn gzip(body: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body)?;
    encoder.finish()
}

/// Comma-joined trailer field names for the `trailer` response header.
fn trailer_names(config: &Config) -> String {
    config
        .trailer
        .iter()
        .map(|t| t.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn submit(cx: &mut ResponderCx<'_>, stream: &mut Stream, headers: &[HeaderField], end: bool) {
    if let Err(e) = cx
        .conn
        .send_headers(StreamId::new(stream.id), headers, end)
    {
        debug!(stream = stream.id, "response submit failed: {}", e);
        return;
    }
    stream.response_started = true;
    if end {
        // Headers-only response: nothing left that could block on flow
        // control.
        stream.disarm_write_timer();
    }
    metrics::RESPONSES_SENT.increment();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn status_body_template() {
        let body = status_body("404", 8080);
        assert!(body.starts_with("<html><head><title>404</title></head>"));
        assert!(body.contains("<h1>404</h1>"));
        assert!(body.contains(&format!("<address>{} at port 8080</address>", SERVER_SOFTWARE)));
        assert!(body.ends_with("</body></html>"));
    }

    #[test]
    fn gzip_roundtrip() {
        let body = status_body("404", 1);
        let compressed = gzip(body.as_bytes()).unwrap();
        assert_ne!(compressed, body.as_bytes());

        use std::io::Read;
        let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
        let mut back = String::new();
        decoder.read_to_string(&mut back).unwrap();
        assert_eq!(back, body);
    }

    #[test]
    fn trailer_names_joined() {
        let config = Config::parse(
            "port = 1\nno_tls = true\n\
             [[trailer]]\nname = \"x-a\"\nvalue = \"1\"\n\
             [[trailer]]\nname = \"x-b\"\nvalue = \"2\"\n",
        )
        .unwrap();
        assert_eq!(trailer_names(&config), "x-a, x-b");
    }
}
