//! Blocking HTTP/1.1 framing for the control API.
//!
//! Request heads are parsed with `httparse`. One request is served per
//! connection: the head is read with a size limit, the body is drained
//! according to its framing (`Content-Length` or chunked) and the response
//! always carries `Connection: close`.

use std::{
    fmt::Write as _,
    io::{self, BufRead, Read, Write},
};

use httparse::Status;
use serde::Serialize;

use crate::{
    constants::{
        JSON_CONTENT_TYPE, MAX_CHUNK_LINE_BYTES, MAX_REQUEST_BODY_BYTES, MAX_REQUEST_HEAD_BYTES,
        MAX_REQUEST_HEADERS,
    },
    error::HttpError,
};

/// Interim response sent to clients that wait for `Expect: 100-continue`.
pub const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// How the request body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    Length(u64),
    Chunked,
}

/// Parsed request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
    body: BodyFraming,
}

impl Request {
    /// Reads a request line and headers from `reader`, leaving the body unread.
    pub fn read_from<R: BufRead>(reader: &mut R) -> Result<Self, HttpError> {
        let mut head = Vec::with_capacity(512);

        loop {
            if head.len() >= MAX_REQUEST_HEAD_BYTES {
                return Err(HttpError::HeadTooLarge(MAX_REQUEST_HEAD_BYTES));
            }

            let available = reader.fill_buf()?;
            if available.is_empty() {
                return Err(HttpError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before request head was complete",
                )));
            }

            let prior = head.len();
            let taken = available.len().min(MAX_REQUEST_HEAD_BYTES - prior);
            head.extend_from_slice(&available[..taken]);

            match Self::parse_head(&head)? {
                Some((request, len)) => {
                    reader.consume(len - prior);
                    return Ok(request);
                }
                None => reader.consume(taken),
            }
        }
    }

    /// Returns the request and the head length once `buf` holds a complete head.
    fn parse_head(buf: &[u8]) -> Result<Option<(Self, usize)>, HttpError> {
        let mut slots = [httparse::EMPTY_HEADER; MAX_REQUEST_HEADERS];
        let mut parsed = httparse::Request::new(&mut slots);

        let len = match parsed.parse(buf)? {
            Status::Complete(len) => len,
            Status::Partial => return Ok(None),
        };

        let (Some(method), Some(target)) = (parsed.method, parsed.path) else {
            return Err(HttpError::Malformed("incomplete request line".into()));
        };

        let headers = parsed
            .headers
            .iter()
            .map(|header| {
                let value = std::str::from_utf8(header.value).map_err(|_| {
                    HttpError::Malformed(format!("header '{}' is not UTF-8", header.name))
                })?;
                Ok((header.name.to_string(), value.trim().to_string()))
            })
            .collect::<Result<Vec<_>, HttpError>>()?;

        let body = body_framing(&headers)?;
        let request = Self {
            method: method.to_string(),
            target: target.to_string(),
            headers,
            body,
        };
        Ok(Some((request, len)))
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request target exactly as sent, including any query string.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body_framing(&self) -> BodyFraming {
        self.body
    }

    /// True when the client waits for `100 Continue` before sending a body it may send.
    pub fn expects_continue(&self) -> bool {
        let body_allowed = match self.body {
            BodyFraming::Empty => false,
            BodyFraming::Length(length) => length <= MAX_REQUEST_BODY_BYTES,
            BodyFraming::Chunked => true,
        };
        body_allowed
            && self
                .header("Expect")
                .is_some_and(|value| value.eq_ignore_ascii_case("100-continue"))
    }

    /// Reads and discards the whole body.
    ///
    /// Fails with [`HttpError::BodyTooLarge`] before reading anything when a
    /// declared length is over the limit, and as soon as a chunked body passes it.
    pub fn discard_body<R: BufRead>(&self, reader: &mut R) -> Result<(), HttpError> {
        match self.body {
            BodyFraming::Empty => Ok(()),
            BodyFraming::Length(length) => {
                if length > MAX_REQUEST_BODY_BYTES {
                    return Err(HttpError::BodyTooLarge(MAX_REQUEST_BODY_BYTES));
                }
                skip_exact(reader, length)
            }
            BodyFraming::Chunked => discard_chunked(reader),
        }
    }
}

/// Derives body framing from the headers, rejecting ambiguous combinations.
fn body_framing(headers: &[(String, String)]) -> Result<BodyFraming, HttpError> {
    let named = |name: &'static str| {
        headers
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    };

    let codings: Vec<&str> = named("Transfer-Encoding")
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|coding| !coding.is_empty())
        .collect();

    if let Some(last) = codings.last() {
        if !last.eq_ignore_ascii_case("chunked") {
            return Err(HttpError::Malformed(format!(
                "unsupported transfer coding '{last}'"
            )));
        }
        if named("Content-Length").next().is_some() {
            return Err(HttpError::Malformed(
                "both Transfer-Encoding and Content-Length present".into(),
            ));
        }
        return Ok(BodyFraming::Chunked);
    }

    let mut length = None;
    for raw in named("Content-Length") {
        let parsed: u64 = raw
            .parse()
            .map_err(|_| HttpError::Malformed(format!("invalid Content-Length '{raw}'")))?;
        if length.is_some_and(|seen| seen != parsed) {
            return Err(HttpError::Malformed("conflicting Content-Length values".into()));
        }
        length = Some(parsed);
    }

    Ok(match length {
        Some(0) | None => BodyFraming::Empty,
        Some(length) => BodyFraming::Length(length),
    })
}

fn skip_exact<R: Read>(reader: &mut R, length: u64) -> Result<(), HttpError> {
    let copied = io::copy(&mut reader.take(length), &mut io::sink())?;
    if copied < length {
        return Err(HttpError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before request body was complete",
        )));
    }
    Ok(())
}

fn discard_chunked<R: BufRead>(reader: &mut R) -> Result<(), HttpError> {
    let mut total: u64 = 0;

    loop {
        let mut line = read_line(reader, MAX_CHUNK_LINE_BYTES)?;
        line.extend_from_slice(b"\r\n");
        let size = match httparse::parse_chunk_size(&line) {
            Ok(Status::Complete((_, size))) => size,
            _ => return Err(HttpError::Malformed("invalid chunk size".into())),
        };

        if size == 0 {
            break;
        }

        total = total.saturating_add(size);
        if total > MAX_REQUEST_BODY_BYTES {
            return Err(HttpError::BodyTooLarge(MAX_REQUEST_BODY_BYTES));
        }

        skip_exact(reader, size)?;
        if !read_line(reader, MAX_CHUNK_LINE_BYTES)?.is_empty() {
            return Err(HttpError::Malformed("chunk data longer than its size".into()));
        }
    }

    // Trailer section, terminated by an empty line.
    while !read_line(reader, MAX_CHUNK_LINE_BYTES)?.is_empty() {}
    Ok(())
}

/// Reads one CRLF- or LF-terminated line of at most `limit` bytes, without the terminator.
fn read_line<R: BufRead>(reader: &mut R, limit: usize) -> Result<Vec<u8>, HttpError> {
    let mut buf = Vec::new();
    let read = reader.by_ref().take(limit as u64).read_until(b'\n', &mut buf)?;

    if buf.last() != Some(&b'\n') {
        if read == limit {
            return Err(HttpError::Malformed(format!("line exceeds {limit} bytes")));
        }
        return Err(HttpError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed inside chunked body",
        )));
    }

    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(buf)
}

/// Response written back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    headers: Vec<(&'static str, String)>,
    body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// `200 OK` with `value` serialized as a JSON document.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        let mut body = serde_json::to_vec(value)?;
        body.push(b'\n');
        Ok(Self::new(200)
            .with_header("Content-Type", JSON_CONTENT_TYPE)
            .with_body(body))
    }

    pub fn not_found() -> Self {
        Self::new(404)
    }

    pub fn bad_request() -> Self {
        Self::new(400)
    }

    pub fn payload_too_large() -> Self {
        Self::new(413)
    }

    pub fn internal_error() -> Self {
        Self::new(500)
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Serializes the response, including framing headers, and flushes `writer`.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut head = String::with_capacity(128);
        let _ = write!(head, "HTTP/1.1 {} {}\r\n", self.status, reason_phrase(self.status));
        for (name, value) in &self.headers {
            let _ = write!(head, "{name}: {value}\r\n");
        }
        let _ = write!(
            head,
            "Content-Length: {}\r\nConnection: close\r\n\r\n",
            self.body.len()
        );

        writer.write_all(head.as_bytes())?;
        writer.write_all(&self.body)?;
        writer.flush()
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        _ => "",
    }
}
