use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::net::RingBuffer;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    GET,
    POST,
    DELETE,
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::DELETE => "DELETE",
        }
    }
}

impl FromStr for Method {
    type Err = ParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            "DELETE" => Ok(Method::DELETE),
            _ => Err(ParseError::InvalidMethod),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ParsingState {
    StartLine,
    Headers,
    Body,
    ChunkSize,
    ChunkData,
    Complete,
    Error,
}

const CRLF_LEN: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    IncompleteRequestLine,
    MalformedRequestLine,
    InvalidMethod,
    InvalidUri,
    InvalidUtf8,
    HeaderTooLong,
    TooManyHeaders,
    InvalidHeaderName,
    InvalidHeaderValue,
    InvalidChunkSize,
    PayloadTooLarge,
    Incomplete,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::IncompleteRequestLine => write!(f, "incomplete request line"),
            ParseError::MalformedRequestLine => write!(f, "malformed request line"),
            ParseError::InvalidMethod => write!(f, "invalid HTTP method"),
            ParseError::InvalidUri => write!(f, "invalid URI"),
            ParseError::InvalidUtf8 => write!(f, "invalid UTF-8 in request"),
            ParseError::HeaderTooLong => write!(f, "header line too long"),
            ParseError::TooManyHeaders => write!(f, "too many headers"),
            ParseError::InvalidHeaderName => write!(f, "invalid header name"),
            ParseError::InvalidHeaderValue => write!(f, "invalid header value"),
            ParseError::InvalidChunkSize => write!(f, "invalid chunk size"),
            ParseError::PayloadTooLarge => write!(f, "payload too large"),
            ParseError::Incomplete => write!(f, "need more data"),
        }
    }
}

impl std::error::Error for ParseError {}

const MAX_HEADER_LINE: usize = 8192;
const MAX_HEADERS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChunkState {
    Size,
    Data(usize),
    TrailingCrlf,
    Trailers,
}

/// Incremental, single-pass HTTP/1.1 request parser driven by `add_chunk`.
///
/// Body bytes are staged into `body_ring` by default; a connection that
/// wants to stream the body elsewhere (to a CGI pipe, to a file) drains
/// `body_ring` itself after each `add_chunk` instead of waiting for
/// `Complete` — this is the Rust stand-in for the body-handler callback
/// hook, expressed as draining a shared buffer rather than invoking a
/// closure.
#[derive(Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub uri: String,
    pub path: String,
    pub query: String,
    pub fragment: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    pub trailers: HashMap<String, String>,
    pub content_length: usize,
    pub bytes_read: usize,
    pub is_chunked: bool,
    pub is_multipart: bool,
    pub boundary: String,
    pub cgi_mode: bool,
    pub state: ParsingState,
    pub chunk_state: ChunkState,
    pub buffer: Vec<u8>,
    pub cursor: usize,
    pub body_ring: RingBuffer,
    headers_done: bool,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRequest {
    pub fn new() -> Self {
        Self::with_mode(false)
    }

    pub fn new_cgi_response() -> Self {
        Self::with_mode(true)
    }

    fn with_mode(cgi_mode: bool) -> Self {
        HttpRequest {
            method: Method::GET,
            uri: String::new(),
            path: String::new(),
            query: String::new(),
            fragment: String::new(),
            version: String::new(),
            headers: HashMap::new(),
            trailers: HashMap::new(),
            content_length: 0,
            bytes_read: 0,
            is_chunked: false,
            is_multipart: false,
            boundary: String::new(),
            cgi_mode,
            state: if cgi_mode { ParsingState::Headers } else { ParsingState::StartLine },
            chunk_state: ChunkState::Size,
            buffer: Vec::with_capacity(4096),
            cursor: 0,
            body_ring: RingBuffer::new(65536),
            headers_done: false,
        }
    }

    pub fn reset_for_next_request(&mut self) {
        self.buffer.drain(..self.cursor);
        self.cursor = 0;
        *self = HttpRequest {
            buffer: std::mem::take(&mut self.buffer),
            ..HttpRequest::new()
        };
    }

    pub fn add_chunk(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Advances the state machine as far as the buffered input allows.
    /// Returns `Ok(true)` once `Complete`, `Ok(false)` if more input is
    /// needed, `Err` on a syntactic violation (state becomes `Error`).
    pub fn advance(&mut self, max_body: usize) -> Result<bool, ParseError> {
        loop {
            match self.state {
                ParsingState::StartLine => match self.parse_start_line() {
                    Ok(true) => continue,
                    Ok(false) => return Ok(false),
                    Err(e) => {
                        self.state = ParsingState::Error;
                        return Err(e);
                    }
                },
                ParsingState::Headers => match self.parse_headers(max_body) {
                    Ok(true) => continue,
                    Ok(false) => return Ok(false),
                    Err(e) => {
                        self.state = ParsingState::Error;
                        return Err(e);
                    }
                },
                ParsingState::Body => match self.parse_body() {
                    Ok(true) => continue,
                    Ok(false) => return Ok(false),
                    Err(e) => {
                        self.state = ParsingState::Error;
                        return Err(e);
                    }
                },
                ParsingState::ChunkSize | ParsingState::ChunkData => match self.parse_chunked(max_body) {
                    Ok(true) => continue,
                    Ok(false) => return Ok(false),
                    Err(e) => {
                        self.state = ParsingState::Error;
                        return Err(e);
                    }
                },
                ParsingState::Complete => return Ok(true),
                ParsingState::Error => return Err(ParseError::Incomplete),
            }
        }
    }

    fn parse_start_line(&mut self) -> Result<bool, ParseError> {
        let Some(line_end) = find_crlf(&self.buffer, self.cursor) else {
            if self.buffer.len() - self.cursor > MAX_HEADER_LINE {
                return Err(ParseError::MalformedRequestLine);
            }
            return Ok(false);
        };
        let line = std::str::from_utf8(&self.buffer[self.cursor..line_end])
            .map_err(|_| ParseError::InvalidUtf8)?;

        let parts: Vec<&str> = line.split(' ').collect();
        if parts.len() != 3 {
            return Err(ParseError::MalformedRequestLine);
        }
        self.method = parts[0].parse()?;
        let raw_uri = parts[1];
        if raw_uri.is_empty() {
            return Err(ParseError::MalformedRequestLine);
        }
        self.version = parts[2].to_string();
        if self.version != "HTTP/1.1" && self.version != "HTTP/1.0" {
            return Err(ParseError::MalformedRequestLine);
        }

        let decoded = percent_decode(raw_uri)?;
        let (path_and_query, fragment) = match decoded.split_once('#') {
            Some((a, b)) => (a.to_string(), b.to_string()),
            None => (decoded, String::new()),
        };
        let (path, query) = match path_and_query.split_once('?') {
            Some((a, b)) => (a.to_string(), b.to_string()),
            None => (path_and_query, String::new()),
        };

        self.uri = raw_uri.to_string();
        self.path = path;
        self.query = query;
        self.fragment = fragment;

        self.cursor = line_end + CRLF_LEN;
        self.state = ParsingState::Headers;
        Ok(true)
    }

    fn parse_headers(&mut self, max_body: usize) -> Result<bool, ParseError> {
        loop {
            match self.extract_header_line()? {
                Some((k, v)) => {
                    if self.headers.len() >= MAX_HEADERS {
                        return Err(ParseError::TooManyHeaders);
                    }
                    self.headers.insert(k, v);
                }
                None if self.headers_done => {
                    self.finish_headers(max_body)?;
                    return Ok(true);
                }
                None => return Ok(false),
            }
        }
    }

    fn extract_header_line(&mut self) -> Result<Option<(String, String)>, ParseError> {
        let Some(line_end) = find_crlf(&self.buffer, self.cursor) else {
            if self.buffer.len() - self.cursor > MAX_HEADER_LINE {
                return Err(ParseError::HeaderTooLong);
            }
            return Ok(None);
        };
        let line_bytes = &self.buffer[self.cursor..line_end];
        if line_bytes.is_empty() {
            self.cursor = line_end + CRLF_LEN;
            self.headers_done = true;
            return Ok(None);
        }
        let line = std::str::from_utf8(line_bytes).map_err(|_| ParseError::InvalidUtf8)?;
        let Some(sep) = line.find(':') else {
            return Err(ParseError::InvalidHeaderName);
        };
        let name = line[..sep].trim();
        if name.is_empty() || name.chars().any(|c| c.is_whitespace()) {
            return Err(ParseError::InvalidHeaderName);
        }
        let value = line[sep + 1..].trim().to_string();
        self.cursor = line_end + CRLF_LEN;
        Ok(Some((name.to_ascii_lowercase(), value)))
    }

    fn finish_headers(&mut self, max_body: usize) -> Result<(), ParseError> {
        self.buffer.drain(..self.cursor);
        self.cursor = 0;

        if let Some(te) = self.headers.get("transfer-encoding") {
            if te.eq_ignore_ascii_case("chunked") {
                self.is_chunked = true;
            } else {
                return Err(ParseError::InvalidHeaderValue);
            }
        }

        if !self.is_chunked {
            if let Some(cl) = self.headers.get("content-length") {
                self.content_length = cl
                    .parse::<usize>()
                    .map_err(|_| ParseError::InvalidHeaderValue)?;
            }
        }

        if let Some(ct) = self.headers.get("content-type").cloned() {
            if ct.starts_with("multipart/form-data") {
                self.is_multipart = true;
                if let Some(b) = ct.split("boundary=").nth(1) {
                    self.boundary = b.trim().trim_matches('"').to_string();
                }
            }
        }

        if !self.is_chunked && self.content_length > max_body {
            return Err(ParseError::PayloadTooLarge);
        }

        self.state = if self.is_chunked {
            ParsingState::ChunkSize
        } else if self.content_length > 0 {
            ParsingState::Body
        } else if self.cgi_mode {
            ParsingState::Body
        } else {
            ParsingState::Complete
        };
        Ok(())
    }

    fn parse_body(&mut self) -> Result<bool, ParseError> {
        let available = self.buffer.len() - self.cursor;
        // CGI-mode responses with no Content-Length read until the child
        // closes its stdout; everything buffered so far is body.
        let unbounded = self.cgi_mode && self.content_length == 0;
        let remaining = if unbounded { available } else { self.content_length.saturating_sub(self.bytes_read) };
        let to_take = available.min(remaining);
        if to_take > 0 {
            let start = self.cursor;
            let n = self.body_ring.write_strict(&self.buffer[start..start + to_take]);
            self.cursor += n;
            self.bytes_read += n;
            if n < to_take {
                return Ok(false);
            }
        }
        self.buffer.drain(..self.cursor);
        self.cursor = 0;

        if self.content_length > 0 && self.bytes_read >= self.content_length {
            self.state = ParsingState::Complete;
            return Ok(true);
        }
        if self.content_length == 0 && !self.cgi_mode {
            self.state = ParsingState::Complete;
            return Ok(true);
        }
        Ok(false)
    }

    fn parse_chunked(&mut self, max_body: usize) -> Result<bool, ParseError> {
        loop {
            match self.chunk_state {
                ChunkState::Size => {
                    let Some(line_end) = find_crlf(&self.buffer, self.cursor) else {
                        return Ok(false);
                    };
                    let line = std::str::from_utf8(&self.buffer[self.cursor..line_end])
                        .map_err(|_| ParseError::InvalidUtf8)?;
                    let hex = line.split(';').next().unwrap_or("").trim();
                    let size = usize::from_str_radix(hex, 16).map_err(|_| ParseError::InvalidChunkSize)?;
                    if self.bytes_read + size > max_body {
                        return Err(ParseError::PayloadTooLarge);
                    }
                    self.cursor = line_end + CRLF_LEN;

                    if size == 0 {
                        self.chunk_state = ChunkState::Trailers;
                    } else {
                        self.chunk_state = ChunkState::Data(size);
                    }
                }
                ChunkState::Data(remaining) => {
                    let available = self.buffer.len() - self.cursor;
                    let to_take = available.min(remaining);
                    let mut written = 0;
                    if to_take > 0 {
                        let start = self.cursor;
                        written = self.body_ring.write_strict(&self.buffer[start..start + to_take]);
                        self.cursor += written;
                        self.bytes_read += written;
                    }
                    let left = remaining - written;
                    if written < to_take {
                        // ring is full; resume this chunk later with the
                        // reduced remaining count
                        self.chunk_state = ChunkState::Data(left);
                        return Ok(false);
                    }
                    if left == 0 {
                        self.chunk_state = ChunkState::TrailingCrlf;
                    } else {
                        self.chunk_state = ChunkState::Data(left);
                        return Ok(false);
                    }
                }
                ChunkState::TrailingCrlf => {
                    if self.buffer.len() - self.cursor < CRLF_LEN {
                        return Ok(false);
                    }
                    if &self.buffer[self.cursor..self.cursor + CRLF_LEN] != b"\r\n" {
                        return Err(ParseError::InvalidChunkSize);
                    }
                    self.cursor += CRLF_LEN;
                    self.chunk_state = ChunkState::Size;
                }
                ChunkState::Trailers => {
                    match self.extract_header_line()? {
                        Some((k, v)) => {
                            self.trailers.insert(k, v);
                            continue;
                        }
                        None if self.headers_done => {
                            self.buffer.drain(..self.cursor);
                            self.cursor = 0;
                            self.state = ParsingState::Complete;
                            return Ok(true);
                        }
                        None => return Ok(false),
                    }
                }
            }
        }
    }
}

fn find_crlf(buffer: &[u8], start: usize) -> Option<usize> {
    let area = buffer.get(start..)?;
    let mut i = 0;
    while let Some(pos) = area[i..].iter().position(|&b| b == b'\r') {
        let abs = i + pos;
        if area.get(abs + 1) == Some(&b'\n') {
            return Some(start + abs);
        }
        i = abs + 1;
    }
    None
}

pub fn find_subsequence(buffer: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || buffer.len() < needle.len() {
        return None;
    }
    buffer.windows(needle.len()).position(|w| w == needle)
}

fn percent_decode(s: &str) -> Result<String, ParseError> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                if i + 2 >= bytes.len() {
                    return Err(ParseError::InvalidUri);
                }
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).map_err(|_| ParseError::InvalidUri)?;
                let byte = u8::from_str_radix(hex, 16).map_err(|_| ParseError::InvalidUri)?;
                out.push(byte);
                i += 3;
            }
            b if b.is_ascii() => {
                out.push(b);
                i += 1;
            }
            _ => return Err(ParseError::InvalidUri),
        }
    }
    String::from_utf8(out).map_err(|_| ParseError::InvalidUtf8)
}

#[derive(Debug, Default, Clone)]
pub struct PartInfo {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: String,
}

pub fn parse_part_headers(headers: &str) -> PartInfo {
    let mut info = PartInfo::default();
    for line in headers.lines() {
        if line.to_ascii_lowercase().starts_with("content-disposition:") {
            if let Some(n) = line.split(';').find(|s| s.trim().starts_with("name=")) {
                info.name = n.split('=').nth(1).unwrap_or("").trim().trim_matches('"').to_string();
            }
            if let Some(fnm) = line.split(';').find(|s| s.trim().starts_with("filename=")) {
                info.filename = Some(fnm.split('=').nth(1).unwrap_or("").trim().trim_matches('"').to_string());
            }
        } else if line.to_ascii_lowercase().starts_with("content-type:") {
            info.content_type = line.split(':').nth(1).unwrap_or("text/plain").trim().to_string();
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get() {
        let mut req = HttpRequest::new();
        req.add_chunk(b"GET /index.html HTTP/1.1\r\nHost: h\r\n\r\n");
        assert_eq!(req.advance(1_048_576), Ok(true));
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.path, "/index.html");
    }

    #[test]
    fn splits_query_and_fragment() {
        let mut req = HttpRequest::new();
        req.add_chunk(b"GET /a?x=1#frag HTTP/1.1\r\nHost: h\r\n\r\n");
        req.advance(1_048_576).unwrap();
        assert_eq!(req.path, "/a");
        assert_eq!(req.query, "x=1");
        assert_eq!(req.fragment, "frag");
    }

    #[test]
    fn fragmented_feed_matches_whole_feed() {
        let whole = b"GET /x HTTP/1.1\r\nHost: h\r\nContent-Length: 5\r\n\r\nhello";
        let mut req_a = HttpRequest::new();
        req_a.add_chunk(whole);
        req_a.advance(1024).unwrap();

        let mut req_b = HttpRequest::new();
        for byte in whole {
            req_b.add_chunk(&[*byte]);
            let _ = req_b.advance(1024);
        }
        assert_eq!(req_a.method, req_b.method);
        assert_eq!(req_a.path, req_b.path);
        assert_eq!(req_a.headers, req_b.headers);
    }

    #[test]
    fn chunked_body_decodes_to_identity() {
        let mut req = HttpRequest::new();
        req.add_chunk(b"POST /u HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n7\r\n world!\r\n0\r\n\r\n");
        assert_eq!(req.advance(1_048_576), Ok(true));
        let mut out = vec![0u8; req.body_ring.size()];
        req.body_ring.read(&mut out);
        assert_eq!(&out, b"hello world!");
    }

    #[test]
    fn rejects_bad_method() {
        let mut req = HttpRequest::new();
        req.add_chunk(b"PATCH / HTTP/1.1\r\nHost: h\r\n\r\n");
        assert_eq!(req.advance(1024), Err(ParseError::InvalidMethod));
    }

    #[test]
    fn oversize_content_length_rejected() {
        let mut req = HttpRequest::new();
        req.add_chunk(b"POST /u HTTP/1.1\r\nHost: h\r\nContent-Length: 2000000\r\n\r\n");
        assert_eq!(req.advance(1024), Err(ParseError::PayloadTooLarge));
    }
}
