use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

use crate::config::ServerConfig;
use crate::error_pages::get_error_page;

/// Streaming response emitter. Construction is `start_line` then any
/// number of `add_header`, then one body method, then `end_headers`
/// (the body methods append their own headers before the status line
/// and header block are serialized). `read_next_chunk` drains the
/// outgoing ring first and only then reads from an attached file, so
/// callers don't need to know which case they're in.
#[derive(Debug)]
pub struct HttpResponse {
    status_code: u16,
    headers: Vec<(String, String)>,
    ring: VecDeque<u8>,
    pending_body: Option<Vec<u8>>,
    attached_file: Option<File>,
    file_size: u64,
    file_pos: u64,
    pub keep_alive: bool,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpResponse {
    pub fn new() -> Self {
        Self {
            status_code: 200,
            headers: Vec::new(),
            ring: VecDeque::new(),
            pending_body: None,
            attached_file: None,
            file_size: 0,
            file_pos: 0,
            keep_alive: true,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn start_line(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self
    }

    pub fn add_header(&mut self, key: &str, value: &str) -> &mut Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn has_header(&self, key: &str) -> bool {
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(key))
    }

    /// Small in-memory body; sets `content-type`/`content-length`.
    pub fn set_body(&mut self, bytes: Vec<u8>, content_type: &str) -> &mut Self {
        self.add_header("Content-Type", content_type);
        self.add_header("Content-Length", &bytes.len().to_string());
        self.pending_body = Some(bytes);
        self
    }

    /// Attaches a file on disk; the response streams the header ring
    /// first, then the file contents, without loading the file into memory.
    pub fn attach_file(&mut self, path: &Path) -> io::Result<&mut Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        let content_type = get_mime_type(path.extension().and_then(|e| e.to_str()));
        self.add_header("Content-Type", content_type);
        self.add_header("Content-Length", &size.to_string());
        self.file_size = size;
        self.attached_file = Some(file);
        Ok(self)
    }

    /// Appends one chunked-transfer frame. The caller must have already
    /// declared `transfer-encoding: chunked` and must emit the terminating
    /// zero-sized frame itself once the source is exhausted.
    pub fn feed_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.ring.extend(format!("{:x}\r\n", bytes.len()).into_bytes());
        self.ring.extend(bytes.iter().copied());
        self.ring.extend(b"\r\n".iter().copied());
        self
    }

    pub fn end_headers(&mut self) {
        let reason = reason_phrase(self.status_code);
        let mut line = format!("HTTP/1.1 {} {}\r\n", self.status_code, reason);
        for (key, value) in &self.headers {
            line.push_str(&format!("{}: {}\r\n", to_pascal_case(key), value));
        }
        line.push_str("\r\n");
        self.ring.extend(line.into_bytes());
        if let Some(body) = self.pending_body.take() {
            self.ring.extend(body);
        }
    }

    /// Drains the ring first, then the attached file. Returns 0 once the
    /// whole response has been transmitted.
    pub fn read_next_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.ring.is_empty() {
            let n = buf.len().min(self.ring.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.ring.pop_front().expect("checked non-empty above");
            }
            return Ok(n);
        }
        if let Some(file) = &mut self.attached_file {
            if self.file_pos >= self.file_size {
                return Ok(0);
            }
            let n = file.read(buf)?;
            self.file_pos += n as u64;
            return Ok(n);
        }
        Ok(0)
    }

    pub fn is_complete(&self) -> bool {
        self.ring.is_empty() && self.file_pos >= self.file_size
    }

    pub fn set_status_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self
    }

    pub fn redirect(code: u16, target_url: &str) -> Self {
        let mut res = HttpResponse::new();
        res.start_line(code)
            .add_header("Location", target_url)
            .add_header("Content-Length", "0");
        res.end_headers();
        res
    }
}

fn to_pascal_case(s: &str) -> String {
    s.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(f) => f.to_uppercase().collect::<String>() + chars.as_str(),
            }
        })
        .collect::<Vec<String>>()
        .join("-")
}

pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        417 => "Expectation Failed",
        418 => "I'm a Teapot",
        426 => "Upgrade Required",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "Unknown",
    }
}

pub fn get_mime_type(extension: Option<&str>) -> &'static str {
    match extension.map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") | Some("mjs") => "application/javascript",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("txt") | Some("md") => "text/plain",
        Some("csv") => "text/csv",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("bmp") => "image/bmp",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("otf") => "font/otf",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("gz") => "application/gzip",
        Some("tar") => "application/x-tar",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        _ => "application/octet-stream",
    }
}

/// Directories-first then alphabetical, badge + name + size + mtime.
pub fn generate_autoindex(dir: &Path, original_url: &str) -> HttpResponse {
    let mut entries: Vec<(String, bool, u64, Option<std::time::SystemTime>)> = Vec::new();
    if let Ok(read_dir) = dir.read_dir() {
        for entry in read_dir.flatten() {
            let Ok(name) = entry.file_name().into_string() else { continue };
            if name == "." {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            entries.push((name, meta.is_dir(), meta.len(), meta.modified().ok()));
        }
    }
    entries.sort_by(|a, b| match (a.1, b.1) {
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        _ => a.0.cmp(&b.0),
    });

    let mut html = format!(
        "<html><head><title>Index of {url}</title></head><body><h1>Index of {url}</h1><table>",
        url = original_url
    );
    for (name, is_dir, size, mtime) in entries {
        let badge = if is_dir { "DIR" } else { "FILE" };
        let display_name = if is_dir { format!("{}/", name) } else { name.clone() };
        let size_text = if is_dir { "-".to_string() } else { human_size(size) };
        let mtime_text = mtime.map(format_mtime).unwrap_or_default();
        html.push_str(&format!(
            "<tr><td>[{badge}]</td><td><a href=\"{href}/{name}\">{display_name}</a></td><td>{size_text}</td><td>{mtime_text}</td></tr>",
            href = original_url.trim_end_matches('/'),
        ));
    }
    html.push_str("</table></body></html>");

    let mut res = HttpResponse::new();
    res.start_line(200);
    res.set_body(html.into_bytes(), "text/html");
    res.end_headers();
    res
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{}{}", bytes, UNITS[0])
    } else {
        format!("{:.1}{}", value, UNITS[unit])
    }
}

fn format_mtime(time: std::time::SystemTime) -> String {
    let secs = time
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    civil_datetime(secs)
}

/// Minimal proleptic-Gregorian civil calendar conversion from a Unix
/// timestamp, avoiding a chrono dependency for a single display field.
fn civil_datetime(unix_secs: u64) -> String {
    let days = (unix_secs / 86400) as i64;
    let rem = unix_secs % 86400;
    let (hour, minute) = (rem / 3600, (rem % 3600) / 60);

    let z = days + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };

    format!("{:04}-{:02}-{:02} {:02}:{:02}", y, m, d, hour, minute)
}

/// Resets `res`, emits the status line, and tries the server's configured
/// custom error page before falling back to the built-in catalog.
pub fn handle_error(res: &mut HttpResponse, code: u16, s_cfg: Option<&ServerConfig>) {
    *res = HttpResponse::new();
    res.start_line(code);

    let close_connection = code >= 400 && code != 404 && code != 405;
    res.add_header(
        "Connection",
        if close_connection { "close" } else { "keep-alive" },
    );
    res.keep_alive = !close_connection;

    if let Some(cfg) = s_cfg {
        if let Some(path_str) = cfg.error_pages.get(&code) {
            let candidate = Path::new(&cfg.root).join(path_str.trim_start_matches('/'));
            if res.attach_file(&candidate).is_ok() {
                res.end_headers();
                return;
            }
        }
    }

    res.set_body(get_error_page(code), "text/html");
    res.end_headers();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_status_and_headers() {
        let mut res = HttpResponse::new();
        res.start_line(200).add_header("X-Test", "yes");
        res.set_body(b"hi".to_vec(), "text/plain");
        res.end_headers();
        let mut out = Vec::new();
        let mut buf = [0u8; 8];
        loop {
            let n = res.read_next_chunk(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("X-Test: yes\r\n"));
        assert!(text.ends_with("\r\n\r\nhi"));
        assert!(res.is_complete());
    }

    #[test]
    fn feed_raw_wraps_chunk_frame() {
        let mut res = HttpResponse::new();
        res.start_line(200).add_header("Transfer-Encoding", "chunked");
        res.end_headers();
        res.feed_raw(b"abc");
        res.feed_raw(b"");
        let mut out = Vec::new();
        let mut buf = [0u8; 4];
        loop {
            let n = res.read_next_chunk(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with("3\r\nabc\r\n0\r\n\r\n"));
    }

    #[test]
    fn attaches_file_and_streams_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        fs::write(&path, b"file contents").unwrap();

        let mut res = HttpResponse::new();
        res.start_line(200);
        res.attach_file(&path).unwrap();
        res.end_headers();

        let mut out = Vec::new();
        let mut buf = [0u8; 5];
        loop {
            let n = res.read_next_chunk(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert!(String::from_utf8(out).unwrap().ends_with("file contents"));
        assert!(res.is_complete());
    }

    #[test]
    fn unknown_status_code_uses_unknown_reason() {
        assert_eq!(reason_phrase(799), "Unknown");
    }

    #[test]
    fn mime_type_falls_back_to_octet_stream() {
        assert_eq!(get_mime_type(Some("xyz")), "application/octet-stream");
        assert_eq!(get_mime_type(Some("PDF")), "application/pdf");
    }
}
