use std::collections::HashMap;
use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::http::{HttpRequest, HttpResponse};
use crate::net::CgiPipes;
use crate::router::RouteMatch;

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum CgiParseState {
    ReadHeaders,
    StreamBodyChunked,
}

#[derive(Debug)]
pub enum CgiError {
    InterpreterNotExecutable,
    ScriptNotReadable,
    Spawn(io::Error),
}

impl From<io::Error> for CgiError {
    fn from(e: io::Error) -> Self {
        CgiError::Spawn(e)
    }
}

/// A running CGI child plus the bookkeeping needed to pump its two pipes
/// from reactor readiness events: which half is still open, how much of
/// the response header block has been parsed out of its stdout, and the
/// deadline past which it gets killed.
pub struct CgiProcess {
    child: Option<Child>,
    pub server_to_child: mio::net::UnixStream,
    pub server_from_child: mio::net::UnixStream,
    pub stdin_open: bool,
    pub stdout_open: bool,
    parse_state: CgiParseState,
    header_buf: Vec<u8>,
    headers_emitted: bool,
    started_at: Instant,
    pub timeout: Duration,
}

impl CgiProcess {
    pub fn deadline_passed(&self) -> bool {
        self.started_at.elapsed() > self.timeout
    }

    pub fn headers_emitted(&self) -> bool {
        self.headers_emitted
    }

    /// Sends as much of `pending` as the pipe accepts without blocking.
    /// Returns the number of bytes consumed from `pending`.
    pub fn try_write_stdin(&mut self, pending: &[u8]) -> io::Result<usize> {
        if pending.is_empty() {
            self.close_stdin();
            return Ok(0);
        }
        match self.server_to_child.write(pending) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    pub fn close_stdin(&mut self) {
        if self.stdin_open {
            self.stdin_open = false;
        }
    }

    /// Reads one batch of CGI stdout and feeds it into `response`, doing
    /// the header/body split and chunk-framing described for the CGI
    /// handler. Returns `Ok(true)` once the child's stdout has hit EOF.
    pub fn pump_stdout(&mut self, response: &mut HttpResponse) -> io::Result<bool> {
        let mut buf = [0u8; 4096];
        match self.server_from_child.read(&mut buf) {
            Ok(0) => {
                self.stdout_open = false;
                if self.headers_emitted {
                    response.feed_raw(&[]);
                }
                Ok(true)
            }
            Ok(n) => {
                self.feed(&buf[..n], response);
                Ok(false)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn feed(&mut self, data: &[u8], response: &mut HttpResponse) {
        if self.parse_state == CgiParseState::ReadHeaders {
            self.header_buf.extend_from_slice(data);
            let Some(pos) = crate::http::find_subsequence(&self.header_buf, b"\r\n\r\n") else {
                return;
            };
            let header_text = String::from_utf8_lossy(&self.header_buf[..pos]).to_string();
            let body_start = self.header_buf[pos + 4..].to_vec();
            let (status, headers) = parse_cgi_headers(&header_text);

            response.start_line(status);
            for (k, v) in &headers {
                if k.eq_ignore_ascii_case("content-length") {
                    // the response is always forwarded chunked (spec
                    // §4.9), so a length the CGI script computed itself
                    // would conflict with the wire framing.
                    continue;
                }
                response.add_header(k, v);
            }
            response.add_header("Transfer-Encoding", "chunked");
            self.parse_state = CgiParseState::StreamBodyChunked;
            response.end_headers();
            self.headers_emitted = true;

            if !body_start.is_empty() {
                self.emit_body(&body_start, response);
            }
            return;
        }
        self.emit_body(data, response);
    }

    fn emit_body(&self, data: &[u8], response: &mut HttpResponse) {
        response.feed_raw(data);
    }

    /// Non-blocking reap for a child that's expected to have exited (its
    /// stdout pipe already hit EOF). If it hasn't actually exited yet,
    /// hands it back so the caller can park it in the zombie purgatory
    /// instead of blocking.
    pub fn finish(&mut self) -> Option<Child> {
        let mut child = self.child.take()?;
        match child.try_wait() {
            Ok(Some(_)) => None,
            _ => Some(child),
        }
    }

    /// Sends SIGKILL and reaps non-blockingly. If the child hasn't
    /// exited yet, hands ownership of it to the caller (the event loop's
    /// zombie purgatory) instead of blocking on `wait()`.
    pub fn kill_and_reap(&mut self) -> io::Result<Option<Child>> {
        let Some(mut child) = self.child.take() else { return Ok(None) };
        child.kill()?;
        match child.try_wait()? {
            Some(_) => Ok(None),
            None => Ok(Some(child)),
        }
    }
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn is_readable(path: &Path) -> bool {
    std::fs::File::open(path).is_ok()
}

pub fn spawn(
    route: &RouteMatch,
    request: &HttpRequest,
    peer: SocketAddr,
    server_host: &str,
    server_port: u16,
) -> Result<CgiProcess, CgiError> {
    let script = route
        .script_path
        .as_ref()
        .ok_or_else(|| CgiError::Spawn(io::Error::new(ErrorKind::NotFound, "no CGI script path")))?;

    if let Some(interp) = &route.interpreter {
        if !is_executable(Path::new(interp)) {
            return Err(CgiError::InterpreterNotExecutable);
        }
        if !is_readable(script) {
            return Err(CgiError::ScriptNotReadable);
        }
    } else if !is_executable(script) {
        return Err(CgiError::ScriptNotReadable);
    }

    let pipes = CgiPipes::new()?;

    let mut cmd = match &route.interpreter {
        Some(interp) => {
            let mut c = Command::new(interp);
            c.arg(script);
            c
        }
        None => Command::new(script),
    };

    if let Some(dir) = script.parent() {
        cmd.current_dir(dir);
    }
    cmd.env_clear();
    cmd.envs(build_env(route, request, peer, server_host, server_port));
    cmd.stdin(Stdio::from(pipes.child_stdin));
    cmd.stdout(Stdio::from(pipes.child_stdout));
    cmd.stderr(Stdio::null());

    let child = cmd.spawn()?;

    Ok(CgiProcess {
        child: Some(child),
        server_to_child: pipes.server_to_child,
        server_from_child: pipes.server_from_child,
        stdin_open: true,
        stdout_open: true,
        parse_state: CgiParseState::ReadHeaders,
        header_buf: Vec::new(),
        headers_emitted: false,
        started_at: Instant::now(),
        timeout: Duration::from_millis(route.cgi_timeout_ms.max(1)),
    })
}

fn build_env(
    route: &RouteMatch,
    request: &HttpRequest,
    peer: SocketAddr,
    server_host: &str,
    server_port: u16,
) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string());
    env.insert("SERVER_PROTOCOL".to_string(), "HTTP/1.1".to_string());
    env.insert("SERVER_SOFTWARE".to_string(), "webserv/1.0".to_string());
    env.insert("REQUEST_METHOD".to_string(), request.method.to_string());
    env.insert("SCRIPT_NAME".to_string(), request.path.clone());
    env.insert("QUERY_STRING".to_string(), request.query.clone());
    env.insert("SERVER_NAME".to_string(), server_host.to_string());
    env.insert("SERVER_PORT".to_string(), server_port.to_string());
    env.insert("REMOTE_ADDR".to_string(), peer.ip().to_string());
    env.insert("REMOTE_PORT".to_string(), peer.port().to_string());

    if let Some(script) = &route.script_path {
        env.insert(
            "SCRIPT_FILENAME".to_string(),
            script.to_string_lossy().to_string(),
        );
    }
    if let Some(path_info) = &route.path_info {
        env.insert("PATH_INFO".to_string(), path_info.clone());
    }

    match request.headers.get("content-length") {
        Some(cl) => env.insert("CONTENT_LENGTH".to_string(), cl.clone()),
        None => env.insert("CONTENT_LENGTH".to_string(), "0".to_string()),
    };
    if let Some(ct) = request.headers.get("content-type") {
        env.insert("CONTENT_TYPE".to_string(), ct.clone());
    }

    for (key, value) in &request.headers {
        if key == "content-length" || key == "content-type" {
            continue;
        }
        let env_key = format!("HTTP_{}", key.to_ascii_uppercase().replace('-', "_"));
        env.insert(env_key, value.clone());
    }

    env
}

fn parse_cgi_headers(text: &str) -> (u16, Vec<(String, String)>) {
    let mut status = 200;
    let mut headers = Vec::new();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else { continue };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim().to_string();
        if key == "status" {
            status = value
                .split_whitespace()
                .next()
                .and_then(|s| s.parse().ok())
                .unwrap_or(200);
        } else {
            headers.push((key, value));
        }
    }
    (status, headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_and_headers() {
        let (status, headers) = parse_cgi_headers("Status: 404 Not Found\r\nContent-Type: text/plain");
        assert_eq!(status, 404);
        assert!(headers.iter().any(|(k, v)| k == "content-type" && v == "text/plain"));
    }

    #[test]
    fn default_status_is_200() {
        let (status, _) = parse_cgi_headers("Content-Type: text/html");
        assert_eq!(status, 200);
    }
}
