use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use mio::Token;

use crate::cgi::{self, CgiProcess};
use crate::config::ServerConfig;
use crate::handlers::{handle_delete, handle_get};
use crate::http::{
    handle_error, HttpRequest, HttpResponse, MultipartParser, Method, ParseError, ParsingState,
};
use crate::prelude::{READ_BUF_SIZE, WRITE_CHUNK_SIZE};
use crate::router::{self, RouteMatch};

/// `while (state_changed) { run_step }` in place of the original's
/// goto-driven dispatch (REDESIGN FLAGS): each state transition returns
/// whether progress was made, and the caller keeps stepping until either
/// a state sticks (waiting on I/O) or the connection closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Reading,
    Processing,
    AwaitingCgi,
    Sending,
    SendComplete,
    Closed,
    Error,
}

pub struct Connection {
    pub stream: TcpStream,
    pub peer_addr: std::net::SocketAddr,
    pub state: ConnectionState,
    pub request: HttpRequest,
    pub response: HttpResponse,
    pub last_activity: Instant,

    servers: Vec<ServerConfig>,
    s_cfg_index: usize,
    route: Option<RouteMatch>,
    multipart: Option<MultipartParser>,
    cgi: Option<CgiSlot>,
    local_port: u16,
    /// A CGI child killed but not yet confirmed exited, waiting to be
    /// picked up by the server's zombie purgatory so `reap_zombies` can
    /// finish it off without the event loop blocking on `wait()`.
    pending_zombie: Option<std::process::Child>,
}

struct CgiSlot {
    process: CgiProcess,
    in_token: Token,
    out_token: Token,
    stdin_buf: Vec<u8>,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        peer_addr: std::net::SocketAddr,
        local_port: u16,
        servers: Vec<ServerConfig>,
    ) -> Self {
        Self {
            stream,
            peer_addr,
            state: ConnectionState::Reading,
            request: HttpRequest::new(),
            response: HttpResponse::new(),
            last_activity: Instant::now(),
            servers,
            s_cfg_index: 0,
            route: None,
            multipart: None,
            cgi: None,
            local_port,
            pending_zombie: None,
        }
    }

    /// Kills and non-blockingly reaps any running CGI child. If it hadn't
    /// exited yet, stashes it for `take_pending_zombie` instead of leaking it.
    fn abort_cgi(&mut self) {
        if let Some(mut slot) = self.cgi.take() {
            if let Ok(Some(child)) = slot.process.kill_and_reap() {
                self.pending_zombie = Some(child);
            }
        }
    }

    /// Clears the CGI slot once its stdout has hit EOF on its own, reaping
    /// the child non-blockingly instead of killing it.
    fn finish_cgi(&mut self) {
        if let Some(mut slot) = self.cgi.take() {
            if let Some(child) = slot.process.finish() {
                self.pending_zombie = Some(child);
            }
        }
    }

    /// Called by the server after any teardown path that may have killed
    /// a CGI child, to collect it into the process-wide zombie purgatory.
    pub fn take_pending_zombie(&mut self) -> Option<std::process::Child> {
        self.pending_zombie.take()
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn client_timeout(&self) -> Duration {
        let secs = self
            .route
            .as_ref()
            .map(|r| r.client_timeout_secs)
            .unwrap_or_else(|| self.server_config().client_timeout_secs);
        Duration::from_secs(secs)
    }

    pub fn server_config(&self) -> &ServerConfig {
        &self.servers[self.s_cfg_index]
    }

    fn resolve_server(&mut self) {
        let host = self
            .request
            .headers
            .get("host")
            .map(|h| h.split(':').next().unwrap_or("").to_string())
            .unwrap_or_default();

        self.s_cfg_index = self
            .servers
            .iter()
            .position(|s| s.matches_host(&host))
            .or_else(|| self.servers.iter().position(|s| s.default_server))
            .unwrap_or(0);
    }

    pub fn cgi_in_token(&self) -> Option<Token> {
        self.cgi.as_ref().map(|c| c.in_token)
    }

    pub fn cgi_out_token(&self) -> Option<Token> {
        self.cgi.as_ref().map(|c| c.out_token)
    }

    /// Drives the state machine as far as it can go without more I/O
    /// readiness. Returns `true` once the connection should be torn down.
    pub fn run_step(&mut self) -> bool {
        loop {
            let before = self.state;
            match self.state {
                ConnectionState::Reading => self.step_reading(),
                ConnectionState::Processing => self.step_processing(),
                ConnectionState::AwaitingCgi => break,
                ConnectionState::Sending => self.step_sending(),
                ConnectionState::SendComplete => self.step_send_complete(),
                ConnectionState::Error | ConnectionState::Closed => {
                    self.state = ConnectionState::Closed;
                    break;
                }
            }
            if self.state == before {
                break;
            }
        }
        self.state == ConnectionState::Closed
    }

    pub fn on_readable(&mut self) -> bool {
        self.touch();
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    self.state = ConnectionState::Closed;
                    break;
                }
                Ok(n) => {
                    self.request.add_chunk(&buf[..n]);
                    if n < READ_BUF_SIZE {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(_) => {
                    self.state = ConnectionState::Closed;
                    break;
                }
            }
        }
        self.run_step()
    }

    fn step_reading(&mut self) {
        let max_body = self
            .route
            .as_ref()
            .map(|r| r.max_body)
            .unwrap_or_else(|| self.server_config().client_max_body_size);

        let headers_done_before = self.request.state != ParsingState::StartLine
            && self.request.state != ParsingState::Headers;

        match self.request.advance(max_body) {
            Ok(true) => {
                if self.route.is_none() {
                    self.resolve_route();
                }
                self.state = ConnectionState::Processing;
            }
            Ok(false) => {
                // Resolve the route as soon as headers finish so a
                // multipart body can stream straight to disk instead of
                // waiting for the whole request to buffer first.
                if self.route.is_none()
                    && !headers_done_before
                    && self.request.state != ParsingState::StartLine
                    && self.request.state != ParsingState::Headers
                {
                    self.resolve_route();
                }
                if self.request.is_multipart {
                    self.feed_multipart();
                }
            }
            Err(e) => {
                self.prepare_parse_error(e);
            }
        }
    }

    fn resolve_route(&mut self) {
        self.resolve_server();
        let server = self.server_config().clone();
        self.route = Some(router::resolve(&server, &self.request.method, &self.request.path));
    }

    fn feed_multipart(&mut self) {
        let Some(route) = &self.route else { return };
        let Some(upload_dir) = &route.upload_dir else { return };
        if self.multipart.is_none() {
            self.multipart = Some(MultipartParser::new(&self.request.boundary, upload_dir));
        }
        if let Some(parser) = &mut self.multipart {
            let _ = parser.feed(&mut self.request.body_ring);
        }
    }

    fn prepare_parse_error(&mut self, e: ParseError) {
        let code = match e {
            ParseError::PayloadTooLarge => 413,
            ParseError::HeaderTooLong => 414,
            ParseError::TooManyHeaders => 431u16, // falls back to generic catalog entry
            ParseError::InvalidMethod => 501,
            _ => 400,
        };
        handle_error(&mut self.response, code, Some(self.server_config()));
        self.state = ConnectionState::Sending;
    }

    fn step_processing(&mut self) {
        if self.request.is_multipart {
            self.feed_multipart();
        }

        let server = self.server_config().clone();
        let route = match self.route.take() {
            Some(r) => r,
            None => router::resolve(&server, &self.request.method, &self.request.path),
        };

        if !route.is_valid_match {
            handle_error(&mut self.response, 404, Some(&server));
            self.route = Some(route);
            self.state = ConnectionState::Sending;
            return;
        }
        if !route.method_allowed {
            handle_error(&mut self.response, 405, Some(&server));
            self.route = Some(route);
            self.state = ConnectionState::Sending;
            return;
        }
        if route.is_redirect {
            let target = route.redirect_url.clone().unwrap_or_default();
            self.response = HttpResponse::redirect(301, &target);
            self.route = Some(route);
            self.state = ConnectionState::Sending;
            return;
        }

        if route.is_cgi {
            self.route = Some(route);
            self.spawn_cgi();
            return;
        }

        match self.request.method {
            Method::GET => {
                let path = self.request.path.clone();
                self.route = Some(route);
                let route = self.route.as_ref().unwrap();
                handle_get(route, &path, &mut self.response, Some(&server));
            }
            Method::DELETE => {
                self.route = Some(route);
                let route = self.route.as_ref().unwrap();
                self.response = handle_delete(route, Some(&server));
            }
            Method::POST => {
                self.route = Some(route);
                self.finish_upload();
            }
        }
        self.state = ConnectionState::Sending;
    }

    fn finish_upload(&mut self) {
        let server = self.server_config().clone();
        if !self.request.is_multipart {
            handle_error(&mut self.response, 400, Some(&server));
            return;
        }
        self.feed_multipart();
        match self.multipart.take() {
            Some(parser) if parser.is_complete() => {
                self.response.start_line(201).add_header("Content-Length", "0");
                self.response.end_headers();
            }
            _ => handle_error(&mut self.response, 400, Some(&server)),
        }
    }

    fn spawn_cgi(&mut self) {
        let route = self.route.clone().unwrap();
        let server_host = self
            .request
            .headers
            .get("host")
            .cloned()
            .unwrap_or_else(|| self.server_config().host.clone());

        match cgi::spawn(&route, &self.request, self.peer_addr, &server_host, self.local_port) {
            Ok(process) => {
                self.cgi = Some(CgiSlot {
                    process,
                    in_token: Token(usize::MAX),
                    out_token: Token(usize::MAX),
                    stdin_buf: Vec::new(),
                });
                self.drain_body_into_cgi_buf();
                self.state = ConnectionState::AwaitingCgi;
            }
            Err(_) => {
                handle_error(&mut self.response, 500, Some(self.server_config()));
                self.state = ConnectionState::Sending;
            }
        }
    }

    fn drain_body_into_cgi_buf(&mut self) {
        if let Some(slot) = &mut self.cgi {
            let mut buf = vec![0u8; self.request.body_ring.size()];
            let n = self.request.body_ring.read(&mut buf);
            slot.stdin_buf.extend_from_slice(&buf[..n]);
        }
    }

    /// Assigns the two mio tokens once the CGI pipes are registered with
    /// the reactor; called by the server immediately after `spawn_cgi`.
    pub fn assign_cgi_tokens(&mut self, in_token: Token, out_token: Token) {
        if let Some(slot) = &mut self.cgi {
            slot.in_token = in_token;
            slot.out_token = out_token;
        }
    }

    pub fn take_cgi_streams(
        &mut self,
    ) -> Option<(&mut mio::net::UnixStream, &mut mio::net::UnixStream)> {
        self.cgi
            .as_mut()
            .map(|c| (&mut c.process.server_to_child, &mut c.process.server_from_child))
    }

    pub fn on_cgi_writable(&mut self) {
        let Some(slot) = &mut self.cgi else { return };
        if slot.stdin_buf.is_empty() {
            let mut buf = vec![0u8; self.request.body_ring.size()];
            let n = self.request.body_ring.read(&mut buf);
            slot.stdin_buf.extend_from_slice(&buf[..n]);
        }
        if slot.stdin_buf.is_empty() {
            return;
        }
        if let Ok(n) = slot.process.try_write_stdin(&slot.stdin_buf) {
            slot.stdin_buf.drain(..n);
        }
    }

    pub fn on_cgi_readable(&mut self) -> bool {
        let Some(slot) = &mut self.cgi else { return false };
        let headers_were_emitted = slot.process.headers_emitted();
        let outcome = slot.process.pump_stdout(&mut self.response);
        match outcome {
            Ok(true) => {
                if !headers_were_emitted && !self.cgi.as_ref().unwrap().process.headers_emitted() {
                    handle_error(&mut self.response, 502, Some(self.server_config()));
                }
                self.finish_cgi();
                self.state = ConnectionState::Sending;
                true
            }
            Ok(false) => false,
            Err(_) => {
                if !headers_were_emitted {
                    handle_error(&mut self.response, 502, Some(self.server_config()));
                }
                self.finish_cgi();
                self.state = ConnectionState::Sending;
                true
            }
        }
    }

    pub fn cgi_timed_out(&self) -> bool {
        self.cgi.as_ref().is_some_and(|c| c.process.deadline_passed())
    }

    pub fn force_cgi_timeout(&mut self) {
        let headers_were_emitted = self
            .cgi
            .as_ref()
            .map(|c| c.process.headers_emitted())
            .unwrap_or(false);
        self.abort_cgi();
        if headers_were_emitted {
            self.response.feed_raw(&[]);
        } else {
            handle_error(&mut self.response, 504, Some(self.server_config()));
        }
        self.state = ConnectionState::Sending;
    }

    /// Called when the connection itself is being torn down (client
    /// disconnect, socket error, server shutdown) so a CGI child in
    /// flight doesn't outlive its owner unreaped.
    pub fn close(&mut self) {
        self.abort_cgi();
        self.state = ConnectionState::Closed;
    }

    fn step_sending(&mut self) {
        let mut buf = [0u8; WRITE_CHUNK_SIZE];
        match self.response.read_next_chunk(&mut buf) {
            Ok(0) => {
                self.state = ConnectionState::SendComplete;
            }
            Ok(n) => match self.stream.write(&buf[..n]) {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(_) => self.state = ConnectionState::Closed,
            },
            Err(_) => self.state = ConnectionState::Closed,
        }
        if self.response.is_complete() {
            self.state = ConnectionState::SendComplete;
        }
    }

    fn step_send_complete(&mut self) {
        let keep_alive = self.response.keep_alive;
        if !keep_alive {
            self.state = ConnectionState::Closed;
            return;
        }

        self.request.reset_for_next_request();
        self.response = HttpResponse::new();
        self.route = None;
        self.multipart = None;

        // Pipelined bytes already sitting in the buffer get picked up by
        // the next `step_reading` without waiting on socket readiness.
        self.state = ConnectionState::Reading;
    }

    pub fn wants_write(&self) -> bool {
        matches!(self.state, ConnectionState::Sending)
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }
}
