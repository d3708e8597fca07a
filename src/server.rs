use std::collections::HashMap;
use std::net::SocketAddr;
use std::process::Child;
use std::str::FromStr;
use std::time::{Duration, Instant};

use mio::net::TcpListener;
use mio::{Events, Interest, Token};

use proxy_log::info;

use crate::config::{AppConfig, ServerConfig};
use crate::connection::{Connection, ConnectionState};
use crate::error::Result;
use crate::reactor::{HandlerKind, Reactor};
use crate::signal::{self, ShutdownPipe};

const EVENTS_CAPACITY: usize = 256;

struct Listener {
    socket: TcpListener,
    port: u16,
    servers: Vec<ServerConfig>,
}

/// Owns the reactor, every live connection and listener, and the CGI
/// child purgatory; `run` is the single-threaded event loop.
pub struct Server {
    reactor: Reactor,
    listeners: HashMap<Token, Listener>,
    connections: HashMap<Token, Connection>,
    cgi_to_client: HashMap<Token, Token>,
    zombie_purgatory: Vec<Child>,
    shutdown_pipe: ShutdownPipe,
    shutdown_token: Token,
}

impl Server {
    pub fn new(config: AppConfig) -> Result<Self> {
        let mut reactor = Reactor::new()?;
        let mut listeners = HashMap::new();

        for (port, servers) in group_by_port(config.servers) {
            let addr = SocketAddr::from_str(&format!("{}:{}", servers[0].host, port))
                .map_err(crate::error::CleanError::from)?;
            let mut socket = TcpListener::bind(addr)?;
            let token = reactor.allocate_token();
            reactor.register(&mut socket, token, HandlerKind::Listener, Interest::READABLE)?;
            info!("listening on {} ({} virtual server(s))", addr, servers.len());
            listeners.insert(token, Listener { socket, port, servers });
        }

        let mut shutdown_pipe = signal::install()?;
        let shutdown_token = reactor.allocate_token();
        reactor.register(
            &mut shutdown_pipe.read_end,
            shutdown_token,
            HandlerKind::Signal,
            Interest::READABLE,
        )?;

        Ok(Self {
            reactor,
            listeners,
            connections: HashMap::new(),
            cgi_to_client: HashMap::new(),
            zombie_purgatory: Vec::new(),
            shutdown_pipe,
            shutdown_token,
        })
    }

    pub fn run(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        loop {
            let now = Instant::now();
            let timeout = self
                .reactor
                .next_deadline_in(now)
                .unwrap_or(Duration::from_secs(1))
                .min(Duration::from_secs(1));
            self.reactor.poll_events(&mut events, Some(timeout))?;

            for event in events.iter() {
                let token = event.token();
                match self.reactor.kind_of(token) {
                    Some(HandlerKind::Listener) => self.accept_all(token)?,
                    Some(HandlerKind::Connection) => self.handle_connection_event(token, event),
                    Some(HandlerKind::Cgi) => self.handle_cgi_event(token),
                    Some(HandlerKind::Signal) => {
                        if signal::drain_is_shutdown(&mut self.shutdown_pipe.read_end) {
                            info!("shutdown signal received, closing listeners");
                            return Ok(());
                        }
                    }
                    None => {}
                }
            }

            self.sweep_timeouts();
            self.reap_zombies();
        }
    }

    fn accept_all(&mut self, listener_token: Token) -> Result<()> {
        loop {
            let (mut stream, peer) = {
                let Some(listener) = self.listeners.get_mut(&listener_token) else { return Ok(()) };
                match listener.socket.accept() {
                    Ok(pair) => pair,
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                    Err(e) => return Err(e.into()),
                }
            };
            let listener = &self.listeners[&listener_token];
            let port = listener.port;
            let servers = listener.servers.clone();

            let token = self.reactor.allocate_token();
            self.reactor
                .register(&mut stream, token, HandlerKind::Connection, Interest::READABLE)?;

            let mut conn = Connection::new(stream, peer, port, servers);
            conn.touch();
            let deadline = Instant::now() + conn.client_timeout();
            self.reactor.set_deadline(token, Some(deadline));
            self.connections.insert(token, conn);
        }
    }

    fn handle_connection_event(&mut self, token: Token, event: &mio::event::Event) {
        let Some(conn) = self.connections.get_mut(&token) else { return };

        if event.is_error() {
            self.terminate_connection(token);
            return;
        }

        if event.is_readable() && conn.state == ConnectionState::Reading {
            conn.on_readable();
        } else if event.is_writable() && conn.wants_write() {
            conn.run_step();
        } else {
            conn.run_step();
        }

        self.after_step(token);
    }

    fn after_step(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else { return };

        if let Some(child) = conn.take_pending_zombie() {
            self.zombie_purgatory.push(child);
        }

        if conn.state == ConnectionState::AwaitingCgi && conn.cgi_in_token().is_none() {
            self.register_cgi_pipes(token);
            return;
        }

        if conn.is_closed() {
            self.terminate_connection(token);
            return;
        }

        let interest = match conn.state {
            ConnectionState::Reading => Interest::READABLE,
            ConnectionState::Sending => Interest::WRITABLE,
            ConnectionState::AwaitingCgi => return,
            _ => Interest::READABLE,
        };
        let _ = self.reactor.reregister(&mut conn.stream, token, interest);
        let deadline = Instant::now() + conn.client_timeout();
        self.reactor.set_deadline(token, Some(deadline));
    }

    fn register_cgi_pipes(&mut self, owner: Token) {
        let Some(conn) = self.connections.get_mut(&owner) else { return };
        let in_token = self.reactor.allocate_token();
        let out_token = self.reactor.allocate_token();

        let registered = {
            let Some((stdin, stdout)) = conn.take_cgi_streams() else { return };
            let a = self
                .reactor
                .register(stdin, in_token, HandlerKind::Cgi, Interest::WRITABLE)
                .is_ok();
            let b = self
                .reactor
                .register(stdout, out_token, HandlerKind::Cgi, Interest::READABLE)
                .is_ok();
            a && b
        };
        if !registered {
            conn.force_cgi_timeout();
            self.after_step(owner);
            return;
        }

        conn.assign_cgi_tokens(in_token, out_token);
        self.cgi_to_client.insert(in_token, owner);
        self.cgi_to_client.insert(out_token, owner);
    }

    fn handle_cgi_event(&mut self, token: Token) {
        let Some(&owner) = self.cgi_to_client.get(&token) else { return };
        let Some(conn) = self.connections.get_mut(&owner) else { return };

        let is_in = conn.cgi_in_token() == Some(token);
        if is_in {
            conn.on_cgi_writable();
        } else {
            conn.on_cgi_readable();
        }

        if conn.state == ConnectionState::Sending {
            if let Some(t) = conn.cgi_in_token() {
                self.cgi_to_client.remove(&t);
            }
            if let Some(t) = conn.cgi_out_token() {
                self.cgi_to_client.remove(&t);
            }
            conn.run_step();
        }
        self.after_step(owner);
    }

    fn sweep_timeouts(&mut self) {
        let now = Instant::now();
        let expired: Vec<Token> = self.reactor.expired_tokens(now);
        for token in expired {
            if let Some(conn) = self.connections.get_mut(&token) {
                if conn.cgi_timed_out() {
                    conn.force_cgi_timeout();
                    self.after_step(token);
                } else {
                    self.terminate_connection(token);
                }
            }
        }
    }

    fn terminate_connection(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            conn.close();
            self.reactor.deregister(&mut conn.stream, token);
            if let Some(t) = conn.cgi_in_token() {
                self.cgi_to_client.remove(&t);
            }
            if let Some(t) = conn.cgi_out_token() {
                self.cgi_to_client.remove(&t);
            }
            if let Some(child) = conn.take_pending_zombie() {
                self.zombie_purgatory.push(child);
            }
        }
    }

    fn reap_zombies(&mut self) {
        self.zombie_purgatory
            .retain_mut(|child| !matches!(child.try_wait(), Ok(Some(_))));
    }
}

fn group_by_port(servers: Vec<ServerConfig>) -> Vec<(u16, Vec<ServerConfig>)> {
    let mut groups: Vec<(u16, Vec<ServerConfig>)> = Vec::new();
    for server in servers {
        match groups.iter_mut().find(|(port, _)| *port == server.port) {
            Some((_, list)) => list.push(server),
            None => groups.push((server.port, vec![server])),
        }
    }
    groups
}
