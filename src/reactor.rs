use std::collections::HashMap;
use std::io;
use std::time::Instant;

use mio::event::Source;
use mio::{Events, Interest, Poll, Token};

/// Closed variant for what a readiness event belongs to, replacing a
/// virtual handler-interface dispatch with a single match in the event
/// loop (REDESIGN FLAGS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Listener,
    Connection,
    Cgi,
    Signal,
}

struct RegistryEntry {
    kind: HandlerKind,
    deadline: Option<Instant>,
}

/// Wraps `mio::Poll` with a token registry that also tracks each handler's
/// kind and an optional wall-clock deadline, so the event loop can
/// synthesize a TIMEOUT pass without mio itself knowing about timers.
pub struct Reactor {
    poll: Poll,
    entries: HashMap<Token, RegistryEntry>,
    next_token: usize,
}

impl Reactor {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            entries: HashMap::new(),
            next_token: 0,
        })
    }

    pub fn allocate_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    pub fn register<S: Source + ?Sized>(
        &mut self,
        source: &mut S,
        token: Token,
        kind: HandlerKind,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll.registry().register(source, token, interest)?;
        self.entries.insert(
            token,
            RegistryEntry {
                kind,
                deadline: None,
            },
        );
        Ok(())
    }

    pub fn reregister<S: Source + ?Sized>(
        &mut self,
        source: &mut S,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll.registry().reregister(source, token, interest)
    }

    pub fn deregister<S: Source + ?Sized>(&mut self, source: &mut S, token: Token) {
        let _ = self.poll.registry().deregister(source);
        self.entries.remove(&token);
    }

    pub fn kind_of(&self, token: Token) -> Option<HandlerKind> {
        self.entries.get(&token).map(|e| e.kind)
    }

    pub fn set_deadline(&mut self, token: Token, deadline: Option<Instant>) {
        if let Some(entry) = self.entries.get_mut(&token) {
            entry.deadline = deadline;
        }
    }

    /// Tokens whose deadline has already passed, as of `now`. The event
    /// loop treats these like a synthetic readiness event after the real
    /// mio poll returns, enforcing ERROR -> READ -> WRITE -> TIMEOUT
    /// ordering per handler per iteration.
    pub fn expired_tokens(&self, now: Instant) -> Vec<Token> {
        self.entries
            .iter()
            .filter(|(_, e)| e.deadline.is_some_and(|d| now >= d))
            .map(|(t, _)| *t)
            .collect()
    }

    /// The shortest time until any registered deadline, used to cap how
    /// long `poll_events` may block so timeouts still fire promptly even
    /// with no I/O activity.
    pub fn next_deadline_in(&self, now: Instant) -> Option<std::time::Duration> {
        self.entries
            .values()
            .filter_map(|e| e.deadline)
            .map(|d| d.saturating_duration_since(now))
            .min()
    }

    pub fn poll_events(
        &mut self,
        events: &mut Events,
        timeout: Option<std::time::Duration>,
    ) -> io::Result<()> {
        self.poll.poll(events, timeout)
    }
}
