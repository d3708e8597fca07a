pub use crate::config::{AppConfig, LocationConfig, ServerConfig};
pub use crate::error::Result;
pub use crate::http::*;

pub use mio::{
    event::Event,
    net::{TcpListener, TcpStream},
    Events, Interest, Poll, Token,
};
pub use proxy_log::{errors, info, trace, warn};

pub use std::collections::HashMap;
pub use std::fs::{self, File};
pub use std::io::{self, ErrorKind, Read, Write};
pub use std::net::SocketAddr;
pub use std::path::{Path, PathBuf};
pub use std::time::{Duration, Instant};

pub use crate::cgi;
pub use crate::connection::{Connection, ConnectionState};
pub use crate::reactor::{HandlerKind, Reactor};
pub use crate::router::{self, RouteMatch};

pub const READ_BUF_SIZE: usize = 4096;
pub const WRITE_CHUNK_SIZE: usize = 8192;
pub const MAX_READ_DATA: usize = u16::MAX as usize;
