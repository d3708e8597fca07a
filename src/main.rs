use std::path::PathBuf;

use proxy_log::{errors, info};

use webserv::config::{display_config, parse_file, validate_configs};
use webserv::error::Result;
use webserv::server::Server;

fn main() {
    if let Err(e) = run() {
        errors!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    ignore_sigpipe();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("webserv.conf"));

    let app_config = parse_file(&config_path)?;
    let servers = validate_configs(app_config.servers);
    if servers.is_empty() {
        return Err("no valid server blocks after validation".into());
    }
    display_config(&servers);

    let mut server = Server::new(webserv::config::AppConfig { servers })?;
    info!("server ready, entering event loop");
    server.run()
}

/// The CGI child's stdout pipe can outlive the child on an abrupt exit;
/// writing to it after the read end closes would otherwise raise SIGPIPE
/// and kill the whole process. Every I/O path already checks write
/// results, so the default action just needs disabling.
fn ignore_sigpipe() {
    unsafe {
        libc_sigignore();
    }
}

#[cfg(unix)]
unsafe extern "C" {
    fn signal(signum: i32, handler: usize) -> usize;
}

#[cfg(unix)]
unsafe fn libc_sigignore() {
    const SIGPIPE: i32 = 13;
    const SIG_IGN: usize = 1;
    unsafe {
        signal(SIGPIPE, SIG_IGN);
    }
}

#[cfg(not(unix))]
unsafe fn libc_sigignore() {}
