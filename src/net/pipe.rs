use std::io;
use std::os::fd::{FromRawFd, IntoRawFd};
use std::os::unix::net::UnixStream as StdUnixStream;

/// The two socketpairs a CGI child needs: one to carry the request body
/// into its stdin, one to carry its stdout back to the server.
///
/// Grounded on the teacher's CGI spawn path in `http/request.rs`, which
/// builds these by hand at the call site; here it's a single reusable
/// constructor used by `cgi::spawn`.
pub struct CgiPipes {
    pub server_to_child: mio::net::UnixStream,
    pub child_stdin: std::fs::File,
    pub server_from_child: mio::net::UnixStream,
    pub child_stdout: std::fs::File,
}

impl CgiPipes {
    pub fn new() -> io::Result<Self> {
        let (server_in, child_in) = StdUnixStream::pair()?;
        server_in.set_nonblocking(true)?;
        let (server_out, child_out) = StdUnixStream::pair()?;
        server_out.set_nonblocking(true)?;

        Ok(Self {
            server_to_child: mio::net::UnixStream::from_std(server_in),
            child_stdin: unsafe { std::fs::File::from_raw_fd(child_in.into_raw_fd()) },
            server_from_child: mio::net::UnixStream::from_std(server_out),
            child_stdout: unsafe { std::fs::File::from_raw_fd(child_out.into_raw_fd()) },
        })
    }
}
