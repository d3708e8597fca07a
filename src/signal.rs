use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicI32, Ordering};

use mio::net::UnixStream;

/// Self-pipe trick: the only async-signal-safe way to get SIGINT/SIGTERM
/// into a single-threaded readiness loop without a blocking `sigwait`.
/// The signal handler does nothing but a raw `write()` of one byte; the
/// reactor sees the read end become readable like any other fd.
static WRITE_FD: AtomicI32 = AtomicI32::new(-1);

pub struct ShutdownPipe {
    pub read_end: UnixStream,
}

pub fn install() -> io::Result<ShutdownPipe> {
    let (read_std, write_std) = std::os::unix::net::UnixStream::pair()?;
    read_std.set_nonblocking(true)?;
    write_std.set_nonblocking(true)?;

    WRITE_FD.store(write_std.as_raw_fd(), Ordering::SeqCst);
    std::mem::forget(write_std); // kept alive for the process lifetime via the raw fd

    unsafe {
        register(SIGINT, handle_shutdown_signal);
        register(SIGTERM, handle_shutdown_signal);
    }

    Ok(ShutdownPipe {
        read_end: UnixStream::from_std(read_std),
    })
}

/// Drains the pipe; any byte present means a shutdown signal arrived.
pub fn drain_is_shutdown(stream: &mut UnixStream) -> bool {
    use std::io::Read;
    let mut buf = [0u8; 16];
    match stream.read(&mut buf) {
        Ok(n) => n > 0,
        Err(_) => false,
    }
}

const SIGINT: i32 = 2;
const SIGTERM: i32 = 15;

extern "C" fn handle_shutdown_signal(_signum: i32) {
    let fd = WRITE_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        unsafe {
            raw_write(fd, &[1u8]);
        }
    }
}

unsafe extern "C" {
    fn signal(signum: i32, handler: usize) -> usize;
    fn write(fd: i32, buf: *const u8, count: usize) -> isize;
}

unsafe fn register(signum: i32, handler: extern "C" fn(i32)) {
    unsafe {
        signal(signum, handler as usize);
    }
}

unsafe fn raw_write(fd: RawFd, buf: &[u8]) {
    unsafe {
        write(fd, buf.as_ptr(), buf.len());
    }
}
