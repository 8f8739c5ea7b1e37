//! Advisory file locking shared by every process that touches the queue

use std::fs::File;
use std::io;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Acquire an exclusive `flock` on `file`, blocking until it is available.
///
/// The lock is released when `file` is closed.
#[cfg(unix)]
#[allow(unsafe_code)]
pub fn acquire_exclusive(file: &File) -> io::Result<()> {
    let fd = file.as_raw_fd();
    loop {
        // SAFETY: `fd` comes from a live `File` borrowed for the duration of
        // this call, and `LOCK_EX` is a valid `flock` operation.
        let rc = unsafe { libc::flock(fd, libc::LOCK_EX) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(not(unix))]
pub fn acquire_exclusive(_: &File) -> io::Result<()> {
    Ok(())
}
