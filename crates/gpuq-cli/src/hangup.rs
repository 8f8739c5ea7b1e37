//! Surviving the launching terminal

/// Ignore `SIGHUP` for the rest of this process and the command it runs.
///
/// A job can wait in the queue for hours; closing the shell that started it
/// must not drop its place.
#[cfg(unix)]
#[allow(unsafe_code)]
pub fn ignore_hangup() -> std::io::Result<()> {
    // SAFETY: SIG_IGN installs no handler, so no code runs in signal context.
    let previous = unsafe { libc::signal(libc::SIGHUP, libc::SIG_IGN) };
    if previous == libc::SIG_ERR {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn ignore_hangup() -> std::io::Result<()> {
    Ok(())
}
