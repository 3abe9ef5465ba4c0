use std::time::Duration;

/// Waits up to `timeout` for `fd` to become readable.
#[cfg(unix)]
pub(crate) fn wait_fd_readable(fd: std::os::fd::BorrowedFd<'_>, timeout: Duration) -> bool {
    use nix::poll::{PollFd, PollFlags, poll};

    let timeout_ms = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    matches!(poll(&mut fds, timeout_ms), Ok(ready) if ready > 0)
}
