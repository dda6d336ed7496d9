//! Reactor error types.

use std::os::fd::RawFd;

use nix::errno::Errno;
use nix::unistd::Pid;
use thiserror::Error;

/// Errors reported by reactor operations.
///
/// Operating on an unknown tag is deliberately *not* an error: `cancel`
/// returns `false` so races between a self-removing callback and an
/// external cancel stay harmless.
#[derive(Error, Debug)]
pub enum ReactorError {
    /// The underlying epoll instance could not be created.
    #[error("failed to create event loop backend: {0}")]
    Create(#[source] Errno),

    /// The descriptor could not be registered with the event loop.
    #[error("failed to register fd {fd} with the event loop: {source}")]
    RegisterIo {
        fd: RawFd,
        #[source]
        source: Errno,
    },

    /// No process-exit descriptor could be obtained for the child.
    #[error("failed to watch child process {pid}: {source}")]
    WatchChild {
        pid: Pid,
        #[source]
        source: Errno,
    },

    /// The monotonically increasing tag counter would wrap.
    #[error("watcher tag space exhausted")]
    TagOverflow,

    /// The timer deadline cannot be represented on the monotonic clock.
    #[error("timer interval overflows the monotonic clock")]
    IntervalOverflow,
}
