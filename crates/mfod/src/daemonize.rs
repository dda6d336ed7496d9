//! Double-fork daemonization.
//!
//! The sequence is all-or-nothing: fork, new session, fork again, change
//! directory to the filesystem root, redirect the standard streams to the
//! null device. A failing step aborts the whole request before any later
//! step's side effects, so a caller never ends up half-detached without
//! hearing about it.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;

use nix::errno::Errno;
use nix::unistd::{chdir, fork, setsid, ForkResult};
use thiserror::Error;
use tracing::debug;

/// A failed daemonization step.
#[derive(Error, Debug)]
pub enum DaemonizeError {
    #[error("failed to fork child process: {0}")]
    FirstFork(#[source] Errno),

    #[error("failed to create session: {0}")]
    Session(#[source] Errno),

    #[error("failed to fork grandchild process: {0}")]
    SecondFork(#[source] Errno),

    #[error("failed to change working directory to '/': {0}")]
    ChangeDir(#[source] Errno),

    #[error("failed to detach {stream}: {source}")]
    RedirectIo {
        stream: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Detaches the process from its controlling terminal.
///
/// On success the caller is the session-leader-free grandchild with its
/// working directory at `/` and its standard streams on the null device.
/// Both intermediate parents `_exit` without running destructors.
pub fn daemonize() -> Result<(), DaemonizeError> {
    // SAFETY: the parent branches only call async-signal-safe _exit; the
    // surviving child continues single-threaded startup.
    match unsafe { fork() }.map_err(DaemonizeError::FirstFork)? {
        ForkResult::Parent { .. } => unsafe { libc::_exit(0) },
        ForkResult::Child => {}
    }

    setsid().map_err(DaemonizeError::Session)?;

    // SAFETY: as above; the second fork guarantees we are not a session
    // leader and can never reacquire a controlling terminal.
    match unsafe { fork() }.map_err(DaemonizeError::SecondFork)? {
        ForkResult::Parent { .. } => unsafe { libc::_exit(0) },
        ForkResult::Child => {}
    }

    finish_detach("/")
}

/// The non-forking tail of daemonization: chdir, then stream redirection.
/// Split out so the ordering invariant is testable without forking.
fn finish_detach(root: &str) -> Result<(), DaemonizeError> {
    chdir(root).map_err(DaemonizeError::ChangeDir)?;
    detach_io()
}

/// Redirects stdin/stdout/stderr onto `/dev/null`.
///
/// All three null descriptors are opened before any redirection happens;
/// an open failure leaves the standard streams untouched.
fn detach_io() -> Result<(), DaemonizeError> {
    let null_stdin = File::open("/dev/null").map_err(|source| DaemonizeError::RedirectIo {
        stream: "stdin",
        source,
    })?;
    let null_stdout = OpenOptions::new().write(true).open("/dev/null").map_err(|source| {
        DaemonizeError::RedirectIo {
            stream: "stdout",
            source,
        }
    })?;
    let null_stderr = OpenOptions::new().write(true).open("/dev/null").map_err(|source| {
        DaemonizeError::RedirectIo {
            stream: "stderr",
            source,
        }
    })?;

    for (null, target, stream) in [
        (&null_stdin, libc::STDIN_FILENO, "stdin"),
        (&null_stdout, libc::STDOUT_FILENO, "stdout"),
        (&null_stderr, libc::STDERR_FILENO, "stderr"),
    ] {
        // SAFETY: duplicating an open descriptor onto a standard stream;
        // the source File outlives the call.
        if unsafe { libc::dup2(null.as_raw_fd(), target) } == -1 {
            return Err(DaemonizeError::RedirectIo {
                stream,
                source: std::io::Error::last_os_error(),
            });
        }
    }

    debug!("standard streams detached");
    Ok(())
}
