//! Signal wiring over a self-pipe.
//!
//! The async-signal context only ever writes the signal number to a
//! pre-created pipe; the read end is an ordinary reactor IO watcher, so
//! shutdown and reload logic always run on the normal single-threaded
//! dispatch path, never inside a signal handler.
//!
//! SIGINT and SIGTERM have their previous disposition restored the first
//! time they are dispatched: a second occurrence after shutdown has begun
//! takes the platform default path instead of looping. SIGHUP stays
//! installed. Whatever was not restored during dispatch is restored by
//! [`SignalWiring::uninstall`] after the main loop returns.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd};
use std::rc::Rc;
use std::sync::atomic::{AtomicI32, Ordering};

use nix::fcntl::OFlag;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::pipe2;
use tracing::{debug, warn};

use mfo_reactor::{Condition, Dispatch, Reactor, WatchTag};

use crate::error::DaemonError;

/// Signals the daemon intercepts; nothing else is touched.
const HANDLED: [Signal; 3] = [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP];

/// Write end of the self-pipe, read by the handler. -1 while uninstalled.
static SIGNAL_PIPE_WRITE: AtomicI32 = AtomicI32::new(-1);

extern "C" fn forward_signal(signum: libc::c_int) {
    let fd = SIGNAL_PIPE_WRITE.load(Ordering::Relaxed);
    if fd < 0 {
        return;
    }
    let byte = signum as u8;
    // SAFETY: write(2) is async-signal-safe; a full or torn-down pipe
    // makes this a no-op, which loses nothing we cannot afford to lose.
    let _ = unsafe { libc::write(fd, std::ptr::addr_of!(byte).cast(), 1) };
}

type SavedDispositions = Rc<RefCell<HashMap<Signal, SigAction>>>;

fn restore_disposition(saved: &SavedDispositions, signal: Signal) {
    if let Some(old) = saved.borrow_mut().remove(&signal) {
        // SAFETY: restoring a disposition previously returned by sigaction.
        if let Err(errno) = unsafe { sigaction(signal, &old) } {
            warn!(%signal, "failed to restore signal disposition: {errno}");
        }
    }
}

/// Installed signal handlers plus the bookkeeping to undo them.
pub struct SignalWiring {
    /// Keeps the handler's write target open for the wiring's lifetime.
    _write_end: OwnedFd,
    saved: SavedDispositions,
    tag: WatchTag,
}

impl SignalWiring {
    /// Creates the self-pipe, installs handlers for SIGINT/SIGTERM/SIGHUP
    /// and registers the dispatch watcher. `on_signal` runs on the normal
    /// dispatch path, once per delivered signal.
    pub fn install<F>(reactor: &mut Reactor, mut on_signal: F) -> Result<SignalWiring, DaemonError>
    where
        F: FnMut(&mut Reactor, Signal) + 'static,
    {
        let (read_end, write_end) =
            pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC).map_err(DaemonError::Signals)?;
        SIGNAL_PIPE_WRITE.store(write_end.as_raw_fd(), Ordering::Relaxed);

        let saved: SavedDispositions = Rc::new(RefCell::new(HashMap::new()));
        let action = SigAction::new(
            SigHandler::Handler(forward_signal),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        for signal in HANDLED {
            // SAFETY: the handler only performs an async-signal-safe write.
            let old = unsafe { sigaction(signal, &action) }.map_err(DaemonError::Signals)?;
            saved.borrow_mut().insert(signal, old);
        }

        let mut pipe_file = File::from(read_end);
        let pipe_fd = pipe_file.as_raw_fd();
        let saved_for_watch = Rc::clone(&saved);
        // SAFETY: the watcher closure owns pipe_file, so the descriptor
        // outlives its registration.
        let borrowed = unsafe { BorrowedFd::borrow_raw(pipe_fd) };
        let tag = reactor.watch_io(
            borrowed,
            Condition::READ,
            move |reactor, condition| {
                if condition.contains(Condition::ERROR) {
                    warn!("signal pipe error condition");
                    return Dispatch::Stop;
                }
                let mut buf = [0u8; 64];
                loop {
                    match pipe_file.read(&mut buf) {
                        Ok(0) => return Dispatch::Stop,
                        Ok(n) => {
                            for &byte in &buf[..n] {
                                match Signal::try_from(i32::from(byte)) {
                                    Ok(signal) => {
                                        if matches!(signal, Signal::SIGINT | Signal::SIGTERM) {
                                            restore_disposition(&saved_for_watch, signal);
                                        }
                                        debug!(%signal, "dispatching signal");
                                        on_signal(reactor, signal);
                                    }
                                    Err(_) => debug!("ignoring unknown signal byte {byte}"),
                                }
                            }
                        }
                        Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                        Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                        Err(error) => {
                            warn!("signal pipe read failed: {error}");
                            return Dispatch::Stop;
                        }
                    }
                }
                Dispatch::Keep
            },
            None,
        )?;

        Ok(SignalWiring {
            _write_end: write_end,
            saved,
            tag,
        })
    }

    /// Cancels the dispatch watcher and restores every disposition not
    /// already restored during dispatch.
    pub fn uninstall(self, reactor: &mut Reactor) {
        SIGNAL_PIPE_WRITE.store(-1, Ordering::Relaxed);
        reactor.cancel(self.tag);
        for signal in HANDLED {
            restore_disposition(&self.saved, signal);
        }
    }
}
