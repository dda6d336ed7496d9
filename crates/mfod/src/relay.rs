//! The relay contract: where accepted connections are handed off.
//!
//! The daemon core accepts connections, wraps them and delivers them
//! here; everything protocol-shaped - parsing mail-transaction commands,
//! fanning events out to filters via [`mfo_core::FilterSession`], merging
//! verdicts - lives behind this trait and outside this crate.

use std::io::{self, Read};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};

use tracing::{debug, info, warn};

use mfo_reactor::{Condition, Dispatch, Reactor};

use crate::launcher::LauncherHandle;
use crate::net::Connection;

/// Consumer of accepted connections.
pub trait Relay {
    /// A mail-transaction connection was accepted. The relay owns the
    /// connection from here on and drives it through reactor watchers.
    fn session_started(&mut self, reactor: &mut Reactor, connection: Connection);

    /// A control-channel connection was accepted. The relay's control
    /// agent owns it and releases it at end-of-stream.
    fn control_agent_started(&mut self, reactor: &mut Reactor, connection: Connection);

    /// The privilege-separated launcher is available for spawning
    /// filters. Not called when the daemon runs degraded.
    fn launcher_attached(&mut self, _launcher: LauncherHandle) {}

    /// Orderly shutdown was requested; wind down in-flight sessions.
    fn shutdown(&mut self, reactor: &mut Reactor);
}

/// Minimal relay wired by the `mfod` binary until a real filter fan-out
/// is plugged in: mail connections are logged and closed, control
/// connections are drained until end-of-stream.
pub struct LoggingRelay;

impl Relay for LoggingRelay {
    fn session_started(&mut self, _reactor: &mut Reactor, connection: Connection) {
        info!(
            peer = %connection.peer(),
            "mail-transaction connection accepted but no relay is configured, closing"
        );
    }

    fn control_agent_started(&mut self, reactor: &mut Reactor, mut connection: Connection) {
        let peer = connection.peer();
        let raw = connection.as_fd().as_raw_fd();
        // SAFETY: the watcher closure owns the connection, so the
        // descriptor outlives its registration.
        let borrowed = unsafe { BorrowedFd::borrow_raw(raw) };
        let result = reactor.watch_io(
            borrowed,
            Condition::READ,
            move |_, condition| {
                let mut buf = [0u8; 4096];
                loop {
                    match connection.read(&mut buf) {
                        Ok(0) => {
                            debug!(peer = %connection.peer(), "control connection released");
                            return Dispatch::Stop;
                        }
                        Ok(n) => debug!(bytes = n, "discarding control bytes, no agent configured"),
                        Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                        Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                        Err(error) => {
                            warn!("control connection read failed: {error}");
                            return Dispatch::Stop;
                        }
                    }
                }
                if condition.contains(Condition::ERROR) {
                    return Dispatch::Stop;
                }
                Dispatch::Keep
            },
            None,
        );
        match result {
            Ok(_) => debug!(%peer, "control connection accepted"),
            Err(error) => warn!(%peer, "failed to watch control connection: {error}"),
        }
    }

    fn shutdown(&mut self, _reactor: &mut Reactor) {}
}
