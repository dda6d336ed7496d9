//! Daemon lifecycle controller.
//!
//! Drives the startup state machine - bind listeners, optionally detach
//! from the terminal, fork the privileged launcher, drop privileges,
//! write the PID file, wire signals - then parks in the reactor's
//! blocking loop until a shutdown signal unwinds it. Teardown (signal
//! dispositions restored, PID file removed) happens on the way out of
//! [`Manager::main`] regardless of how the loop ended.
//!
//! Error reporting follows the detachment state naturally: before the
//! standard streams are redirected, startup-fatal errors surface on the
//! controlling terminal through the binary; afterwards stderr *is* the
//! null device and only the tracing output remains.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::rc::Rc;

use nix::sys::signal::Signal;
use tracing::{debug, error, info};

use mfo_reactor::{Condition, Dispatch, Reactor, WatchTag};

use crate::config::{self, ManagerConfig};
use crate::daemonize::daemonize;
use crate::error::DaemonError;
use crate::launcher::{self, LauncherHandle};
use crate::net::Listener;
use crate::pidfile;
use crate::privileges::drop_privileges;
use crate::relay::Relay;
use crate::signals::SignalWiring;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerRole {
    Mail,
    Control,
}

impl fmt::Display for ListenerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerRole::Mail => f.write_str("mail-transaction"),
            ListenerRole::Control => f.write_str("control"),
        }
    }
}

/// The single live top-level manager instance.
pub struct Manager {
    config: Rc<dyn ManagerConfig>,
    relay: Rc<RefCell<Box<dyn Relay>>>,
    launcher: Option<LauncherHandle>,
    shutting_down: Rc<Cell<bool>>,
}

impl Manager {
    pub fn new(config: Rc<dyn ManagerConfig>, relay: Box<dyn Relay>) -> Manager {
        Manager {
            config,
            relay: Rc::new(RefCell::new(relay)),
            launcher: None,
            shutting_down: Rc::new(Cell::new(false)),
        }
    }

    /// Runs the whole daemon lifecycle; returns after an orderly
    /// shutdown, or with a startup-fatal error before entering the loop.
    pub fn main(&mut self, reactor: &mut Reactor) -> Result<(), DaemonError> {
        // the control channel is optional and non-fatal; registered first
        // so its socket is created while we may still be privileged
        let control_tag = self.setup_control_listener(reactor);

        let spec = self
            .config
            .connection_spec()
            .ok_or(DaemonError::MissingConnectionSpec)?;
        let mail_listener = Listener::bind(&spec).map_err(|source| DaemonError::Bind {
            spec: spec.clone(),
            source,
        })?;
        info!(%spec, "mail-transaction listener bound");

        if self.config.daemon() {
            daemonize()?;
        }

        if self.config.privilege_mode() {
            self.launcher = launcher::start(reactor)?;
            if let Some(handle) = &self.launcher {
                self.relay.borrow_mut().launcher_attached(handle.clone());
            }
        }

        drop_privileges(&*self.config)?;

        // best-effort: on write failure the path is forgotten and no
        // removal is attempted later
        let pid_file = self.config.pid_file().and_then(|path| {
            match pidfile::write(&path) {
                Ok(()) => Some(path),
                Err(err) => {
                    error!(path = %path.display(), "failed to save PID: {err}");
                    None
                }
            }
        });

        let mail_tag = self.watch_listener(reactor, mail_listener, ListenerRole::Mail)?;

        let wiring = self.wire_signals(reactor, mail_tag, control_tag)?;

        info!("entering main loop");
        reactor.run();
        info!("main loop finished");

        wiring.uninstall(reactor);
        reactor.cancel(mail_tag);
        if let Some(tag) = control_tag {
            reactor.cancel(tag);
        }
        if let Some(handle) = self.launcher.take() {
            handle.shutdown(reactor);
        }
        if let Some(path) = pid_file {
            if let Err(err) = pidfile::remove(&path) {
                error!(path = %path.display(), "failed to remove PID file: {err}");
            }
        }
        Ok(())
    }

    /// Binds and watches the control listener if one is configured.
    /// Absence of a spec silently disables the channel; bind failure is
    /// logged but does not abort startup.
    fn setup_control_listener(&self, reactor: &mut Reactor) -> Option<WatchTag> {
        let spec = match self.config.controller_spec() {
            Some(spec) => spec,
            None => {
                debug!("control connection spec is missing, control channel is disabled");
                return None;
            }
        };
        let listener = match Listener::bind(&spec) {
            Ok(listener) => listener,
            Err(err) => {
                error!(%spec, "failed to listen on control socket: {err}");
                return None;
            }
        };
        info!(%spec, "control listener bound");
        match self.watch_listener(reactor, listener, ListenerRole::Control) {
            Ok(tag) => Some(tag),
            Err(err) => {
                error!(%spec, "failed to watch control listener: {err}");
                None
            }
        }
    }

    /// Registers the accept watcher for a listener. A single failed
    /// accept is logged and the listener keeps serving; an error
    /// condition on the listener itself drops the watcher.
    fn watch_listener(
        &self,
        reactor: &mut Reactor,
        listener: Listener,
        role: ListenerRole,
    ) -> Result<WatchTag, DaemonError> {
        let relay = Rc::clone(&self.relay);
        let raw = listener.as_fd().as_raw_fd();
        // SAFETY: the watcher closure owns the listener, so the
        // descriptor outlives its registration.
        let borrowed = unsafe { BorrowedFd::borrow_raw(raw) };
        let tag = reactor.watch_io(
            borrowed,
            Condition::READ | Condition::ERROR,
            move |reactor, condition| {
                if condition.contains(Condition::READ) {
                    match listener.accept() {
                        Ok(connection) => {
                            debug!(peer = %connection.peer(), "accepted {role} connection");
                            let mut relay = relay.borrow_mut();
                            match role {
                                ListenerRole::Mail => relay.session_started(reactor, connection),
                                ListenerRole::Control => {
                                    relay.control_agent_started(reactor, connection)
                                }
                            }
                        }
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                        Err(err) => error!("failed to accept {role} connection: {err}"),
                    }
                }
                if condition.contains(Condition::ERROR) {
                    error!("{role} listener reported an error condition");
                    return Dispatch::Stop;
                }
                Dispatch::Keep
            },
            None,
        )?;
        Ok(tag)
    }

    /// Installs the signal dispatch: INT/TERM request one orderly
    /// shutdown (stop accepting, let the relay drain, leave the loop);
    /// HUP forwards a reload to the configuration collaborator without
    /// stopping the reactor.
    fn wire_signals(
        &self,
        reactor: &mut Reactor,
        mail_tag: WatchTag,
        control_tag: Option<WatchTag>,
    ) -> Result<SignalWiring, DaemonError> {
        let relay = Rc::clone(&self.relay);
        let config = Rc::clone(&self.config);
        let shutting_down = Rc::clone(&self.shutting_down);
        let listener_tags: Vec<WatchTag> =
            std::iter::once(mail_tag).chain(control_tag).collect();

        SignalWiring::install(reactor, move |reactor, signal| match signal {
            Signal::SIGHUP => {
                info!("SIGHUP received, reloading configuration");
                config::reload_logged(&*config);
            }
            Signal::SIGINT | Signal::SIGTERM => {
                if shutting_down.replace(true) {
                    return;
                }
                info!(%signal, "shutdown requested");
                for tag in &listener_tags {
                    reactor.cancel(*tag);
                }
                relay.borrow_mut().shutdown(reactor);
                reactor.quit();
            }
            _ => {}
        })
    }
}
