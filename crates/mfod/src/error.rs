//! Daemon error types, grouped by the startup-fatal taxonomy.

use thiserror::Error;

use crate::config::ConfigError;
use crate::daemonize::DaemonizeError;
use crate::launcher::LauncherError;
use crate::net::ListenSpec;
use crate::privileges::PrivilegeError;

/// Startup-fatal daemon errors.
///
/// Everything here aborts startup with a non-zero exit and a user-visible
/// message; nothing is retried. Runtime-recoverable conditions (a single
/// failed accept, a watcher callback error) never surface through this
/// type - they are logged and the reactor keeps serving.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("no connection spec configured for the mail-transaction listener")]
    MissingConnectionSpec,

    #[error("failed to bind mail-transaction listener {spec}: {source}")]
    Bind {
        spec: ListenSpec,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Daemonize(#[from] DaemonizeError),

    #[error(transparent)]
    Privileges(#[from] PrivilegeError),

    #[error(transparent)]
    Launcher(#[from] LauncherError),

    #[error("failed to create event loop: {0}")]
    Reactor(#[from] mfo_reactor::ReactorError),

    #[error("failed to install signal handlers: {0}")]
    Signals(nix::errno::Errno),
}
