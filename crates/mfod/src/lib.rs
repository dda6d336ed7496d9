//! mfod - The mail-filter orchestration daemon
//!
//! This crate provides the daemon built on top of `mfo-reactor`:
//! - `manager` - the lifecycle controller (startup state machine, main loop)
//! - `launcher` - the privilege-separated process launcher and its channel
//! - `signals` - self-pipe signal wiring for shutdown and reload
//! - `daemonize` - double-fork terminal detachment
//! - `privileges` - effective group/user drop
//! - `config` - the configuration collaborator and its TOML backing
//! - `net` - listen-spec parsing, listeners and accepted connections
//! - `relay` - the handoff contract for accepted connections
//! - `pidfile` - PID-file bookkeeping
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     mfod (unprivileged)                      │
//! │  ┌─────────┐  ┌───────────────┐  ┌────────────────────────┐  │
//! │  │ Manager │─▶│    Reactor    │◀─│ listeners / signals /  │  │
//! │  │         │  │ (single loop) │  │ launcher reply pipe    │  │
//! │  └─────────┘  └───────────────┘  └────────────────────────┘  │
//! └────────────────────────│─────────────────────────────────────┘
//!                          │ command / reply pipes
//! ┌────────────────────────▼─────────────────────────────────────┐
//! │                launcher process (privileged)                 │
//! │        spawns filter processes, reaps their exits            │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod daemonize;
pub mod error;
pub mod launcher;
pub mod manager;
pub mod net;
pub mod pidfile;
pub mod privileges;
pub mod relay;
pub mod signals;

// Re-exports for convenience
pub use config::{FileConfig, ManagerConfig};
pub use error::DaemonError;
pub use launcher::LauncherHandle;
pub use manager::Manager;
pub use mfo_core::{FilterSession, FilterVerdict, MacroStage};
pub use net::{Connection, ListenSpec, Listener};
pub use relay::{LoggingRelay, Relay};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Mutex, MutexGuard, OnceLock};

    /// Serializes tests that install process-wide signal handlers.
    pub(crate) fn signal_lock() -> MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        match LOCK.get_or_init(|| Mutex::new(())).lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
