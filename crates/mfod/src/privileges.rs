//! Privilege drop: switch effective group, then effective user.
//!
//! Group must be applied before user - once the user switch happens the
//! process no longer has permission to change its group. Only attempted
//! when the process is actually running as the superuser; an unprivileged
//! start skips the whole drop.

use nix::errno::Errno;
use nix::unistd::{setgid, setuid, Group, Uid, User};
use thiserror::Error;
use tracing::info;

use crate::config::ManagerConfig;

/// Account used when no effective user is configured.
pub const FALLBACK_USER: &str = "nobody";

/// A failed privilege-drop step. All of these abort startup.
#[derive(Error, Debug)]
pub enum PrivilegeError {
    #[error("failed to find group entry for effective group: {0}")]
    GroupNotFound(String),

    #[error("failed to get group entry for effective group: {name}: {source}")]
    GroupLookup {
        name: String,
        #[source]
        source: Errno,
    },

    #[error("failed to change effective group: {name}: {source}")]
    SwitchGroup {
        name: String,
        #[source]
        source: Errno,
    },

    #[error("failed to find password entry for effective user: {0}")]
    UserNotFound(String),

    #[error("failed to get password entry for effective user: {name}: {source}")]
    UserLookup {
        name: String,
        #[source]
        source: Errno,
    },

    #[error("failed to change effective user: {name}: {source}")]
    SwitchUser {
        name: String,
        #[source]
        source: Errno,
    },
}

/// Drops elevated privileges per the configured effective group and user.
/// A no-op unless the process is currently the superuser.
pub fn drop_privileges(config: &dyn ManagerConfig) -> Result<(), PrivilegeError> {
    if !Uid::effective().is_root() {
        return Ok(());
    }
    switch_group(config.effective_group())?;
    switch_user(config.effective_user())?;
    Ok(())
}

fn switch_group(group: Option<String>) -> Result<(), PrivilegeError> {
    let name = match group {
        Some(name) => name,
        None => return Ok(()),
    };
    let entry = match Group::from_name(&name) {
        Ok(Some(entry)) => entry,
        Ok(None) => return Err(PrivilegeError::GroupNotFound(name)),
        Err(source) => return Err(PrivilegeError::GroupLookup { name, source }),
    };
    setgid(entry.gid).map_err(|source| PrivilegeError::SwitchGroup {
        name: name.clone(),
        source,
    })?;
    info!(group = %name, "switched effective group");
    Ok(())
}

fn switch_user(user: Option<String>) -> Result<(), PrivilegeError> {
    let name = user.unwrap_or_else(|| FALLBACK_USER.to_string());
    let entry = match User::from_name(&name) {
        Ok(Some(entry)) => entry,
        Ok(None) => return Err(PrivilegeError::UserNotFound(name)),
        Err(source) => return Err(PrivilegeError::UserLookup { name, source }),
    };
    setuid(entry.uid).map_err(|source| PrivilegeError::SwitchUser {
        name: name.clone(),
        source,
    })?;
    info!(user = %name, "switched effective user");
    Ok(())
}
