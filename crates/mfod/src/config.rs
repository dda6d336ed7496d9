//! Configuration collaborator.
//!
//! The daemon core never interprets configuration syntax; it consumes the
//! [`ManagerConfig`] accessors and asks for a [`ManagerConfig::reload`]
//! when SIGHUP arrives. [`FileConfig`] is the TOML-backed implementation
//! used by the `mfod` binary.
//!
//! Load-path resolution, most specific first: the `--config-dir` flag,
//! the `MFO_CONFIG_DIR` environment variable, then the compiled-in
//! default directory.

use std::cell::RefCell;
use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::net::ListenSpec;

/// Default configuration directory.
pub const DEFAULT_CONFIG_DIR: &str = "/etc/mfo";

/// Configuration file name inside the config directory.
pub const CONFIG_FILE_NAME: &str = "mfo.toml";

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "MFO_CONFIG_DIR";

/// Errors loading or reloading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Accessors the daemon core consumes.
pub trait ManagerConfig {
    /// Account to run as after startup; `None` falls back to `nobody`.
    fn effective_user(&self) -> Option<String>;

    /// Group to switch to before the user switch; `None` skips the switch.
    fn effective_group(&self) -> Option<String>;

    /// Whether to detach from the controlling terminal at startup.
    fn daemon(&self) -> bool;

    /// Whether to fork the privileged process launcher before dropping
    /// privileges.
    fn privilege_mode(&self) -> bool;

    /// PID file path; `None` disables PID-file management.
    fn pid_file(&self) -> Option<PathBuf>;

    /// Where the mail-transaction listener binds.
    fn connection_spec(&self) -> Option<ListenSpec>;

    /// Where the management (control) listener binds; `None` disables the
    /// control channel.
    fn controller_spec(&self) -> Option<ListenSpec>;

    /// Re-reads the underlying configuration source.
    fn reload(&self) -> Result<(), ConfigError>;
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Settings {
    #[serde(default)]
    connection_spec: Option<ListenSpec>,
    #[serde(default)]
    controller_spec: Option<ListenSpec>,
    #[serde(default)]
    effective_user: Option<String>,
    #[serde(default)]
    effective_group: Option<String>,
    #[serde(default)]
    daemon: bool,
    #[serde(default)]
    privilege_mode: bool,
    #[serde(default)]
    pid_file: Option<PathBuf>,
}

/// TOML-file-backed configuration.
///
/// `reload` re-reads the same file; command-line overrides survive a
/// reload, matching how the original treated options versus files.
pub struct FileConfig {
    path: PathBuf,
    settings: RefCell<Settings>,
    /// `--spec` override; takes precedence over the file.
    spec_override: RefCell<Option<ListenSpec>>,
}

impl FileConfig {
    /// Resolves the config directory from flag, environment, default.
    pub fn resolve_dir(flag: Option<&Path>) -> PathBuf {
        if let Some(dir) = flag {
            return dir.to_path_buf();
        }
        if let Ok(dir) = env::var(CONFIG_DIR_ENV) {
            if !dir.is_empty() {
                return PathBuf::from(dir);
            }
        }
        PathBuf::from(DEFAULT_CONFIG_DIR)
    }

    /// Loads `mfo.toml` from the given directory.
    ///
    /// A missing file yields defaults - a daemon freshly installed without
    /// configuration still starts in foreground passthrough mode.
    pub fn load(config_dir: &Path) -> Result<FileConfig, ConfigError> {
        let path = config_dir.join(CONFIG_FILE_NAME);
        let settings = Self::read_settings(&path)?;
        Ok(FileConfig {
            path,
            settings: RefCell::new(settings),
            spec_override: RefCell::new(None),
        })
    }

    fn read_settings(path: &Path) -> Result<Settings, ConfigError> {
        if !path.exists() {
            info!(path = %path.display(), "no config file, using defaults");
            return Ok(Settings::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies the `--spec` command-line override.
    pub fn override_connection_spec(&self, spec: ListenSpec) {
        *self.spec_override.borrow_mut() = Some(spec);
    }
}

impl ManagerConfig for FileConfig {
    fn effective_user(&self) -> Option<String> {
        self.settings.borrow().effective_user.clone()
    }

    fn effective_group(&self) -> Option<String> {
        self.settings.borrow().effective_group.clone()
    }

    fn daemon(&self) -> bool {
        self.settings.borrow().daemon
    }

    fn privilege_mode(&self) -> bool {
        self.settings.borrow().privilege_mode
    }

    fn pid_file(&self) -> Option<PathBuf> {
        self.settings.borrow().pid_file.clone()
    }

    fn connection_spec(&self) -> Option<ListenSpec> {
        if let Some(spec) = self.spec_override.borrow().as_ref() {
            return Some(spec.clone());
        }
        self.settings.borrow().connection_spec.clone()
    }

    fn controller_spec(&self) -> Option<ListenSpec> {
        self.settings.borrow().controller_spec.clone()
    }

    fn reload(&self) -> Result<(), ConfigError> {
        let settings = Self::read_settings(&self.path)?;
        *self.settings.borrow_mut() = settings;
        info!(path = %self.path.display(), "configuration reloaded");
        Ok(())
    }
}

/// Logs a reload failure without touching the previous settings.
pub fn reload_logged(config: &dyn ManagerConfig) {
    if let Err(error) = config.reload() {
        warn!("configuration reload failed, keeping previous settings: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &Path, body: &str) {
        let mut file = std::fs::File::create(dir.join(CONFIG_FILE_NAME)).unwrap();
        file.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn test_load_full_config() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            r#"
connection_spec = "inet:10025@localhost"
controller_spec = "unix:/run/mfo/control.sock"
effective_user = "mfo"
effective_group = "mfo"
daemon = true
privilege_mode = true
pid_file = "/run/mfo/mfod.pid"
"#,
        );
        let config = FileConfig::load(dir.path()).unwrap();
        assert!(config.daemon());
        assert!(config.privilege_mode());
        assert_eq!(config.effective_user().as_deref(), Some("mfo"));
        assert_eq!(
            config.connection_spec(),
            Some(ListenSpec::Inet {
                host: "localhost".to_string(),
                port: 10025
            })
        );
        assert_eq!(config.pid_file(), Some(PathBuf::from("/run/mfo/mfod.pid")));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = FileConfig::load(dir.path()).unwrap();
        assert!(!config.daemon());
        assert!(!config.privilege_mode());
        assert!(config.connection_spec().is_none());
        assert!(config.controller_spec().is_none());
    }

    #[test]
    fn test_reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "daemon = false\n");
        let config = FileConfig::load(dir.path()).unwrap();
        assert!(!config.daemon());

        write_config(dir.path(), "daemon = true\n");
        config.reload().unwrap();
        assert!(config.daemon());
    }

    #[test]
    fn test_reload_failure_keeps_previous_settings() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "privilege_mode = true\n");
        let config = FileConfig::load(dir.path()).unwrap();

        write_config(dir.path(), "privilege_mode = }{ not toml\n");
        assert!(config.reload().is_err());
        assert!(config.privilege_mode());
    }

    #[test]
    fn test_spec_override_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "connection_spec = \"inet:10025\"\n");
        let config = FileConfig::load(dir.path()).unwrap();
        let override_spec: ListenSpec = "unix:/tmp/override.sock".parse().unwrap();
        config.override_connection_spec(override_spec.clone());
        config.reload().unwrap();
        assert_eq!(config.connection_spec(), Some(override_spec));
    }

    #[test]
    fn test_bad_config_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "connection_spec = \"tcp:bogus\"\n");
        assert!(matches!(
            FileConfig::load(dir.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
