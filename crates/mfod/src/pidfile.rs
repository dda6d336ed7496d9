//! PID-file management.
//!
//! Format is the decimal process id followed by a newline. Writing and
//! removing are best-effort for the daemon (failures are logged, never
//! fatal); reading serves the `stop`/`status` subcommands.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

/// Writes the current process id to `path`.
pub fn write(path: &Path) -> io::Result<()> {
    fs::write(path, format!("{}\n", process::id()))
}

/// Removes the PID file.
pub fn remove(path: &Path) -> io::Result<()> {
    fs::remove_file(path)
}

/// Reads the PID recorded at `path`, if the file exists and parses.
pub fn read(path: &Path) -> Option<u32> {
    let contents = fs::read_to_string(path).ok()?;
    contents.trim().parse().ok()
}

/// Checks whether a process with the given PID is running.
pub fn is_process_running(pid: u32) -> bool {
    // /proc/{pid} existence; this daemon is Linux-only anyway
    PathBuf::from(format!("/proc/{pid}")).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mfod.pid");

        write(&path).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written, format!("{}\n", process::id()));
        assert_eq!(read(&path), Some(process::id()));

        remove(&path).unwrap();
        assert!(read(&path).is_none());
        assert!(remove(&path).is_err());
    }

    #[test]
    fn test_garbage_pid_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mfod.pid");
        fs::write(&path, "not-a-pid\n").unwrap();
        assert_eq!(read(&path), None);
    }

    #[test]
    fn test_own_process_is_running() {
        assert!(is_process_running(process::id()));
    }
}
