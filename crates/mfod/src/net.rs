//! Listen-spec parsing and the listener/connection wrappers.
//!
//! Specs use the classic milter grammar subset:
//! `unix:/path/to/socket`, `inet:port[@host]`, `inet6:port[@host]`.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// A malformed listen spec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecError {
    #[error("listen spec '{0}' has no protocol prefix (expected unix:, inet: or inet6:)")]
    MissingProtocol(String),

    #[error("listen spec '{0}' uses an unknown protocol")]
    UnknownProtocol(String),

    #[error("listen spec '{0}' has an empty socket path")]
    EmptyPath(String),

    #[error("listen spec '{0}' has an invalid port")]
    InvalidPort(String),
}

/// Where a listener should bind.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum ListenSpec {
    /// Unix domain socket at the given path.
    Unix(PathBuf),
    /// TCP socket; `host` defaults to `localhost`.
    Inet { host: String, port: u16 },
}

impl FromStr for ListenSpec {
    type Err = SpecError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let (protocol, rest) = spec
            .split_once(':')
            .ok_or_else(|| SpecError::MissingProtocol(spec.to_string()))?;
        match protocol {
            "unix" | "local" => {
                if rest.is_empty() {
                    return Err(SpecError::EmptyPath(spec.to_string()));
                }
                Ok(ListenSpec::Unix(PathBuf::from(rest)))
            }
            "inet" | "inet6" => {
                let (port, host) = match rest.split_once('@') {
                    Some((port, host)) => (port, host.to_string()),
                    None => (rest, "localhost".to_string()),
                };
                let port = port
                    .parse()
                    .map_err(|_| SpecError::InvalidPort(spec.to_string()))?;
                Ok(ListenSpec::Inet { host, port })
            }
            _ => Err(SpecError::UnknownProtocol(spec.to_string())),
        }
    }
}

impl TryFrom<String> for ListenSpec {
    type Error = SpecError;

    fn try_from(spec: String) -> Result<Self, Self::Error> {
        spec.parse()
    }
}

impl fmt::Display for ListenSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenSpec::Unix(path) => write!(f, "unix:{}", path.display()),
            ListenSpec::Inet { host, port } => write!(f, "inet:{port}@{host}"),
        }
    }
}

/// A bound, non-blocking listening socket.
pub enum Listener {
    Unix(UnixListener),
    Tcp(TcpListener),
}

impl Listener {
    /// Binds a listener for the spec and marks it non-blocking.
    ///
    /// A stale Unix socket file left by a previous run is removed first.
    pub fn bind(spec: &ListenSpec) -> io::Result<Listener> {
        let listener = match spec {
            ListenSpec::Unix(path) => {
                if path.exists() {
                    debug!(path = %path.display(), "removing stale socket file");
                    std::fs::remove_file(path)?;
                }
                let listener = UnixListener::bind(path)?;
                listener.set_nonblocking(true)?;
                Listener::Unix(listener)
            }
            ListenSpec::Inet { host, port } => {
                let listener = TcpListener::bind((host.as_str(), *port))?;
                listener.set_nonblocking(true)?;
                Listener::Tcp(listener)
            }
        };
        Ok(listener)
    }

    /// Accepts one pending connection, already marked non-blocking.
    pub fn accept(&self) -> io::Result<Connection> {
        match self {
            Listener::Unix(listener) => {
                let (stream, _) = listener.accept()?;
                stream.set_nonblocking(true)?;
                Ok(Connection::Unix(stream))
            }
            Listener::Tcp(listener) => {
                let (stream, addr) = listener.accept()?;
                stream.set_nonblocking(true)?;
                Ok(Connection::Tcp { stream, peer: addr })
            }
        }
    }
}

impl AsFd for Listener {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            Listener::Unix(listener) => listener.as_fd(),
            Listener::Tcp(listener) => listener.as_fd(),
        }
    }
}

/// One accepted byte-stream connection, handed to the relay.
pub enum Connection {
    Unix(UnixStream),
    Tcp {
        stream: TcpStream,
        peer: std::net::SocketAddr,
    },
}

impl Connection {
    /// Short peer description for logging.
    pub fn peer(&self) -> String {
        match self {
            Connection::Unix(_) => "unix".to_string(),
            Connection::Tcp { peer, .. } => peer.to_string(),
        }
    }
}

impl AsFd for Connection {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            Connection::Unix(stream) => stream.as_fd(),
            Connection::Tcp { stream, .. } => stream.as_fd(),
        }
    }
}

impl io::Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Connection::Unix(stream) => stream.read(buf),
            Connection::Tcp { stream, .. } => stream.read(buf),
        }
    }
}

impl io::Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Connection::Unix(stream) => stream.write(buf),
            Connection::Tcp { stream, .. } => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Connection::Unix(stream) => stream.flush(),
            Connection::Tcp { stream, .. } => stream.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unix_spec() {
        let spec: ListenSpec = "unix:/run/mfo/mfod.sock".parse().unwrap();
        assert_eq!(spec, ListenSpec::Unix(PathBuf::from("/run/mfo/mfod.sock")));
    }

    #[test]
    fn test_parse_inet_spec_with_and_without_host() {
        let spec: ListenSpec = "inet:10025@0.0.0.0".parse().unwrap();
        assert_eq!(
            spec,
            ListenSpec::Inet {
                host: "0.0.0.0".to_string(),
                port: 10025
            }
        );

        let spec: ListenSpec = "inet:10025".parse().unwrap();
        assert_eq!(
            spec,
            ListenSpec::Inet {
                host: "localhost".to_string(),
                port: 10025
            }
        );
    }

    #[test]
    fn test_parse_rejects_bad_specs() {
        assert!(matches!(
            "10025".parse::<ListenSpec>(),
            Err(SpecError::MissingProtocol(_))
        ));
        assert!(matches!(
            "tcp:10025".parse::<ListenSpec>(),
            Err(SpecError::UnknownProtocol(_))
        ));
        assert!(matches!(
            "unix:".parse::<ListenSpec>(),
            Err(SpecError::EmptyPath(_))
        ));
        assert!(matches!(
            "inet:notaport".parse::<ListenSpec>(),
            Err(SpecError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_display_round_trip() {
        for text in ["unix:/tmp/x.sock", "inet:10025@localhost"] {
            let spec: ListenSpec = text.parse().unwrap();
            assert_eq!(spec.to_string(), text);
        }
    }

    #[test]
    fn test_bind_unix_removes_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mfod.sock");
        let spec = ListenSpec::Unix(path.clone());

        {
            let _first = Listener::bind(&spec).unwrap();
        }
        // socket file left behind; a rebind must succeed anyway
        assert!(path.exists());
        let _second = Listener::bind(&spec).unwrap();
    }
}
