//! Message types exchanged over the launcher pipe pair.
//!
//! The manager writes [`LaunchRequest`]s down the command pipe; the
//! launcher answers every request with exactly one [`LaunchReply`] on the
//! reply pipe, in request order. No memory is shared between the two
//! processes, so the pipe's own ordering guarantee is the only
//! synchronization.

use serde::{Deserialize, Serialize};

/// Request to spawn one filter process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchRequest {
    /// Shell command line starting the filter.
    pub command_line: String,

    /// Account to run the filter as; honored only while the launcher
    /// still holds its elevated privileges.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user: Option<String>,
}

impl LaunchRequest {
    /// Creates a request running `command_line` as the launcher's own user.
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
            user: None,
        }
    }

    /// Creates a request running `command_line` as `user`.
    pub fn as_user(command_line: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
            user: Some(user.into()),
        }
    }
}

/// Outcome of one [`LaunchRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LaunchReply {
    /// The filter process was started.
    Launched {
        /// Process id of the spawned filter.
        pid: u32,
    },

    /// The launch failed; the manager decides whether to retry or reject.
    Failed {
        /// Human-readable failure description.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_without_empty_user() {
        let json = serde_json::to_string(&LaunchRequest::new("/usr/bin/spamd")).unwrap();
        assert!(!json.contains("user"));

        let json =
            serde_json::to_string(&LaunchRequest::as_user("/usr/bin/spamd", "filter")).unwrap();
        assert!(json.contains("\"user\":\"filter\""));
    }

    #[test]
    fn test_reply_tag_round_trip() {
        let reply: LaunchReply =
            serde_json::from_str("{\"type\":\"launched\",\"pid\":42}").unwrap();
        assert_eq!(reply, LaunchReply::Launched { pid: 42 });

        let reply: LaunchReply =
            serde_json::from_str("{\"type\":\"failed\",\"message\":\"no such user\"}").unwrap();
        assert_eq!(
            reply,
            LaunchReply::Failed {
                message: "no such user".into()
            }
        );
    }
}
