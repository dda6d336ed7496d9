//! Filter verdict codes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Verdict returned by a relay for one mail-transaction event.
///
/// This is the closed set the daemon core understands; how verdicts from
/// multiple filters are merged into one is relay policy and out of scope
/// here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterVerdict {
    /// Keep processing the transaction with the next event.
    Continue,
    /// Accept the message outright; no further filtering.
    Accept,
    /// Reject the message permanently.
    Reject,
    /// Silently discard the message.
    Discard,
    /// Fail the message temporarily; the MTA may retry.
    TempFail,
    /// This filter waives the event; defer to the next filter.
    Skip,
}

impl FilterVerdict {
    /// Whether this verdict ends the transaction early.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FilterVerdict::Accept
                | FilterVerdict::Reject
                | FilterVerdict::Discard
                | FilterVerdict::TempFail
        )
    }
}

impl fmt::Display for FilterVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterVerdict::Continue => "continue",
            FilterVerdict::Accept => "accept",
            FilterVerdict::Reject => "reject",
            FilterVerdict::Discard => "discard",
            FilterVerdict::TempFail => "temp-fail",
            FilterVerdict::Skip => "skip",
        };
        f.write_str(name)
    }
}
