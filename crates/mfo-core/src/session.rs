//! The per-connection session contract between the daemon core and the
//! relay that actually interprets mail-transaction commands.
//!
//! The daemon core never parses the mail-filter wire protocol; it only
//! schedules a session's I/O and invokes these entry points. Events that
//! carry a decision return a [`FilterVerdict`]; purely informational
//! events (macro definitions, MTA-side timeouts) return nothing.

use std::net::SocketAddr;

use crate::verdict::FilterVerdict;

/// Protocol stage a macro-definition batch applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroStage {
    Connect,
    Helo,
    EnvelopeFrom,
    EnvelopeRecipient,
    Data,
    EndOfHeader,
    EndOfMessage,
}

/// One live mail transaction as seen from the daemon core.
///
/// Every entry point has a pass-through default so a session only
/// implements the events it cares about, the way milter callbacks are
/// optional.
pub trait FilterSession {
    /// The MTA reported the client connection.
    fn connect(&mut self, _host_name: &str, _address: Option<SocketAddr>) -> FilterVerdict {
        FilterVerdict::Continue
    }

    /// HELO/EHLO was received.
    fn helo(&mut self, _fqdn: &str) -> FilterVerdict {
        FilterVerdict::Continue
    }

    /// Envelope sender.
    fn envelope_from(&mut self, _from: &str) -> FilterVerdict {
        FilterVerdict::Continue
    }

    /// One envelope recipient; fires once per recipient.
    fn envelope_recipient(&mut self, _recipient: &str) -> FilterVerdict {
        FilterVerdict::Continue
    }

    /// DATA phase begins.
    fn data(&mut self) -> FilterVerdict {
        FilterVerdict::Continue
    }

    /// One message header.
    fn header(&mut self, _name: &str, _value: &str) -> FilterVerdict {
        FilterVerdict::Continue
    }

    /// All headers have been delivered.
    fn end_of_header(&mut self) -> FilterVerdict {
        FilterVerdict::Continue
    }

    /// One chunk of message body.
    fn body(&mut self, _chunk: &[u8]) -> FilterVerdict {
        FilterVerdict::Continue
    }

    /// The message is complete; the final verdict for this message.
    fn end_of_message(&mut self) -> FilterVerdict {
        FilterVerdict::Continue
    }

    /// The MTA aborted the current message mid-transaction.
    fn abort(&mut self) -> FilterVerdict {
        FilterVerdict::Continue
    }

    /// The MTA is closing the connection.
    fn quit(&mut self) -> FilterVerdict {
        FilterVerdict::Continue
    }

    /// A command this session does not recognize.
    fn unknown(&mut self, _command: &[u8]) -> FilterVerdict {
        FilterVerdict::Continue
    }

    /// Macro definitions for the given stage. Informational.
    fn define_macros(&mut self, _stage: MacroStage, _macros: &[(String, String)]) {}

    /// The MTA-side timeout elapsed. Informational.
    fn timeout(&mut self) {}
}
