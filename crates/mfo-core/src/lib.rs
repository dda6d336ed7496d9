//! mfo-core - Shared domain types for the mfo daemon
//!
//! This crate provides the types shared between the daemon and relay
//! implementations:
//! - `verdict` - the closed set of filter verdict codes
//! - `session` - the per-connection session contract the core schedules
//!   but does not implement

pub mod session;
pub mod verdict;

// Re-exports for convenience
pub use session::{FilterSession, MacroStage};
pub use verdict::FilterVerdict;
