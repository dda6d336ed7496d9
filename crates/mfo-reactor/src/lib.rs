//! mfo-reactor - Single-threaded event reactor for the mfo daemon
//!
//! This crate provides the scheduling core everything else in mfo runs on:
//! - `reactor` - the epoll-backed event loop and its watcher operations
//! - `watcher` - tag-addressed registry of active subscriptions
//! - `condition` - portable I/O condition bitset and its epoll translation
//!
//! All watcher callbacks run strictly serialized on the thread driving the
//! loop; the only true concurrency in an mfo deployment is at the OS
//! process level. Callbacks receive `&mut Reactor` so they can re-enter
//! the registry (register, cancel, quit) without interior-mutability
//! gymnastics, and removing a watcher from inside its own callback is
//! safe by construction.
//!
//! # Panic-Free Guarantees
//!
//! Production code in this crate returns `Result` for every fallible
//! operation; cancelling an unknown tag is a `false` no-op, never a crash.

pub mod condition;
pub mod error;
pub mod reactor;
pub mod watcher;

// Re-exports for convenience
pub use condition::Condition;
pub use error::ReactorError;
pub use reactor::{Reactor, SharedReactor};
pub use watcher::{Dispatch, ReleaseNotifier, WatchTag};
