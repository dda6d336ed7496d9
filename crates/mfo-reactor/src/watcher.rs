//! Watcher registry: tag-addressed bookkeeping for active subscriptions.
//!
//! The registry owns no I/O. It maps opaque [`WatchTag`]s to watcher slots
//! and hands out monotonically increasing tags that are never recycled
//! within one reactor's lifetime, so a tag removed inside a callback can
//! never collide with a tag issued during that same callback.

use std::collections::HashMap;
use std::fmt;
use std::os::fd::{OwnedFd, RawFd};
use std::time::{Duration, Instant};

use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

use crate::condition::Condition;
use crate::error::ReactorError;
use crate::reactor::Reactor;

/// Opaque handle identifying one registered watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchTag(pub(crate) u64);

impl fmt::Display for WatchTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a watcher callback wants to happen to its registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Keep the watcher armed; the callback will fire again.
    Keep,
    /// Remove the watcher after the callback returns.
    Stop,
}

/// Callback for IO watchers. Receives the fired condition.
pub type IoCallback = Box<dyn FnMut(&mut Reactor, Condition) -> Dispatch>;

/// Callback for child watchers. Fires exactly once with the reaped status.
pub type ChildCallback = Box<dyn FnOnce(&mut Reactor, Pid, WaitStatus)>;

/// Callback for timer and idle watchers.
pub type TickCallback = Box<dyn FnMut(&mut Reactor) -> Dispatch>;

/// Invoked exactly once when a watcher is torn down, after its native
/// handle has been stopped and before its resources are released.
pub type ReleaseNotifier = Box<dyn FnOnce()>;

/// Kind-specific payload of a watcher.
///
/// Callbacks live in an `Option` so the dispatch trampoline can take them
/// out while the user code runs; a vacated slot marks a watcher that is
/// currently mid-dispatch.
pub(crate) enum Payload {
    Io {
        fd: RawFd,
        callback: Option<IoCallback>,
    },
    Child {
        pid: Pid,
        pidfd: OwnedFd,
        callback: Option<ChildCallback>,
    },
    Timer {
        interval: Duration,
        deadline: Instant,
        callback: Option<TickCallback>,
    },
    Idle {
        callback: Option<TickCallback>,
    },
}

pub(crate) struct Watcher {
    pub(crate) payload: Payload,
    pub(crate) release: Option<ReleaseNotifier>,
}

#[derive(Default)]
pub(crate) struct WatcherRegistry {
    entries: HashMap<u64, Watcher>,
    next_tag: u64,
}

impl WatcherRegistry {
    /// Allocates the next tag value unconditionally; tags are never reused.
    pub(crate) fn allocate_tag(&mut self) -> Result<WatchTag, ReactorError> {
        self.next_tag = self
            .next_tag
            .checked_add(1)
            .ok_or(ReactorError::TagOverflow)?;
        Ok(WatchTag(self.next_tag))
    }

    pub(crate) fn insert(&mut self, tag: WatchTag, watcher: Watcher) {
        self.entries.insert(tag.0, watcher);
    }

    pub(crate) fn get_mut(&mut self, tag: WatchTag) -> Option<&mut Watcher> {
        self.entries.get_mut(&tag.0)
    }

    pub(crate) fn contains(&self, tag: WatchTag) -> bool {
        self.entries.contains_key(&tag.0)
    }

    pub(crate) fn remove(&mut self, tag: WatchTag) -> Option<Watcher> {
        self.entries.remove(&tag.0)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn tags(&self) -> Vec<WatchTag> {
        self.entries.keys().copied().map(WatchTag).collect()
    }

    /// Tags of idle watchers, in tag order for deterministic dispatch.
    pub(crate) fn idle_tags(&self) -> Vec<WatchTag> {
        let mut tags: Vec<WatchTag> = self
            .entries
            .iter()
            .filter(|(_, w)| matches!(w.payload, Payload::Idle { .. }))
            .map(|(&tag, _)| WatchTag(tag))
            .collect();
        tags.sort();
        tags
    }

    pub(crate) fn has_idle(&self) -> bool {
        self.entries
            .values()
            .any(|w| matches!(w.payload, Payload::Idle { .. }))
    }

    /// Earliest timer deadline among registered timers, if any.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .values()
            .filter_map(|w| match &w.payload {
                Payload::Timer { deadline, .. } => Some(*deadline),
                _ => None,
            })
            .min()
    }

    /// Timers whose deadline has passed, earliest first.
    pub(crate) fn due_timers(&self, now: Instant) -> Vec<WatchTag> {
        let mut due: Vec<(Instant, WatchTag)> = self
            .entries
            .iter()
            .filter_map(|(&tag, w)| match &w.payload {
                Payload::Timer { deadline, .. } if *deadline <= now => {
                    Some((*deadline, WatchTag(tag)))
                }
                _ => None,
            })
            .collect();
        due.sort();
        due.into_iter().map(|(_, tag)| tag).collect()
    }

    #[cfg(test)]
    pub(crate) fn exhaust_tags(&mut self) {
        self.next_tag = u64::MAX;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_monotonic() {
        let mut registry = WatcherRegistry::default();
        let a = registry.allocate_tag().unwrap();
        let b = registry.allocate_tag().unwrap();
        let c = registry.allocate_tag().unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_tag_overflow_is_an_error() {
        let mut registry = WatcherRegistry::default();
        registry.exhaust_tags();
        assert!(matches!(
            registry.allocate_tag(),
            Err(ReactorError::TagOverflow)
        ));
    }

    #[test]
    fn test_removed_tag_is_not_recycled() {
        let mut registry = WatcherRegistry::default();
        let a = registry.allocate_tag().unwrap();
        registry.insert(
            a,
            Watcher {
                payload: Payload::Idle {
                    callback: Some(Box::new(|_| Dispatch::Keep)),
                },
                release: None,
            },
        );
        registry.remove(a);
        let b = registry.allocate_tag().unwrap();
        assert_ne!(a, b);
        assert!(b > a);
    }
}
