//! Portable I/O condition bitset and its epoll translation.
//!
//! Watcher callers speak in terms of [`Condition`]; only this module knows
//! how those bits map onto [`EpollFlags`]. Both translation functions are
//! pure and total: epoll reports errors through several distinct flags
//! (`EPOLLERR`, `EPOLLHUP`, `EPOLLRDHUP`) which all coalesce into the single
//! portable [`Condition::ERROR`] bit, and `ERROR` expands back into the full
//! superset since the portable side cannot tell them apart.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use nix::sys::epoll::EpollFlags;

/// Bitset describing which I/O conditions a watcher is interested in,
/// and which conditions actually fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Condition(u8);

impl Condition {
    /// The descriptor is readable (includes priority data).
    pub const READ: Condition = Condition(0b001);

    /// The descriptor is writable.
    pub const WRITE: Condition = Condition(0b010);

    /// The descriptor is in an error state, hung up, or invalid.
    pub const ERROR: Condition = Condition(0b100);

    /// No conditions.
    pub const fn empty() -> Condition {
        Condition(0)
    }

    /// Returns true if every bit in `other` is set in `self`.
    pub const fn contains(self, other: Condition) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if any bit in `other` is set in `self`.
    pub const fn intersects(self, other: Condition) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns true if no bits are set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Condition {
    type Output = Condition;

    fn bitor(self, rhs: Condition) -> Condition {
        Condition(self.0 | rhs.0)
    }
}

impl BitOrAssign for Condition {
    fn bitor_assign(&mut self, rhs: Condition) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (bit, name) in [
            (Condition::READ, "read"),
            (Condition::WRITE, "write"),
            (Condition::ERROR, "error"),
        ] {
            if self.contains(bit) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("none")?;
        }
        Ok(())
    }
}

/// Expands a portable condition into the epoll interest flags to register.
///
/// `ERROR` expands to the conservative superset of epoll's error-ish flags.
pub(crate) fn epoll_from_condition(condition: Condition) -> EpollFlags {
    let mut flags = EpollFlags::empty();
    if condition.contains(Condition::READ) {
        flags |= EpollFlags::EPOLLIN | EpollFlags::EPOLLPRI;
    }
    if condition.contains(Condition::WRITE) {
        flags |= EpollFlags::EPOLLOUT;
    }
    if condition.contains(Condition::ERROR) {
        flags |= EpollFlags::EPOLLERR | EpollFlags::EPOLLHUP | EpollFlags::EPOLLRDHUP;
    }
    flags
}

/// Coalesces fired epoll flags into a portable condition.
pub(crate) fn condition_from_epoll(flags: EpollFlags) -> Condition {
    let mut condition = Condition::empty();
    if flags.intersects(EpollFlags::EPOLLIN | EpollFlags::EPOLLPRI) {
        condition |= Condition::READ;
    }
    if flags.contains(EpollFlags::EPOLLOUT) {
        condition |= Condition::WRITE;
    }
    if flags.intersects(EpollFlags::EPOLLERR | EpollFlags::EPOLLHUP | EpollFlags::EPOLLRDHUP) {
        condition |= Condition::ERROR;
    }
    condition
}
