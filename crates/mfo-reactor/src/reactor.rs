//! The event reactor: a single-threaded scheduler multiplexing socket I/O,
//! child-process exit, timers and idle work over one epoll instance.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Reactor                           │
//! │  ┌──────────┐  ┌──────────────────┐  ┌───────────────┐   │
//! │  │  Epoll   │  │ WatcherRegistry  │  │ quit flag +   │   │
//! │  │ (native) │  │  tag -> watcher  │  │ dispatch count│   │
//! │  └──────────┘  └──────────────────┘  └───────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! IO watchers register their descriptor with epoll directly. Child
//! watchers obtain a pollable `pidfd` so process exit is just another
//! readable descriptor. Timer deadlines fold into the poll timeout, and
//! idle watchers force a zero timeout and run on passes that dispatched
//! nothing else.
//!
//! # Dispatch discipline
//!
//! Every callback runs to completion on the thread driving [`Reactor::run`]
//! or [`Reactor::iterate`]; no two callbacks ever overlap. Callbacks
//! receive `&mut Reactor` and may freely register or cancel watchers,
//! including their own: the trampoline captures the tag before invoking
//! user code and re-checks the registry afterwards, so a self-removal
//! mid-callback cannot corrupt the pass that is driving it.
//!
//! # Teardown ordering
//!
//! Removing a watcher always (1) stops its native registration, then
//! (2) fires its release notifier, then (3) drops its payload. Callbacks
//! may re-enter the registry at step (2) without observing a half-dead
//! watcher.

use std::cell::RefCell;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::rc::Rc;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{error, trace, warn};

use crate::condition::{condition_from_epoll, epoll_from_condition, Condition};
use crate::error::ReactorError;
use crate::watcher::{
    Dispatch, Payload, ReleaseNotifier, WatchTag, Watcher, WatcherRegistry,
};

/// How many fired events one poll pass collects at most. Excess events are
/// picked up by the next pass; epoll queues them.
const EVENT_BATCH: usize = 64;

/// Shared-ownership handle to a reactor.
///
/// Replaces an ambient process-wide singleton: the handle is constructed
/// once at startup (see [`Reactor::shared`]) and threaded through to every
/// component that needs the loop. Tests construct independent instances
/// with [`Reactor::new`].
pub type SharedReactor = Rc<RefCell<Reactor>>;

/// Single-threaded event reactor.
pub struct Reactor {
    epoll: Epoll,
    registry: WatcherRegistry,
    /// Callbacks invoked during the current `iterate` pass.
    dispatched: usize,
    quit_requested: bool,
    /// Reused between passes to avoid a per-pass allocation.
    event_buf: Vec<EpollEvent>,
}

impl Reactor {
    /// Creates an independent, exclusively-owned reactor.
    pub fn new() -> Result<Reactor, ReactorError> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(ReactorError::Create)?;
        Ok(Reactor {
            epoll,
            registry: WatcherRegistry::default(),
            dispatched: 0,
            quit_requested: false,
            event_buf: vec![EpollEvent::empty(); EVENT_BATCH],
        })
    }

    /// Creates a reactor wrapped in a shared-ownership handle.
    pub fn shared() -> Result<SharedReactor, ReactorError> {
        Ok(Rc::new(RefCell::new(Reactor::new()?)))
    }

    /// Blocks dispatching events until [`Reactor::quit`] is called from a
    /// callback, or until no watchers remain.
    pub fn run(&mut self) {
        self.quit_requested = false;
        while !self.quit_requested && !self.registry.is_empty() {
            self.iterate(true);
        }
        self.quit_requested = false;
    }

    /// Runs exactly one poll cycle.
    ///
    /// Resets the dispatched-events counter, polls (blocking or not per
    /// `may_block`), dispatches whatever fired, and returns whether at
    /// least one callback ran. Lets embedding code interleave the reactor
    /// with other work instead of ceding control through [`Reactor::run`].
    pub fn iterate(&mut self, may_block: bool) -> bool {
        self.dispatched = 0;
        self.poll_once(may_block);
        self.dispatched > 0
    }

    /// Requests the innermost [`Reactor::run`] to return once the current
    /// dispatch pass completes. Idempotent; a no-op outside `run`.
    pub fn quit(&mut self) {
        self.quit_requested = true;
    }

    /// Watches a file descriptor for the given conditions.
    ///
    /// The caller keeps ownership of the descriptor and must keep it open
    /// while the watcher is registered. The callback receives the fired
    /// condition and decides whether to keep watching; on
    /// [`Dispatch::Stop`] the watcher removes itself after the callback
    /// returns. One watcher per descriptor per reactor.
    pub fn watch_io<F>(
        &mut self,
        fd: BorrowedFd<'_>,
        interest: Condition,
        callback: F,
        release: Option<ReleaseNotifier>,
    ) -> Result<WatchTag, ReactorError>
    where
        F: FnMut(&mut Reactor, Condition) -> Dispatch + 'static,
    {
        let raw = fd.as_raw_fd();
        let tag = self.registry.allocate_tag()?;
        self.epoll
            .add(fd, EpollEvent::new(epoll_from_condition(interest), tag.0))
            .map_err(|source| ReactorError::RegisterIo { fd: raw, source })?;
        self.registry.insert(
            tag,
            Watcher {
                payload: Payload::Io {
                    fd: raw,
                    callback: Some(Box::new(callback)),
                },
                release,
            },
        );
        trace!(%tag, fd = raw, "registered io watcher");
        Ok(tag)
    }

    /// Watches a child process; fires exactly once when it exits,
    /// delivering the reaped [`WaitStatus`], then removes itself.
    pub fn watch_child<F>(
        &mut self,
        pid: Pid,
        callback: F,
        release: Option<ReleaseNotifier>,
    ) -> Result<WatchTag, ReactorError>
    where
        F: FnOnce(&mut Reactor, Pid, WaitStatus) + 'static,
    {
        // SAFETY: pidfd_open returns a fresh descriptor on success and we
        // adopt it immediately; nothing else knows about it.
        let raw = unsafe { libc::syscall(libc::SYS_pidfd_open, pid.as_raw(), 0) };
        if raw < 0 {
            return Err(ReactorError::WatchChild {
                pid,
                source: Errno::last(),
            });
        }
        // SAFETY: `raw` is a valid descriptor returned by pidfd_open above.
        let pidfd = unsafe { OwnedFd::from_raw_fd(raw as RawFd) };
        let tag = self.registry.allocate_tag()?;
        self.epoll
            .add(&pidfd, EpollEvent::new(EpollFlags::EPOLLIN, tag.0))
            .map_err(|source| ReactorError::WatchChild { pid, source })?;
        self.registry.insert(
            tag,
            Watcher {
                payload: Payload::Child {
                    pid,
                    pidfd,
                    callback: Some(Box::new(callback)),
                },
                release,
            },
        );
        trace!(%tag, %pid, "registered child watcher");
        Ok(tag)
    }

    /// Schedules a periodic timer. The first fire happens after one full
    /// `interval` has elapsed, not immediately; the timer re-arms while
    /// the callback returns [`Dispatch::Keep`].
    pub fn watch_timer<F>(
        &mut self,
        interval: Duration,
        callback: F,
        release: Option<ReleaseNotifier>,
    ) -> Result<WatchTag, ReactorError>
    where
        F: FnMut(&mut Reactor) -> Dispatch + 'static,
    {
        let deadline = Instant::now()
            .checked_add(interval)
            .ok_or(ReactorError::IntervalOverflow)?;
        let tag = self.registry.allocate_tag()?;
        self.registry.insert(
            tag,
            Watcher {
                payload: Payload::Timer {
                    interval,
                    deadline,
                    callback: Some(Box::new(callback)),
                },
                release,
            },
        );
        Ok(tag)
    }

    /// Schedules an idle watcher: fires once per otherwise-idle loop
    /// iteration until the callback returns [`Dispatch::Stop`].
    pub fn watch_idle<F>(
        &mut self,
        callback: F,
        release: Option<ReleaseNotifier>,
    ) -> Result<WatchTag, ReactorError>
    where
        F: FnMut(&mut Reactor) -> Dispatch + 'static,
    {
        let tag = self.registry.allocate_tag()?;
        self.registry.insert(
            tag,
            Watcher {
                payload: Payload::Idle {
                    callback: Some(Box::new(callback)),
                },
                release,
            },
        );
        Ok(tag)
    }

    /// Removes a watcher by tag. Returns `false` if the tag is unknown,
    /// which is a harmless no-op rather than an error: a callback
    /// self-removing by returning [`Dispatch::Stop`] may race an external
    /// `cancel` and both must stay safe.
    pub fn cancel(&mut self, tag: WatchTag) -> bool {
        self.remove_watcher(tag)
    }

    /// Whether a tag currently names a live watcher.
    pub fn is_registered(&self, tag: WatchTag) -> bool {
        self.registry.contains(tag)
    }

    fn poll_once(&mut self, may_block: bool) {
        if self.registry.is_empty() {
            return;
        }

        let timeout = self.poll_timeout(may_block);
        let mut events = std::mem::take(&mut self.event_buf);
        events.clear();
        events.resize(EVENT_BATCH, EpollEvent::empty());

        let fired = match self.epoll.wait(&mut events, timeout) {
            Ok(n) => n,
            Err(Errno::EINTR) => 0,
            Err(errno) => {
                error!("event loop poll failed: {errno}");
                0
            }
        };

        for event in events.iter().take(fired) {
            let tag = WatchTag(event.data());
            let condition = condition_from_epoll(event.events());
            self.dispatch_ready(tag, condition);
        }
        self.event_buf = events;

        let now = Instant::now();
        for tag in self.registry.due_timers(now) {
            self.dispatch_timer(tag);
        }

        if self.dispatched == 0 {
            for tag in self.registry.idle_tags() {
                self.dispatch_idle(tag);
            }
        }
    }

    /// Picks the poll timeout: zero when the caller cannot block or idle
    /// work is pending, the nearest timer deadline otherwise, infinite
    /// when nothing bounds the wait.
    fn poll_timeout(&self, may_block: bool) -> EpollTimeout {
        if !may_block || self.registry.has_idle() {
            return EpollTimeout::from(0u16);
        }
        match self.registry.next_deadline() {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                // round up so timers never fire early; the epoll clamp only
                // causes a harmless spurious wakeup for very long timers
                let millis = remaining
                    .as_micros()
                    .saturating_add(999)
                    .checked_div(1000)
                    .unwrap_or(0)
                    .min(u128::from(u16::MAX)) as u16;
                EpollTimeout::from(millis)
            }
            None => EpollTimeout::NONE,
        }
    }

    fn dispatch_ready(&mut self, tag: WatchTag, condition: Condition) {
        // an earlier callback in this pass may have removed the watcher
        let is_child = match self.registry.get_mut(tag) {
            Some(watcher) => match &watcher.payload {
                Payload::Io { .. } => false,
                Payload::Child { .. } => true,
                _ => return,
            },
            None => {
                trace!(%tag, "event for removed watcher, skipping");
                return;
            }
        };
        if is_child {
            self.dispatch_child(tag);
        } else {
            self.dispatch_io(tag, condition);
        }
    }

    fn dispatch_io(&mut self, tag: WatchTag, condition: Condition) {
        let mut callback = match self.registry.get_mut(tag) {
            Some(Watcher {
                payload: Payload::Io { callback, .. },
                ..
            }) => match callback.take() {
                Some(callback) => callback,
                None => return,
            },
            _ => return,
        };

        self.dispatched += 1;
        let dispatch = callback(self, condition);

        // the callback may have cancelled this tag (or any other)
        let still_live = match self.registry.get_mut(tag) {
            Some(Watcher {
                payload: Payload::Io { callback: slot, .. },
                ..
            }) => {
                if dispatch == Dispatch::Keep {
                    *slot = Some(callback);
                }
                true
            }
            _ => false,
        };
        if still_live && dispatch == Dispatch::Stop {
            self.remove_watcher(tag);
        }
    }

    fn dispatch_child(&mut self, tag: WatchTag) {
        let (pid, callback) = match self.registry.get_mut(tag) {
            Some(Watcher {
                payload: Payload::Child { pid, callback, .. },
                ..
            }) => match callback.take() {
                Some(callback) => (*pid, callback),
                None => return,
            },
            _ => return,
        };

        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {
                // spurious wakeup; re-arm and wait for the real exit
                if let Some(Watcher {
                    payload: Payload::Child { callback: slot, .. },
                    ..
                }) = self.registry.get_mut(tag)
                {
                    *slot = Some(callback);
                }
            }
            Ok(status) => {
                self.dispatched += 1;
                callback(self, pid, status);
                // child watchers are single-shot
                if self.registry.contains(tag) {
                    self.remove_watcher(tag);
                }
            }
            Err(errno) => {
                warn!(%pid, "failed to reap watched child: {errno}");
                if self.registry.contains(tag) {
                    self.remove_watcher(tag);
                }
            }
        }
    }

    fn dispatch_timer(&mut self, tag: WatchTag) {
        let mut callback = match self.registry.get_mut(tag) {
            Some(Watcher {
                payload: Payload::Timer { callback, .. },
                ..
            }) => match callback.take() {
                Some(callback) => callback,
                None => return,
            },
            _ => return,
        };

        self.dispatched += 1;
        let mut dispatch = callback(self);

        let still_live = match self.registry.get_mut(tag) {
            Some(Watcher {
                payload:
                    Payload::Timer {
                        interval,
                        deadline,
                        callback: slot,
                    },
                ..
            }) => {
                if dispatch == Dispatch::Keep {
                    match Instant::now().checked_add(*interval) {
                        Some(next) => {
                            *deadline = next;
                            *slot = Some(callback);
                        }
                        None => dispatch = Dispatch::Stop,
                    }
                }
                true
            }
            _ => false,
        };
        if still_live && dispatch == Dispatch::Stop {
            self.remove_watcher(tag);
        }
    }

    fn dispatch_idle(&mut self, tag: WatchTag) {
        let mut callback = match self.registry.get_mut(tag) {
            Some(Watcher {
                payload: Payload::Idle { callback },
                ..
            }) => match callback.take() {
                Some(callback) => callback,
                None => return,
            },
            _ => return,
        };

        self.dispatched += 1;
        let dispatch = callback(self);

        let still_live = match self.registry.get_mut(tag) {
            Some(Watcher {
                payload: Payload::Idle { callback: slot },
                ..
            }) => {
                if dispatch == Dispatch::Keep {
                    *slot = Some(callback);
                }
                true
            }
            _ => false,
        };
        if still_live && dispatch == Dispatch::Stop {
            self.remove_watcher(tag);
        }
    }

    /// Tears a watcher down: native handle stopped, release notifier
    /// fired, payload dropped, in that order.
    fn remove_watcher(&mut self, tag: WatchTag) -> bool {
        let mut watcher = match self.registry.remove(tag) {
            Some(watcher) => watcher,
            None => return false,
        };

        match &watcher.payload {
            Payload::Io { fd, .. } => {
                // SAFETY: the registration held this fd; if the caller
                // already closed it the kernel dropped the registration
                // and delete fails with EBADF, which we ignore.
                let borrowed = unsafe { BorrowedFd::borrow_raw(*fd) };
                if let Err(errno) = self.epoll.delete(borrowed) {
                    trace!(%tag, fd, "epoll delete on teardown: {errno}");
                }
            }
            Payload::Child { pidfd, .. } => {
                if let Err(errno) = self.epoll.delete(pidfd) {
                    trace!(%tag, "epoll delete of pidfd on teardown: {errno}");
                }
            }
            Payload::Timer { .. } | Payload::Idle { .. } => {}
        }

        if let Some(notify) = watcher.release.take() {
            notify();
        }

        true
    }

    #[cfg(test)]
    pub(crate) fn exhaust_tags_for_test(&mut self) {
        self.registry.exhaust_tags();
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        // teardown order across unrelated watchers is unspecified
        for tag in self.registry.tags() {
            self.remove_watcher(tag);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io::Write;
    use std::os::fd::AsFd;
    use std::process::Command;

    fn pipe_pair() -> (OwnedFd, OwnedFd) {
        nix::unistd::pipe().expect("pipe")
    }

    fn write_byte(fd: &OwnedFd) {
        let mut file = std::fs::File::from(fd.try_clone().expect("dup"));
        file.write_all(b"x").expect("write");
    }

    #[test]
    fn test_pipe_readable_end_to_end() {
        let mut reactor = Reactor::new().unwrap();
        let (read_end, write_end) = pipe_pair();

        let fired = Rc::new(Cell::new(0u32));
        let seen = Rc::new(Cell::new(Condition::empty()));
        let fired_cb = Rc::clone(&fired);
        let seen_cb = Rc::clone(&seen);
        reactor
            .watch_io(
                read_end.as_fd(),
                Condition::READ,
                move |_, condition| {
                    fired_cb.set(fired_cb.get() + 1);
                    seen_cb.set(condition);
                    Dispatch::Stop
                },
                None,
            )
            .unwrap();

        write_byte(&write_end);
        assert!(reactor.iterate(true));
        assert_eq!(fired.get(), 1);
        assert!(seen.get().contains(Condition::READ));

        // watcher self-removed; nothing left to dispatch
        assert!(!reactor.iterate(false));
    }

    #[test]
    fn test_tags_unique_across_register_cancel() {
        let mut reactor = Reactor::new().unwrap();
        let mut tags = Vec::new();
        for _ in 0..4 {
            let tag = reactor.watch_idle(|_| Dispatch::Keep, None).unwrap();
            tags.push(tag);
            reactor.cancel(tag);
        }
        let tag = reactor.watch_idle(|_| Dispatch::Keep, None).unwrap();
        tags.push(tag);
        let mut deduped = tags.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), tags.len());
    }

    #[test]
    fn test_tag_overflow_reported() {
        let mut reactor = Reactor::new().unwrap();
        reactor.exhaust_tags_for_test();
        assert!(matches!(
            reactor.watch_idle(|_| Dispatch::Keep, None),
            Err(ReactorError::TagOverflow)
        ));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut reactor = Reactor::new().unwrap();
        let tag = reactor.watch_idle(|_| Dispatch::Keep, None).unwrap();
        assert!(reactor.is_registered(tag));
        assert!(reactor.cancel(tag));
        assert!(!reactor.is_registered(tag));
        assert!(!reactor.cancel(tag));
        assert!(!reactor.cancel(WatchTag(0)));
    }

    #[test]
    fn test_release_notifier_fires_exactly_once() {
        let mut reactor = Reactor::new().unwrap();
        let released = Rc::new(Cell::new(0u32));
        let released_cb = Rc::clone(&released);
        let tag = reactor
            .watch_idle(
                |_| Dispatch::Keep,
                Some(Box::new(move || released_cb.set(released_cb.get() + 1))),
            )
            .unwrap();
        assert!(reactor.cancel(tag));
        assert!(!reactor.cancel(tag));
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn test_drop_tears_down_remaining_watchers() {
        let released = Rc::new(Cell::new(0u32));
        {
            let mut reactor = Reactor::new().unwrap();
            for _ in 0..3 {
                let released_cb = Rc::clone(&released);
                reactor
                    .watch_idle(
                        |_| Dispatch::Keep,
                        Some(Box::new(move || released_cb.set(released_cb.get() + 1))),
                    )
                    .unwrap();
            }
        }
        assert_eq!(released.get(), 3);
    }

    #[test]
    fn test_self_removal_during_dispatch_is_safe() {
        let mut reactor = Reactor::new().unwrap();
        let (read_a, write_a) = pipe_pair();
        let (read_b, write_b) = pipe_pair();

        // both watchers are readable in the same pass; whichever runs
        // first stops itself and cancels the other, so the pass must skip
        // the already-removed second watcher instead of revisiting it
        let fired = Rc::new(Cell::new(0u32));
        let other_tag: Rc<Cell<Option<WatchTag>>> = Rc::new(Cell::new(None));

        let fired_a = Rc::clone(&fired);
        let other_for_a = Rc::clone(&other_tag);
        let a_tag = reactor
            .watch_io(
                read_a.as_fd(),
                Condition::READ,
                move |reactor, _| {
                    fired_a.set(fired_a.get() + 1);
                    if let Some(tag) = other_for_a.get() {
                        reactor.cancel(tag);
                    }
                    Dispatch::Stop
                },
                None,
            )
            .unwrap();
        let fired_b = Rc::clone(&fired);
        let a_for_b = a_tag;
        let b_tag = reactor
            .watch_io(
                read_b.as_fd(),
                Condition::READ,
                move |reactor, _| {
                    fired_b.set(fired_b.get() + 1);
                    reactor.cancel(a_for_b);
                    Dispatch::Stop
                },
                None,
            )
            .unwrap();
        other_tag.set(Some(b_tag));

        write_byte(&write_a);
        write_byte(&write_b);
        assert!(reactor.iterate(true));
        // exactly one callback ran; the other watcher was gone by then
        assert_eq!(fired.get(), 1);
        assert!(!reactor.cancel(a_tag));
        assert!(!reactor.cancel(b_tag));
    }

    #[test]
    fn test_timer_does_not_fire_early() {
        let mut reactor = Reactor::new().unwrap();
        let fired = Rc::new(Cell::new(0u32));
        for interval in [Duration::from_secs(1), Duration::from_secs(5)] {
            let fired_cb = Rc::clone(&fired);
            reactor
                .watch_timer(
                    interval,
                    move |_| {
                        fired_cb.set(fired_cb.get() + 1);
                        Dispatch::Keep
                    },
                    None,
                )
                .unwrap();
        }
        for _ in 0..5 {
            assert!(!reactor.iterate(false));
        }
        assert_eq!(fired.get(), 0);
    }

    #[test]
    fn test_timer_fires_at_interval_spacing() {
        let mut reactor = Reactor::new().unwrap();
        let fired = Rc::new(Cell::new(0u32));
        let fired_cb = Rc::clone(&fired);
        reactor
            .watch_timer(
                Duration::from_millis(10),
                move |reactor| {
                    fired_cb.set(fired_cb.get() + 1);
                    if fired_cb.get() == 3 {
                        reactor.quit();
                    }
                    Dispatch::Keep
                },
                None,
            )
            .unwrap();

        let started = Instant::now();
        reactor.run();
        assert_eq!(fired.get(), 3);
        // three fires at 10ms spacing cannot complete in under 30ms
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_quit_returns_from_run_and_keeps_watchers() {
        let mut reactor = Reactor::new().unwrap();
        let tag = reactor
            .watch_timer(
                Duration::from_millis(1),
                |reactor| {
                    reactor.quit();
                    Dispatch::Keep
                },
                None,
            )
            .unwrap();
        reactor.run();
        // quit, not removal, ended the loop
        assert!(reactor.cancel(tag));
    }

    #[test]
    fn test_idle_fires_only_when_idle() {
        let mut reactor = Reactor::new().unwrap();
        let (read_end, write_end) = pipe_pair();

        let idle_fired = Rc::new(Cell::new(0u32));
        let idle_cb = Rc::clone(&idle_fired);
        reactor
            .watch_idle(
                move |_| {
                    idle_cb.set(idle_cb.get() + 1);
                    Dispatch::Keep
                },
                None,
            )
            .unwrap();
        reactor
            .watch_io(read_end.as_fd(), Condition::READ, |_, _| Dispatch::Stop, None)
            .unwrap();

        // io pending: the pass is not idle
        write_byte(&write_end);
        assert!(reactor.iterate(true));
        assert_eq!(idle_fired.get(), 0);

        // nothing pending: idle work runs
        assert!(reactor.iterate(true));
        assert_eq!(idle_fired.get(), 1);
    }

    #[test]
    fn test_idle_self_removes_on_stop() {
        let mut reactor = Reactor::new().unwrap();
        let fired = Rc::new(Cell::new(0u32));
        let fired_cb = Rc::clone(&fired);
        reactor
            .watch_idle(
                move |_| {
                    fired_cb.set(fired_cb.get() + 1);
                    Dispatch::Stop
                },
                None,
            )
            .unwrap();
        assert!(reactor.iterate(true));
        assert!(!reactor.iterate(false));
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_child_watcher_fires_once_with_exit_status() {
        let mut reactor = Reactor::new().unwrap();
        let child = Command::new("/bin/true").spawn().expect("spawn /bin/true");
        let pid = Pid::from_raw(child.id() as i32);

        let observed: Rc<RefCell<Option<(Pid, WaitStatus)>>> = Rc::new(RefCell::new(None));
        let observed_cb = Rc::clone(&observed);
        reactor
            .watch_child(
                pid,
                move |reactor, pid, status| {
                    *observed_cb.borrow_mut() = Some((pid, status));
                    reactor.quit();
                },
                None,
            )
            .unwrap();

        reactor.run();
        match *observed.borrow() {
            Some((reaped, WaitStatus::Exited(_, code))) => {
                assert_eq!(reaped, pid);
                assert_eq!(code, 0);
            }
            ref other => panic!("unexpected child status: {other:?}"),
        }
        // single-shot: the watcher removed itself
        assert!(!reactor.iterate(false));
    }

    #[test]
    fn test_watch_io_rejects_duplicate_fd() {
        let mut reactor = Reactor::new().unwrap();
        let (read_end, _write_end) = pipe_pair();
        reactor
            .watch_io(read_end.as_fd(), Condition::READ, |_, _| Dispatch::Keep, None)
            .unwrap();
        assert!(matches!(
            reactor.watch_io(read_end.as_fd(), Condition::READ, |_, _| Dispatch::Keep, None),
            Err(ReactorError::RegisterIo { .. })
        ));
    }
}
