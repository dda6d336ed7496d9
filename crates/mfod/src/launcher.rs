//! Privilege-separated process launcher.
//!
//! The launcher is forked before the manager drops its elevated
//! privileges and keeps them, so the unprivileged manager can still have
//! filter processes spawned on its behalf. The two processes share
//! nothing but a pipe pair: a command pipe (manager -> launcher) and a
//! reply pipe (launcher -> manager), each endpoint closing the ends it
//! does not use at fork time, exactly once.
//!
//! Every [`LaunchRequest`] is answered by exactly one [`LaunchReply`] in
//! request order; the manager side keeps a FIFO of reply callbacks and
//! completes them as frames arrive through its reactor watcher. The
//! launcher side drives its own fresh reactor so it can keep reaping the
//! filter processes it spawned while waiting for the next command.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::rc::Rc;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::unistd::{fork, ForkResult, Pid, Uid, User};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use mfo_protocol::{encode_frame, FrameDecoder, LaunchReply, LaunchRequest, ProtocolError};
use mfo_reactor::{Condition, Dispatch, Reactor, ReactorError, WatchTag};

/// Launcher startup and submission errors.
///
/// Pipe-creation failures are startup-fatal when privilege separation is
/// requested; a fork failure is not - the manager continues degraded.
#[derive(Error, Debug)]
pub enum LauncherError {
    #[error("failed to create pipe for launcher command: {0}")]
    CommandPipe(#[source] Errno),

    #[error("failed to create pipe for launcher reply: {0}")]
    ReplyPipe(#[source] Errno),

    #[error("launcher event loop failure: {0}")]
    Reactor(#[from] ReactorError),

    #[error("failed to encode launch request: {0}")]
    Encode(#[from] ProtocolError),

    #[error("failed to send launch request: {0}")]
    Send(#[source] io::Error),

    #[error("launcher channel is closed; running without filter-spawning privilege")]
    Unavailable,
}

/// Completion callback for one launch request.
pub type ReplyCallback = Box<dyn FnOnce(&mut Reactor, LaunchReply)>;

/// Forks the launcher process and returns the manager-side channel.
///
/// Returns `Ok(None)` when the fork itself fails: the manager keeps
/// running in a degraded mode without filter-spawning privilege and the
/// relay decides whether to reject or tolerate that. Pipe-creation
/// failures are reported as errors and no fork is attempted, so a
/// privileged process without a communication channel can never be left
/// behind.
pub fn start(reactor: &mut Reactor) -> Result<Option<LauncherHandle>, LauncherError> {
    let (command_read, command_write) =
        nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(LauncherError::CommandPipe)?;
    let (reply_read, reply_write) = match nix::unistd::pipe2(OFlag::O_CLOEXEC) {
        Ok(pair) => pair,
        // command pipe ends close on drop
        Err(errno) => return Err(LauncherError::ReplyPipe(errno)),
    };

    // SAFETY: startup is single-threaded; the child adopts its pipe ends
    // and never returns from run_launcher.
    match unsafe { fork() } {
        Err(errno) => {
            warn!("failed to fork process launcher process: {errno}");
            Ok(None)
        }
        Ok(ForkResult::Child) => {
            drop(command_write);
            drop(reply_read);
            run_launcher(command_read, reply_write)
        }
        Ok(ForkResult::Parent { child }) => {
            drop(command_read);
            drop(reply_write);
            info!(launcher = %child, "process launcher started");
            let handle = LauncherHandle::register(reactor, command_write, reply_read)?;
            Ok(Some(handle))
        }
    }
}

fn set_nonblocking(fd: &OwnedFd) -> Result<(), Errno> {
    // SAFETY: plain fcntl flag manipulation on a descriptor we own.
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
    if flags < 0 {
        return Err(Errno::last());
    }
    let rc = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(Errno::last());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Launcher-process role
// ---------------------------------------------------------------------------

fn run_launcher(command_read: OwnedFd, reply_write: OwnedFd) -> ! {
    match launcher_loop(command_read, reply_write) {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            error!("process launcher failed: {error}");
            std::process::exit(1);
        }
    }
}

/// The launcher's request/reply loop, driven by its own reactor so child
/// reaping keeps working while waiting for commands. Returns when the
/// command pipe reaches end-of-stream.
fn launcher_loop(command_read: OwnedFd, reply_write: OwnedFd) -> Result<(), LauncherError> {
    let mut reactor = Reactor::new()?;

    set_nonblocking(&command_read).map_err(LauncherError::CommandPipe)?;
    let mut command_file = File::from(command_read);
    let command_fd = command_file.as_raw_fd();
    let mut reply_file = File::from(reply_write);
    let mut decoder = FrameDecoder::new();

    // SAFETY: the watcher closure owns command_file, so the descriptor
    // outlives its registration.
    let borrowed = unsafe { BorrowedFd::borrow_raw(command_fd) };
    reactor.watch_io(
        borrowed,
        Condition::READ,
        move |reactor, condition| {
            let mut buf = [0u8; 4096];
            loop {
                match command_file.read(&mut buf) {
                    Ok(0) => {
                        debug!("command pipe closed, launcher shutting down");
                        reactor.quit();
                        return Dispatch::Stop;
                    }
                    Ok(n) => {
                        decoder.feed(&buf[..n]);
                        loop {
                            match decoder.next_message::<LaunchRequest>() {
                                Ok(Some(request)) => {
                                    handle_request(reactor, &request, &mut reply_file);
                                }
                                Ok(None) => break,
                                Err(error) => {
                                    error!("command stream desynced: {error}");
                                    reactor.quit();
                                    return Dispatch::Stop;
                                }
                            }
                        }
                    }
                    Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                    Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                    Err(error) => {
                        error!("command pipe read failed: {error}");
                        reactor.quit();
                        return Dispatch::Stop;
                    }
                }
            }
            if condition.contains(Condition::ERROR) && !condition.contains(Condition::READ) {
                reactor.quit();
                return Dispatch::Stop;
            }
            Dispatch::Keep
        },
        None,
    )?;

    reactor.run();
    Ok(())
}

/// Spawns one filter, replies with the outcome, and watches the child so
/// its exit is reaped and logged.
fn handle_request(reactor: &mut Reactor, request: &LaunchRequest, reply_file: &mut File) {
    let reply = match spawn_filter(request) {
        Ok(pid) => {
            let watched = Pid::from_raw(pid as i32);
            if let Err(error) = reactor.watch_child(
                watched,
                |_, pid, status| info!(%pid, ?status, "filter process exited"),
                None,
            ) {
                warn!(pid, "failed to watch spawned filter: {error}");
            }
            LaunchReply::Launched { pid }
        }
        Err(message) => {
            warn!(command_line = %request.command_line, "launch failed: {message}");
            LaunchReply::Failed { message }
        }
    };

    match encode_frame(&reply) {
        Ok(frame) => {
            if let Err(error) = reply_file.write_all(&frame) {
                error!("failed to write launch reply: {error}");
            }
        }
        Err(error) => error!("failed to encode launch reply: {error}"),
    }
}

fn spawn_filter(request: &LaunchRequest) -> Result<u32, String> {
    let mut command = Command::new("/bin/sh");
    command.arg("-c").arg(&request.command_line);

    if let Some(user) = &request.user {
        if Uid::effective().is_root() {
            match User::from_name(user) {
                Ok(Some(entry)) => {
                    command.uid(entry.uid.as_raw());
                    command.gid(entry.gid.as_raw());
                }
                Ok(None) => return Err(format!("no such user: {user}")),
                Err(errno) => return Err(format!("failed to look up user {user}: {errno}")),
            }
        } else {
            debug!(%user, "not privileged, spawning filter as current user");
        }
    }

    match command.spawn() {
        Ok(child) => {
            debug!(pid = child.id(), command_line = %request.command_line, "filter spawned");
            Ok(child.id())
        }
        Err(error) => Err(format!("failed to spawn '{}': {error}", request.command_line)),
    }
}

// ---------------------------------------------------------------------------
// Manager-process role
// ---------------------------------------------------------------------------

struct LauncherInner {
    /// Command pipe; writes stay blocking, requests are small.
    writer: File,
    /// Reply callbacks in submission order.
    pending: VecDeque<ReplyCallback>,
    alive: bool,
}

/// Manager-side handle to the launcher process.
#[derive(Clone)]
pub struct LauncherHandle {
    inner: Rc<RefCell<LauncherInner>>,
    tag: WatchTag,
}

impl LauncherHandle {
    /// Wraps the manager's pipe ends and registers the reply watcher.
    pub(crate) fn register(
        reactor: &mut Reactor,
        command_write: OwnedFd,
        reply_read: OwnedFd,
    ) -> Result<LauncherHandle, LauncherError> {
        set_nonblocking(&reply_read).map_err(LauncherError::ReplyPipe)?;
        let mut reply_file = File::from(reply_read);
        let reply_fd = reply_file.as_raw_fd();

        let inner = Rc::new(RefCell::new(LauncherInner {
            writer: File::from(command_write),
            pending: VecDeque::new(),
            alive: true,
        }));

        let mut decoder = FrameDecoder::new();
        let watch_inner = Rc::clone(&inner);
        // SAFETY: the watcher closure owns reply_file, so the descriptor
        // outlives its registration.
        let borrowed = unsafe { BorrowedFd::borrow_raw(reply_fd) };
        let tag = reactor.watch_io(
            borrowed,
            Condition::READ,
            move |reactor, condition| {
                if condition.contains(Condition::ERROR) && !condition.contains(Condition::READ) {
                    warn!("launcher reply pipe error condition");
                    fail_pending(reactor, &watch_inner, "launcher channel broke");
                    return Dispatch::Stop;
                }
                let mut buf = [0u8; 4096];
                loop {
                    match reply_file.read(&mut buf) {
                        Ok(0) => {
                            warn!("launcher closed the reply pipe");
                            fail_pending(reactor, &watch_inner, "launcher exited");
                            return Dispatch::Stop;
                        }
                        Ok(n) => {
                            decoder.feed(&buf[..n]);
                            loop {
                                match decoder.next_message::<LaunchReply>() {
                                    Ok(Some(reply)) => {
                                        let callback =
                                            watch_inner.borrow_mut().pending.pop_front();
                                        match callback {
                                            Some(callback) => callback(reactor, reply),
                                            None => warn!("unsolicited launcher reply"),
                                        }
                                    }
                                    Ok(None) => break,
                                    Err(error) => {
                                        error!("launcher reply stream desynced: {error}");
                                        fail_pending(reactor, &watch_inner, "reply stream desynced");
                                        return Dispatch::Stop;
                                    }
                                }
                            }
                        }
                        Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                        Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                        Err(error) => {
                            error!("launcher reply pipe read failed: {error}");
                            fail_pending(reactor, &watch_inner, "reply pipe read failed");
                            return Dispatch::Stop;
                        }
                    }
                }
                Dispatch::Keep
            },
            None,
        )?;

        Ok(LauncherHandle { inner, tag })
    }

    /// Submits one launch request. `on_reply` completes when the launcher
    /// answers; replies arrive in submission order.
    pub fn launch<F>(&self, request: &LaunchRequest, on_reply: F) -> Result<(), LauncherError>
    where
        F: FnOnce(&mut Reactor, LaunchReply) + 'static,
    {
        let frame = encode_frame(request)?;
        let mut inner = self.inner.borrow_mut();
        if !inner.alive {
            return Err(LauncherError::Unavailable);
        }
        inner.writer.write_all(&frame).map_err(LauncherError::Send)?;
        inner.pending.push_back(Box::new(on_reply));
        Ok(())
    }

    /// Stops watching the reply pipe. Dropping the last handle afterwards
    /// closes the command pipe, which the launcher takes as its cue to
    /// exit.
    pub fn shutdown(&self, reactor: &mut Reactor) {
        reactor.cancel(self.tag);
        self.inner.borrow_mut().alive = false;
    }
}

/// Completes every pending callback with a failure reply. Callbacks are
/// drained before any is invoked so a callback submitting a new request
/// cannot observe a half-torn-down queue.
fn fail_pending(reactor: &mut Reactor, inner: &Rc<RefCell<LauncherInner>>, reason: &str) {
    let drained: Vec<ReplyCallback> = {
        let mut inner = inner.borrow_mut();
        inner.alive = false;
        inner.pending.drain(..).collect()
    };
    for callback in drained {
        callback(
            reactor,
            LaunchReply::Failed {
                message: reason.to_string(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cloexec_pipe() -> (OwnedFd, OwnedFd) {
        nix::unistd::pipe2(OFlag::O_CLOEXEC).unwrap()
    }

    #[test]
    fn test_replies_complete_in_submission_order() {
        let mut reactor = Reactor::new().unwrap();
        let (command_read, command_write) = cloexec_pipe();
        let (reply_read, reply_write) = cloexec_pipe();

        let handle = LauncherHandle::register(&mut reactor, command_write, reply_read).unwrap();

        let completions: Rc<RefCell<Vec<(u32, LaunchReply)>>> = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let completions = Rc::clone(&completions);
            handle
                .launch(&LaunchRequest::new(format!("filter-{i}")), move |_, reply| {
                    completions.borrow_mut().push((i, reply));
                })
                .unwrap();
        }

        // play the launcher's part: read the three requests, answer each
        let mut command_file = File::from(command_read);
        let mut decoder = FrameDecoder::new();
        let mut reply_file = File::from(reply_write);
        let mut seen = 0u32;
        let mut buf = [0u8; 4096];
        while seen < 3 {
            let n = command_file.read(&mut buf).unwrap();
            decoder.feed(&buf[..n]);
            while let Some(request) = decoder.next_message::<LaunchRequest>().unwrap() {
                assert_eq!(request.command_line, format!("filter-{seen}"));
                let frame = encode_frame(&LaunchReply::Launched { pid: 100 + seen }).unwrap();
                reply_file.write_all(&frame).unwrap();
                seen += 1;
            }
        }

        assert!(reactor.iterate(true));
        let completions = completions.borrow();
        assert_eq!(completions.len(), 3);
        for (i, (index, reply)) in completions.iter().enumerate() {
            assert_eq!(*index, i as u32);
            assert_eq!(*reply, LaunchReply::Launched { pid: 100 + i as u32 });
        }
    }

    #[test]
    fn test_reply_pipe_eof_fails_pending_requests() {
        let mut reactor = Reactor::new().unwrap();
        let (_command_read, command_write) = cloexec_pipe();
        let (reply_read, reply_write) = cloexec_pipe();

        let handle = LauncherHandle::register(&mut reactor, command_write, reply_read).unwrap();

        let outcome: Rc<RefCell<Option<LaunchReply>>> = Rc::new(RefCell::new(None));
        let outcome_cb = Rc::clone(&outcome);
        handle
            .launch(&LaunchRequest::new("filter"), move |_, reply| {
                *outcome_cb.borrow_mut() = Some(reply);
            })
            .unwrap();

        drop(reply_write);
        assert!(reactor.iterate(true));
        assert!(matches!(
            *outcome.borrow(),
            Some(LaunchReply::Failed { .. })
        ));

        // the channel is closed for further submissions
        assert!(matches!(
            handle.launch(&LaunchRequest::new("late"), |_, _| {}),
            Err(LauncherError::Unavailable)
        ));
    }

    #[test]
    fn test_launcher_loop_answers_buffered_requests() {
        let (command_read, command_write) = cloexec_pipe();
        let (reply_read, reply_write) = cloexec_pipe();

        // queue two requests and close the pipe so the loop terminates
        {
            let mut writer = File::from(command_write);
            for command in ["/bin/true", "/bin/true second"] {
                writer
                    .write_all(&encode_frame(&LaunchRequest::new(command)).unwrap())
                    .unwrap();
            }
        }

        launcher_loop(command_read, reply_write).unwrap();

        let mut replies = Vec::new();
        let mut decoder = FrameDecoder::new();
        let mut reader = File::from(reply_read);
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        decoder.feed(&buf);
        while let Some(reply) = decoder.next_message::<LaunchReply>().unwrap() {
            replies.push(reply);
        }
        assert_eq!(replies.len(), 2);
        for reply in replies {
            assert!(matches!(reply, LaunchReply::Launched { .. }));
        }
    }
}
