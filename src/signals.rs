//! Signal handlers for the interactive shell.
//!
//! Handlers only touch [`ShellState`] atomics and call `kill`, `waitpid` or
//! `_exit`. The work they do lives in plain functions taking the state by
//! reference so it can be tested without raising real signals.

use crate::state::{SHELL_STATE, ShellState};
use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};

/// Forwards an interrupt to the foreground process, or stops the realtime
/// display when nothing runs in the foreground.
pub fn on_interrupt(state: &ShellState) {
    if !state.foreground.signal(Signal::SIGINT) {
        state.realtime.clear();
    }
}

pub fn on_stop(state: &ShellState) {
    state.foreground.signal(Signal::SIGTSTP);
}

/// Polls every pending background job and every stray. Deliveries coalesce,
/// so one call may have to reap several children.
///
/// Only pids the shell handed off are waited for. The foreground process
/// belongs to the launcher's blocking wait.
pub fn on_child_exit(state: &ShellState) {
    for pid in state.jobs.pending() {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(..) | WaitStatus::Signaled(..)) | Err(Errno::ECHILD) => {
                state.jobs.mark_done(pid);
            }
            _ => {}
        }
    }
    state.strays.reap();
}

pub fn on_terminate(state: &ShellState) {
    state.collaborators.kill_all();
}

extern "C" fn handle_interrupt(_: libc::c_int) {
    let errno = Errno::last_raw();
    on_interrupt(&SHELL_STATE);
    Errno::set_raw(errno);
}

extern "C" fn handle_stop(_: libc::c_int) {
    let errno = Errno::last_raw();
    on_stop(&SHELL_STATE);
    Errno::set_raw(errno);
}

extern "C" fn handle_child(_: libc::c_int) {
    let errno = Errno::last_raw();
    on_child_exit(&SHELL_STATE);
    Errno::set_raw(errno);
}

extern "C" fn handle_quit(_: libc::c_int) {}

extern "C" fn handle_terminate(_: libc::c_int) {
    on_terminate(&SHELL_STATE);
    // SAFETY: `_exit` is async-signal-safe and never returns.
    unsafe { libc::_exit(0) }
}

fn set_handler(
    signal: Signal,
    handler: extern "C" fn(libc::c_int),
    flags: SaFlags,
) -> nix::Result<()> {
    let action = SigAction::new(SigHandler::Handler(handler), flags, SigSet::empty());
    // SAFETY: every handler above is async-signal-safe: it only uses atomics,
    // kill, waitpid and _exit, and restores errno.
    unsafe { sigaction(signal, &action) }.map(drop)
}

/// Installs the interrupt, stop, quit and child handlers. Idempotent.
///
/// Interrupt and stop are installed without `SA_RESTART` so that a blocking
/// read of the metrics pipe returns and notices the cleared realtime flag.
pub fn install() -> nix::Result<()> {
    set_handler(Signal::SIGINT, handle_interrupt, SaFlags::empty())?;
    set_handler(Signal::SIGTSTP, handle_stop, SaFlags::empty())?;
    set_handler(Signal::SIGQUIT, handle_quit, SaFlags::SA_RESTART)?;
    set_handler(
        Signal::SIGCHLD,
        handle_child,
        SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP,
    )
}

/// Installs the SIGTERM and SIGHUP handlers that take the monitor down with
/// the shell.
pub fn install_termination_handlers() -> nix::Result<()> {
    set_handler(Signal::SIGTERM, handle_terminate, SaFlags::SA_RESTART)?;
    set_handler(Signal::SIGHUP, handle_terminate, SaFlags::SA_RESTART)
}

/// Blocks SIGCHLD for the calling thread until the guard is dropped.
pub struct ChildSignalGuard {
    mask: SigSet,
}

impl ChildSignalGuard {
    pub fn block() -> nix::Result<Self> {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGCHLD);
        mask.thread_block()?;
        Ok(Self { mask })
    }

    /// Unblocks without consuming the guard. Forked children call this before
    /// exec, since the signal mask survives exec.
    pub fn unblock(&self) {
        let _ = self.mask.thread_unblock();
    }
}

impl Drop for ChildSignalGuard {
    fn drop(&mut self) {
        let _ = self.mask.thread_unblock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;
    use std::os::unix::process::ExitStatusExt;
    use std::process::Command;
    use std::thread::sleep;
    use std::time::Duration;

    fn pid_of(child: &std::process::Child) -> Pid {
        Pid::from_raw(child.id() as i32)
    }

    #[test]
    fn interrupt_without_foreground_clears_realtime() {
        let state = ShellState::new();
        state.realtime.set();
        on_interrupt(&state);
        assert!(!state.realtime.is_set());
    }

    #[test]
    fn interrupt_is_forwarded_to_foreground() {
        let state = ShellState::new();
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        state.foreground.set(pid_of(&child));
        state.realtime.set();

        on_interrupt(&state);

        assert_eq!(state.foreground.get(), None);
        assert!(state.realtime.is_set());
        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(Signal::SIGINT as i32));
    }

    #[test]
    fn stop_is_forwarded_to_foreground() {
        let state = ShellState::new();
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let pid = pid_of(&child);
        state.foreground.set(pid);

        on_stop(&state);

        assert_eq!(state.foreground.get(), None);
        assert_eq!(
            waitpid(pid, Some(WaitPidFlag::WUNTRACED)).unwrap(),
            WaitStatus::Stopped(pid, Signal::SIGTSTP)
        );
        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn stop_without_foreground_does_nothing() {
        let state = ShellState::new();
        state.realtime.set();
        on_stop(&state);
        assert!(state.realtime.is_set());
    }

    #[test]
    fn child_exit_marks_only_finished_jobs() {
        let state = ShellState::new();
        let quick = Command::new("true").spawn().unwrap();
        let mut slow = Command::new("sleep").arg("5").spawn().unwrap();
        state.jobs.register(1, pid_of(&quick));
        state.jobs.register(2, pid_of(&slow));

        for _ in 0..100 {
            on_child_exit(&state);
            if state.jobs.jobs().iter().any(|job| job.done) {
                break;
            }
            sleep(Duration::from_millis(20));
        }

        let jobs = state.jobs.jobs();
        assert!(jobs[0].done);
        assert!(!jobs[1].done);
        assert_eq!(state.jobs.sweep().len(), 1);

        slow.kill().unwrap();
        slow.wait().unwrap();
    }
}
