//! Process-wide state shared between the dispatcher and signal handlers.
//!
//! Everything here is an atomic so handlers can read and write it without
//! locking or allocating.

use crate::foreground::ForegroundSlot;
use crate::jobs::JobTable;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

pub static SHELL_STATE: ShellState = ShellState::new();

/// Number of untracked children the shell can still reap.
pub const MAX_STRAYS: usize = 32;

#[derive(Debug, Default)]
pub struct ShellState {
    pub jobs: JobTable,
    pub foreground: ForegroundSlot,
    pub realtime: RealtimeFlag,
    pub collaborators: CollaboratorPids,
    pub strays: StrayPids,
}

impl ShellState {
    pub const fn new() -> Self {
        Self {
            jobs: JobTable::new(),
            foreground: ForegroundSlot::new(),
            realtime: RealtimeFlag::new(),
            collaborators: CollaboratorPids::new(),
            strays: StrayPids::new(),
        }
    }
}

/// Set while the realtime metrics display is running.
#[derive(Debug, Default)]
pub struct RealtimeFlag(AtomicBool);

impl RealtimeFlag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns whether the flag was set.
    pub fn clear(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Pids of the monitor and wrapper processes, zero when not running.
#[derive(Debug, Default)]
pub struct CollaboratorPids {
    monitor: AtomicI32,
    wrapper: AtomicI32,
}

impl CollaboratorPids {
    pub const fn new() -> Self {
        Self {
            monitor: AtomicI32::new(0),
            wrapper: AtomicI32::new(0),
        }
    }

    pub fn store(&self, monitor: Pid, wrapper: Pid) {
        self.monitor.store(monitor.as_raw(), Ordering::SeqCst);
        self.wrapper.store(wrapper.as_raw(), Ordering::SeqCst);
    }

    pub fn monitor(&self) -> Option<Pid> {
        load(&self.monitor)
    }

    pub fn wrapper(&self) -> Option<Pid> {
        load(&self.wrapper)
    }

    /// Sends `signal` to both collaborators.
    pub fn signal_all(&self, signal: Signal) {
        for pid in [self.monitor(), self.wrapper()].into_iter().flatten() {
            let _ = kill(pid, signal);
        }
    }

    /// Kills both collaborators. Does not wait for them; see [`Self::reap`].
    pub fn kill_all(&self) {
        self.signal_all(Signal::SIGKILL);
    }

    /// Waits for killed collaborators and forgets their pids.
    pub fn reap(&self) {
        for pid in [self.monitor(), self.wrapper()].into_iter().flatten() {
            let _ = waitpid(pid, None);
        }
        self.clear();
    }

    pub fn clear(&self) {
        self.monitor.store(0, Ordering::SeqCst);
        self.wrapper.store(0, Ordering::SeqCst);
    }
}

/// Children that are not in the job table: background jobs launched while
/// the table was full, and foreground processes left stopped.
#[derive(Debug)]
pub struct StrayPids {
    slots: [AtomicI32; MAX_STRAYS],
}

impl Default for StrayPids {
    fn default() -> Self {
        Self::new()
    }
}

impl StrayPids {
    pub const fn new() -> Self {
        Self {
            slots: [const { AtomicI32::new(0) }; MAX_STRAYS],
        }
    }

    /// Returns false when every slot is taken.
    pub fn adopt(&self, pid: Pid) -> bool {
        self.slots.iter().any(|slot| {
            slot.compare_exchange(0, pid.as_raw(), Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        })
    }

    pub fn pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.slots.iter().filter_map(load)
    }

    /// Collects every stray that has exited. Never blocks.
    pub fn reap(&self) {
        for slot in &self.slots {
            let raw = slot.load(Ordering::SeqCst);
            if raw == 0 {
                continue;
            }
            match waitpid(Pid::from_raw(raw), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(..) | WaitStatus::Signaled(..)) | Err(Errno::ECHILD) => {
                    let _ = slot.compare_exchange(raw, 0, Ordering::SeqCst, Ordering::SeqCst);
                }
                _ => {}
            }
        }
    }

    /// Sends SIGHUP and then SIGCONT, so stopped strays wake up to die.
    pub fn hang_up(&self) {
        for pid in self.pids() {
            let _ = kill(pid, Signal::SIGHUP);
            let _ = kill(pid, Signal::SIGCONT);
        }
    }
}

fn load(cell: &AtomicI32) -> Option<Pid> {
    match cell.load(Ordering::SeqCst) {
        0 => None,
        raw => Some(Pid::from_raw(raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_flag_reports_previous_value() {
        let flag = RealtimeFlag::new();
        assert!(!flag.clear());
        flag.set();
        assert!(flag.is_set());
        assert!(flag.clear());
        assert!(!flag.is_set());
    }

    #[test]
    fn collaborators_start_empty() {
        let pids = CollaboratorPids::new();
        assert_eq!(pids.monitor(), None);
        pids.store(Pid::from_raw(10), Pid::from_raw(11));
        assert_eq!(pids.wrapper(), Some(Pid::from_raw(11)));
        pids.clear();
        assert_eq!(pids.monitor(), None);
        assert_eq!(pids.wrapper(), None);
    }

    #[test]
    fn strays_are_adopted_until_full() {
        let strays = StrayPids::new();
        for raw in 1..=MAX_STRAYS as i32 {
            assert!(strays.adopt(Pid::from_raw(raw)));
        }
        assert!(!strays.adopt(Pid::from_raw(999)));
        assert_eq!(strays.pids().count(), MAX_STRAYS);
    }

    #[test]
    fn exited_stray_is_reaped() {
        let child = std::process::Command::new("true").spawn().unwrap();
        let pid = Pid::from_raw(child.id() as i32);
        let strays = StrayPids::new();
        assert!(strays.adopt(pid));

        for _ in 0..250 {
            strays.reap();
            if strays.pids().next().is_none() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        assert_eq!(strays.pids().next(), None);
        assert_eq!(waitpid(pid, Some(WaitPidFlag::WNOHANG)), Err(Errno::ECHILD));
    }
}
