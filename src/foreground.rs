use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicI32, Ordering};

const NONE: i32 = 0;

/// The one process the shell is currently waiting for, if any.
///
/// Interrupt and stop signals typed at the terminal are forwarded to it.
#[derive(Debug, Default)]
pub struct ForegroundSlot {
    pid: AtomicI32,
}

impl ForegroundSlot {
    pub const fn new() -> Self {
        Self {
            pid: AtomicI32::new(NONE),
        }
    }

    pub fn set(&self, pid: Pid) {
        self.pid.store(pid.as_raw(), Ordering::SeqCst);
    }

    pub fn get(&self) -> Option<Pid> {
        match self.pid.load(Ordering::SeqCst) {
            NONE => None,
            raw => Some(Pid::from_raw(raw)),
        }
    }

    pub fn take(&self) -> Option<Pid> {
        match self.pid.swap(NONE, Ordering::SeqCst) {
            NONE => None,
            raw => Some(Pid::from_raw(raw)),
        }
    }

    /// Clears the slot only if it still holds `pid`.
    pub fn release(&self, pid: Pid) -> bool {
        self.pid
            .compare_exchange(pid.as_raw(), NONE, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Sends `signal` to the foreground process and clears the slot.
    /// Returns false when there was nothing to signal.
    pub fn signal(&self, signal: Signal) -> bool {
        match self.take() {
            Some(pid) => {
                let _ = kill(pid, signal);
                true
            }
            None => false,
        }
    }
}
