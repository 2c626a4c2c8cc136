//! Fixed-capacity table of background jobs.
//!
//! Every cell is a set of atomics so the `SIGCHLD` handler can mark jobs done
//! without locks or allocation. A slot is occupied while its pid is non-zero.

use nix::unistd::Pid;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

/// Number of background jobs tracked at once.
pub const MAX_JOBS: usize = 4;

const EMPTY: i32 = 0;

#[derive(Debug)]
struct JobSlot {
    pid: AtomicI32,
    job_number: AtomicU32,
    done: AtomicBool,
}

impl JobSlot {
    const fn new() -> Self {
        Self {
            pid: AtomicI32::new(EMPTY),
            job_number: AtomicU32::new(0),
            done: AtomicBool::new(false),
        }
    }

    fn snapshot(&self, slot: usize) -> Option<Job> {
        let pid = self.pid.load(Ordering::SeqCst);
        (pid != EMPTY).then(|| Job {
            slot,
            job_number: self.job_number.load(Ordering::SeqCst),
            pid: Pid::from_raw(pid),
            done: self.done.load(Ordering::SeqCst),
        })
    }

    fn clear(&self) {
        self.done.store(false, Ordering::SeqCst);
        self.job_number.store(0, Ordering::SeqCst);
        self.pid.store(EMPTY, Ordering::SeqCst);
    }
}

/// Copy of one occupied slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    pub slot: usize,
    pub job_number: u32,
    pub pid: Pid,
    pub done: bool,
}

#[derive(Debug)]
pub struct JobTable {
    slots: [JobSlot; MAX_JOBS],
    last_job_number: AtomicU32,
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTable {
    pub const fn new() -> Self {
        Self {
            slots: [const { JobSlot::new() }; MAX_JOBS],
            last_job_number: AtomicU32::new(0),
        }
    }

    /// Hands out the next job number. Numbers start at 1 and are never reused,
    /// even when the job ends up without a slot.
    pub fn next_job_number(&self) -> u32 {
        self.last_job_number.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Puts `pid` in the first free slot. Returns the slot index, or `None`
    /// when every slot is taken.
    pub fn register(&self, job_number: u32, pid: Pid) -> Option<usize> {
        self.slots.iter().enumerate().find_map(|(i, slot)| {
            slot.pid
                .compare_exchange(EMPTY, pid.as_raw(), Ordering::SeqCst, Ordering::SeqCst)
                .ok()
                .map(|_| {
                    slot.job_number.store(job_number, Ordering::SeqCst);
                    slot.done.store(false, Ordering::SeqCst);
                    i
                })
        })
    }

    /// Marks the slot holding `pid` as done. Safe to call from a signal handler.
    pub fn mark_done(&self, pid: Pid) -> bool {
        match self
            .slots
            .iter()
            .find(|slot| slot.pid.load(Ordering::SeqCst) == pid.as_raw())
        {
            Some(slot) => {
                slot.done.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Pids of occupied slots that are not done yet. Does not allocate.
    pub fn pending(&self) -> impl Iterator<Item = Pid> + '_ {
        self.slots.iter().filter_map(|slot| {
            let pid = slot.pid.load(Ordering::SeqCst);
            (pid != EMPTY && !slot.done.load(Ordering::SeqCst)).then(|| Pid::from_raw(pid))
        })
    }

    /// Frees every finished slot and returns what was in it, in slot order.
    pub fn sweep(&self) -> Vec<Job> {
        let mut finished = Vec::new();
        for (i, slot) in self.slots.iter().enumerate() {
            if let Some(job) = slot.snapshot(i).filter(|job| job.done) {
                slot.clear();
                finished.push(job);
            }
        }
        finished
    }

    /// Every occupied slot.
    pub fn jobs(&self) -> Vec<Job> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.snapshot(i))
            .collect()
    }
}
