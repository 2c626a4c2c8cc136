//! Starting external commands.
//!
//! A launch goes through three steps: [`parser::parse`] builds the plan,
//! [`ProcessGraph::plumb`] opens the redirection files, and
//! [`ProcessGraph::spawn`] forks. Every stage runs as `/bin/sh -c <stage>`.

use crate::command::ExitCode;
use crate::parser::{self, CommandPlan, ParsingError, RedirectKind};
use crate::signals::ChildSignalGuard;
use crate::state::ShellState;
use nix::errno::Errno;
use nix::libc;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, dup2_stdin, dup2_stdout, execv, fork, pipe, write};
use std::ffi::{CStr, CString, NulError};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

const SHELL: &CStr = c"/bin/sh";

/// Exit status of a child whose exec failed.
const EXEC_FAILED: libc::c_int = 127;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Parse(#[from] ParsingError),
    #[error("cannot determine working directory: {0}")]
    CurrentDir(#[source] io::Error),
    #[error("{}: {source}", path.display())]
    Open {
        kind: RedirectKind,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("command contains a NUL byte")]
    NulByte(#[from] NulError),
    #[error("fork failed: {0}")]
    Fork(#[source] Errno),
    #[error("cannot block SIGCHLD: {0}")]
    SignalMask(#[source] Errno),
    #[error(transparent)]
    Output(#[from] io::Error),
}

/// Arguments for one `/bin/sh -c` process, built before forking.
#[derive(Debug)]
struct Stage {
    argv: Vec<CString>,
}

impl Stage {
    fn new(text: &str) -> Result<Self, NulError> {
        Ok(Self {
            argv: vec![
                CString::new("sh")?,
                CString::new("-c")?,
                CString::new(text)?,
            ],
        })
    }
}

/// Opened redirection files plus the stages they connect.
///
/// `stdin` feeds the first stage and `stdout` receives the last stage's
/// output. The parent closes both when the graph is dropped after the fork.
#[derive(Debug)]
pub struct ProcessGraph {
    stdin: Option<File>,
    stdout: Option<File>,
    stages: Vec<Stage>,
}

impl ProcessGraph {
    /// Opens redirection targets relative to `cwd`.
    pub fn plumb(plan: &CommandPlan, cwd: &Path) -> Result<Self, LaunchError> {
        let stdin = match plan.target(RedirectKind::Input) {
            Some(target) => {
                let path = parser::resolve_target(cwd, target);
                Some(File::open(&path).map_err(|source| LaunchError::Open {
                    kind: RedirectKind::Input,
                    path,
                    source,
                })?)
            }
            None => None,
        };
        let stdout = match plan.target(RedirectKind::Output) {
            Some(target) => {
                let path = parser::resolve_target(cwd, target);
                let file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .mode(0o666)
                    .open(&path)
                    .map_err(|source| LaunchError::Open {
                        kind: RedirectKind::Output,
                        path,
                        source,
                    })?;
                Some(file)
            }
            None => None,
        };
        let stages = plan
            .stages
            .iter()
            .map(|text| Stage::new(text))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            stdin,
            stdout,
            stages,
        })
    }

    /// Forks the process that the shell will wait for. With two stages that
    /// process forks the left stage itself and then becomes the right one.
    pub fn spawn(self, guard: &ChildSignalGuard) -> Result<Pid, LaunchError> {
        // SAFETY: the child only calls async-signal-safe functions on data
        // prepared before the fork, then execs or exits.
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => Ok(child),
            Ok(ForkResult::Child) => {
                guard.unblock();
                self.run_child()
            }
            Err(errno) => Err(LaunchError::Fork(errno)),
        }
    }

    fn run_child(&self) -> ! {
        if let Some(input) = &self.stdin {
            if let Err(errno) = dup2_stdin(input) {
                die("cannot redirect input", errno);
            }
        }
        if let Some(output) = &self.stdout {
            if let Err(errno) = dup2_stdout(output) {
                die("cannot redirect output", errno);
            }
        }

        match self.stages.as_slice() {
            [left, right] => {
                let (reader, writer) = match pipe() {
                    Ok(ends) => ends,
                    Err(errno) => die("cannot create pipe", errno),
                };
                // SAFETY: same constraints as the outer fork.
                match unsafe { fork() } {
                    Ok(ForkResult::Child) => {
                        if let Err(errno) = dup2_stdout(&writer) {
                            die("cannot redirect output", errno);
                        }
                        drop(reader);
                        drop(writer);
                        exec(left)
                    }
                    Ok(ForkResult::Parent { .. }) => {
                        if let Err(errno) = dup2_stdin(&reader) {
                            die("cannot redirect input", errno);
                        }
                        drop(reader);
                        drop(writer);
                        exec(right)
                    }
                    Err(errno) => die("fork failed", errno),
                }
            }
            [only] => exec(only),
            _ => die("empty command", Errno::EINVAL),
        }
    }
}

fn exec(stage: &Stage) -> ! {
    let errno = match execv(SHELL, &stage.argv) {
        Ok(never) => match never {},
        Err(errno) => errno,
    };
    die("exec /bin/sh failed", errno)
}

/// Reports an error from a forked child and exits it. Does not allocate.
fn die(what: &str, errno: Errno) -> ! {
    let stderr = io::stderr();
    for part in [what, ": ", errno.desc(), "\n"] {
        let _ = write(&stderr, part.as_bytes());
    }
    // SAFETY: `_exit` skips atexit handlers and buffered output owned by the
    // parent, which is what a forked child must do.
    unsafe { libc::_exit(EXEC_FAILED) }
}

/// How a waited-for foreground process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Finished(ExitCode),
    Stopped(ExitCode),
}

/// Launches external commands and tracks them in a [`ShellState`].
pub struct Launcher {
    state: &'static ShellState,
}

impl Launcher {
    pub fn new(state: &'static ShellState) -> Self {
        Self { state }
    }

    /// Runs `line` as an external command.
    ///
    /// Background launches return 0 right after the job is announced.
    /// Foreground launches return the exit status of the waited-for process.
    pub fn launch(&self, line: &str, out: &mut dyn Write) -> Result<ExitCode, LaunchError> {
        let plan = parser::parse(line)?;
        let cwd = std::env::current_dir().map_err(LaunchError::CurrentDir)?;
        let graph = ProcessGraph::plumb(&plan, &cwd)?;

        let guard = ChildSignalGuard::block().map_err(LaunchError::SignalMask)?;
        let pid = graph.spawn(&guard)?;
        debug!(%pid, background = plan.background, stages = plan.stages.len(), "spawned");

        if plan.background {
            let job_number = self.state.jobs.next_job_number();
            if self.state.jobs.register(job_number, pid).is_none() {
                warn!(%pid, job_number, "job table full, job is not tracked");
                if !self.state.strays.adopt(pid) {
                    warn!(%pid, "no room to reap untracked job");
                }
            }
            drop(guard);
            writeln!(out, "[{job_number}] {pid}")?;
            return Ok(0);
        }

        self.state.foreground.set(pid);
        drop(guard);
        let outcome = self.wait_foreground(pid);
        if let Outcome::Stopped(_) = outcome {
            if !self.state.strays.adopt(pid) {
                warn!(%pid, "no room to reap stopped process");
            }
            // It may have been killed before it was adopted.
            self.state.strays.reap();
            writeln!(out, "\n[stopped] {pid}")?;
        }
        self.announce_finished(out)?;

        Ok(match outcome {
            Outcome::Finished(code) | Outcome::Stopped(code) => code,
        })
    }

    fn wait_foreground(&self, pid: Pid) -> Outcome {
        let outcome = loop {
            match waitpid(pid, Some(WaitPidFlag::WUNTRACED)) {
                Ok(WaitStatus::Exited(_, code)) => break Outcome::Finished(code),
                Ok(WaitStatus::Signaled(_, signal, _)) => {
                    break Outcome::Finished(128 + signal as i32);
                }
                Ok(WaitStatus::Stopped(_, signal)) => break Outcome::Stopped(128 + signal as i32),
                Ok(_) | Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => break Outcome::Finished(0),
                Err(errno) => {
                    warn!(%pid, %errno, "waitpid failed");
                    break Outcome::Finished(1);
                }
            }
        };
        self.state.foreground.release(pid);
        outcome
    }

    /// Prints and frees every background job that finished since the last sweep.
    pub fn announce_finished(&self, out: &mut dyn Write) -> io::Result<()> {
        for job in self.state.jobs.sweep() {
            info!(job_number = job.job_number, pid = %job.pid, "background job done");
            writeln!(out, "[{}]+ Done", job.job_number)?;
        }
        Ok(())
    }
}
