//! The metrics monitor and wrapper processes, and the commands that drive them.

use crate::command::{CommandFactory, CommandLine, ExecutableCommand, ExitCode};
use crate::env::Environment;
use crate::interpreter::Factory;
use crate::metrics::MetricsPipe;
use crate::settings::Settings;
use crate::signals;
use crate::state::ShellState;
use anyhow::{Context, Result};
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::waitpid;
use nix::unistd::{Pid, setsid};
use std::fmt;
use std::io::{self, Write};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonitorStatus {
    #[default]
    NotStarted,
    Run,
    Stop,
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MonitorStatus::NotStarted => "NOT_STARTED",
            MonitorStatus::Run => "RUN",
            MonitorStatus::Stop => "STOP",
        })
    }
}

/// Lifecycle of the monitor and wrapper pair. Their pids live in
/// [`ShellState`] so the termination handler can reach them.
#[derive(Debug)]
pub struct Monitor {
    status: MonitorStatus,
    state: &'static ShellState,
}

/// Starts `program` in its own session.
fn spawn_detached(program: &Path, arg0: &str, dir: Option<&Path>) -> io::Result<Pid> {
    let mut command = Command::new(program);
    command.arg0(arg0);
    if let Some(dir) = dir {
        command.current_dir(dir);
    }
    // SAFETY: setsid is async-signal-safe.
    unsafe {
        command.pre_exec(|| setsid().map(drop).map_err(io::Error::from));
    }
    let child = command.spawn()?;
    Ok(Pid::from_raw(child.id() as i32))
}

impl Monitor {
    pub fn new(state: &'static ShellState) -> Self {
        Self {
            status: MonitorStatus::NotStarted,
            state,
        }
    }

    pub fn status(&self) -> MonitorStatus {
        self.status
    }

    /// Starts both processes, or resumes them when paused.
    ///
    /// Binary paths resolve against the current working directory. If the
    /// wrapper cannot be started the monitor is killed again and the status
    /// does not change.
    pub fn start(&mut self, settings: &Settings, out: &mut dyn Write) -> Result<()> {
        match self.status {
            MonitorStatus::Run => writeln!(out, "Monitoring already running.")?,
            MonitorStatus::Stop => {
                self.state.collaborators.signal_all(Signal::SIGCONT);
                self.status = MonitorStatus::Run;
                info!("monitor resumed");
                writeln!(out, "Monitoring resumed.")?;
            }
            MonitorStatus::NotStarted => {
                let cwd = std::env::current_dir().context("cannot determine working directory")?;
                let monitor_path = cwd.join(&settings.monitor_binary);
                let monitor = spawn_detached(&monitor_path, "monitor", None)
                    .with_context(|| format!("cannot start {}", monitor_path.display()))?;

                let wrapper_path = cwd.join(&settings.wrapper_binary);
                let wrapper_dir = cwd.join(&settings.wrapper_dir);
                let wrapper = match spawn_detached(&wrapper_path, "wrapper", Some(&wrapper_dir)) {
                    Ok(pid) => pid,
                    Err(err) => {
                        let _ = kill(monitor, Signal::SIGKILL);
                        let _ = waitpid(monitor, None);
                        return Err(err)
                            .with_context(|| format!("cannot start {}", wrapper_path.display()));
                    }
                };

                self.state.collaborators.store(monitor, wrapper);
                if let Err(errno) = signals::install_termination_handlers() {
                    warn!(%errno, "cannot install termination handlers");
                }
                self.status = MonitorStatus::Run;
                info!(%monitor, %wrapper, "monitor started");
                writeln!(out, "Monitoring started. Processes running in the background.")?;
            }
        }
        Ok(())
    }

    /// Pauses both processes.
    pub fn stop(&mut self, out: &mut dyn Write) -> io::Result<()> {
        if self.status == MonitorStatus::Run {
            self.state.collaborators.signal_all(Signal::SIGSTOP);
            self.status = MonitorStatus::Stop;
            info!("monitor paused");
            writeln!(out, "Monitoring stopped.")
        } else {
            writeln!(out, "Monitoring is already stopped or has not started.")
        }
    }

    /// Kills and reaps both processes.
    pub fn shutdown(&mut self) {
        if self.status != MonitorStatus::NotStarted {
            self.state.collaborators.kill_all();
            self.state.collaborators.reap();
            self.status = MonitorStatus::NotStarted;
            info!("monitor terminated");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorCommand {
    Start,
    Stop,
    Status,
    Expose,
    ExposeRealtime,
    Help,
}

impl MonitorCommand {
    pub fn parse(line: &CommandLine) -> Option<Self> {
        Some(match line.words().as_slice() {
            ["start_monitor"] => Self::Start,
            ["stop_monitor"] => Self::Stop,
            ["status_monitor"] => Self::Status,
            ["expose", "metrics"] => Self::Expose,
            ["expose", "metrics", "realtime"] => Self::ExposeRealtime,
            ["metrics", "help"] => Self::Help,
            _ => return None,
        })
    }

    fn run(self, out: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        match self {
            Self::Start => env.monitor.start(&env.settings, out)?,
            Self::Stop => env.monitor.stop(out)?,
            Self::Status => writeln!(out, "Monitor status: {}", env.monitor.status())?,
            Self::Expose | Self::ExposeRealtime if env.monitor.status() != MonitorStatus::Run => {
                writeln!(out, "The monitor is not running, run: start_monitor")?;
            }
            Self::Expose => {
                let snapshot = MetricsPipe::new(&env.settings.metrics_pipe).read_once()?;
                write!(out, "\n{snapshot}\n")?;
            }
            Self::ExposeRealtime => {
                MetricsPipe::new(&env.settings.metrics_pipe)
                    .read_realtime(&env.state.realtime, out)?;
            }
            Self::Help => write_help(out)?,
        }
        Ok(0)
    }
}

fn write_help(out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "Available commands:")?;
    writeln!(out, " - expose metrics: reads the metrics once.")?;
    writeln!(out, " - expose metrics realtime: shows the metrics as they arrive.")?;
    writeln!(out, " - metrics help: shows this help.")?;
    writeln!(out, " - start_monitor: starts or resumes the monitor.")?;
    writeln!(out, " - stop_monitor: pauses the monitor.")?;
    writeln!(out, " - status_monitor: shows the monitor status.")
}

impl ExecutableCommand for MonitorCommand {
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        match (*self).run(stdout, env) {
            Ok(code) => Ok(code),
            Err(e) => {
                writeln!(stdout, "{e:#}")?;
                Ok(1)
            }
        }
    }
}

impl CommandFactory for Factory<MonitorCommand> {
    fn try_create(&self, line: &CommandLine) -> Option<Box<dyn ExecutableCommand>> {
        MonitorCommand::parse(line).map(|command| Box::new(command) as Box<dyn ExecutableCommand>)
    }
}
