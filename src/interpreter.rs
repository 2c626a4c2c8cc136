use crate::command::{CommandFactory, CommandLine, ExitCode};
use crate::env::Environment;
use crate::settings::Settings;
use crate::{prompt, signals};
use anyhow::anyhow;
use rustyline::error::ReadlineError;
use rustyline::{DefaultEditor, Result};
use std::io::{self, BufRead, Write};
use tracing::{debug, warn};

/// Factory allows creating instances of ExecutableCommand.
///
/// Only support commands defined in this crate: built-ins, configuration and
/// monitor commands, and ExternalCommand.
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

/// The command interpreter.
///
/// The interpreter maintains an [`Environment`] and an ordered list of
/// [`CommandFactory`] objects. Each line goes to the first factory that
/// claims it. See [`Default`] for the table used by the shell.
///
/// Example
/// ```no_run
/// use metrics_shell::Interpreter;
/// let mut sh = Interpreter::default();
/// let code = sh.execute("echo hello world").unwrap();
/// assert_eq!(code, 0);
/// ```
pub struct Interpreter {
    env: Environment,
    commands: Vec<Box<dyn CommandFactory>>,
}

impl Interpreter {
    /// Create an interpreter with the default command table.
    pub fn new(settings: Settings) -> Self {
        Self::with_commands(settings, default_commands())
    }

    /// Create a new interpreter with a custom set of command factories.
    pub fn with_commands(settings: Settings, commands: Vec<Box<dyn CommandFactory>>) -> Self {
        Self {
            env: Environment::new(settings),
            commands,
        }
    }

    pub fn should_exit(&self) -> bool {
        self.env.should_exit
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Runs one input line, writing output to the process stdout.
    pub fn execute(&mut self, line: &str) -> anyhow::Result<ExitCode> {
        let mut stdout = io::stdout().lock();
        let code = self.execute_with_output(line, &mut stdout)?;
        stdout.flush()?;
        Ok(code)
    }

    /// Runs one input line, writing built-in output to `out`.
    ///
    /// External commands write to the inherited descriptors, not to `out`.
    pub fn execute_with_output(
        &mut self,
        line: &str,
        out: &mut dyn Write,
    ) -> anyhow::Result<ExitCode> {
        if let Err(errno) = signals::install() {
            warn!(%errno, "cannot install signal handlers");
        }

        let line = CommandLine::parse(line);
        if line.is_empty() {
            return Ok(0);
        }
        for factory in &self.commands {
            if let Some(cmd) = factory.try_create(&line) {
                debug!(line = line.raw(), "dispatching");
                return cmd.execute(out, &mut self.env);
            }
        }
        Err(anyhow!("command not found: {}", line.raw()))
    }

    /// Runs every line of `input` in order. Stops early on `quit`.
    pub fn run_batch(&mut self, input: impl BufRead, out: &mut dyn Write) -> io::Result<()> {
        for line in input.lines() {
            let line = line?;
            if let Err(e) = self.execute_with_output(&line, out) {
                eprintln!("{e:#}");
            }
            out.flush()?;
            if self.env.should_exit {
                break;
            }
        }
        Ok(())
    }

    /// Interactive loop: prints the banner once, then a prompt before every
    /// line, until `quit` or end of input.
    pub fn repl(&mut self) -> Result<()> {
        let mut rl = DefaultEditor::new()?;
        print!("{}", prompt::banner());

        while !self.env.should_exit {
            println!("{}", prompt::header(&self.env));
            match rl.readline(prompt::MARKER) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        rl.add_history_entry(line.as_str())?;
                    }
                    if let Err(e) = self.execute(&line) {
                        eprintln!("{e:#}");
                    }
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }

    /// Stops the monitor processes if they are still around and wakes
    /// stopped children with SIGHUP so they do not outlive the shell.
    pub fn shutdown(&mut self) {
        self.env.monitor.shutdown();
        self.env.state.strays.hang_up();
    }
}

fn default_commands() -> Vec<Box<dyn CommandFactory>> {
    use crate::builtin::*;
    use crate::config::ConfigCommand;
    use crate::external::ExternalCommand;
    use crate::monitor::MonitorCommand;
    vec![
        Box::new(Factory::<ConfigCommand>::default()),
        Box::new(Factory::<MonitorCommand>::default()),
        Box::new(Factory::<Quit>::default()),
        Box::new(Factory::<Cd>::default()),
        Box::new(Factory::<Clr>::default()),
        Box::new(Factory::<Echo>::default()),
        Box::new(Factory::<Scan>::default()),
        Box::new(Factory::<ExternalCommand>::default()),
    ]
}

impl Default for Interpreter {
    /// Create an interpreter with the default settings and command table:
    /// - `config ...` commands
    /// - monitor commands
    /// - built-ins: `quit`, `cd`, `clr`, `echo`, `scan`
    /// - external command launcher
    fn default() -> Self {
        Self::new(Settings::default())
    }
}
