use crate::command::{CommandFactory, CommandLine, ExecutableCommand, ExitCode};
use crate::env::Environment;
use crate::interpreter::Factory;
use crate::launcher::Launcher;
use anyhow::Result;
use std::io::{self, Write};
use tracing::debug;

/// Command that is not a builtin. The whole line goes to `/bin/sh`.
pub struct ExternalCommand {
    line: String,
}

impl ExternalCommand {
    pub fn new(line: impl Into<String>) -> Self {
        Self { line: line.into() }
    }
}

/// Claims every non-empty line, so it belongs at the end of the table.
impl CommandFactory for Factory<ExternalCommand> {
    fn try_create(&self, line: &CommandLine) -> Option<Box<dyn ExecutableCommand>> {
        if line.is_empty() {
            return None;
        }
        Some(Box::new(ExternalCommand::new(line.raw())))
    }
}

impl ExecutableCommand for ExternalCommand {
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        stdout.flush()?;
        match Launcher::new(env.state).launch(&self.line, stdout) {
            Ok(code) => {
                debug!(line = %self.line, code, "external command finished");
                Ok(code)
            }
            Err(e) => {
                writeln!(io::stderr(), "{e}")?;
                Ok(1)
            }
        }
    }
}
