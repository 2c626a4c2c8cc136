use crate::env::Environment;
use crate::parser;
use anyhow::Result;
use std::io::Write;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// Processes killed by a signal report `128 + signal`, like POSIX shells do.
pub type ExitCode = i32;

/// A single input record, ready for classification.
///
/// The raw text has its line terminator and surrounding whitespace removed.
/// `words` is the quote-aware whitespace split of that text; quotes are removed
/// from the words but kept in the raw text, which is what external commands
/// receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    raw: String,
    words: Vec<String>,
}

impl CommandLine {
    pub fn parse(line: &str) -> Self {
        let raw = line.trim_end_matches(['\n', '\r']).trim().to_string();
        let words = parser::split_words(&raw);
        Self { raw, words }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// First word of the line, the command name.
    pub fn name(&self) -> Option<&str> {
        self.words.first().map(String::as_str)
    }

    /// Every word after the command name.
    pub fn args(&self) -> Vec<&str> {
        self.words.iter().skip(1).map(String::as_str).collect()
    }

    pub fn words(&self) -> Vec<&str> {
        self.words.iter().map(String::as_str).collect()
    }

    /// True when the line uses redirection, a pipe or the background marker.
    pub fn has_shell_operators(&self) -> bool {
        parser::has_operators(&self.raw)
    }
}

/// Object-safe trait for any command that can be executed by the shell.
///
/// This is implemented by built-ins via a blanket impl, by the configuration
/// and monitor commands, and by external commands.
pub trait ExecutableCommand {
    /// Executes the command, writing user-visible output to `stdout`.
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode>;
}

/// Factory that tries to create a command from an input line.
///
/// Returns `None` when the factory doesn't recognize the line, so the
/// interpreter can ask the next factory in its table.
pub trait CommandFactory {
    /// Attempt to create a command instance for the provided line.
    fn try_create(&self, line: &CommandLine) -> Option<Box<dyn ExecutableCommand>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_terminator_and_whitespace() {
        let line = CommandLine::parse("  echo hello  \n");
        assert_eq!(line.raw(), "echo hello");
        assert_eq!(line.name(), Some("echo"));
        assert_eq!(line.args(), vec!["hello"]);
    }

    #[test]
    fn quoted_words_stay_together() {
        let line = CommandLine::parse("config add metric 'cpu usage' mem");
        assert_eq!(line.words(), vec!["config", "add", "metric", "cpu usage", "mem"]);
    }

    #[test]
    fn blank_line_is_empty() {
        assert!(CommandLine::parse("   \r\n").is_empty());
    }

    #[test]
    fn detects_operators_outside_quotes_only() {
        assert!(CommandLine::parse("echo hi > out.txt").has_shell_operators());
        assert!(CommandLine::parse("sleep 1 &").has_shell_operators());
        assert!(!CommandLine::parse("echo 'a > b'").has_shell_operators());
    }
}
