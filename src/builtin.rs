use crate::command::{CommandFactory, CommandLine, ExecutableCommand, ExitCode};
use crate::env::Environment;
use crate::interpreter::Factory;
use crate::prompt::CLEAR_SCREEN;
use crate::scan;
use anyhow::{Context, Result, bail};
use argh::{EarlyExit, FromArgs};
use regex::{Captures, Regex};
use std::io::{self, Write};
use tracing::debug;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "echo" or "cd".
    fn name() -> &'static str;

    /// Whether `line` goes to the external launcher instead of this built-in.
    fn delegates(_line: &CommandLine) -> bool {
        false
    }

    /// Adjusts the raw arguments before `argh` sees them.
    fn prepare_args(args: Vec<&str>) -> Vec<&str> {
        args
    }

    /// Executes the command, writing its output to `stdout`.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(self, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        match <T as BuiltinCommand>::execute(*self, stdout, env) {
            Ok(x) => Ok(x),
            Err(e) => {
                writeln!(stdout, "{e:#}")?;
                Ok(1)
            }
        }
    }
}

struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        writeln!(stdout, "{}", self.output.trim_end())?;
        Ok(if self.is_error { 1 } else { 0 })
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn try_create(&self, line: &CommandLine) -> Option<Box<dyn ExecutableCommand>> {
        let name = line.name()?;
        if name != T::name() || T::delegates(line) {
            return None;
        }
        let args = T::prepare_args(line.args());
        Some(match T::from_args(&[name], &args) {
            Ok(cmd) => Box::new(cmd),
            Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                output,
                is_error: status.is_err(),
            }),
        })
    }
}

#[derive(FromArgs)]
/// Stop the monitor and leave the shell.
pub struct Quit {
    #[argh(positional, greedy)]
    /// ignored.
    pub _args: Vec<String>,
}

impl BuiltinCommand for Quit {
    fn name() -> &'static str {
        "quit"
    }

    fn execute(self, _stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        env.monitor.shutdown();
        env.should_exit = true;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to, or "-" for the previous one. Defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn prepare_args(args: Vec<&str>) -> Vec<&str> {
        match args.as_slice() {
            ["-"] => vec!["--", "-"],
            _ => args,
        }
    }

    fn execute(self, _stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        let target = match self.target.as_deref() {
            None | Some("") => env.get_var("HOME").context("cd: HOME not set")?,
            Some("-") => env.get_var("OLDPWD").context("cd: OLDPWD not set")?,
            Some(dir) => dir.to_string(),
        };

        let previous = env
            .get_var("PWD")
            .or_else(|| env.current_dir().ok().map(|dir| dir.display().to_string()));
        if std::env::set_current_dir(&target).is_err() {
            bail!("cd: {target}: No such file or directory");
        }
        let now = env
            .current_dir()
            .with_context(|| format!("cd: can't read working directory after entering {target}"))?;

        if let Some(previous) = previous {
            env.set_var("OLDPWD", previous);
        }
        env.set_var("PWD", &now);
        debug!(dir = %now.display(), "changed directory");
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Clear the terminal.
pub struct Clr {}

impl BuiltinCommand for Clr {
    fn name() -> &'static str {
        "clr"
    }

    fn execute(self, stdout: &mut dyn Write, _env: &mut Environment) -> Result<ExitCode> {
        stdout.write_all(CLEAR_SCREEN.as_bytes())?;
        stdout.flush()?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// write the arguments to standard output, separated by spaces.
/// $NAME is replaced with the value of the environment variable NAME.
pub struct Echo {
    #[argh(switch, short = 'n')]
    /// do not output the trailing newline.
    pub no_newline: bool,

    #[argh(positional, greedy)]
    /// values to print, separated by spaces.
    pub args: Vec<String>,
}

impl BuiltinCommand for Echo {
    fn name() -> &'static str {
        "echo"
    }

    /// Redirection, pipes, `&` and options other than `-n` belong to the
    /// system `echo`.
    fn delegates(line: &CommandLine) -> bool {
        line.has_shell_operators()
            || line
                .args()
                .iter()
                .any(|arg| arg.starts_with('-') && *arg != "-n")
    }

    fn execute(self, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        let variable = Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)")
            .context("echo: invalid variable pattern")?;
        let expanded: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                variable
                    .replace_all(arg, |caps: &Captures| {
                        env.get_var(&caps[1]).unwrap_or_else(|| {
                            let name = &caps[1];
                            let _ = writeln!(io::stderr(), "echo: {name}: undefined variable");
                            String::new()
                        })
                    })
                    .into_owned()
            })
            .collect();

        let s = expanded.join(" ");
        if self.no_newline {
            write!(stdout, "{}", s)?;
        } else {
            writeln!(stdout, "{}", s)?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Print every .config and .json file below the working directory.
pub struct Scan {}

impl BuiltinCommand for Scan {
    fn name() -> &'static str {
        "scan"
    }

    fn execute(self, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        let cwd = env
            .current_dir()
            .context("scan: can't read working directory")?;
        writeln!(stdout, "Scanning {} for '.config' or '.json' files", cwd.display())?;
        scan::scan(&cwd, stdout)?;
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use crate::testing::lock_process;
    use std::env as stdenv;
    use std::fs;
    use std::path::PathBuf;

    fn env() -> Environment {
        Environment::new(Settings::default())
    }

    fn run(line: &str, env: &mut Environment) -> Option<(ExitCode, String)> {
        let line = CommandLine::parse(line);
        let factories: Vec<Box<dyn CommandFactory>> = vec![
            Box::new(Factory::<Quit>::default()),
            Box::new(Factory::<Cd>::default()),
            Box::new(Factory::<Clr>::default()),
            Box::new(Factory::<Echo>::default()),
            Box::new(Factory::<Scan>::default()),
        ];
        let command = factories.iter().find_map(|factory| factory.try_create(&line))?;
        let mut out = Vec::new();
        let code = command.execute(&mut out, env).unwrap();
        Some((code, String::from_utf8(out).unwrap()))
    }

    /// Restores the working directory and the cd-related variables on drop.
    struct Restore {
        cwd: PathBuf,
        vars: Vec<(&'static str, Option<String>)>,
    }

    impl Restore {
        fn capture() -> Self {
            Self {
                cwd: stdenv::current_dir().unwrap(),
                vars: ["HOME", "PWD", "OLDPWD"]
                    .into_iter()
                    .map(|key| (key, stdenv::var(key).ok()))
                    .collect(),
            }
        }
    }

    impl Drop for Restore {
        fn drop(&mut self) {
            let _ = stdenv::set_current_dir(&self.cwd);
            for (key, value) in &self.vars {
                unsafe {
                    match value {
                        Some(value) => stdenv::set_var(key, value),
                        None => stdenv::remove_var(key),
                    }
                }
            }
        }
    }

    #[test]
    fn echo_prints_arguments() {
        let mut env = env();
        assert_eq!(run("echo hello", &mut env), Some((0, "hello\n".to_string())));
        assert_eq!(run("echo -n foo  bar", &mut env), Some((0, "foo bar".to_string())));
    }

    #[test]
    fn echo_expands_variables() {
        let _lock = lock_process();
        let _restore = Restore::capture();
        let mut env = env();
        env.set_var("HOME", "/home/u");

        assert_eq!(run("echo $HOME", &mut env).unwrap().1, "/home/u\n");
        assert_eq!(run("echo dir=$HOME/src", &mut env).unwrap().1, "dir=/home/u/src\n");
        assert_eq!(
            run("echo [$METRICS_SHELL_SURELY_UNDEFINED]", &mut env).unwrap().1,
            "[]\n"
        );
    }

    #[test]
    fn echo_with_operators_is_not_a_builtin() {
        let mut env = env();
        assert_eq!(run("echo test > out.txt", &mut env), None);
        assert_eq!(run("echo a | wc -c", &mut env), None);
        assert!(run("echo 'a > b'", &mut env).is_some());
    }

    #[test]
    fn echo_with_unknown_options_is_not_a_builtin() {
        let mut env = env();
        assert_eq!(run("echo -1", &mut env), None);
        assert_eq!(run("echo -e x", &mut env), None);
        assert_eq!(run("echo a -b", &mut env), None);
        assert_eq!(run("echo -n x", &mut env), Some((0, "x".to_string())));
    }

    #[test]
    fn cd_dash_returns_to_oldpwd() {
        let _lock = lock_process();
        let _restore = Restore::capture();
        let dir = tempfile::tempdir().unwrap();
        let target = fs::canonicalize(dir.path()).unwrap();
        let start = stdenv::current_dir().unwrap();
        let mut env = env();
        env.set_var("OLDPWD", &target);
        env.set_var("PWD", &start);

        let (code, _) = run("cd -", &mut env).unwrap();

        assert_eq!(code, 0);
        assert_eq!(stdenv::current_dir().unwrap(), target);
        assert_eq!(env.get_var("PWD"), Some(target.display().to_string()));
        assert_eq!(env.get_var("OLDPWD"), Some(start.display().to_string()));
    }

    #[test]
    fn cd_without_argument_goes_home() {
        let _lock = lock_process();
        let _restore = Restore::capture();
        let dir = tempfile::tempdir().unwrap();
        let home = fs::canonicalize(dir.path()).unwrap();
        let mut env = env();
        env.set_var("HOME", &home);

        let (code, _) = run("cd", &mut env).unwrap();

        assert_eq!(code, 0);
        assert_eq!(stdenv::current_dir().unwrap(), home);
        assert_eq!(env.get_var("PWD"), Some(home.display().to_string()));
    }

    #[test]
    fn cd_to_missing_directory_changes_nothing() {
        let _lock = lock_process();
        let _restore = Restore::capture();
        let start = stdenv::current_dir().unwrap();
        let mut env = env();
        let pwd = env.get_var("PWD");

        let (code, out) = run("cd definitely_missing_dir_42", &mut env).unwrap();

        assert_eq!(code, 1);
        assert_eq!(out, "cd: definitely_missing_dir_42: No such file or directory\n");
        assert_eq!(stdenv::current_dir().unwrap(), start);
        assert_eq!(env.get_var("PWD"), pwd);
    }

    #[test]
    fn cd_help_is_not_an_error() {
        let mut env = env();
        let (code, out) = run("cd --help", &mut env).unwrap();
        assert_eq!(code, 0);
        assert!(out.contains("Usage: cd"));
    }

    #[test]
    fn clr_writes_escape_sequence() {
        let mut env = env();
        assert_eq!(run("clr", &mut env).unwrap().1, "\x1b[2J\x1b[1;1H");
    }

    #[test]
    fn quit_requests_exit() {
        let mut env = env();
        assert_eq!(run("quit", &mut env).unwrap().0, 0);
        assert!(env.should_exit);
    }

    #[test]
    fn scan_reports_root_and_files() {
        let _lock = lock_process();
        let _restore = Restore::capture();
        let dir = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        fs::write(root.join("app.json"), "{}").unwrap();
        stdenv::set_current_dir(&root).unwrap();
        let mut env = env();

        let (code, out) = run("scan", &mut env).unwrap();

        assert_eq!(code, 0);
        assert!(out.starts_with(&format!(
            "Scanning {} for '.config' or '.json' files\n",
            root.display()
        )));
        assert!(out.contains("app.json"));
        assert_eq!(stdenv::current_dir().unwrap(), root);
    }
}
