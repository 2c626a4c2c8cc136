use crate::config::ConfigStore;
use crate::monitor::Monitor;
use crate::settings::Settings;
use crate::state::{SHELL_STATE, ShellState};
use std::env as stdenv;
use std::io;
use std::path::PathBuf;

/// Everything a command may read or change while it runs.
///
/// Variables live in the process environment itself, since external commands
/// inherit it when they are exec'd.
#[derive(Debug)]
pub struct Environment {
    /// State shared with the signal handlers.
    pub state: &'static ShellState,
    pub settings: Settings,
    pub config: ConfigStore,
    pub monitor: Monitor,
    /// When set to true, indicates that the input loop should stop.
    pub should_exit: bool,
}

impl Environment {
    pub fn new(settings: Settings) -> Self {
        Self {
            state: &SHELL_STATE,
            config: ConfigStore::new(settings.config_path.clone()),
            monitor: Monitor::new(&SHELL_STATE),
            settings,
            should_exit: false,
        }
    }

    pub fn get_var(&self, key: &str) -> Option<String> {
        stdenv::var(key).ok()
    }

    pub fn set_var(&mut self, key: &str, val: impl AsRef<std::ffi::OsStr>) {
        // SAFETY: the shell is single-threaded; no other thread reads the
        // environment concurrently.
        unsafe { stdenv::set_var(key, val) }
    }

    pub fn current_dir(&self) -> io::Result<PathBuf> {
        stdenv::current_dir()
    }
}
