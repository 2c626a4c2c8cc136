//! An interactive command interpreter with job control and a metrics monitor.
//!
//! Each input line is either handled by a built-in (directory change, screen
//! clear, echo, configuration scan, configuration and monitor commands) or
//! handed to `/bin/sh` as an external process, with `<`/`>` redirection, a
//! single `|` and `&` background jobs.
//!
//! The main entry point is [`Interpreter`]. The public modules [`command`] and
//! [`env`] expose traits and types for implementing your own commands.

mod builtin;
pub mod command;
pub mod config;
pub mod env;
mod external;
pub mod foreground;
mod interpreter;
pub mod jobs;
pub mod launcher;
pub mod metrics;
pub mod monitor;
pub mod parser;
pub mod prompt;
pub mod scan;
pub mod settings;
pub mod signals;
pub mod state;

/// Just a convenient re-export of the command runner.
///
/// See [`Interpreter`] for the high-level API.
pub use interpreter::Interpreter;
pub use settings::Settings;

#[cfg(test)]
mod testing {
    use std::sync::{Mutex, MutexGuard, OnceLock};

    /// Serializes tests that change the working directory, environment
    /// variables or the process-wide shell state.
    pub fn lock_process() -> MutexGuard<'static, ()> {
        static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
        MUTEX
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
