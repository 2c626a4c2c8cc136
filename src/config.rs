//! The metrics configuration file and the `config ...` commands.

use crate::command::{CommandFactory, CommandLine, ExecutableCommand, ExitCode};
use crate::env::Environment;
use crate::interpreter::Factory;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Metric names the monitor knows how to expose.
pub const AVAILABLE_METRICS: [&str; 12] = [
    "cpu_usage",
    "memory_usage",
    "disk_usage",
    "network_usage",
    "bandwidth_usage",
    "major_page_faults",
    "minor_page_faults",
    "change_context",
    "total_processes",
    "memory_total",
    "memory_available",
    "memory_usage_2",
];

/// Contents of the configuration file. Field names on disk are shared with
/// the wrapper program and must not change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Seconds between samples.
    #[serde(rename = "intervalo_muestreo")]
    pub sampling_interval: u64,
    #[serde(rename = "metricas", default)]
    pub metrics: Vec<String>,
}

impl Config {
    /// Removes the first occurrence of `name`. Returns whether it was present.
    pub fn remove_metric(&mut self, name: &str) -> bool {
        match self.metrics.iter().position(|metric| metric == name) {
            Some(index) => {
                self.metrics.remove(index);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Lazily loaded configuration, written back after every change.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    cached: Option<Config>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the configuration, loading it on first use. A failed load is
    /// not remembered, so the next call tries again.
    pub fn get_config(&mut self) -> Result<&mut Config, ConfigError> {
        let config = match self.cached.take() {
            Some(config) => config,
            None => Self::load(&self.path)?,
        };
        Ok(self.cached.insert(config))
    }

    /// Applies `change` and saves the result.
    pub fn update<R>(&mut self, change: impl FnOnce(&mut Config) -> R) -> Result<R, ConfigError> {
        let result = change(self.get_config()?);
        self.save()?;
        Ok(result)
    }

    fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    fn save(&self) -> Result<(), ConfigError> {
        let Some(config) = &self.cached else {
            return Ok(());
        };
        let write_error = |source| ConfigError::Write {
            path: self.path.clone(),
            source,
        };
        let mut text = serde_json::to_string_pretty(config)
            .map_err(|err| write_error(io::Error::other(err)))?;
        text.push('\n');
        fs::write(&self.path, text).map_err(write_error)?;
        debug!(path = %self.path.display(), "configuration saved");
        Ok(())
    }
}

/// A `config ...` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    SetInterval(String),
    AddMetrics(Vec<String>),
    RemoveMetrics(Vec<String>),
    Print,
    ListAvailable,
    Help,
    Unknown(String),
}

impl ConfigCommand {
    pub fn parse(line: &CommandLine) -> Self {
        let owned = |names: &[&str]| -> Vec<String> {
            names.iter().map(|name| name.to_string()).collect()
        };
        match line.words().as_slice() {
            ["config", "set", "intervalo_muestreo", value] => Self::SetInterval(value.to_string()),
            ["config", "add", "metric", names @ ..] if !names.is_empty() => {
                Self::AddMetrics(owned(names))
            }
            ["config", "rm", "metric", names @ ..] if !names.is_empty() => {
                Self::RemoveMetrics(owned(names))
            }
            ["config", "print"] => Self::Print,
            ["config", "get", "list"] => Self::ListAvailable,
            ["config", "help"] => Self::Help,
            _ => Self::Unknown(line.raw().to_string()),
        }
    }

    fn run(self, out: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        match self {
            Self::SetInterval(value) => {
                let seconds: u64 = value
                    .parse()
                    .with_context(|| format!("invalid sampling interval '{value}'"))?;
                env.config
                    .update(|config| config.sampling_interval = seconds)?;
                writeln!(out, "Sampling interval updated to {seconds}")?;
            }
            Self::AddMetrics(names) => {
                env.config
                    .update(|config| config.metrics.extend(names.iter().cloned()))?;
                for name in &names {
                    writeln!(out, "Metric '{name}' added.")?;
                }
                writeln!(out, "{} metrics added.", names.len())?;
            }
            Self::RemoveMetrics(names) => {
                let removed: Vec<bool> = env.config.update(|config| {
                    names.iter().map(|name| config.remove_metric(name)).collect()
                })?;
                for (name, found) in names.iter().zip(&removed) {
                    if *found {
                        writeln!(out, "Metric '{name}' removed.")?;
                    } else {
                        writeln!(out, "Metric '{name}' not found.")?;
                    }
                }
                let count = removed.iter().filter(|found| **found).count();
                writeln!(out, "{count} metrics removed.")?;
            }
            Self::Print => {
                let config = env.config.get_config()?;
                writeln!(out, "Current configuration:")?;
                writeln!(out, "Sampling interval: {} seconds", config.sampling_interval)?;
                writeln!(out, "Monitored metrics ({}):", config.metrics.len())?;
                for metric in &config.metrics {
                    writeln!(out, " - {metric}")?;
                }
            }
            Self::ListAvailable => {
                for (i, name) in AVAILABLE_METRICS.iter().enumerate() {
                    writeln!(out, "Metric {}: {name}", i + 1)?;
                }
            }
            Self::Help => write_help(out)?,
            Self::Unknown(line) => {
                debug!(%line, "unrecognized config command");
                bail!("unknown command\nRun 'config help' to list the configuration commands.");
            }
        }
        Ok(0)
    }
}

fn write_help(out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "Configuration commands:")?;
    writeln!(out, "1. config set intervalo_muestreo <value>")?;
    writeln!(out, "   - Sets the sampling interval in seconds.")?;
    writeln!(out, "2. config add metric <name> [<name> ...]")?;
    writeln!(out, "   - Adds one or more metrics to the monitored list.")?;
    writeln!(out, "3. config rm metric <name> [<name> ...]")?;
    writeln!(out, "   - Removes one or more metrics from the monitored list.")?;
    writeln!(out, "4. config print")?;
    writeln!(out, "   - Prints the current configuration.")?;
    writeln!(out, "5. config get list")?;
    writeln!(out, "   - Lists the metrics the monitor can expose.")?;
    writeln!(out, "6. config help")?;
    writeln!(out, "   - Shows this help.")
}

impl ExecutableCommand for ConfigCommand {
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        match (*self).run(stdout, env) {
            Ok(code) => Ok(code),
            Err(e) => {
                writeln!(stdout, "config: {e:#}")?;
                Ok(1)
            }
        }
    }
}

impl CommandFactory for Factory<ConfigCommand> {
    fn try_create(&self, line: &CommandLine) -> Option<Box<dyn ExecutableCommand>> {
        match line.words().as_slice() {
            ["config", _, ..] => Some(Box::new(ConfigCommand::parse(line))),
            _ => None,
        }
    }
}
