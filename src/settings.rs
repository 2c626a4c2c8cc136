use std::path::PathBuf;

/// Paths the shell works with. Relative paths resolve against the working
/// directory at the time they are used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// JSON file shared with the metrics wrapper.
    pub config_path: PathBuf,
    /// Named pipe the monitor writes snapshots to.
    pub metrics_pipe: PathBuf,
    pub monitor_binary: PathBuf,
    pub wrapper_binary: PathBuf,
    /// Working directory of the wrapper process.
    pub wrapper_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("jsonconfig/config.json"),
            metrics_pipe: PathBuf::from("/tmp/metrics_pipe"),
            monitor_binary: PathBuf::from("./bin/monitoring_project"),
            wrapper_binary: PathBuf::from("./bin/wrapper"),
            wrapper_dir: PathBuf::from("jsonconfig"),
        }
    }
}

impl Settings {
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = path.into();
        self
    }

    pub fn with_metrics_pipe(mut self, path: impl Into<PathBuf>) -> Self {
        self.metrics_pipe = path.into();
        self
    }
}
