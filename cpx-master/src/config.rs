//! Supervisor configuration

use std::path::{Path, PathBuf};

use crate::cli::CliOptions;
use crate::error::SupervisorError;
use crate::table::DEFAULT_CAPACITY;

pub const APP_NAME: &str = "cpx-master";
pub const DEFAULT_CONFIG_FILE: &str = "/var/conf/cpx_https.conf";
pub const DEFAULT_PID_FILE: &str = "./cpx-master.pid";
pub const DEFAULT_WORKER_NAME: &str = "worker process";

/// Everything the master needs to know before it starts its workers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Process table size
    pub capacity: usize,
    /// Worker population (None = one per online CPU)
    pub worker_count: Option<usize>,
    /// Diagnostic label given to every worker slot
    pub worker_name: String,
    pub pid_file: PathBuf,
    /// Handed to the external configuration reader; never parsed here
    pub config_file: PathBuf,
    /// Detach from the terminal at startup
    pub daemon: bool,
}

impl SupervisorConfig {
    /// Set the process table size
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set a fixed worker population
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }

    /// Set the label given to worker slots
    pub fn worker_name<S: Into<String>>(mut self, name: S) -> Self {
        self.worker_name = name.into();
        self
    }

    /// Set the PID file path
    pub fn pid_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.pid_file = path.into();
        self
    }

    /// Set the configuration file path
    pub fn config_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config_file = path.into();
        self
    }

    /// Set whether to detach from the terminal
    pub fn daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }

    /// Overlay command-line options
    pub fn with_cli(mut self, options: &CliOptions) -> Self {
        if options.no_daemon {
            self.daemon = false;
        }
        if let Some(path) = &options.config_file {
            self.config_file = path.clone();
        }
        self
    }

    /// Reject configurations the supervisor cannot run with
    pub fn validate(&self) -> Result<(), SupervisorError> {
        if self.capacity == 0 {
            return Err(SupervisorError::InvalidConfig {
                details: "process table capacity must be at least 1".to_string(),
            });
        }
        if self.worker_count == Some(0) {
            return Err(SupervisorError::InvalidConfig {
                details: "worker count must be at least 1".to_string(),
            });
        }
        if self.worker_name.is_empty() {
            return Err(SupervisorError::InvalidConfig {
                details: "worker name must not be empty".to_string(),
            });
        }
        if self.pid_file.as_os_str().is_empty() {
            return Err(SupervisorError::InvalidConfig {
                details: "no pid file name defined".to_string(),
            });
        }
        Ok(())
    }

    /// Anchor relative paths at `base` so they survive a later chdir
    pub fn resolve_paths(&mut self, base: &Path) {
        if self.pid_file.is_relative() {
            self.pid_file = base.join(&self.pid_file);
        }
        if self.config_file.is_relative() {
            self.config_file = base.join(&self.config_file);
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            worker_count: None,
            worker_name: DEFAULT_WORKER_NAME.to_string(),
            pid_file: PathBuf::from(DEFAULT_PID_FILE),
            config_file: PathBuf::from(DEFAULT_CONFIG_FILE),
            daemon: true,
        }
    }
}
