//! CLI execution context.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use coherence_sdk::coherence_observability::{init_logging, LogFormat, LogLevel};
use coherence_sdk::{Coherence, CoherenceConfig};

use crate::output::Output;

/// Execution context for CLI commands.
pub struct Context {
    /// Runtime configuration.
    pub config: CoherenceConfig,
    /// Where the configuration came from, if a file.
    pub config_path: Option<PathBuf>,
    /// Output handler.
    pub output: Output,
}

impl Context {
    /// Load context from an explicit config file, or the nearest one found
    /// walking up from the current directory, or defaults.
    pub fn load(config_path: Option<&str>, output: Output) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;

        let config_path = match config_path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::find_config(&cwd),
        };
        let config = match &config_path {
            Some(path) => CoherenceConfig::load(path)
                .with_context(|| format!("Failed to load config: {}", path.display()))?,
            None => CoherenceConfig::from_env()?,
        };

        // Logs go to stderr in a human format, away from command output.
        let mut logging = config.logging.clone();
        logging.format = LogFormat::Human;
        if output.is_verbose() {
            logging.level = LogLevel::Debug;
        }
        if let Err(e) = init_logging(&logging) {
            output.debug(&format!("Logging not initialised: {}", e));
        }

        if let Some(path) = &config_path {
            output.debug(&format!("Using config {}", path.display()));
        }

        Ok(Self {
            config,
            config_path,
            output,
        })
    }

    /// Find a config file in the directory tree.
    fn find_config(start: &Path) -> Option<PathBuf> {
        let config_names = ["coherence.toml", ".coherence.toml", "coherence.json"];

        let mut current = start.to_path_buf();
        loop {
            for name in &config_names {
                let candidate = current.join(name);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }

            if !current.pop() {
                return None;
            }
        }
    }

    /// Open the configured datastore, creating missing tables.
    pub fn runtime(&self) -> Result<Coherence> {
        self.output
            .debug(&format!("Opening database {}", self.config.database.path));
        Coherence::open(self.config.clone())
            .with_context(|| format!("Failed to open database {}", self.config.database.path))
    }
}
