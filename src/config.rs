//! Runtime configuration
//!
//! Configuration is layered: built-in defaults, then an optional `rite.toml`
//! file, then `RITE_*` environment variables. Hosts embedding the engine can
//! also construct a [`Config`] directly and pass it to the interpreter.

use anyhow::{Context, Result};
use serde::Deserialize;

fn default_loop_limit() -> usize {
    100_000
}

fn default_service_worker_threads() -> usize {
    2
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Hard cap on pretest-loop iterations, so authoring errors terminate.
    #[serde(default = "default_loop_limit")]
    pub loop_limit: usize,

    /// Worker threads for the service-dispatch runtime.
    #[serde(default = "default_service_worker_threads")]
    pub service_worker_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            loop_limit: default_loop_limit(),
            service_worker_threads: default_service_worker_threads(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, the optional config file, and
    /// `RITE_*` environment variables.
    ///
    /// The config file path defaults to `rite.toml` in the working directory
    /// and can be overridden with `RITE_CONFIG_PATH`.
    pub fn load() -> Result<Config> {
        let path =
            std::env::var("RITE_CONFIG_PATH").unwrap_or_else(|_| "rite.toml".to_string());

        let settings = config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(config::Environment::with_prefix("RITE"))
            .build()
            .context("Failed to load configuration")?;

        settings
            .try_deserialize()
            .context("Invalid configuration values")
    }
}
