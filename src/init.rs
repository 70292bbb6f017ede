//! Initialization system for the engine
//!
//! Provides a centralized initialization API that embedding hosts should call
//! before running programs. It installs the tracing subscriber and loads the
//! runtime configuration exactly once.
//!
//! # Example
//!
//! ```rust,no_run
//! use rite_core::init::InitBuilder;
//!
//! InitBuilder::new().init().unwrap();
//! ```

use anyhow::{anyhow, Context, Result};
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Global initialization state
static INIT_STATE: OnceLock<InitState> = OnceLock::new();

#[derive(Debug)]
struct InitState {
    config: Config,
}

/// Options for initializing the engine
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Config file path (overrides default search)
    pub config_path: Option<String>,

    /// Whether to install a tracing subscriber. Hosts that already have one
    /// set this to false.
    pub install_tracing: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            config_path: None,
            install_tracing: true,
        }
    }
}

/// Builder for constructing InitOptions
pub struct InitBuilder {
    options: InitOptions,
}

impl InitBuilder {
    pub fn new() -> Self {
        Self {
            options: InitOptions::default(),
        }
    }

    /// Set the config file path
    pub fn config_path(mut self, path: impl Into<String>) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    /// Set whether to install the tracing subscriber
    pub fn install_tracing(mut self, install: bool) -> Self {
        self.options.install_tracing = install;
        self
    }

    /// Initialize the engine with the configured options
    pub fn init(self) -> Result<()> {
        initialize(self.options)
    }
}

impl Default for InitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize the engine with the given options.
///
/// Calling this function multiple times is safe - subsequent calls are no-ops.
pub fn initialize(options: InitOptions) -> Result<()> {
    if INIT_STATE.get().is_some() {
        return Ok(());
    }

    if let Some(path) = &options.config_path {
        std::env::set_var("RITE_CONFIG_PATH", path);
    }

    let config = Config::load().context("Failed to load configuration")?;

    if options.install_tracing {
        // try_init so an existing subscriber (e.g. in tests) is not an error
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();
    }

    INIT_STATE
        .set(InitState { config })
        .map_err(|_| anyhow!("Initialization already completed"))?;

    Ok(())
}

/// Check if the engine has been initialized
pub fn is_initialized() -> bool {
    INIT_STATE.get().is_some()
}

/// Get the loaded configuration, or defaults when `initialize` was never
/// called (library consumers may construct interpreters directly).
pub fn get_config() -> Config {
    INIT_STATE
        .get()
        .map(|state| state.config.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        InitBuilder::new().install_tracing(false).init().unwrap();
        InitBuilder::new().install_tracing(false).init().unwrap();
        assert!(is_initialized());
        assert_eq!(get_config().loop_limit, 100_000);
    }
}
