//! Engine configuration.
//!
//! Settings are read from an optional file (TOML, YAML or JSON) and then
//! overridden by `REBAC_*` environment variables, e.g.
//! `REBAC_DATABASE_URL` or `REBAC_RESOLVER__MAX_DEPTH=10`.

use crate::{
    error::{RebacError, Result},
    logging::LoggingConfig,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Bounds applied to every Check, Expand and ListObjects invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Maximum number of userset hops followed from the root.
    pub max_depth: u32,
    /// Maximum number of tuples fetched by a single invocation.
    pub max_tuples_per_request: usize,
    /// Wall-clock budget for a single invocation.
    pub timeout_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_depth: 25,
            max_tuples_per_request: 10_000,
            timeout_ms: 30_000,
        }
    }
}

impl ResolverConfig {
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_tuples_per_request(mut self, max_tuples: usize) -> Self {
        self.max_tuples_per_request = max_tuples;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_depth == 0 {
            return Err(RebacError::Configuration(
                "resolver.max_depth must be at least 1".to_string(),
            ));
        }
        if self.max_tuples_per_request == 0 {
            return Err(RebacError::Configuration(
                "resolver.max_tuples_per_request must be at least 1".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(RebacError::Configuration(
                "resolver.timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level settings for processes embedding the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub resolver: ResolverConfig,
    pub logging: LoggingConfig,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            resolver: ResolverConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineSettings {
    /// Loads settings from `path` (if given) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(Self::environment());
        Self::build(builder)
    }

    /// Loads settings from an in-memory TOML document only. `REBAC_*`
    /// variables are not consulted.
    pub fn from_toml(content: &str) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from_str(content, config::FileFormat::Toml));
        Self::build(builder)
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix("REBAC")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn build(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let settings: EngineSettings = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RebacError::Configuration(e.to_string()))?;
        settings.resolver.validate()?;
        Ok(settings)
    }
}
