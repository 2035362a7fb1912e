//! Engine configuration.
//!
//! [`EngineConfig`] carries the tunables of the matching engine and of the worker pool. Every
//! field has a default, so an empty TOML document (or no document at all) yields a working
//! configuration:
//!
//! ```toml
//! [search]
//! keep_interactive_elements = false
//!
//! [trace]
//! trace_length_max = 25
//!
//! [analysis]
//! worker_count = 4
//! max_attempts = 2
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default upper bound on the number of hops in a trace chain.
pub const DEFAULT_TRACE_LENGTH_MAX: usize = 25;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Search engine settings.
    pub search: SearchConfig,
    /// Trace engine settings.
    pub trace: TraceConfig,
    /// Worker pool settings.
    pub analysis: AnalysisConfig,
}

/// Settings for the search engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Keep call sites located in interactive UI callbacks (`onClick`, `onKeyDown`, ...).
    ///
    /// These are dropped by default since they require user interaction to reach.
    pub keep_interactive_elements: bool,
}

/// Settings for the trace engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Maximum number of hops in a trace chain, used when a rule does not set
    /// `TRACELENGTHMAX` itself.
    pub trace_length_max: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        TraceConfig {
            trace_length_max: DEFAULT_TRACE_LENGTH_MAX,
        }
    }
}

/// Settings for the worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Number of concurrently analysed applications.
    pub worker_count: usize,
    /// How often an application is dispatched before it is reported as failed, counting
    /// dispatches lost to dead workers.
    pub max_attempts: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            worker_count: 1,
            max_attempts: 2,
        }
    }
}

impl EngineConfig {
    /// Parses a configuration from a TOML document.
    ///
    /// Missing sections and fields fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the document is not valid TOML, does not match the
    /// configuration schema, or fails [`EngineConfig::validate`].
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileError`] if the file cannot be read, otherwise the same errors as
    /// [`EngineConfig::from_toml`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Checks the value ranges of all fields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.trace.trace_length_max == 0 {
            return Err(Error::Config(
                "trace.trace_length_max must be at least 1".to_string(),
            ));
        }
        if self.analysis.worker_count == 0 {
            return Err(Error::Config(
                "analysis.worker_count must be at least 1".to_string(),
            ));
        }
        if self.analysis.max_attempts == 0 {
            return Err(Error::Config(
                "analysis.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
