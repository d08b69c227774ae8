//! Configuration loading and typed config structures for `TimeHandlr`.
//!
//! The canonical configuration lives in `timehandlr-config.yaml` at the
//! project root. The YAML sections map onto the structs below; every field
//! has a default so partial files (or no file at all) are valid.
//!
//! [`TimeHandlerSettings`] is the runtime form of the `scheduler` section.
//! It adds the class edit functions, which cannot come from YAML, and is
//! validated before a handler accepts it.

use std::path::Path;

use serde::Deserialize;

use crate::classes::ClassOps;
use crate::error::TimeError;

/// Environment variable that overrides `logging.level`.
pub const LOG_LEVEL_ENV: &str = "TIMEHANDLR_LOG";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
///
/// Mirrors the structure of `timehandlr-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TimeHandlrConfig {
    /// Scheduler defaults.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Host loop parameters.
    #[serde(default)]
    pub host: HostConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TimeHandlrConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// The `TIMEHANDLR_LOG` environment variable overrides
    /// `logging.level` when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.logging.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not to a mapping.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yml::from_str(yaml)?;
        Ok(config)
    }
}

/// Scheduler defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SchedulerConfig {
    /// Ticks used when an event is scheduled with a delay of 0.
    #[serde(default = "default_delay")]
    pub default_delay: u64,

    /// Ticks between class-cycle phases when no timing is given.
    #[serde(default = "default_cycle_timing")]
    pub default_cycle_timing: u64,

    /// Whether class-cycle specs are copied on registration.
    #[serde(default = "default_true")]
    pub copy_cycle_settings: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_delay: default_delay(),
            default_cycle_timing: default_cycle_timing(),
            copy_cycle_settings: true,
        }
    }
}

/// Host loop parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostConfig {
    /// Real-time milliseconds per frame (0 = step as fast as possible).
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,

    /// Number of frames to run before exiting.
    #[serde(default = "default_max_frames")]
    pub max_frames: u64,

    /// Random seed for computed cycle phases.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Number of sprites in the demo scene.
    #[serde(default = "default_things")]
    pub things: u32,

    /// Period shared by the synchronized blink cycles.
    #[serde(default = "default_blink_period")]
    pub blink_period: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: default_frame_interval_ms(),
            max_frames: default_max_frames(),
            seed: default_seed(),
            things: default_things(),
            blink_period: default_blink_period(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl LoggingConfig {
    /// Override the level with `TIMEHANDLR_LOG` when it is set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(LOG_LEVEL_ENV) {
            self.level = val;
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Runtime settings for a [`TimeHandler`](crate::TimeHandler).
#[derive(Debug, Clone, Copy)]
pub struct TimeHandlerSettings {
    /// Ticks used when an event is scheduled with a delay of 0.
    pub default_delay: u64,
    /// Ticks between class-cycle phases when no timing is given.
    pub default_cycle_timing: u64,
    /// Whether class-cycle specs are copied on registration.
    pub copy_cycle_settings: bool,
    /// Class edit functions used by class cycles.
    pub class_ops: ClassOps,
}

impl Default for TimeHandlerSettings {
    fn default() -> Self {
        Self {
            default_delay: default_delay(),
            default_cycle_timing: default_cycle_timing(),
            copy_cycle_settings: true,
            class_ops: ClassOps::default(),
        }
    }
}

impl TimeHandlerSettings {
    /// Build settings from the `scheduler` config section with the default
    /// class edit functions.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::InvalidConfig`] if the section is invalid.
    pub fn from_config(config: &SchedulerConfig) -> Result<Self, TimeError> {
        let settings = Self {
            default_delay: config.default_delay,
            default_cycle_timing: config.default_cycle_timing,
            copy_cycle_settings: config.copy_cycle_settings,
            class_ops: ClassOps::default(),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Replace the class edit functions.
    #[must_use]
    pub const fn with_class_ops(mut self, class_ops: ClassOps) -> Self {
        self.class_ops = class_ops;
        self
    }

    /// Check that the delays can actually move an event forward in time.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::InvalidConfig`] for a zero default delay or
    /// zero default cycle timing.
    pub fn validate(&self) -> Result<(), TimeError> {
        if self.default_delay == 0 {
            return Err(TimeError::InvalidConfig {
                reason: "default_delay must be at least 1".to_owned(),
            });
        }
        if self.default_cycle_timing == 0 {
            return Err(TimeError::InvalidConfig {
                reason: "default_cycle_timing must be at least 1".to_owned(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Default value functions for serde
// ---------------------------------------------------------------------------

const fn default_delay() -> u64 {
    1
}

const fn default_cycle_timing() -> u64 {
    1
}

const fn default_true() -> bool {
    true
}

const fn default_frame_interval_ms() -> u64 {
    16
}

const fn default_max_frames() -> u64 {
    240
}

const fn default_seed() -> u64 {
    42
}

const fn default_things() -> u32 {
    4
}

const fn default_blink_period() -> u64 {
    4
}

fn default_log_level() -> String {
    "info".to_owned()
}
