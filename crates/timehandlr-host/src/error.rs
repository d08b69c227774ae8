//! Error types for the host binary.
//!
//! [`HostError`] is the top-level error type that wraps all possible
//! failure modes during scene setup and the frame loop.

/// Top-level error for the host binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: timehandlr_core::ConfigError,
    },

    /// The scheduler rejected an operation.
    #[error("scheduler error: {source}")]
    Time {
        /// The underlying scheduler error.
        #[from]
        source: timehandlr_core::TimeError,
    },

    /// The demo scene could not be built.
    #[error("scene error: {message}")]
    Scene {
        /// Description of the scene failure.
        message: String,
    },
}
