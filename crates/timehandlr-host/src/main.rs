//! Headless host binary for the `TimeHandlr` scheduler.
//!
//! This is the collaborator the scheduler expects: it owns the things being
//! animated, steps the clock once per frame, and logs what happens. It
//! loads configuration, builds the demo scene, and runs the frame loop
//! until the frame budget is spent.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `timehandlr-config.yaml` (or the path in
//!    `TIMEHANDLR_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Build the scene: sprites, class cycles, game events
//! 4. Run the frame loop
//! 5. Log the result

mod error;
mod runner;
mod scene;

use std::path::PathBuf;

use timehandlr_core::TimeHandlrConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::HostError;
use crate::scene::Scene;

/// Environment variable naming an alternative config file.
const CONFIG_PATH_ENV: &str = "TIMEHANDLR_CONFIG";

/// Default config file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "timehandlr-config.yaml";

/// Application entry point for the host.
///
/// # Errors
///
/// Returns an error if configuration, scene setup, or a step fails.
#[tokio::main]
async fn main() -> Result<(), HostError> {
    // 1. Load configuration; the log level lives in it.
    let (config, config_path) = load_config()?;

    // 2. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("timehandlr-host starting");
    info!(
        config_path = ?config_path,
        default_delay = config.scheduler.default_delay,
        default_cycle_timing = config.scheduler.default_cycle_timing,
        copy_cycle_settings = config.scheduler.copy_cycle_settings,
        seed = config.host.seed,
        "Configuration loaded"
    );

    // 3. Build the scene.
    let mut scene = Scene::build(&config)?;

    // 4. Run the frame loop.
    let result = runner::run_frames(&mut scene, &config.host).await?;

    // 5. Log results.
    runner::log_run_end(&result, &scene);
    info!(frames = result.frames, "timehandlr-host shutdown complete");

    Ok(())
}

/// Load configuration from `TIMEHANDLR_CONFIG` or `timehandlr-config.yaml`.
///
/// A missing file means defaults; `TIMEHANDLR_LOG` still applies.
fn load_config() -> Result<(TimeHandlrConfig, Option<PathBuf>), HostError> {
    let path = std::env::var_os(CONFIG_PATH_ENV)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if path.exists() {
        let config = TimeHandlrConfig::from_file(&path)?;
        Ok((config, Some(path)))
    } else {
        let mut config = TimeHandlrConfig::default();
        config.logging.apply_env_overrides();
        Ok((config, None))
    }
}
