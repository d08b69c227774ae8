//! Frame loop for the host.
//!
//! [`run_frames`] steps the scene once per frame on a
//! `tokio::time::interval` until the frame budget is spent. With a frame
//! interval of 0 it runs flat out, yielding to the runtime between frames.

use std::time::Duration;

use timehandlr_core::config::HostConfig;
use tokio::time::MissedTickBehavior;
use tracing::{info, trace};

use crate::error::HostError;
use crate::scene::{Scene, SceneReport};

/// Result of a frame loop run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    /// Frames stepped.
    pub frames: u64,
    /// Callbacks fired across all frames.
    pub fired: u64,
    /// Tombstones skipped across all frames.
    pub skipped: u64,
    /// Scene state after the last frame.
    pub final_report: SceneReport,
}

/// Step `scene` for `host.max_frames` frames.
///
/// # Errors
///
/// Returns [`HostError::Time`] if a step fails.
pub async fn run_frames(scene: &mut Scene, host: &HostConfig) -> Result<RunResult, HostError> {
    let mut ticker = (host.frame_interval_ms > 0).then(|| {
        let mut ticker = tokio::time::interval(Duration::from_millis(host.frame_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    });

    info!(
        max_frames = host.max_frames,
        frame_interval_ms = host.frame_interval_ms,
        "Frame loop starting"
    );

    let mut frames: u64 = 0;
    let mut fired: u64 = 0;
    let mut skipped: u64 = 0;
    while frames < host.max_frames {
        match ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => tokio::task::yield_now().await,
        }

        let summary = scene.step()?;
        frames = frames.saturating_add(1);
        fired = fired.saturating_add(u64::from(summary.fired));
        skipped = skipped.saturating_add(u64::from(summary.skipped));
        trace!(
            tick = summary.tick,
            fired = summary.fired,
            rescheduled = summary.rescheduled,
            "Frame stepped"
        );
    }

    Ok(RunResult {
        frames,
        fired,
        skipped,
        final_report: scene.report(),
    })
}

/// Log the end-of-run summary.
pub fn log_run_end(result: &RunResult, scene: &Scene) {
    let report = &result.final_report;
    info!(
        frames = result.frames,
        fired = result.fired,
        skipped = result.skipped,
        final_tick = report.tick,
        sprites = report.sprites,
        alive = report.alive,
        score = report.score,
        pending_events = report.pending_events,
        next_due_tick = ?scene.handler().next_due_tick(),
        "Run ended"
    );
    for (id, class_name) in scene.classes() {
        info!(id, class_name, "Final sprite classes");
    }
}
