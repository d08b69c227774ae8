//! Logical clock for the scheduler.
//!
//! The clock is the single source of truth for scheduler time. It holds a
//! tick counter that only ever moves forward by one, and a pause flag the
//! host can flip to freeze time without tearing down the event queue.
//!
//! There is no wall-clock correlation: one tick is whatever the host decides
//! a frame is.

use crate::error::TimeError;

/// Monotonic tick counter with a pause switch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickClock {
    /// Current tick (starts at 0, incremented by every unpaused step).
    tick: u64,

    /// Whether stepping is currently frozen.
    paused: bool,
}

impl TickClock {
    /// Create a clock at tick 0, running.
    pub const fn new() -> Self {
        Self {
            tick: 0,
            paused: false,
        }
    }

    /// Create a clock that is already at `tick`.
    #[cfg(test)]
    pub(crate) const fn from_tick(tick: u64) -> Self {
        Self {
            tick,
            paused: false,
        }
    }

    /// Advance the clock by one tick. Returns the new tick number.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::TickOverflow`] if the counter would exceed
    /// `u64::MAX`.
    pub fn advance(&mut self) -> Result<u64, TimeError> {
        self.tick = self.tick.checked_add(1).ok_or(TimeError::TickOverflow)?;
        Ok(self.tick)
    }

    /// Return the current tick number.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Freeze the clock. Steps become no-ops until [`resume`](Self::resume).
    pub const fn pause(&mut self) {
        self.paused = true;
    }

    /// Unfreeze the clock.
    pub const fn resume(&mut self) {
        self.paused = false;
    }

    /// Whether the clock is frozen.
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Absolute tick that lies `delay` ticks after now.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::TickOverflow`] if the sum overflows.
    pub fn offset(&self, delay: u64) -> Result<u64, TimeError> {
        self.tick.checked_add(delay).ok_or(TimeError::TickOverflow)
    }

    /// Ticks remaining until `target`, or 0 if it is now or in the past.
    pub const fn ticks_until(&self, target: u64) -> u64 {
        target.saturating_sub(self.tick)
    }
}
