//! Error types for the timehandlr-core crate.
//!
//! Scheduling never panics on bad input: every fallible operation on the
//! clock, the event queue, or a class cycle returns a [`TimeError`].

/// Errors that can occur while scheduling or stepping events.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeError {
    /// The tick counter, or a due tick computed from it, would overflow.
    #[error("tick overflow: cannot schedule beyond u64::MAX")]
    TickOverflow,

    /// The scheduling parameters cannot describe a valid event.
    #[error("invalid event: {reason}")]
    InvalidEvent {
        /// Explanation of what is wrong with the parameters.
        reason: String,
    },

    /// The handler settings are unusable (e.g. a zero default delay).
    #[error("invalid scheduler configuration: {reason}")]
    InvalidConfig {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },

    /// `step` was called from inside an event callback.
    #[error("re-entrant step at tick {tick}: callbacks must not advance the clock")]
    Reentrant {
        /// The tick being dispatched when the nested call happened.
        tick: u64,
    },

    /// A thing passed to the class-cycle layer is already mutably borrowed.
    #[error("thing is already borrowed; cannot attach class cycle `{name}`")]
    ThingBorrowed {
        /// Name of the cycle being registered or started.
        name: String,
    },
}
